//! RFC 7807 問題文件（ACME 錯誤回應本體）。

use serde::Deserialize;

use crate::transport::HttpResponse;

/// badNonce 錯誤的 type URN，觸發簽名重試而非直接失敗。
pub const BAD_NONCE: &str = "urn:ietf:params:acme:error:badNonce";

/// 伺服器返回的問題文件。本體無法解析時以狀態碼合成一份。
#[derive(Debug, Clone, Deserialize)]
pub struct Problem {
    /// 錯誤類型 URN。
    #[serde(rename = "type")]
    pub problem_type: Option<String>,
    /// 人類可讀的描述。
    pub detail: Option<String>,
    /// HTTP 狀態碼（本體內或回應行）。
    pub status: Option<u16>,
    /// 個別識別符的子問題（例如多域名訂單中單一域名被拒）。
    #[serde(default)]
    pub subproblems: Vec<Subproblem>,
}

/// 問題文件中的子問題。
#[derive(Debug, Clone, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type")]
    pub problem_type: Option<String>,
    pub detail: Option<String>,
    pub identifier: Option<crate::order::Identifier>,
}

impl Problem {
    /// 由錯誤回應建立問題文件；本體不是合法問題文件時退回狀態碼。
    pub fn from_response(response: &HttpResponse) -> Self {
        match serde_json::from_slice::<Problem>(&response.body) {
            Ok(mut problem) => {
                if problem.status.is_none() {
                    problem.status = Some(response.status);
                }
                problem
            }
            Err(_) => Problem {
                problem_type: None,
                detail: Some(format!("HTTP status {}", response.status)),
                status: Some(response.status),
                subproblems: Vec::new(),
            },
        }
    }

    /// 是否為 badNonce 錯誤。
    pub fn is_bad_nonce(&self) -> bool {
        self.problem_type.as_deref() == Some(BAD_NONCE)
    }
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let problem_type = self.problem_type.as_deref().unwrap_or("about:blank");
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", problem_type, detail),
            None => write!(f, "{}", problem_type),
        }
    }
}

impl std::error::Error for Problem {}
