//! 挑戰資源：key authorization 計算、觸發驗證與輪詢。

use openssl::sha::sha256;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    base64,
    key::KeyError,
    problem::Problem,
    session::{Session, SessionError},
    wait::PollOutcome,
};

/// 挑戰操作的錯誤。
#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Challenge has no token")]
    MissingToken,
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, ChallengeError>;

/// 已知的挑戰類型。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeType {
    Http01,
    Dns01,
    TlsAlpn01,
    /// 跨續期持久的 DNS 挑戰（draft），回應附帶 `issuerDomains`。
    DnsPersist01,
}

impl ChallengeType {
    /// 線上格式的類型字串。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
            Self::DnsPersist01 => "dns-persist-01",
        }
    }

    /// 解析類型字串，未知類型返回 `None`。
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "http-01" => Some(Self::Http01),
            "dns-01" => Some(Self::Dns01),
            "tls-alpn-01" => Some(Self::TlsAlpn01),
            "dns-persist-01" => Some(Self::DnsPersist01),
            _ => None,
        }
    }
}

/// 挑戰狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    /// 是否為終態。
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid | Self::Invalid)
    }
}

/// 挑戰資源。未知的挑戰類型保留原始字串，由呼叫端決定是否處理。
#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    /// 挑戰類型字串。
    #[serde(rename = "type")]
    pub kind: String,
    /// 挑戰 URL。
    pub url: String,
    /// 狀態。
    pub status: ChallengeStatus,
    /// 驗證權杖。
    pub token: Option<String>,
    /// 驗證完成時刻。
    pub validated: Option<String>,
    /// 驗證失敗時的問題文件。
    pub error: Option<Problem>,
    /// dns-persist-01 回應的簽發者域名列表。
    #[serde(rename = "issuerDomains", default)]
    pub issuer_domains: Vec<String>,
}

impl Challenge {
    /// 解析後的挑戰類型（未知類型為 `None`）。
    pub fn challenge_type(&self) -> Option<ChallengeType> {
        ChallengeType::from_str(&self.kind)
    }
}

/// 單一挑戰的操作控制代碼。
pub struct ChallengeHandle<'a> {
    session: &'a Session,
    url: String,
    cached: Challenge,
}

impl<'a> ChallengeHandle<'a> {
    pub(crate) fn new(session: &'a Session, challenge: Challenge) -> Self {
        Self {
            session,
            url: challenge.url.clone(),
            cached: challenge,
        }
    }

    /// 最近一次取得的挑戰資源。
    pub fn resource(&self) -> &Challenge {
        &self.cached
    }

    /// 以 POST-as-GET 重新取得挑戰資源。
    pub fn refresh(&mut self) -> Result<&Challenge> {
        let response = self.session.post_as_get(&self.url)?;
        self.cached = response.json()?;
        Ok(&self.cached)
    }

    /// 通知伺服器開始驗證（payload 為空 JSON 物件 `{}`，
    /// 與 POST-as-GET 的空字串 payload 區分）。
    pub fn validate(&mut self) -> Result<&Challenge> {
        let response = self
            .session
            .signed_post_json(&self.url, &serde_json::json!({}))?;
        self.cached = response.json()?;
        Ok(&self.cached)
    }

    /// 輪詢直到挑戰達終態或等待被取消。
    pub fn poll(&mut self) -> Result<PollOutcome<ChallengeStatus>> {
        loop {
            let status = self.cached.status;
            if status.is_terminal() {
                return Ok(PollOutcome::Settled(status));
            }
            if !self.session.wait() {
                return Ok(PollOutcome::Pending(status));
            }
            self.refresh()?;
        }
    }

    /// key authorization：`token.thumbprint(帳戶金鑰)`。
    pub fn key_authorization(&self) -> Result<String> {
        let token = self.cached.token.as_deref().ok_or(ChallengeError::MissingToken)?;
        Ok(format!("{}.{}", token, self.session.key().thumbprint()?))
    }

    /// http-01 驗證檔案內容（即 key authorization 本身）。
    pub fn http01_content(&self) -> Result<String> {
        self.key_authorization()
    }

    /// dns-01 TXT 記錄值：base64url(SHA-256(key authorization))。
    pub fn dns01_txt_value(&self) -> Result<String> {
        let key_authorization = self.key_authorization()?;
        Ok(base64::encode(sha256(key_authorization.as_bytes())))
    }
}
