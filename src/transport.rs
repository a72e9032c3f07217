//! HTTP 傳輸層抽象。
//!
//! 協議邏輯只依賴 [`HttpTransport`] trait，正式環境由
//! [`ReqwestTransport`] 實作，測試則以 [`MockTransport`] 注入
//! 預先排定的回應並記錄所有送出的請求。

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use serde::de::DeserializeOwned;
use thiserror::Error;

/// 傳輸層錯誤。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("No response scripted for {0}")]
    NoResponse(String),
    #[error("Lock poisoned")]
    LockPoisoned,
}

type Result<T> = std::result::Result<T, TransportError>;

/// 傳輸層回傳的回應快照：狀態碼、協議相關標頭與原始本體。
///
/// 只擷取協議邏輯需要的標頭，避免上層依賴特定 HTTP 客戶端的型別。
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// HTTP 狀態碼。
    pub status: u16,
    /// `Location` 標頭（新資源的 URL）。
    pub location: Option<String>,
    /// `Replay-Nonce` 標頭。
    pub replay_nonce: Option<String>,
    /// `Retry-After` 標頭原始值。
    pub retry_after: Option<String>,
    /// 所有 `Link` 標頭的原始值。
    pub links: Vec<String>,
    /// 回應本體。
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// 建立僅含狀態碼的回應，其餘欄位以 builder 方法補齊。
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// 設定回應本體。
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// 設定 JSON 回應本體（serde 序列化失敗時本體為空）。
    pub fn with_json<T: serde::Serialize>(mut self, value: &T) -> Self {
        self.body = serde_json::to_vec(value).unwrap_or_default();
        self
    }

    /// 設定 `Replay-Nonce` 標頭。
    pub fn with_nonce(mut self, nonce: &str) -> Self {
        self.replay_nonce = Some(nonce.to_string());
        self
    }

    /// 設定 `Location` 標頭。
    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    /// 設定 `Retry-After` 標頭。
    pub fn with_retry_after(mut self, value: &str) -> Self {
        self.retry_after = Some(value.to_string());
        self
    }

    /// 追加一個 `Link` 標頭。
    pub fn with_link(mut self, link: &str) -> Self {
        self.links.push(link.to_string());
        self
    }

    /// 狀態碼是否為 2xx。
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 將本體解析為 JSON。
    pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// `Retry-After` 的秒數；標頭缺席或非數值時為 0。
    ///
    /// HTTP-date 形式的 `Retry-After` 極少見於 ACME 伺服器，不支援。
    pub fn retry_after_seconds(&self) -> u64 {
        self.retry_after
            .as_deref()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// 解析所有 `rel="alternate"` 的 Link 標頭，返回其目標 URL。
    ///
    /// 伺服器可依 RFC 7230 將多個 link-value 以逗號合併於同一標頭，
    /// 因此先按逗號切分再逐一比對 `rel`。
    pub fn alternate_links(&self) -> Vec<String> {
        self.links
            .iter()
            .flat_map(|header| header.split(','))
            .filter(|link| {
                link.contains("rel=\"alternate\"") || link.contains("rel=alternate")
            })
            .filter_map(|link| {
                let start = link.find('<')?;
                let end = link.find('>')?;
                Some(link[start + 1..end].to_string())
            })
            .collect()
    }
}

/// 協議層所需的最小 HTTP 介面。
pub trait HttpTransport: Send + Sync {
    /// 發送 GET 請求（directory 與 ARI 查詢使用）。
    fn get(&self, url: &str) -> Result<HttpResponse>;

    /// 發送 HEAD 請求（取得新 nonce 使用）。
    fn head(&self, url: &str) -> Result<HttpResponse>;

    /// 發送本體為 JWS 的 POST 請求，
    /// `Content-Type` 為 `application/jose+json`。
    fn post_jose(&self, url: &str, body: &str) -> Result<HttpResponse>;
}

const JOSE_CONTENT_TYPE: &str = "application/jose+json";

/// 以 `reqwest` 的 blocking 客戶端實作的正式傳輸層。
#[derive(Debug)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// 建立新的傳輸層實例。
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: reqwest::blocking::Client::builder().build()?,
        })
    }

    fn capture(response: reqwest::blocking::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let location = header("Location");
        let replay_nonce = header("Replay-Nonce");
        let retry_after = header("Retry-After");
        let links = response
            .headers()
            .get_all("Link")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        let body = response.bytes()?.to_vec();
        Ok(HttpResponse {
            status,
            location,
            replay_nonce,
            retry_after,
            links,
            body,
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        Self::capture(self.client.get(url).send()?)
    }

    fn head(&self, url: &str) -> Result<HttpResponse> {
        Self::capture(self.client.head(url).send()?)
    }

    fn post_jose(&self, url: &str, body: &str) -> Result<HttpResponse> {
        Self::capture(
            self.client
                .post(url)
                .header("Content-Type", JOSE_CONTENT_TYPE)
                .body(body.to_string())
                .send()?,
        )
    }
}

/// [`MockTransport`] 記錄的單筆請求。
#[derive(Debug, Clone)]
pub struct MockRequest {
    /// HTTP 方法（`GET`、`HEAD` 或 `POST`）。
    pub method: &'static str,
    /// 請求 URL。
    pub url: String,
    /// 請求本體（GET/HEAD 為空字串）。
    pub body: String,
}

/// 測試用的傳輸層：按 URL 排定回應序列並記錄收到的請求。
///
/// 同一 URL 可排定多筆回應，依序消耗；沒有排定回應的請求
/// 返回 [`TransportError::NoResponse`]。
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<String, VecDeque<HttpResponse>>>,
    requests: Mutex<Vec<MockRequest>>,
}

impl MockTransport {
    /// 建立空的模擬傳輸層。
    pub fn new() -> Self {
        Self::default()
    }

    /// 為指定 URL 追加一筆排定回應。
    pub fn push(&self, url: &str, response: HttpResponse) {
        if let Ok(mut responses) = self.responses.lock() {
            responses
                .entry(url.to_string())
                .or_default()
                .push_back(response);
        }
    }

    /// 取得至今記錄的所有請求。
    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests
            .lock()
            .map(|reqs| reqs.clone())
            .unwrap_or_default()
    }

    fn dispatch(&self, method: &'static str, url: &str, body: &str) -> Result<HttpResponse> {
        self.requests
            .lock()
            .map_err(|_| TransportError::LockPoisoned)?
            .push(MockRequest {
                method,
                url: url.to_string(),
                body: body.to_string(),
            });
        self.responses
            .lock()
            .map_err(|_| TransportError::LockPoisoned)?
            .get_mut(url)
            .and_then(|queue| queue.pop_front())
            .ok_or_else(|| TransportError::NoResponse(url.to_string()))
    }
}

impl HttpTransport for MockTransport {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        self.dispatch("GET", url, "")
    }

    fn head(&self, url: &str) -> Result<HttpResponse> {
        self.dispatch("HEAD", url, "")
    }

    fn post_jose(&self, url: &str, body: &str) -> Result<HttpResponse> {
        self.dispatch("POST", url, body)
    }
}
