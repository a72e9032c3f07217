//! ARI（ACME Renewal Information，RFC 9773）查詢。
//!
//! 唯一不簽名的協議讀取：以普通 GET 查詢
//! `{renewalInfo}/{CertID}`，不消耗 nonce。

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    session::{Session, SessionError},
    transport::TransportError,
};

/// ARI 查詢的錯誤。
#[derive(Debug, Error)]
pub enum RenewalError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Renewal info endpoint returned status {0}")]
    Status(u16),
}

type Result<T> = std::result::Result<T, RenewalError>;

/// 伺服器建議的續期時間窗。
#[derive(Debug, Clone, Deserialize)]
pub struct RenewalWindow {
    /// 窗口起點。
    pub start: DateTime<Utc>,
    /// 窗口終點。
    pub end: DateTime<Utc>,
}

/// renewalInfo 回應本體。
#[derive(Debug, Clone, Deserialize)]
pub struct RenewalInfo {
    /// 建議的續期時間窗。
    #[serde(rename = "suggestedWindow")]
    pub suggested_window: RenewalWindow,
    /// 建議窗口的說明頁面。
    #[serde(rename = "explanationURL")]
    pub explanation_url: Option<String>,
}

/// ARI 查詢結果：回應本體加上下次查詢前應等待的秒數。
#[derive(Debug, Clone)]
pub struct RenewalInfoResponse {
    /// 續期建議。
    pub renewal_info: RenewalInfo,
    /// `Retry-After` 的秒數；標頭缺席時為 0。
    pub retry_after_seconds: u64,
}

impl RenewalInfoResponse {
    /// 當前時刻是否已進入建議窗口。
    pub fn window_open(&self, now: DateTime<Utc>) -> bool {
        now >= self.renewal_info.suggested_window.start
    }
}

/// 查詢憑證的續期建議。
///
/// 伺服器不支援 ARI（directory 無 `renewalInfo`）時返回 `Ok(None)`，
/// 呼叫端據此退回固定閾值的續期策略。
pub fn get_renewal_info(session: &Session, cert_id: &str) -> Result<Option<RenewalInfoResponse>> {
    let base_url = match session.directory()?.renewal_info {
        Some(url) => url,
        None => return Ok(None),
    };
    let url = format!("{}/{}", base_url.trim_end_matches('/'), cert_id);
    let response = session.transport().get(&url)?;
    if !response.is_success() {
        return Err(RenewalError::Status(response.status));
    }
    let renewal_info = response.json()?;
    Ok(Some(RenewalInfoResponse {
        renewal_info,
        retry_after_seconds: response.retry_after_seconds(),
    }))
}
