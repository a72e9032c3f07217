//! 授權資源：單一識別符的驗證狀態，含其挑戰列表。

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::{
    challenge::{Challenge, ChallengeHandle, ChallengeType},
    order::Identifier,
    session::{Session, SessionError},
    wait::PollOutcome,
};

/// 授權操作的錯誤。
#[derive(Debug, Error)]
pub enum AuthorizationError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, AuthorizationError>;

/// 授權狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl AuthorizationStatus {
    /// 是否為終態（pending 以外皆是）。
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// 授權資源。
///
/// 萬用字元訂單的授權中 `wildcard` 為 `true`，且識別符值
/// 不含 `*.` 前綴。
#[derive(Debug, Clone, Deserialize)]
pub struct Authorization {
    /// 被授權的識別符。
    pub identifier: Identifier,
    /// 狀態。
    pub status: AuthorizationStatus,
    /// 到期時刻。
    pub expires: Option<DateTime<Utc>>,
    /// 可用的挑戰。
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    /// 是否來自萬用字元識別符。
    #[serde(default)]
    pub wildcard: bool,
}

/// 單一授權的操作控制代碼。
pub struct AuthorizationHandle<'a> {
    session: &'a Session,
    url: String,
    cached: Authorization,
}

impl<'a> AuthorizationHandle<'a> {
    pub(crate) fn fetch(session: &'a Session, url: &str) -> Result<Self> {
        let response = session.post_as_get(url)?;
        Ok(Self {
            session,
            url: url.to_string(),
            cached: response.json()?,
        })
    }

    /// 授權 URL。
    pub fn url(&self) -> &str {
        &self.url
    }

    /// 最近一次取得的授權資源。
    pub fn resource(&self) -> &Authorization {
        &self.cached
    }

    /// 以 POST-as-GET 重新取得授權資源。
    pub fn refresh(&mut self) -> Result<&Authorization> {
        let response = self.session.post_as_get(&self.url)?;
        self.cached = response.json()?;
        Ok(&self.cached)
    }

    /// 取出指定類型的挑戰控制代碼；授權不提供該類型時為 `None`。
    pub fn challenge(&self, kind: ChallengeType) -> Option<ChallengeHandle<'a>> {
        self.cached
            .challenges
            .iter()
            .find(|c| c.kind == kind.as_str())
            .map(|c| ChallengeHandle::new(self.session, c.clone()))
    }

    /// 輪詢直到授權達終態或等待被取消。
    pub fn poll(&mut self) -> Result<PollOutcome<AuthorizationStatus>> {
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

    /// 停用尚未使用的授權，釋放伺服器端的驗證義務。
    pub fn deactivate(&mut self) -> Result<&Authorization> {
        let response = self
            .session
            .signed_post_json(&self.url, &serde_json::json!({"status": "deactivated"}))?;
        self.cached = response.json()?;
        Ok(&self.cached)
    }
}
