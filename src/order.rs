//! 訂單資源：憑證申請的主狀態機。
//!
//! 生命週期：pending（等待授權）→ ready（可 finalize）→
//! processing（簽發中）→ valid（可下載）/ invalid。
//! finalize 與 download 的前置狀態在本地檢查，不送出注定失敗的請求。

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    authorization::{AuthorizationError, AuthorizationHandle},
    base64,
    certificate::{CertificateChain, CertificateError},
    problem::Problem,
    session::{Session, SessionError},
    wait::PollOutcome,
};

/// 訂單操作的錯誤。
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthorizationError),
    #[error("Order is not ready for finalization (status: {0:?})")]
    NotReady(OrderStatus),
    #[error("Order is not valid (status: {0:?})")]
    NotValid(OrderStatus),
    #[error("Valid order has no certificate URL")]
    MissingCertificate,
    #[error("Server response missing Location header")]
    MissingLocation,
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
}

type Result<T> = std::result::Result<T, OrderError>;

/// 識別符（目前僅 `dns` 類型）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    /// 識別符類型。
    #[serde(rename = "type")]
    pub kind: String,
    /// 識別符值；萬用字元域名以 `*.` 開頭。
    pub value: String,
}

impl Identifier {
    /// 建立 DNS 識別符。
    pub fn dns(value: &str) -> Self {
        Self {
            kind: "dns".to_string(),
            value: value.to_string(),
        }
    }
}

/// 訂單狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    /// 輪詢是否應繼續（pending 與 processing 為過渡狀態）。
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

/// 訂單資源。
#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    /// 狀態。
    pub status: OrderStatus,
    /// 到期時刻。
    pub expires: Option<DateTime<Utc>>,
    /// 訂單涵蓋的識別符。
    pub identifiers: Vec<Identifier>,
    /// 要求的有效期起點。
    #[serde(rename = "notBefore")]
    pub not_before: Option<DateTime<Utc>>,
    /// 要求的有效期終點。
    #[serde(rename = "notAfter")]
    pub not_after: Option<DateTime<Utc>>,
    /// 各識別符的授權 URL。
    #[serde(default)]
    pub authorizations: Vec<String>,
    /// finalize 端點。
    pub finalize: String,
    /// 簽發完成後的憑證下載 URL。
    pub certificate: Option<String>,
    /// 訂單失敗時的問題文件。
    pub error: Option<Problem>,
    /// ARI 續期時被取代憑證的 CertID。
    pub replaces: Option<String>,
}

/// newOrder 請求參數。
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewOrder {
    /// 申請的識別符。
    pub identifiers: Vec<Identifier>,
    /// 要求的有效期起點。
    #[serde(rename = "notBefore", skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    /// 要求的有效期終點。
    #[serde(rename = "notAfter", skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
    /// ARI 續期時被取代憑證的 CertID。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,
}

impl NewOrder {
    /// 以 DNS 域名列表建立請求。
    pub fn dns(domains: &[&str]) -> Self {
        Self {
            identifiers: domains.iter().map(|d| Identifier::dns(d)).collect(),
            ..Self::default()
        }
    }

    /// 標記此訂單為某既有憑證的 ARI 續期。
    pub fn replaces(mut self, cert_id: &str) -> Self {
        self.replaces = Some(cert_id.to_string());
        self
    }
}

/// 單一訂單的操作控制代碼。
pub struct OrderHandle<'a> {
    session: &'a Session,
    url: String,
    cached: Order,
}

impl<'a> OrderHandle<'a> {
    /// 送出 newOrder 請求，訂單 URL 取自 `Location` 標頭。
    pub fn create(session: &'a Session, request: &NewOrder) -> Result<Self> {
        let new_order_url = session.directory()?.new_order;
        let response = session.signed_post_json(&new_order_url, request)?;
        let url = response.location.clone().ok_or(OrderError::MissingLocation)?;
        Ok(Self {
            session,
            url,
            cached: response.json()?,
        })
    }

    /// 以既有訂單 URL 取回控制代碼。
    pub fn fetch(session: &'a Session, url: &str) -> Result<Self> {
        let response = session.post_as_get(url)?;
        Ok(Self {
            session,
            url: url.to_string(),
            cached: response.json()?,
        })
    }

    /// 訂單 URL。
    pub fn url(&self) -> &str {
        &self.url
    }

    /// 最近一次取得的訂單資源。
    pub fn resource(&self) -> &Order {
        &self.cached
    }

    /// 以 POST-as-GET 重新取得訂單資源。
    pub fn refresh(&mut self) -> Result<&Order> {
        let response = self.session.post_as_get(&self.url)?;
        self.cached = response.json()?;
        Ok(&self.cached)
    }

    /// 取得訂單所有授權的控制代碼。
    pub fn authorizations(&self) -> Result<Vec<AuthorizationHandle<'a>>> {
        self.cached
            .authorizations
            .iter()
            .map(|url| AuthorizationHandle::fetch(self.session, url).map_err(OrderError::from))
            .collect()
    }

    /// 輪詢直到訂單離開過渡狀態或等待被取消。
    pub fn poll(&mut self) -> Result<PollOutcome<OrderStatus>> {
        loop {
            let status = self.cached.status;
            if !status.is_transient() {
                return Ok(PollOutcome::Settled(status));
            }
            debug!("order {} is {:?}, polling", self.url, status);
            if !self.session.wait() {
                return Ok(PollOutcome::Pending(status));
            }
            self.refresh()?;
        }
    }

    /// 提交 CSR（DER 格式）並輪詢至簽發完成。
    ///
    /// 訂單必須處於 ready；否則在本地返回 [`OrderError::NotReady`]，
    /// 不發出任何請求。
    pub fn finalize(&mut self, csr_der: &[u8]) -> Result<PollOutcome<OrderStatus>> {
        if self.cached.status != OrderStatus::Ready {
            return Err(OrderError::NotReady(self.cached.status));
        }
        let payload = serde_json::json!({ "csr": base64::encode(csr_der) });
        let response = self.session.signed_post_json(&self.cached.finalize, &payload)?;
        self.cached = response.json()?;
        self.poll()
    }

    /// 下載憑證鏈（葉憑證在前）。
    ///
    /// 訂單必須處於 valid 且附有憑證 URL。指定 `preferred_chain` 時，
    /// 若預設鏈的根簽發者不符，逐一嘗試 `rel="alternate"` 鏈；
    /// 皆不符則退回預設鏈。
    pub fn download(&self, preferred_chain: Option<&str>) -> Result<CertificateChain> {
        if self.cached.status != OrderStatus::Valid {
            return Err(OrderError::NotValid(self.cached.status));
        }
        let certificate_url = self
            .cached
            .certificate
            .as_deref()
            .ok_or(OrderError::MissingCertificate)?;

        let response = self.session.post_as_get(certificate_url)?;
        let chain = CertificateChain::from_pem_bundle(&response.body)?;

        let preferred = match preferred_chain {
            Some(preferred) => preferred,
            None => return Ok(chain),
        };
        if chain.issued_by(preferred)? {
            return Ok(chain);
        }
        for alternate_url in response.alternate_links() {
            let alternate = self.session.post_as_get(&alternate_url)?;
            let candidate = CertificateChain::from_pem_bundle(&alternate.body)?;
            if candidate.issued_by(preferred)? {
                return Ok(candidate);
            }
        }
        Ok(chain)
    }
}
