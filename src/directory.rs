//! ACME directory：端點探索的唯一入口。
//!
//! 客戶端僅需設定 directory URL，其餘端點
//! （newNonce、newAccount、newOrder、revokeCert、renewalInfo）
//! 一律由 directory 文件取得，絕不硬編碼。

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

use crate::transport::{HttpTransport, TransportError};

/// directory 取得與解析的錯誤。
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Directory unavailable: {0}")]
    Unavailable(#[from] TransportError),
    #[error("Malformed directory document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Directory returned status {0}")]
    Status(u16),
}

/// directory 文件。`renewalInfo` 僅在伺服器支援 ARI 時出現。
#[derive(Debug, Clone, Deserialize)]
pub struct Directory {
    /// newNonce 端點（HEAD 取 nonce）。
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    /// newAccount 端點。
    #[serde(rename = "newAccount")]
    pub new_account: String,
    /// newOrder 端點。
    #[serde(rename = "newOrder")]
    pub new_order: String,
    /// newAuthz 端點（少數伺服器支援預授權）。
    #[serde(rename = "newAuthz")]
    pub new_authz: Option<String>,
    /// revokeCert 端點。
    #[serde(rename = "revokeCert")]
    pub revoke_cert: String,
    /// keyChange 端點。
    #[serde(rename = "keyChange")]
    pub key_change: Option<String>,
    /// ARI renewalInfo 基底 URL（RFC 9773）。
    #[serde(rename = "renewalInfo")]
    pub renewal_info: Option<String>,
    /// 中繼資料。
    pub meta: Option<DirectoryMeta>,
}

/// directory 的 meta 區塊。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectoryMeta {
    /// 服務條款 URL。
    #[serde(rename = "termsOfService")]
    pub terms_of_service: Option<String>,
    /// CA 網站。
    pub website: Option<String>,
    /// CAA 記錄可用的識別名稱。
    #[serde(rename = "caaIdentities", default)]
    pub caa_identities: Vec<String>,
    /// 是否要求外部帳戶綁定（EAB）。
    #[serde(rename = "externalAccountRequired")]
    pub external_account_required: Option<bool>,
    /// 伺服器提供的憑證設定檔。
    #[serde(default)]
    pub profiles: HashMap<String, String>,
}

impl Directory {
    /// 以未簽名的 GET 取得並解析 directory 文件。
    pub fn fetch(transport: &dyn HttpTransport, url: &str) -> Result<Self, DirectoryError> {
        let response = transport.get(url)?;
        if !response.is_success() {
            return Err(DirectoryError::Status(response.status));
        }
        Ok(response.json()?)
    }
}
