//! 憑證撤銷。
//!
//! 兩種簽名路徑：帳戶金鑰（KID 身分）或憑證私鑰本身
//! （內嵌 JWK 身分，適用於帳戶金鑰遺失的情形）。

use serde::Serialize;
use thiserror::Error;

use crate::{
    base64,
    jws::{JwsPayload, SignerIdentity},
    key::KeyPair,
    session::{Session, SessionError},
};

/// 撤銷操作的錯誤。
#[derive(Debug, Error)]
pub enum RevokeError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, RevokeError>;

/// RFC 5280 撤銷原因碼（7 未定義，不在列舉中）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    /// 線上格式的原因碼。
    pub fn code(&self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::KeyCompromise => 1,
            Self::CaCompromise => 2,
            Self::AffiliationChanged => 3,
            Self::Superseded => 4,
            Self::CessationOfOperation => 5,
            Self::CertificateHold => 6,
            Self::RemoveFromCrl => 8,
            Self::PrivilegeWithdrawn => 9,
            Self::AaCompromise => 10,
        }
    }
}

#[derive(Serialize)]
struct RevokeRequest {
    certificate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<u8>,
}

fn request_payload(cert_der: &[u8], reason: Option<RevocationReason>) -> Result<JwsPayload> {
    let request = RevokeRequest {
        certificate: base64::encode(cert_der),
        reason: reason.map(|r| r.code()),
    };
    Ok(JwsPayload::from_value(&request).map_err(SessionError::from)?)
}

/// 以帳戶金鑰撤銷憑證。
pub fn revoke(
    session: &Session,
    cert_der: &[u8],
    reason: Option<RevocationReason>,
) -> Result<()> {
    let revoke_url = session.directory().map_err(RevokeError::from)?.revoke_cert;
    let payload = request_payload(cert_der, reason)?;
    session.signed_post(&revoke_url, &payload)?;
    Ok(())
}

/// 以憑證私鑰撤銷憑證（JWS 內嵌該金鑰的 JWK）。
pub fn revoke_with_key(
    session: &Session,
    cert_key: &KeyPair,
    cert_der: &[u8],
    reason: Option<RevocationReason>,
) -> Result<()> {
    let revoke_url = session.directory().map_err(RevokeError::from)?.revoke_cert;
    let payload = request_payload(cert_der, reason)?;
    session.signed_post_with(cert_key, &SignerIdentity::Jwk, &revoke_url, &payload)?;
    Ok(())
}
