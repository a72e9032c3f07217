//! 帳戶註冊與管理。
//!
//! 註冊成功後由 `Location` 標頭取得帳戶 URL（KID），
//! 寫入會話供後續所有請求簽名使用。對既有金鑰重複註冊是
//! 冪等操作，伺服器返回 200 與既有帳戶。

use openssl::pkey::PKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    base64::{self, DecodeError},
    jwk::{Jwk, JwkError},
    key::KeyError,
    session::{Session, SessionError},
};

/// 帳戶操作的錯誤。
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Server response missing Location header")]
    MissingLocation,
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("Invalid EAB HMAC key: {0}")]
    HmacKey(#[from] DecodeError),
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),
}

type Result<T> = std::result::Result<T, AccountError>;

/// 帳戶狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Valid,
    Deactivated,
    Revoked,
}

/// 帳戶資源。
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    /// 帳戶狀態。
    pub status: AccountStatus,
    /// 聯絡方式（`mailto:` URL）。
    #[serde(default)]
    pub contact: Vec<String>,
    /// 是否已同意服務條款。
    #[serde(rename = "termsOfServiceAgreed")]
    pub terms_of_service_agreed: Option<bool>,
    /// 帳戶訂單列表的 URL。
    pub orders: Option<String>,
}

/// 外部帳戶綁定（EAB）憑據，由 CA 核發。
#[derive(Debug, Clone)]
pub struct ExternalAccountBinding {
    /// CA 核發的金鑰識別碼。
    pub kid: String,
    /// base64url 編碼的 HMAC 金鑰。
    pub hmac_key: String,
}

impl ExternalAccountBinding {
    /// 產生 newAccount payload 中的內層 JWS：
    /// 以 HS256 對帳戶公鑰 JWK 簽名，`kid` 為 CA 核發的識別碼。
    fn sign(&self, account_jwk: &Jwk, new_account_url: &str) -> Result<Value> {
        let header = serde_json::json!({
            "alg": "HS256",
            "kid": self.kid,
            "url": new_account_url,
        });
        let protected = base64::encode(serde_json::to_string(&header)?.as_bytes());
        let payload = base64::encode(account_jwk.to_acme_json()?.as_bytes());

        let hmac_key = base64::decode(&self.hmac_key)?;
        let pkey = PKey::hmac(&hmac_key)?;
        let mut signer =
            openssl::sign::Signer::new(openssl::hash::MessageDigest::sha256(), &pkey)?;
        signer.update(format!("{}.{}", protected, payload).as_bytes())?;
        let signature = base64::encode(signer.sign_to_vec()?);

        Ok(serde_json::json!({
            "protected": protected,
            "payload": payload,
            "signature": signature,
        }))
    }
}

#[derive(Serialize)]
struct NewAccountRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    contact: Vec<String>,
    #[serde(rename = "termsOfServiceAgreed")]
    terms_of_service_agreed: bool,
    #[serde(rename = "onlyReturnExisting", skip_serializing_if = "std::ops::Not::not")]
    only_return_existing: bool,
    #[serde(rename = "externalAccountBinding", skip_serializing_if = "Option::is_none")]
    external_account_binding: Option<Value>,
}

/// 已註冊帳戶的操作控制代碼。
pub struct AccountContext<'a> {
    session: &'a Session,
    location: String,
    cached: Account,
}

impl<'a> AccountContext<'a> {
    /// 註冊新帳戶（或冪等取回既有帳戶）。
    ///
    /// 聯絡方式不含 scheme 時自動加上 `mailto:` 前綴。
    /// 成功後帳戶 URL 寫入會話作為 KID。
    pub fn register(
        session: &'a Session,
        contacts: &[&str],
        agree_tos: bool,
        eab: Option<&ExternalAccountBinding>,
    ) -> Result<Self> {
        let new_account_url = session.directory()?.new_account;
        let external_account_binding = match eab {
            Some(eab) => Some(eab.sign(&Jwk::from_key_pair(session.key())?, &new_account_url)?),
            None => None,
        };
        let request = NewAccountRequest {
            contact: contacts.iter().map(|c| Self::contact_url(c)).collect(),
            terms_of_service_agreed: agree_tos,
            only_return_existing: false,
            external_account_binding,
        };
        Self::submit(session, &new_account_url, &request)
    }

    /// 以既有金鑰查找帳戶，不存在時返回伺服器的 accountDoesNotExist 錯誤。
    pub fn load(session: &'a Session) -> Result<Self> {
        let new_account_url = session.directory()?.new_account;
        let request = NewAccountRequest {
            contact: Vec::new(),
            terms_of_service_agreed: false,
            only_return_existing: true,
            external_account_binding: None,
        };
        Self::submit(session, &new_account_url, &request)
    }

    fn submit(
        session: &'a Session,
        new_account_url: &str,
        request: &NewAccountRequest,
    ) -> Result<Self> {
        let response = session.signed_post_json(new_account_url, request)?;
        let location = response.location.clone().ok_or(AccountError::MissingLocation)?;
        session.set_kid(location.clone())?;
        let cached = response.json()?;
        Ok(Self {
            session,
            location,
            cached,
        })
    }

    fn contact_url(contact: &str) -> String {
        if contact.contains(':') {
            contact.to_string()
        } else {
            format!("mailto:{}", contact)
        }
    }

    /// 帳戶 URL（即 KID）。
    pub fn location(&self) -> &str {
        &self.location
    }

    /// 最近一次取得的帳戶資源。
    pub fn resource(&self) -> &Account {
        &self.cached
    }

    /// 以 POST-as-GET 重新取得帳戶資源。
    pub fn refresh(&mut self) -> Result<&Account> {
        let response = self.session.post_as_get(&self.location)?;
        self.cached = response.json()?;
        Ok(&self.cached)
    }

    /// 停用帳戶。停用後伺服器拒絕此帳戶的一切後續請求。
    pub fn deactivate(&mut self) -> Result<&Account> {
        let response = self
            .session
            .signed_post_json(&self.location, &serde_json::json!({"status": "deactivated"}))?;
        self.cached = response.json()?;
        Ok(&self.cached)
    }
}
