//! ACME 風格的 JWS（JSON Web Signature）簽名管線。
//!
//! 每個需簽名的請求由此模組組裝：protected header（`alg`、`nonce`、
//! `url`，以及 `jwk` 與 `kid` 其一）、base64url 編碼的 payload 與
//! 以金鑰原生演算法計算的簽名。本模組為純函式，不做任何 I/O；
//! nonce 的取得與消耗由呼叫端負責。

use serde::Serialize;
use thiserror::Error;

use crate::{
    base64,
    jwk::{Jwk, JwkError},
    key::{KeyError, KeyPair},
};

/// JWS 組裝過程可能發生的錯誤。
#[derive(Debug, Error)]
pub enum JwsError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

type Result<T> = std::result::Result<T, JwsError>;

/// 簽名者身分：protected header 中 `jwk` 與 `kid` 恰好擇一。
///
/// 以列舉建模而非兩個可選欄位，使「兩者皆設」在型別上不可表示。
#[derive(Debug, Clone)]
pub enum SignerIdentity {
    /// 內嵌完整 JWK；用於尚無帳戶的請求（newAccount、裸金鑰撤銷）。
    Jwk,
    /// 以帳戶 URL（KID）定址；帳戶建立後的所有請求一律使用。
    Kid(String),
}

/// JWS payload：POST-as-GET 使用空字串 payload，與 JSON 物件 payload
/// 在編碼上明確區分（`""` 而非省略）。
#[derive(Debug, Clone)]
pub enum JwsPayload {
    /// 空 payload（POST-as-GET）。
    Empty,
    /// JSON 文字 payload。
    Json(String),
}

impl JwsPayload {
    /// 由可序列化的值建立 JSON payload。
    pub fn from_value<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::Json(serde_json::to_string(value)?))
    }

    fn to_base64(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Json(json) => base64::encode(json.as_bytes()),
        }
    }
}

/// 組裝完成的三段式簽名信封，即送往伺服器的請求本體。
#[derive(Debug, Serialize)]
pub struct Jws {
    protected: String,
    payload: String,
    signature: String,
}

impl Jws {
    /// 序列化為 `application/jose+json` 請求本體。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 取得 base64url 編碼的 protected header（測試用途）。
    pub fn protected(&self) -> &str {
        &self.protected
    }
}

#[derive(Serialize)]
struct ProtectedHeader<'a> {
    alg: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
    nonce: &'a str,
    url: &'a str,
}

/// 以指定金鑰與身分，對目標 URL 的 payload 簽名，產生 JWS 信封。
///
/// `alg` 由金鑰演算法唯一決定；簽名輸入為
/// `base64url(header) + "." + base64url(payload)`。
pub fn sign_request(
    key: &KeyPair,
    identity: &SignerIdentity,
    nonce: &str,
    url: &str,
    payload: &JwsPayload,
) -> Result<Jws> {
    let (jwk, kid) = match identity {
        SignerIdentity::Jwk => (Some(Jwk::from_key_pair(key)?), None),
        SignerIdentity::Kid(kid) => (None, Some(kid.as_str())),
    };

    let header = ProtectedHeader {
        alg: key.algorithm.jws_alg(),
        jwk,
        kid,
        nonce,
        url,
    };

    let protected = base64::encode(serde_json::to_string(&header)?.as_bytes());
    let payload = payload.to_base64();
    let signing_input = format!("{}.{}", protected, payload);
    let signature = base64::encode(key.sign(signing_input.as_bytes())?);

    Ok(Jws {
        protected,
        payload,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyAlgorithm;
    use serde_json::Value;

    fn decode_header(jws: &Jws) -> Value {
        let bytes = base64::decode(jws.protected()).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_jwk_and_kid_are_exclusive() {
        let key = KeyPair::generate(KeyAlgorithm::Es256).unwrap();

        let jws = sign_request(
            &key,
            &SignerIdentity::Jwk,
            "nonce-1",
            "https://ca.test/new-account",
            &JwsPayload::Json("{}".to_string()),
        )
        .unwrap();
        let header = decode_header(&jws);
        assert!(header.get("jwk").is_some());
        assert!(header.get("kid").is_none());
        assert_eq!(header["alg"], "ES256");
        assert_eq!(header["nonce"], "nonce-1");
        assert_eq!(header["url"], "https://ca.test/new-account");

        let jws = sign_request(
            &key,
            &SignerIdentity::Kid("https://ca.test/acct/1".to_string()),
            "nonce-2",
            "https://ca.test/order/1",
            &JwsPayload::Empty,
        )
        .unwrap();
        let header = decode_header(&jws);
        assert!(header.get("jwk").is_none());
        assert_eq!(header["kid"], "https://ca.test/acct/1");
    }

    #[test]
    fn test_empty_payload_is_empty_string() {
        let key = KeyPair::generate(KeyAlgorithm::Es256).unwrap();
        let jws = sign_request(
            &key,
            &SignerIdentity::Kid("https://ca.test/acct/1".to_string()),
            "nonce",
            "https://ca.test/order/1",
            &JwsPayload::Empty,
        )
        .unwrap();
        let body: Value = serde_json::from_str(&jws.to_json().unwrap()).unwrap();
        assert_eq!(body["payload"], "");
        assert!(!body["protected"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_server_side_verification() {
        for alg in [KeyAlgorithm::Es256, KeyAlgorithm::Rs256] {
            let key = KeyPair::generate(alg).unwrap();
            let jws = sign_request(
                &key,
                &SignerIdentity::Jwk,
                "nonce-a",
                "https://ca.test/x",
                &JwsPayload::Json("{\"a\":1}".to_string()),
            )
            .unwrap();
            let body: Value = serde_json::from_str(&jws.to_json().unwrap()).unwrap();
            let input = format!(
                "{}.{}",
                body["protected"].as_str().unwrap(),
                body["payload"].as_str().unwrap()
            );
            let signature = base64::decode(body["signature"].as_str().unwrap()).unwrap();
            assert!(key.verify(input.as_bytes(), &signature).unwrap(), "{:?}", alg);
        }
    }

    #[test]
    fn test_nonce_changes_signature_not_payload() {
        let key = KeyPair::generate(KeyAlgorithm::Rs256).unwrap();
        let payload = JwsPayload::Json("{\"a\":1}".to_string());
        let url = "https://ca.test/x";
        let a = sign_request(&key, &SignerIdentity::Jwk, "nonce-a", url, &payload).unwrap();
        let b = sign_request(&key, &SignerIdentity::Jwk, "nonce-b", url, &payload).unwrap();
        let a: Value = serde_json::from_str(&a.to_json().unwrap()).unwrap();
        let b: Value = serde_json::from_str(&b.to_json().unwrap()).unwrap();
        assert_eq!(a["payload"], b["payload"]);
        assert_ne!(a["signature"], b["signature"]);
    }
}
