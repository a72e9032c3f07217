//! JSON Web Key (JWK) 表示，支援 EC 與 RSA 公鑰，
//! 並提供 RFC 7638 thumbprint 所需的標準化 JSON。

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{base64, key::KeyPair};

/// JWK 相關操作的錯誤類型。
#[derive(Debug, Error)]
pub enum JwkError {
    #[error("Failed to convert key: {0}")]
    KeyConversion(#[from] openssl::error::ErrorStack),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Key type not representable as JWK")]
    UnsupportedKeyType,
}

/// 公鑰的 JWK 封裝。`kty` 欄位由列舉變體決定。
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    /// 橢圓曲線公鑰。
    #[serde(rename = "EC")]
    Ec(EcJwk),
    /// RSA 公鑰。
    #[serde(rename = "RSA")]
    Rsa(RsaJwk),
}

/// EC 公鑰的 JWK 參數。
#[derive(Debug, Clone, Serialize)]
pub struct EcJwk {
    crv: &'static str,
    x: String,
    y: String,
}

/// RSA 公鑰的 JWK 參數。
#[derive(Debug, Clone, Serialize)]
pub struct RsaJwk {
    e: String,
    n: String,
}

impl Jwk {
    /// 根據金鑰對的公開部分建立 JWK。
    pub fn from_key_pair(key_pair: &KeyPair) -> Result<Self, JwkError> {
        match key_pair.algorithm.curve_name() {
            Some(crv) => {
                let (x, y) = key_pair
                    .ec_public_coordinates()
                    .map_err(|_| JwkError::UnsupportedKeyType)?;
                Ok(Jwk::Ec(EcJwk {
                    crv,
                    x: base64::encode(x),
                    y: base64::encode(y),
                }))
            }
            None => {
                let rsa = key_pair.pkey.rsa()?;
                Ok(Jwk::Rsa(RsaJwk {
                    e: base64::encode(rsa.e().to_vec()),
                    n: base64::encode(rsa.n().to_vec()),
                }))
            }
        }
    }

    /// 產生 RFC 7638 規定的標準化 JSON：僅含必要成員、
    /// 按字典序排列、無多餘空白。thumbprint 即對此字串做 SHA-256。
    ///
    /// 依賴 `serde_json` 的 `preserve_order` 特性，成員按插入順序輸出。
    pub fn to_acme_json(&self) -> Result<String, JwkError> {
        let mut map = Map::new();
        match self {
            Jwk::Ec(jwk) => {
                map.insert("crv".to_string(), Value::String(jwk.crv.to_string()));
                map.insert("kty".to_string(), Value::String("EC".to_string()));
                map.insert("x".to_string(), Value::String(jwk.x.clone()));
                map.insert("y".to_string(), Value::String(jwk.y.clone()));
            }
            Jwk::Rsa(jwk) => {
                map.insert("e".to_string(), Value::String(jwk.e.clone()));
                map.insert("kty".to_string(), Value::String("RSA".to_string()));
                map.insert("n".to_string(), Value::String(jwk.n.clone()));
            }
        }
        Ok(serde_json::to_string(&Value::Object(map))?)
    }
}
