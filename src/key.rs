//! 非對稱金鑰抽象：支援 ECDSA（P-256/P-384/P-521）與 RSA 金鑰的
//! 產生、載入、簽名與驗證，並提供 JWK thumbprint 計算。

use openssl::{
    bn::{BigNum, BigNumContext},
    ec::{EcGroup, EcKey},
    ecdsa::EcdsaSig,
    error::ErrorStack,
    hash::{hash, MessageDigest},
    nid::Nid,
    pkey::{Id, PKey, Private},
    rsa::Rsa,
    sha::sha256,
    sign::{Signer, Verifier},
};
use thiserror::Error;

use crate::{
    base64,
    jwk::{Jwk, JwkError},
};

/// 金鑰相關操作的錯誤列舉。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),
    #[error("Unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
}

type Result<T> = std::result::Result<T, KeyError>;

/// 簽名金鑰所使用的演算法，同時決定 JWS 的 `alg` 標頭值。
///
/// 除列舉中的四種之外的金鑰一律在發出任何網路請求前就以
/// [`KeyError::UnsupportedAlgorithm`] 拒絕。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// ECDSA，NIST P-256 曲線搭配 SHA-256。
    Es256,
    /// ECDSA，NIST P-384 曲線搭配 SHA-384。
    Es384,
    /// ECDSA，NIST P-521 曲線搭配 SHA-512。
    Es512,
    /// RSA 2048 搭配 PKCS#1 v1.5 與 SHA-256。
    Rs256,
}

impl KeyAlgorithm {
    /// 返回 JWS protected header 中使用的 `alg` 字串。
    pub fn jws_alg(&self) -> &'static str {
        match self {
            Self::Es256 => "ES256",
            Self::Es384 => "ES384",
            Self::Es512 => "ES512",
            Self::Rs256 => "RS256",
        }
    }

    /// 根據字串（不區分大小寫）解析演算法名稱。
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_uppercase().as_str() {
            "ES256" => Ok(Self::Es256),
            "ES384" => Ok(Self::Es384),
            "ES512" => Ok(Self::Es512),
            "RS256" | "RSA" => Ok(Self::Rs256),
            other => Err(KeyError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    /// 簽名時使用的訊息摘要。
    pub(crate) fn digest(&self) -> MessageDigest {
        match self {
            Self::Es256 => MessageDigest::sha256(),
            Self::Es384 => MessageDigest::sha384(),
            Self::Es512 => MessageDigest::sha512(),
            Self::Rs256 => MessageDigest::sha256(),
        }
    }

    /// ECDSA 座標長度（位元組）；RSA 返回 `None`。
    ///
    /// 原始簽名格式 R‖S 中每個整數皆左補零至此長度。
    pub(crate) fn coordinate_len(&self) -> Option<usize> {
        match self {
            Self::Es256 => Some(32),
            Self::Es384 => Some(48),
            Self::Es512 => Some(66),
            Self::Rs256 => None,
        }
    }

    fn curve_nid(&self) -> Option<Nid> {
        match self {
            Self::Es256 => Some(Nid::X9_62_PRIME256V1),
            Self::Es384 => Some(Nid::SECP384R1),
            Self::Es512 => Some(Nid::SECP521R1),
            Self::Rs256 => None,
        }
    }

    /// JWK 中的曲線名稱；RSA 返回 `None`。
    pub(crate) fn curve_name(&self) -> Option<&'static str> {
        match self {
            Self::Es256 => Some("P-256"),
            Self::Es384 => Some("P-384"),
            Self::Es512 => Some("P-521"),
            Self::Rs256 => None,
        }
    }
}

/// 表示一組非對稱金鑰對，封裝 OpenSSL 的 `PKey` 並記錄其演算法。
///
/// 同一型別同時用於帳戶金鑰、憑證金鑰與撤銷時的裸金鑰簽名。
#[derive(Debug)]
pub struct KeyPair {
    /// 金鑰演算法，決定 JWS `alg` 與簽名格式。
    pub algorithm: KeyAlgorithm,
    /// 私鑰（含公開部分）。
    pub pkey: PKey<Private>,
}

impl KeyPair {
    const DEFAULT_RSA_BITS: u32 = 2048;

    /// 產生指定演算法的新金鑰對。
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self> {
        let pkey = match algorithm.curve_nid() {
            Some(nid) => {
                let group = EcGroup::from_curve_name(nid)?;
                PKey::from_ec_key(EcKey::generate(&group)?)?
            }
            None => PKey::from_rsa(Rsa::generate(Self::DEFAULT_RSA_BITS)?)?,
        };
        Ok(Self { algorithm, pkey })
    }

    /// 根據 PEM 格式的私鑰資料建立金鑰對，演算法由金鑰內容推斷。
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let pkey = PKey::private_key_from_pem(pem)?;
        let algorithm = match pkey.id() {
            Id::RSA => KeyAlgorithm::Rs256,
            Id::EC => {
                let ec = pkey.ec_key()?;
                match ec.group().curve_name() {
                    Some(Nid::X9_62_PRIME256V1) => KeyAlgorithm::Es256,
                    Some(Nid::SECP384R1) => KeyAlgorithm::Es384,
                    Some(Nid::SECP521R1) => KeyAlgorithm::Es512,
                    other => {
                        return Err(KeyError::UnsupportedAlgorithm(format!(
                            "EC curve {:?}",
                            other
                        )))
                    }
                }
            }
            other => {
                return Err(KeyError::UnsupportedAlgorithm(format!("{:?}", other)));
            }
        };
        Ok(Self { algorithm, pkey })
    }

    /// 將私鑰輸出為 PKCS#8 PEM。
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pkey.private_key_to_pem_pkcs8()?)
    }

    /// 對資料簽名。
    ///
    /// ECDSA 金鑰輸出固定長度的原始 `R‖S` 簽名（JWS 要求的格式，
    /// 非 DER）；RSA 金鑰輸出 PKCS#1 v1.5 簽名。
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self.algorithm.coordinate_len() {
            Some(coord_len) => {
                let digest = hash(self.algorithm.digest(), data)?;
                let ec = self.pkey.ec_key()?;
                let sig = EcdsaSig::sign(&digest, &ec)?;
                let mut raw = sig.r().to_vec_padded(coord_len as i32)?;
                raw.extend_from_slice(&sig.s().to_vec_padded(coord_len as i32)?);
                Ok(raw)
            }
            None => {
                let mut signer = Signer::new(self.algorithm.digest(), &self.pkey)?;
                signer.update(data)?;
                Ok(signer.sign_to_vec()?)
            }
        }
    }

    /// 以本金鑰的公開部分驗證簽名，格式與 [`KeyPair::sign`] 的輸出一致。
    ///
    /// 伺服器端對 JWS 做的正是等價的驗證，因此可用於測試簽名管線。
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        match self.algorithm.coordinate_len() {
            Some(coord_len) => {
                if signature.len() != coord_len * 2 {
                    return Ok(false);
                }
                let digest = hash(self.algorithm.digest(), data)?;
                let r = BigNum::from_slice(&signature[..coord_len])?;
                let s = BigNum::from_slice(&signature[coord_len..])?;
                let sig = EcdsaSig::from_private_components(r, s)?;
                let ec = self.pkey.ec_key()?;
                Ok(sig.verify(&digest, &ec)?)
            }
            None => {
                let mut verifier = Verifier::new(self.algorithm.digest(), &self.pkey)?;
                verifier.update(data)?;
                Ok(verifier.verify(signature)?)
            }
        }
    }

    /// 計算金鑰的 JWK thumbprint（RFC 7638）：
    /// 對標準化 JWK JSON 做 SHA-256 後以 base64url 編碼。
    pub fn thumbprint(&self) -> Result<String> {
        let jwk = Jwk::from_key_pair(self)?;
        let digest = sha256(jwk.to_acme_json()?.as_bytes());
        Ok(base64::encode(digest))
    }

    /// EC 公鑰的仿射座標 (x, y)，各自左補零至曲線座標長度。
    pub(crate) fn ec_public_coordinates(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let coord_len = self
            .algorithm
            .coordinate_len()
            .ok_or_else(|| KeyError::UnsupportedAlgorithm("not an EC key".to_string()))?;
        let ec = self.pkey.ec_key()?;
        let mut x = BigNum::new()?;
        let mut y = BigNum::new()?;
        let mut ctx = BigNumContext::new()?;
        ec.public_key()
            .affine_coordinates(ec.group(), &mut x, &mut y, &mut ctx)?;
        Ok((
            x.to_vec_padded(coord_len as i32)?,
            y.to_vec_padded(coord_len as i32)?,
        ))
    }
}
