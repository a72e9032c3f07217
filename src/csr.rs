//! 憑證簽名請求（CSR）建構器。
//!
//! finalize 提交的 CSR 必須涵蓋訂單的所有識別符，
//! 一律寫入 Subject Alternative Name 擴展。

use openssl::{
    hash::MessageDigest,
    nid::Nid,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509ReqBuilder},
};
use thiserror::Error;

use crate::key::KeyPair;

/// CSR 建構的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),
    #[error("CSR requires at least one SAN entry")]
    NoSanEntries,
}

type Result<T> = std::result::Result<T, CsrError>;

/// CSR 建構器。主體欄位皆為可選，SAN 至少需要一筆。
#[derive(Debug, Default)]
pub struct CsrBuilder {
    common_name: Option<String>,
    organization: Option<String>,
    organizational_unit: Option<String>,
    country: Option<String>,
    state: Option<String>,
    locality: Option<String>,
    san_entries: Vec<String>,
}

impl CsrBuilder {
    /// 建立空的建構器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 設定 CN。
    pub fn common_name(mut self, value: &str) -> Self {
        self.common_name = Some(value.to_string());
        self
    }

    /// 設定 O。
    pub fn organization(mut self, value: &str) -> Self {
        self.organization = Some(value.to_string());
        self
    }

    /// 設定 OU。
    pub fn organizational_unit(mut self, value: &str) -> Self {
        self.organizational_unit = Some(value.to_string());
        self
    }

    /// 設定 C。
    pub fn country(mut self, value: &str) -> Self {
        self.country = Some(value.to_string());
        self
    }

    /// 設定 ST。
    pub fn state(mut self, value: &str) -> Self {
        self.state = Some(value.to_string());
        self
    }

    /// 設定 L。
    pub fn locality(mut self, value: &str) -> Self {
        self.locality = Some(value.to_string());
        self
    }

    /// 追加一筆 SAN DNS 名稱。
    pub fn san(mut self, dns_name: &str) -> Self {
        self.san_entries.push(dns_name.to_string());
        self
    }

    /// 以指定金鑰簽署，輸出 DER 編碼的 CSR。
    pub fn build(self, key: &KeyPair) -> Result<Vec<u8>> {
        if self.san_entries.is_empty() {
            return Err(CsrError::NoSanEntries);
        }

        let mut name = X509NameBuilder::new()?;
        let entries = [
            (Nid::COMMONNAME, &self.common_name),
            (Nid::ORGANIZATIONNAME, &self.organization),
            (Nid::ORGANIZATIONALUNITNAME, &self.organizational_unit),
            (Nid::COUNTRYNAME, &self.country),
            (Nid::STATEORPROVINCENAME, &self.state),
            (Nid::LOCALITYNAME, &self.locality),
        ];
        for (nid, value) in entries {
            if let Some(value) = value {
                name.append_entry_by_nid(nid, value)?;
            }
        }
        let name = name.build();

        let mut builder = X509ReqBuilder::new()?;
        builder.set_subject_name(&name)?;
        builder.set_pubkey(&key.pkey)?;

        let mut san = SubjectAlternativeName::new();
        for entry in &self.san_entries {
            san.dns(entry);
        }
        let san = san.build(&builder.x509v3_context(None))?;
        let mut extensions = openssl::stack::Stack::new()?;
        extensions.push(san)?;
        builder.add_extensions(&extensions)?;

        builder.sign(&key.pkey, MessageDigest::sha256())?;
        Ok(builder.build().to_der()?)
    }
}
