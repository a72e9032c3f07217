//! 憑證鏈的封裝：匯出、續期判斷與 ARI CertID 計算。

use chrono::{DateTime, Utc};
use openssl::{
    asn1::Asn1Time,
    pkcs12::Pkcs12,
    stack::Stack,
    x509::X509,
};
use thiserror::Error;

use crate::{base64, key::KeyPair};

/// 憑證處理的錯誤。
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),
    #[error("PEM bundle contains no certificates")]
    EmptyChain,
    #[error("Certificate has no Authority Key Identifier extension")]
    MissingAuthorityKeyId,
}

type Result<T> = std::result::Result<T, CertificateError>;

/// 計算憑證的 ARI CertID（RFC 9773）：
/// `base64url(AKI keyIdentifier) + "." + base64url(serial)`，
/// serial 為無號大端位元組序列。
pub fn ari_cert_id(cert_der: &[u8]) -> Result<String> {
    let cert = X509::from_der(cert_der)?;
    cert_id_of(&cert)
}

fn cert_id_of(cert: &X509) -> Result<String> {
    let aki = cert
        .authority_key_id()
        .ok_or(CertificateError::MissingAuthorityKeyId)?;
    let serial = cert.serial_number().to_bn()?.to_vec();
    Ok(format!(
        "{}.{}",
        base64::encode(aki.as_slice()),
        base64::encode(serial)
    ))
}

/// 已簽發的憑證鏈，葉憑證在前。
#[derive(Debug, Clone)]
pub struct CertificateChain {
    certs: Vec<X509>,
}

impl CertificateChain {
    /// 解析 PEM bundle（伺服器下載格式：葉憑證在前，中繼憑證隨後）。
    pub fn from_pem_bundle(pem: &[u8]) -> Result<Self> {
        let certs = X509::stack_from_pem(pem)?;
        if certs.is_empty() {
            return Err(CertificateError::EmptyChain);
        }
        Ok(Self { certs })
    }

    /// 鏈中的憑證數。
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// 鏈是否為空（建構後恆為 `false`，供慣例完整性）。
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// 葉憑證。
    pub fn leaf(&self) -> &X509 {
        &self.certs[0]
    }

    /// 中繼憑證（葉之後的所有憑證）。
    pub fn issuers(&self) -> &[X509] {
        &self.certs[1..]
    }

    /// 葉憑證的 DER 編碼。
    pub fn leaf_der(&self) -> Result<Vec<u8>> {
        Ok(self.leaf().to_der()?)
    }

    /// 匯出整條鏈為 PEM；提供金鑰時將私鑰 PEM 附於其後。
    pub fn to_pem(&self, key: Option<&KeyPair>) -> Result<Vec<u8>> {
        let mut pem = Vec::new();
        for cert in &self.certs {
            pem.extend_from_slice(&cert.to_pem()?);
        }
        if let Some(key) = key {
            pem.extend_from_slice(&key.pkey.private_key_to_pem_pkcs8()?);
        }
        Ok(pem)
    }

    /// 匯出為 PKCS#12（PFX）封裝。
    pub fn to_pfx(&self, key: &KeyPair, password: &str, friendly_name: &str) -> Result<Vec<u8>> {
        let mut ca = Stack::new()?;
        for cert in self.issuers() {
            ca.push(cert.clone())?;
        }
        let mut builder = Pkcs12::builder();
        builder
            .name(friendly_name)
            .pkey(&key.pkey)
            .cert(self.leaf())
            .ca(ca);
        let pkcs12 = builder.build2(password)?;
        Ok(pkcs12.to_der()?)
    }

    /// 葉憑證的 ARI CertID。
    pub fn ari_cert_id(&self) -> Result<String> {
        cert_id_of(self.leaf())
    }

    /// 鏈中最後一張憑證的簽發者 CN 是否等於 `common_name`
    /// （用於 preferred chain 比對）。
    pub fn issued_by(&self, common_name: &str) -> Result<bool> {
        let last = &self.certs[self.certs.len() - 1];
        for entry in last
            .issuer_name()
            .entries_by_nid(openssl::nid::Nid::COMMONNAME)
        {
            if entry.data().as_utf8()?.to_string() == common_name {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// 葉憑證剩餘有效期是否不超過 `threshold_days` 天。
    ///
    /// 已過期亦返回 `true`。解析失敗時保守地返回 `true`，
    /// 促使呼叫端續期而非沿用可疑憑證。
    pub fn should_renew(&self, threshold_days: u32) -> bool {
        let now = match Asn1Time::days_from_now(0) {
            Ok(now) => now,
            Err(_) => return true,
        };
        match now.diff(self.leaf().not_after()) {
            Ok(diff) => diff.days <= threshold_days as i32,
            Err(_) => true,
        }
    }

    /// 葉憑證的 not_after 時刻。
    ///
    /// 由當下時刻與 ASN.1 時間的差值推得，避免解析
    /// `ASN1_TIME_print` 的文字格式；差值無法計算時為 `None`。
    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        let now = Asn1Time::days_from_now(0).ok()?;
        let diff = now.diff(self.leaf().not_after()).ok()?;
        let offset = chrono::Duration::try_days(diff.days as i64)?
            + chrono::Duration::try_seconds(diff.secs as i64)?;
        Some(Utc::now() + offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyAlgorithm;
    use openssl::{
        asn1::Asn1Integer,
        bn::BigNum,
        hash::MessageDigest,
        nid::Nid,
        x509::{
            extension::{
                AuthorityKeyIdentifier, BasicConstraints, SubjectKeyIdentifier,
            },
            X509Builder, X509NameBuilder,
        },
    };

    fn name(common_name: &str) -> openssl::x509::X509Name {
        let mut builder = X509NameBuilder::new().unwrap();
        builder.append_entry_by_nid(Nid::COMMONNAME, common_name).unwrap();
        builder.build()
    }

    fn build_ca(key: &KeyPair) -> X509 {
        let name = name("Test Root CA");
        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key.pkey).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(365).unwrap())
            .unwrap();
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(None, None))
            .unwrap();
        builder.append_extension(ski).unwrap();
        builder.sign(&key.pkey, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    fn build_leaf(
        ca: &X509,
        ca_key: &KeyPair,
        leaf_key: &KeyPair,
        serial: &[u8],
        valid_days: u32,
    ) -> X509 {
        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name("example.com")).unwrap();
        builder.set_issuer_name(ca.subject_name()).unwrap();
        builder.set_pubkey(&leaf_key.pkey).unwrap();
        let serial = Asn1Integer::from_bn(&BigNum::from_slice(serial).unwrap()).unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(valid_days).unwrap())
            .unwrap();
        let aki = AuthorityKeyIdentifier::new()
            .keyid(true)
            .build(&builder.x509v3_context(Some(ca), None))
            .unwrap();
        builder.append_extension(aki).unwrap();
        builder.sign(&ca_key.pkey, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    fn test_chain(serial: &[u8], valid_days: u32) -> (CertificateChain, KeyPair) {
        let ca_key = KeyPair::generate(KeyAlgorithm::Es256).unwrap();
        let leaf_key = KeyPair::generate(KeyAlgorithm::Es256).unwrap();
        let ca = build_ca(&ca_key);
        let leaf = build_leaf(&ca, &ca_key, &leaf_key, serial, valid_days);
        let mut pem = leaf.to_pem().unwrap();
        pem.extend_from_slice(&ca.to_pem().unwrap());
        (CertificateChain::from_pem_bundle(&pem).unwrap(), leaf_key)
    }

    #[test]
    fn test_chain_order() {
        let (chain, _) = test_chain(&[0x01], 90);
        assert_eq!(chain.len(), 2);
        let leaf_cn = chain
            .leaf()
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap()
            .to_string();
        assert_eq!(leaf_cn, "example.com");
        assert_eq!(chain.issuers().len(), 1);
    }

    #[test]
    fn test_empty_bundle() {
        assert!(matches!(
            CertificateChain::from_pem_bundle(b"not a pem"),
            Err(CertificateError::EmptyChain) | Err(CertificateError::OpenSsl(_))
        ));
    }

    #[test]
    fn test_ari_cert_id_serial_half() {
        // serial 0x0123456789 的 base64url 為 ASNFZ4k
        let (chain, _) = test_chain(&[0x01, 0x23, 0x45, 0x67, 0x89], 90);
        let cert_id = chain.ari_cert_id().unwrap();
        assert!(cert_id.ends_with(".ASNFZ4k"), "{}", cert_id);
        // AKI 半段非空且不含填充
        let aki_half = cert_id.split('.').next().unwrap();
        assert!(!aki_half.is_empty());
        assert!(!cert_id.contains('='));

        // DER 自由函式與鏈方法一致
        let der = chain.leaf_der().unwrap();
        assert_eq!(ari_cert_id(&der).unwrap(), cert_id);
    }

    #[test]
    fn test_ari_cert_id_requires_aki() {
        let key = KeyPair::generate(KeyAlgorithm::Es256).unwrap();
        let ca = build_ca(&key);
        // CA 自身沒有 AKI 擴展
        assert!(matches!(
            cert_id_of(&ca),
            Err(CertificateError::MissingAuthorityKeyId)
        ));
    }

    #[test]
    fn test_should_renew_threshold() {
        let (long_lived, _) = test_chain(&[0x02], 90);
        assert!(!long_lived.should_renew(30));
        assert!(long_lived.should_renew(120));

        let (expiring, _) = test_chain(&[0x03], 5);
        assert!(expiring.should_renew(30));
    }

    #[test]
    fn test_not_after_reflects_validity_period() {
        let (chain, _) = test_chain(&[0x07], 90);
        let not_after = chain.not_after().unwrap();
        let remaining = not_after - Utc::now();
        assert!(
            (89..=90).contains(&remaining.num_days()),
            "remaining: {} days",
            remaining.num_days()
        );
    }

    #[test]
    fn test_issued_by() {
        let (chain, _) = test_chain(&[0x04], 90);
        assert!(chain.issued_by("Test Root CA").unwrap());
        assert!(!chain.issued_by("Other CA").unwrap());
    }

    #[test]
    fn test_to_pem_with_key() {
        let (chain, leaf_key) = test_chain(&[0x05], 90);
        let pem = chain.to_pem(Some(&leaf_key)).unwrap();
        let text = String::from_utf8(pem).unwrap();
        assert_eq!(text.matches("BEGIN CERTIFICATE").count(), 2);
        assert!(text.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn test_to_pfx_roundtrip() {
        let (chain, leaf_key) = test_chain(&[0x06], 90);
        let der = chain.to_pfx(&leaf_key, "secret", "example.com").unwrap();
        let parsed = Pkcs12::from_der(&der).unwrap().parse2("secret").unwrap();
        assert!(parsed.pkey.is_some());
        assert!(parsed.cert.is_some());
    }
}
