//! # acmer
//!
//! ACME 協議（RFC 8555）客戶端核心引擎，含 ARI 續期查詢
//! （RFC 9773）。涵蓋帳戶註冊、訂單與授權狀態機、挑戰驗證、
//! CSR 提交、憑證下載與撤銷；所有簽名請求共用同一條
//! JWS 發送管線，自動管理 replay nonce 與 badNonce 重試。
//!
//! ## 範例
//!
//! ```no_run
//! use acmer::{
//!     account::AccountContext,
//!     challenge::ChallengeType,
//!     csr::CsrBuilder,
//!     key::{KeyAlgorithm, KeyPair},
//!     order::{NewOrder, OrderHandle},
//!     session::Session,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::builder("https://acme-v02.api.letsencrypt.org/directory").build()?;
//! AccountContext::register(&session, &["admin@example.com"], true, None)?;
//!
//! let mut order = OrderHandle::create(&session, &NewOrder::dns(&["example.com"]))?;
//! for authz in order.authorizations()? {
//!     let mut challenge = authz.challenge(ChallengeType::Http01)
//!         .ok_or("no http-01 challenge")?;
//!     // 將 challenge.http01_content()? 部署到
//!     // /.well-known/acme-challenge/{token} 之後：
//!     challenge.validate()?;
//!     challenge.poll()?;
//! }
//! order.poll()?;
//!
//! let cert_key = KeyPair::generate(KeyAlgorithm::Es256)?;
//! let csr = CsrBuilder::new()
//!     .common_name("example.com")
//!     .san("example.com")
//!     .build(&cert_key)?;
//! order.finalize(&csr)?;
//! let chain = order.download(None)?;
//! std::fs::write("cert.pem", chain.to_pem(Some(&cert_key))?)?;
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod authorization;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod csr;
pub mod directory;
pub mod jwk;
pub mod jws;
pub mod key;
pub mod nonce;
pub mod order;
pub mod problem;
pub mod renewal;
pub mod revoke;
pub mod session;
pub mod transport;
pub mod wait;
