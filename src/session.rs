//! 會話：客戶端的中樞。
//!
//! 持有傳輸層、directory、nonce 池、帳戶金鑰與 KID，
//! 並實作所有簽名請求共用的發送管線：取 nonce、簽名、送出、
//! 回收 nonce，badNonce 時以新 nonce 重簽重送（上限內）。

use std::{
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use log::debug;
use serde::Serialize;
use thiserror::Error;

use crate::{
    directory::{Directory, DirectoryError},
    jws::{self, JwsError, JwsPayload, SignerIdentity},
    key::{KeyAlgorithm, KeyError, KeyPair},
    nonce::{NonceError, NoncePool},
    problem::Problem,
    transport::{HttpResponse, HttpTransport, ReqwestTransport, TransportError},
    wait::{CancelToken, ThreadWaiter, Waiter},
};

/// 會話層錯誤，涵蓋簽名發送管線的所有失敗形態。
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("Server rejected request: {0}")]
    Acme(Problem),
    #[error("Nonce retries exhausted after {attempts} attempts")]
    NonceExhausted { attempts: usize },
    #[error("Lock poisoned")]
    LockPoisoned,
}

type Result<T> = std::result::Result<T, SessionError>;

const DEFAULT_BAD_NONCE_ATTEMPTS: usize = 5;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// 與單一 ACME 伺服器的會話。
///
/// 建構時即取得 directory；之後所有端點皆由 directory 查得。
pub struct Session {
    transport: Arc<dyn HttpTransport>,
    directory: RwLock<Directory>,
    directory_url: String,
    nonce: NoncePool,
    key: KeyPair,
    kid: Mutex<Option<String>>,
    bad_nonce_attempts: usize,
    poll_interval: Duration,
    waiter: Box<dyn Waiter>,
}

/// [`Session`] 的建構器。
pub struct SessionBuilder {
    directory_url: String,
    key: Option<KeyPair>,
    transport: Option<Arc<dyn HttpTransport>>,
    bad_nonce_attempts: usize,
    poll_interval: Duration,
    waiter: Option<Box<dyn Waiter>>,
}

impl SessionBuilder {
    /// 以 directory URL 建立建構器。
    pub fn new(directory_url: &str) -> Self {
        Self {
            directory_url: directory_url.to_string(),
            key: None,
            transport: None,
            bad_nonce_attempts: DEFAULT_BAD_NONCE_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            waiter: None,
        }
    }

    /// 指定帳戶金鑰（預設產生新的 ES256 金鑰）。
    pub fn key(mut self, key: KeyPair) -> Self {
        self.key = Some(key);
        self
    }

    /// 注入自訂傳輸層（測試時注入 `MockTransport`）。
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// badNonce 重試的總嘗試次數上限（含首次），預設 5。
    pub fn bad_nonce_attempts(mut self, attempts: usize) -> Self {
        self.bad_nonce_attempts = attempts.max(1);
        self
    }

    /// 輪詢間隔，預設 2 秒。
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// 注入自訂等待策略。
    pub fn waiter(mut self, waiter: Box<dyn Waiter>) -> Self {
        self.waiter = Some(waiter);
        self
    }

    /// 綁定取消權杖（以 [`ThreadWaiter`] 包裝）。
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.waiter = Some(Box::new(ThreadWaiter::with_token(token)));
        self
    }

    /// 完成建構：取得 directory 並返回可用的會話。
    pub fn build(self) -> Result<Session> {
        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let key = match self.key {
            Some(key) => key,
            None => KeyPair::generate(KeyAlgorithm::Es256)?,
        };
        let directory = Directory::fetch(transport.as_ref(), &self.directory_url)?;
        Ok(Session {
            transport,
            directory: RwLock::new(directory),
            directory_url: self.directory_url,
            nonce: NoncePool::new(),
            key,
            kid: Mutex::new(None),
            bad_nonce_attempts: self.bad_nonce_attempts,
            poll_interval: self.poll_interval,
            waiter: self.waiter.unwrap_or_else(|| Box::new(ThreadWaiter::new())),
        })
    }
}

impl Session {
    /// 取得建構器。
    pub fn builder(directory_url: &str) -> SessionBuilder {
        SessionBuilder::new(directory_url)
    }

    /// 帳戶金鑰。
    pub fn key(&self) -> &KeyPair {
        &self.key
    }

    /// 已註冊帳戶的 KID（帳戶 URL）。
    pub fn kid(&self) -> Result<Option<String>> {
        Ok(self
            .kid
            .lock()
            .map_err(|_| SessionError::LockPoisoned)?
            .clone())
    }

    pub(crate) fn set_kid(&self, kid: String) -> Result<()> {
        *self.kid.lock().map_err(|_| SessionError::LockPoisoned)? = Some(kid);
        Ok(())
    }

    pub(crate) fn transport(&self) -> &dyn HttpTransport {
        self.transport.as_ref()
    }

    /// 當前 directory 的快照。
    pub fn directory(&self) -> Result<Directory> {
        Ok(self
            .directory
            .read()
            .map_err(|_| SessionError::LockPoisoned)?
            .clone())
    }

    /// 重新取得 directory 文件。
    pub fn reload_directory(&self) -> Result<()> {
        let directory = Directory::fetch(self.transport.as_ref(), &self.directory_url)?;
        *self
            .directory
            .write()
            .map_err(|_| SessionError::LockPoisoned)? = directory;
        Ok(())
    }

    /// 等待一個輪詢間隔；返回 `false` 表示已取消。
    pub(crate) fn wait(&self) -> bool {
        self.waiter.wait(self.poll_interval)
    }

    /// 以帳戶身分發送簽名 POST：已註冊則用 KID，否則內嵌 JWK。
    pub(crate) fn signed_post(&self, url: &str, payload: &JwsPayload) -> Result<HttpResponse> {
        let identity = match self.kid()? {
            Some(kid) => SignerIdentity::Kid(kid),
            None => SignerIdentity::Jwk,
        };
        self.signed_post_with(&self.key, &identity, url, payload)
    }

    /// 以帳戶身分對 JSON payload 發送簽名 POST。
    pub(crate) fn signed_post_json<T: Serialize>(
        &self,
        url: &str,
        payload: &T,
    ) -> Result<HttpResponse> {
        self.signed_post(url, &JwsPayload::from_value(payload)?)
    }

    /// POST-as-GET：空字串 payload 的簽名讀取。
    pub(crate) fn post_as_get(&self, url: &str) -> Result<HttpResponse> {
        self.signed_post(url, &JwsPayload::Empty)
    }

    /// 簽名發送管線核心。
    ///
    /// 每次嘗試皆以新 nonce 重簽；回應附帶的 `Replay-Nonce`
    /// 無條件回收入池（錯誤回應亦然）。badNonce 觸發重試，
    /// 其餘問題文件直接返回 [`SessionError::Acme`]。
    pub(crate) fn signed_post_with(
        &self,
        key: &KeyPair,
        identity: &SignerIdentity,
        url: &str,
        payload: &JwsPayload,
    ) -> Result<HttpResponse> {
        let new_nonce_url = self.directory()?.new_nonce;
        for attempt in 1..=self.bad_nonce_attempts {
            let nonce = self.nonce.take(self.transport.as_ref(), &new_nonce_url)?;
            let jws = jws::sign_request(key, identity, &nonce, url, payload)?;
            let response = self.transport.post_jose(url, &jws.to_json()?)?;
            self.nonce.store(response.replay_nonce.as_deref());

            if response.is_success() {
                return Ok(response);
            }

            let problem = Problem::from_response(&response);
            if problem.is_bad_nonce() {
                debug!(
                    "badNonce from {} (attempt {}/{}), re-signing",
                    url, attempt, self.bad_nonce_attempts
                );
                continue;
            }
            return Err(SessionError::Acme(problem));
        }
        Err(SessionError::NonceExhausted {
            attempts: self.bad_nonce_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use serde_json::Value;

    const DIRECTORY_URL: &str = "https://ca.test/directory";
    const NEW_NONCE_URL: &str = "https://ca.test/new-nonce";

    fn directory_json() -> &'static str {
        r#"{"newNonce":"https://ca.test/new-nonce",
            "newAccount":"https://ca.test/new-account",
            "newOrder":"https://ca.test/new-order",
            "revokeCert":"https://ca.test/revoke-cert"}"#
    }

    fn bad_nonce_body() -> &'static str {
        r#"{"type":"urn:ietf:params:acme:error:badNonce","detail":"stale"}"#
    }

    fn session_with(mock: Arc<MockTransport>) -> Session {
        mock.push(
            DIRECTORY_URL,
            HttpResponse::new(200).with_body(directory_json()),
        );
        Session::builder(DIRECTORY_URL)
            .transport(mock)
            .waiter(Box::new(crate::wait::InstantWaiter::unlimited()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_bad_nonce_retry_succeeds() {
        let mock = Arc::new(MockTransport::new());
        let session = session_with(mock.clone());

        mock.push(NEW_NONCE_URL, HttpResponse::new(200).with_nonce("n1"));
        mock.push(
            "https://ca.test/res",
            HttpResponse::new(400).with_nonce("n2").with_body(bad_nonce_body()),
        );
        mock.push(
            "https://ca.test/res",
            HttpResponse::new(200).with_nonce("n3").with_body("{}"),
        );

        let response = session.post_as_get("https://ca.test/res").unwrap();
        assert_eq!(response.status, 200);

        // 恰好 2 次 POST，且第二次以錯誤回應附帶的 n2 重簽
        let posts: Vec<_> = mock
            .requests()
            .into_iter()
            .filter(|r| r.method == "POST")
            .collect();
        assert_eq!(posts.len(), 2);
        let nonce_of = |body: &str| {
            let jws: Value = serde_json::from_str(body).unwrap();
            let protected =
                crate::base64::decode(jws["protected"].as_str().unwrap()).unwrap();
            let header: Value = serde_json::from_slice(&protected).unwrap();
            header["nonce"].as_str().unwrap().to_string()
        };
        assert_eq!(nonce_of(&posts[0].body), "n1");
        assert_eq!(nonce_of(&posts[1].body), "n2");
    }

    #[test]
    fn test_bad_nonce_exhaustion() {
        let mock = Arc::new(MockTransport::new());
        let session = session_with(mock.clone());

        for i in 0..5 {
            mock.push(
                "https://ca.test/res",
                HttpResponse::new(400)
                    .with_nonce(&format!("n{}", i + 2))
                    .with_body(bad_nonce_body()),
            );
        }
        mock.push(NEW_NONCE_URL, HttpResponse::new(200).with_nonce("n1"));

        let err = session.post_as_get("https://ca.test/res").unwrap_err();
        assert!(matches!(err, SessionError::NonceExhausted { attempts: 5 }));

        let posts = mock
            .requests()
            .into_iter()
            .filter(|r| r.method == "POST")
            .count();
        assert_eq!(posts, 5);
    }

    #[test]
    fn test_non_nonce_problem_is_not_retried() {
        let mock = Arc::new(MockTransport::new());
        let session = session_with(mock.clone());

        mock.push(NEW_NONCE_URL, HttpResponse::new(200).with_nonce("n1"));
        mock.push(
            "https://ca.test/res",
            HttpResponse::new(403).with_nonce("n2").with_body(
                r#"{"type":"urn:ietf:params:acme:error:unauthorized","detail":"nope"}"#,
            ),
        );

        let err = session.post_as_get("https://ca.test/res").unwrap_err();
        match err {
            SessionError::Acme(problem) => {
                assert_eq!(
                    problem.problem_type.as_deref(),
                    Some("urn:ietf:params:acme:error:unauthorized")
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }
        let posts = mock
            .requests()
            .into_iter()
            .filter(|r| r.method == "POST")
            .count();
        assert_eq!(posts, 1);
    }

    #[test]
    fn test_reload_directory_picks_up_changes() {
        let mock = Arc::new(MockTransport::new());
        let session = session_with(mock.clone());
        assert!(session.directory().unwrap().renewal_info.is_none());

        // 伺服器之後開始宣告 ARI 端點
        mock.push(
            DIRECTORY_URL,
            HttpResponse::new(200).with_body(
                r#"{"newNonce":"https://ca.test/new-nonce",
                    "newAccount":"https://ca.test/new-account",
                    "newOrder":"https://ca.test/new-order",
                    "revokeCert":"https://ca.test/revoke-cert",
                    "renewalInfo":"https://ca.test/renewal-info"}"#,
            ),
        );
        session.reload_directory().unwrap();
        assert_eq!(
            session.directory().unwrap().renewal_info.as_deref(),
            Some("https://ca.test/renewal-info")
        );

        let gets = mock
            .requests()
            .into_iter()
            .filter(|r| r.url == DIRECTORY_URL)
            .count();
        assert_eq!(gets, 2);
    }

    #[test]
    fn test_identity_switches_to_kid_after_registration() {
        let mock = Arc::new(MockTransport::new());
        let session = session_with(mock.clone());

        mock.push(NEW_NONCE_URL, HttpResponse::new(200).with_nonce("n1"));
        mock.push(
            "https://ca.test/res",
            HttpResponse::new(200).with_nonce("n2").with_body("{}"),
        );
        mock.push(
            "https://ca.test/res",
            HttpResponse::new(200).with_nonce("n3").with_body("{}"),
        );

        session.post_as_get("https://ca.test/res").unwrap();
        session.set_kid("https://ca.test/acct/1".to_string()).unwrap();
        session.post_as_get("https://ca.test/res").unwrap();

        let posts: Vec<_> = mock
            .requests()
            .into_iter()
            .filter(|r| r.method == "POST")
            .collect();
        let header_of = |body: &str| -> Value {
            let jws: Value = serde_json::from_str(body).unwrap();
            let protected =
                crate::base64::decode(jws["protected"].as_str().unwrap()).unwrap();
            serde_json::from_slice(&protected).unwrap()
        };
        let first = header_of(&posts[0].body);
        let second = header_of(&posts[1].body);
        assert!(first.get("jwk").is_some());
        assert!(first.get("kid").is_none());
        assert!(second.get("jwk").is_none());
        assert_eq!(second["kid"], "https://ca.test/acct/1");
    }
}
