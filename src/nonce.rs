//! Replay nonce 池。
//!
//! 伺服器在每個回應附上 `Replay-Nonce`，池中最多快取一枚；
//! `take` 在池空時透過 HEAD newNonce 補貨。鎖僅涵蓋快取的
//! 取出與放回，絕不橫跨任何網路 I/O。

use std::sync::Mutex;

use thiserror::Error;

use crate::transport::{HttpTransport, TransportError};

/// Nonce 管理相關的錯誤。
#[derive(Debug, Error)]
pub enum NonceError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Server response missing Replay-Nonce header")]
    NoNonceHeader,
    #[error("Lock poisoned")]
    LockPoisoned,
}

type Result<T> = std::result::Result<T, NonceError>;

/// 單槽 nonce 快取。每枚 nonce 僅能被取出一次。
#[derive(Debug, Default)]
pub struct NoncePool {
    cached: Mutex<Option<String>>,
}

impl NoncePool {
    /// 建立空的 nonce 池。
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出一枚 nonce：優先消耗快取，否則向 newNonce 端點發 HEAD 補貨。
    ///
    /// 取出即自池中移除，同一枚 nonce 不可能被返回兩次。
    pub fn take(&self, transport: &dyn HttpTransport, new_nonce_url: &str) -> Result<String> {
        let cached = self
            .cached
            .lock()
            .map_err(|_| NonceError::LockPoisoned)?
            .take();
        if let Some(nonce) = cached {
            return Ok(nonce);
        }

        let response = transport.head(new_nonce_url)?;
        response.replay_nonce.ok_or(NonceError::NoNonceHeader)
    }

    /// 將回應中的 nonce 放入池中；`None` 時不動作。
    ///
    /// 無條件以最新值覆蓋舊快取，包括錯誤回應附帶的 nonce。
    pub fn store(&self, nonce: Option<&str>) {
        if let Some(nonce) = nonce {
            if let Ok(mut cached) = self.cached.lock() {
                *cached = Some(nonce.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{HttpResponse, MockTransport};

    const NEW_NONCE_URL: &str = "https://ca.test/new-nonce";

    #[test]
    fn test_take_fetches_when_empty() {
        let mock = MockTransport::new();
        mock.push(NEW_NONCE_URL, HttpResponse::new(200).with_nonce("fresh-1"));

        let pool = NoncePool::new();
        assert_eq!(pool.take(&mock, NEW_NONCE_URL).unwrap(), "fresh-1");
        assert_eq!(mock.requests().len(), 1);
        assert_eq!(mock.requests()[0].method, "HEAD");
    }

    #[test]
    fn test_take_prefers_cached() {
        let mock = MockTransport::new();
        let pool = NoncePool::new();
        pool.store(Some("cached-1"));

        assert_eq!(pool.take(&mock, NEW_NONCE_URL).unwrap(), "cached-1");
        // 快取命中，不應有任何網路請求
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn test_nonce_never_returned_twice() {
        let mock = MockTransport::new();
        mock.push(NEW_NONCE_URL, HttpResponse::new(200).with_nonce("fresh-2"));

        let pool = NoncePool::new();
        pool.store(Some("cached-2"));
        assert_eq!(pool.take(&mock, NEW_NONCE_URL).unwrap(), "cached-2");
        // 第二次取出必須補貨而非重用
        assert_eq!(pool.take(&mock, NEW_NONCE_URL).unwrap(), "fresh-2");
    }

    #[test]
    fn test_store_overwrites() {
        let mock = MockTransport::new();
        let pool = NoncePool::new();
        pool.store(Some("old"));
        pool.store(Some("new"));
        assert_eq!(pool.take(&mock, NEW_NONCE_URL).unwrap(), "new");
    }

    #[test]
    fn test_missing_header_is_error() {
        let mock = MockTransport::new();
        mock.push(NEW_NONCE_URL, HttpResponse::new(200));

        let pool = NoncePool::new();
        assert!(matches!(
            pool.take(&mock, NEW_NONCE_URL),
            Err(NonceError::NoNonceHeader)
        ));
    }
}
