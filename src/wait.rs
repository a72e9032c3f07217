//! 輪詢等待抽象。
//!
//! 狀態機輪詢之間的等待透過 [`Waiter`] trait 注入，正式環境以
//! [`ThreadWaiter`] 睡眠並響應取消，測試以 [`InstantWaiter`]
//! 立即返回，使輪詢測試不需真實時間。

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

/// 輪詢間隔的等待策略。
pub trait Waiter: Send + Sync {
    /// 等待指定時長。返回 `false` 表示等待被取消，輪詢應中止。
    fn wait(&self, duration: Duration) -> bool;
}

/// 可跨執行緒共享的取消旗標。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// 建立未取消的權杖。
    pub fn new() -> Self {
        Self::default()
    }

    /// 發出取消訊號。
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 是否已取消。
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// 以執行緒睡眠實作的等待策略，分片睡眠以便及時響應取消。
#[derive(Debug, Default)]
pub struct ThreadWaiter {
    token: CancelToken,
}

impl ThreadWaiter {
    const SLICE: Duration = Duration::from_millis(100);

    /// 建立不可取消的等待策略。
    pub fn new() -> Self {
        Self::default()
    }

    /// 建立綁定取消權杖的等待策略。
    pub fn with_token(token: CancelToken) -> Self {
        Self { token }
    }
}

impl Waiter for ThreadWaiter {
    fn wait(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.token.is_cancelled() {
                return false;
            }
            let slice = remaining.min(Self::SLICE);
            thread::sleep(slice);
            remaining -= slice;
        }
        !self.token.is_cancelled()
    }
}

/// 測試用等待策略：不睡眠，可設定允許的等待次數。
#[derive(Debug)]
pub struct InstantWaiter {
    remaining: std::sync::Mutex<Option<usize>>,
}

impl InstantWaiter {
    /// 永不取消的立即等待。
    pub fn unlimited() -> Self {
        Self {
            remaining: std::sync::Mutex::new(None),
        }
    }

    /// 允許 `count` 次等待，之後視為取消。
    pub fn cancel_after(count: usize) -> Self {
        Self {
            remaining: std::sync::Mutex::new(Some(count)),
        }
    }
}

impl Waiter for InstantWaiter {
    fn wait(&self, _duration: Duration) -> bool {
        let mut remaining = match self.remaining.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        match remaining.as_mut() {
            None => true,
            Some(0) => false,
            Some(count) => {
                *count -= 1;
                true
            }
        }
    }
}

/// 輪詢的收斂結果。
///
/// `Pending` 表示等待被取消時資源仍未達終態，附帶最後觀測到的狀態。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// 資源已達終態。
    Settled(T),
    /// 輪詢被取消，資源尚未收斂。
    Pending(T),
}

impl<T> PollOutcome<T> {
    /// 取出最後觀測到的狀態，不論是否收斂。
    pub fn into_inner(self) -> T {
        match self {
            Self::Settled(value) | Self::Pending(value) => value,
        }
    }

    /// 是否已收斂至終態。
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Settled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_stops_wait() {
        let token = CancelToken::new();
        token.cancel();
        let waiter = ThreadWaiter::with_token(token);
        assert!(!waiter.wait(Duration::from_secs(10)));
    }

    #[test]
    fn test_thread_waiter_completes_short_wait() {
        let waiter = ThreadWaiter::new();
        assert!(waiter.wait(Duration::from_millis(10)));
    }

    #[test]
    fn test_instant_waiter_budget() {
        let waiter = InstantWaiter::cancel_after(2);
        assert!(waiter.wait(Duration::from_secs(1)));
        assert!(waiter.wait(Duration::from_secs(1)));
        assert!(!waiter.wait(Duration::from_secs(1)));
    }

    #[test]
    fn test_poll_outcome_accessors() {
        let settled: PollOutcome<u8> = PollOutcome::Settled(1);
        let pending: PollOutcome<u8> = PollOutcome::Pending(2);
        assert!(settled.is_settled());
        assert!(!pending.is_settled());
        assert_eq!(settled.into_inner(), 1);
        assert_eq!(pending.into_inner(), 2);
    }
}
