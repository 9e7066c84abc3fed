//! Locker 生命周期事件
//!
//! Locker 在会话开始/结束、加锁请求/响应、释放时发出事件。
//! 缓存策略通过 [`crate::strategy::LockObserver`] 同步接收这些事件，
//! 外部观察者则通过 `Locker::subscribe` 的 broadcast 通道异步接收。

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{self, BoxFuture, FutureExt, Shared};

use crate::error::LockError;

/// 加锁结果：`Ok(true)` 表示已获得锁
pub type LockResult = Result<bool, LockError>;

/// 进行中（或已完成）的加锁请求
///
/// 内部是一个可共享的 future，clone 后所有持有者观察到同一个结果，
/// 同一 key 的并发调用方因此只触发一次网络请求。
#[derive(Clone)]
pub struct PendingLock(Shared<BoxFuture<'static, LockResult>>);

impl PendingLock {
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = LockResult> + Send + 'static,
    {
        Self(fut.boxed().shared())
    }

    /// 已经有结果的请求，用于缓存命中
    pub fn settled(result: LockResult) -> Self {
        Self::new(future::ready(result))
    }

    /// 请求已完成时返回其结果
    pub fn peek(&self) -> Option<&LockResult> {
        self.0.peek()
    }

    /// 两个句柄是否指向同一个请求
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Shared::ptr_eq(&self.0, &other.0)
    }
}

impl Future for PendingLock {
    type Output = LockResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.0.poll_unpin(cx)
    }
}

impl fmt::Debug for PendingLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peek() {
            Some(result) => f.debug_tuple("PendingLock").field(result).finish(),
            None => f.write_str("PendingLock(<in flight>)"),
        }
    }
}

/// Locker 事件
#[derive(Debug, Clone)]
pub enum LockerEvent {
    /// 会话创建成功
    SessionStart { session_id: String },
    /// 会话结束，该会话下的所有锁均已失效
    SessionEnd { session_id: String },
    /// 发起加锁请求，携带进行中的结果
    LockRequest { key: String, value: PendingLock },
    /// 加锁请求完成
    LockResponse { key: String, granted: bool },
    /// 释放锁（无论网络结果如何都会发出）
    LockRelease { key: String },
}

impl LockerEvent {
    /// 事件名，与日志和指标中使用的名称一致
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStart { .. } => "session.start",
            Self::SessionEnd { .. } => "session.end",
            Self::LockRequest { .. } => "lock.request",
            Self::LockResponse { .. } => "lock.response",
            Self::LockRelease { .. } => "lock.release",
        }
    }

    /// 事件关联的锁 key（会话事件没有）
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::LockRequest { key, .. }
            | Self::LockResponse { key, .. }
            | Self::LockRelease { key } => Some(key),
            Self::SessionStart { .. } | Self::SessionEnd { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_lock_shares_result() {
        let pending = PendingLock::new(async { Ok(true) });
        let other = pending.clone();

        assert!(pending.ptr_eq(&other));
        assert!(pending.peek().is_none());
        assert!(pending.clone().await.unwrap());
        assert!(matches!(other.peek(), Some(Ok(true))));
    }

    #[test]
    fn test_pending_lock_wakes_every_waiter() {
        let (tx, rx) = tokio::sync::oneshot::channel::<LockResult>();
        let pending =
            PendingLock::new(async move { rx.await.unwrap_or(Err(LockError::SessionEnded)) });
        let mut first = tokio_test::task::spawn(pending.clone());
        let mut second = tokio_test::task::spawn(pending);

        tokio_test::assert_pending!(first.poll());
        tokio_test::assert_pending!(second.poll());

        tx.send(Ok(true)).unwrap();
        assert!(matches!(tokio_test::assert_ready!(second.poll()), Ok(true)));
        assert!(matches!(tokio_test::assert_ready!(first.poll()), Ok(true)));
    }

    #[tokio::test]
    async fn test_settled_pending_lock() {
        let pending = PendingLock::settled(Err(LockError::SessionEnded));
        assert!(matches!(pending.await, Err(LockError::SessionEnded)));
    }

    #[test]
    fn test_event_names() {
        let event = LockerEvent::LockResponse {
            key: "name/456/lock".to_string(),
            granted: true,
        };
        assert_eq!(event.name(), "lock.response");
        assert_eq!(event.key(), Some("name/456/lock"));

        let event = LockerEvent::SessionStart {
            session_id: "S1".to_string(),
        };
        assert_eq!(event.name(), "session.start");
        assert_eq!(event.key(), None);
    }
}
