//! 不缓存的策略
//!
//! 每次加锁都访问后端，同一 key 的并发调用也不合并。

use super::{LockCache, LockObserver};
use crate::events::PendingLock;

#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughStrategy;

impl LockObserver for PassthroughStrategy {
    fn on_request(&mut self, _key: &str, _pending: &PendingLock) {}

    fn on_response(&mut self, _key: &str, _granted: bool) {}

    fn on_release(&mut self, _key: &str) {}

    fn on_session_end(&mut self, _session_id: &str) {}
}

impl LockCache for PassthroughStrategy {
    fn try_get(&self, _key: &str) -> Option<PendingLock> {
        None
    }
}
