//! 永久缓存策略（默认）
//!
//! 成功结果一直缓存到显式释放或会话结束；被拒绝的结果不缓存，
//! 下次加锁会重新访问后端，因为持有者可能已经变化。

use std::collections::HashMap;

use tracing::debug;

use super::{LockCache, LockObserver};
use crate::events::PendingLock;

/// 缓存条目
#[derive(Debug, Clone)]
pub enum CacheEntry {
    /// 请求进行中，所有并发调用方共享该结果
    Pending(PendingLock),
    /// 请求已完成
    Settled(bool),
}

#[derive(Debug, Default)]
pub struct PermanentStrategy {
    cache: HashMap<String, CacheEntry>,
}

impl PermanentStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, key: &str) -> Option<&CacheEntry> {
        self.cache.get(key)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl LockObserver for PermanentStrategy {
    fn on_request(&mut self, key: &str, pending: &PendingLock) {
        self.cache
            .insert(key.to_string(), CacheEntry::Pending(pending.clone()));
    }

    fn on_response(&mut self, key: &str, granted: bool) {
        self.cache.insert(key.to_string(), CacheEntry::Settled(granted));
    }

    fn on_release(&mut self, key: &str) {
        self.cache.remove(key);
    }

    fn on_session_end(&mut self, _session_id: &str) {
        self.cache.clear();
    }
}

impl LockCache for PermanentStrategy {
    fn try_get(&self, key: &str) -> Option<PendingLock> {
        match self.cache.get(key) {
            Some(CacheEntry::Settled(true)) => {
                debug!(key = %key, "Key already held according to cache");
                Some(PendingLock::settled(Ok(true)))
            }
            Some(CacheEntry::Pending(pending)) => {
                debug!(key = %key, "Key has already been requested");
                Some(pending.clone())
            }
            Some(CacheEntry::Settled(false)) | None => None,
        }
    }
}
