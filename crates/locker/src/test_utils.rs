//! 测试工具模块
//!
//! 供单元测试与集成测试使用的后端包装和辅助函数。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::LockerEvent;
use crate::locker::LockerOptions;
use crate::store::{BackingStore, KvWrite, MemoryStore, SessionSpec, WriteMode};

// ==================== 测试配置辅助 ====================

/// 测试用 Locker 参数：重启间隔很短，锁值固定
pub fn test_options(name: &str) -> LockerOptions {
    LockerOptions::new(name)
        .max_retries(3)
        .retry_interval(Duration::from_millis(10))
        .lock_value(json!({ "pid": 0 }))
}

/// 唯一的会话名，避免并行测试互相干扰
pub fn unique_name(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

/// 取出当前已到达的所有事件
pub fn drain_events(events: &mut broadcast::Receiver<LockerEvent>) -> Vec<LockerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

// ==================== 可控后端 ====================

/// 在 [`MemoryStore`] 外加一道闸门：闸门关闭时 KV 写入会挂起，
/// 用来构造"请求仍在进行中"的场景，并统计实际到达后端的写入次数。
#[derive(Clone)]
pub struct GatedStore {
    inner: MemoryStore,
    gate: Arc<watch::Sender<bool>>,
    puts: Arc<AtomicUsize>,
}

impl GatedStore {
    /// 闸门初始为关闭
    pub fn new(inner: MemoryStore) -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            inner,
            gate: Arc::new(gate),
            puts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    pub fn close(&self) {
        self.gate.send_replace(false);
    }

    /// 已发起的写入次数（含仍被闸门挡住的）
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }
}

#[async_trait]
impl BackingStore for GatedStore {
    async fn create_session(&self, spec: &SessionSpec) -> Result<String, StoreError> {
        self.inner.create_session(spec).await
    }

    async fn destroy_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.inner.destroy_session(session_id).await
    }

    async fn put(&self, write: &KvWrite) -> Result<bool, StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);

        let mut gate = self.gate.subscribe();
        let opened = gate.wait_for(|open| *open).await.is_ok();
        if !opened {
            return Err(StoreError::Unavailable("gate dropped".to_string()));
        }

        self.inner.put(write).await
    }
}

/// 释放写入延迟 `delay` 后才到达后端，其余调用直接转发
#[derive(Clone)]
pub struct SlowReleaseStore {
    inner: MemoryStore,
    delay: Duration,
}

impl SlowReleaseStore {
    pub fn new(inner: MemoryStore, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl BackingStore for SlowReleaseStore {
    async fn create_session(&self, spec: &SessionSpec) -> Result<String, StoreError> {
        self.inner.create_session(spec).await
    }

    async fn destroy_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.inner.destroy_session(session_id).await
    }

    async fn put(&self, write: &KvWrite) -> Result<bool, StoreError> {
        if matches!(write.mode, WriteMode::Release(_)) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.put(write).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gate_holds_writes_until_opened() {
        let store = GatedStore::new(MemoryStore::new());
        let session = store
            .create_session(&SessionSpec::immediate("t"))
            .await
            .unwrap();

        let write = KvWrite::acquire("t/1/lock", "v", session);
        let pending = {
            let store = store.clone();
            tokio::spawn(async move { store.put(&write).await })
        };

        tokio::task::yield_now().await;
        assert_eq!(store.puts(), 1);
        assert!(!pending.is_finished());

        store.open();
        assert!(pending.await.unwrap().unwrap());
        assert_eq!(store.inner().writes(), 1);
    }

    #[test]
    fn test_unique_name() {
        assert_ne!(unique_name("a"), unique_name("a"));
        assert!(unique_name("jobs").starts_with("jobs-"));
    }
}
