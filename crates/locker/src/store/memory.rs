//! 内存后端
//!
//! 在进程内模拟 Consul 的会话与 KV 语义，适用于测试和本地开发。
//! 会话表与 KV 表放在同一把锁下，保证 acquire 判断与写入是原子的。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{BackingStore, KvWrite, SessionSpec, WriteMode};
use crate::error::StoreError;

/// KV 条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub value: String,
    /// 当前持有该 key 的会话
    pub session: Option<String>,
}

#[derive(Debug)]
struct State {
    /// session id -> session name
    sessions: HashMap<String, String>,
    keys: HashMap<String, KeyEntry>,
    available: bool,
    failing_creates: usize,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    session_creates: AtomicUsize,
    writes: AtomicUsize,
}

/// 内存后端，clone 后共享同一份数据
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    sessions: HashMap::new(),
                    keys: HashMap::new(),
                    available: true,
                    failing_creates: 0,
                }),
                session_creates: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
            }),
        }
    }

    /// 模拟后端宕机：关闭后所有调用返回 `StoreError::Unavailable`
    pub fn set_available(&self, available: bool) {
        self.inner.state.lock().available = available;
    }

    /// 接下来的 n 次会话创建失败
    pub fn fail_session_creates(&self, n: usize) {
        self.inner.state.lock().failing_creates = n;
    }

    /// 当前持有 key 的会话
    pub fn holder(&self, key: &str) -> Option<String> {
        self.inner
            .state
            .lock()
            .keys
            .get(key)
            .and_then(|entry| entry.session.clone())
    }

    pub fn get(&self, key: &str) -> Option<KeyEntry> {
        self.inner.state.lock().keys.get(key).cloned()
    }

    pub fn has_session(&self, session_id: &str) -> bool {
        self.inner.state.lock().sessions.contains_key(session_id)
    }

    pub fn session_count(&self) -> usize {
        self.inner.state.lock().sessions.len()
    }

    /// 会话创建调用次数（含失败）
    pub fn session_creates(&self) -> usize {
        self.inner.session_creates.load(Ordering::SeqCst)
    }

    /// KV 写入调用次数（含失败）
    pub fn writes(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }
}

fn unavailable() -> StoreError {
    StoreError::Unavailable("memory store is offline".to_string())
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn create_session(&self, spec: &SessionSpec) -> Result<String, StoreError> {
        self.inner.session_creates.fetch_add(1, Ordering::SeqCst);

        let mut state = self.inner.state.lock();
        if !state.available {
            return Err(unavailable());
        }
        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(StoreError::Unavailable(
                "session create rejected".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        state.sessions.insert(id.clone(), spec.name.clone());
        debug!(session_id = %id, name = %spec.name, "Memory session created");
        Ok(id)
    }

    async fn destroy_session(&self, session_id: &str) -> Result<(), StoreError> {
        let mut state = self.inner.state.lock();
        if !state.available {
            return Err(unavailable());
        }

        state.sessions.remove(session_id);
        for entry in state.keys.values_mut() {
            if entry.session.as_deref() == Some(session_id) {
                entry.session = None;
            }
        }
        debug!(session_id = %session_id, "Memory session destroyed");
        Ok(())
    }

    async fn put(&self, write: &KvWrite) -> Result<bool, StoreError> {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);

        let mut state = self.inner.state.lock();
        if !state.available {
            return Err(unavailable());
        }

        let session_id = write.mode.session_id();
        if !state.sessions.contains_key(session_id) {
            return Err(StoreError::InvalidSession {
                session_id: session_id.to_string(),
            });
        }

        let entry = state.keys.get(&write.key);
        match &write.mode {
            WriteMode::Acquire(id) => {
                let free = entry.is_none_or(|e| e.session.is_none() || e.session.as_ref() == Some(id));
                if free {
                    state.keys.insert(
                        write.key.clone(),
                        KeyEntry {
                            value: write.value.clone(),
                            session: Some(id.clone()),
                        },
                    );
                }
                Ok(free)
            }
            WriteMode::Release(id) => {
                let held = entry.is_some_and(|e| e.session.as_ref() == Some(id));
                if held {
                    state.keys.insert(
                        write.key.clone(),
                        KeyEntry {
                            value: write.value.clone(),
                            session: None,
                        },
                    );
                }
                Ok(held)
            }
        }
    }
}
