//! 后端存储抽象
//!
//! Locker 只依赖三个操作：创建会话、销毁会话、带会话条件的 KV 写入。
//! 通过 `BackingStore` trait 抽象，生产环境使用 [`ConsulStore`]，
//! 测试和本地开发使用 [`MemoryStore`]。

mod consul;
mod memory;

use std::time::Duration;

use async_trait::async_trait;

pub use consul::ConsulStore;
pub use memory::{KeyEntry, MemoryStore};

use crate::error::StoreError;

/// 会话创建参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSpec {
    pub name: String,
    /// 会话失效后锁重新可用前的等待时间
    pub lock_delay: Duration,
}

impl SessionSpec {
    /// 不设锁延迟：持有者崩溃后锁立即可被其他会话获取
    pub fn immediate(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lock_delay: Duration::ZERO,
        }
    }
}

/// 条件写入模式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteMode {
    /// 写入成功则该会话持有 key
    Acquire(String),
    /// 清空 key 并解除该会话的持有
    Release(String),
}

impl WriteMode {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Acquire(id) | Self::Release(id) => id,
        }
    }
}

/// 带会话条件的 KV 写入
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvWrite {
    pub key: String,
    pub value: String,
    pub mode: WriteMode,
}

impl KvWrite {
    pub fn acquire(
        key: impl Into<String>,
        value: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            mode: WriteMode::Acquire(session_id.into()),
        }
    }

    pub fn release(key: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: String::new(),
            mode: WriteMode::Release(session_id.into()),
        }
    }
}

/// 后端存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// 创建会话，返回会话 ID
    async fn create_session(&self, spec: &SessionSpec) -> Result<String, StoreError>;

    /// 销毁会话，该会话持有的锁由服务端释放
    async fn destroy_session(&self, session_id: &str) -> Result<(), StoreError>;

    /// 条件写入
    ///
    /// Acquire 模式下返回 true 表示写入成功且会话已持有该 key，
    /// false 表示 key 被其他会话持有。
    async fn put(&self, write: &KvWrite) -> Result<bool, StoreError>;
}
