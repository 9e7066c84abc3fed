//! 统一错误处理模块
//!
//! 区分后端调用失败（`StoreError`）与调用方可见的加锁结果（`LockError`）。
//! `LockError` 需要在合并的并发请求之间共享同一个结果，因此实现了 `Clone`，
//! 底层的后端错误以 `Arc` 持有。

use std::sync::Arc;

use thiserror::Error;

/// 后端存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP 请求失败: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Consul 返回错误状态 {status}: {body}")]
    Status { status: u16, body: String },

    #[error("响应解析失败: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("无效的服务地址: {0}")]
    InvalidAddress(String),

    #[error("无效的 key: {0}")]
    InvalidKey(String),

    #[error("会话无效: {session_id}")]
    InvalidSession { session_id: String },

    #[error("后端不可用: {0}")]
    Unavailable(String),
}

/// 加锁/释放错误
#[derive(Debug, Clone, Error)]
pub enum LockError {
    /// 条件写被拒绝，key 已被其他会话持有。属于预期结果，由调用方决定是否重试
    #[error("锁已被占用: {key}")]
    AlreadyLocked { key: String },

    /// 后端调用失败，原样透传给调用方
    #[error("后端调用失败: {0}")]
    Transport(#[source] Arc<StoreError>),

    /// Locker 已停止，未发起任何网络请求
    #[error("会话已结束")]
    SessionEnded,

    /// 会话重启次数耗尽，Locker 已停止，需要外部显式 start()
    #[error("会话重启次数已达上限: attempts={attempts}")]
    RetryLimitExceeded { attempts: u32 },
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, LockError>;

impl From<StoreError> for LockError {
    fn from(err: StoreError) -> Self {
        Self::Transport(Arc::new(err))
    }
}

impl LockError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyLocked { .. } => "ALREADY_LOCKED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::SessionEnded => "SESSION_ENDED",
            Self::RetryLimitExceeded { .. } => "RETRY_LIMIT_EXCEEDED",
        }
    }

    /// 是否值得由调用方稍后重试
    ///
    /// 锁冲突与网络错误都是暂时的；Locker 停止后重试没有意义。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AlreadyLocked { .. } | Self::Transport(_))
    }
}

/// 组装 Locker 时的配置错误
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("未知的缓存策略: {0}")]
    UnknownStrategy(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
