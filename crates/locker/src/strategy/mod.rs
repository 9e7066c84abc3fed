//! 可插拔的加锁结果缓存策略
//!
//! Locker 与策略之间是显式的双向接口：
//!
//! ```text
//! Locker ──事件──▶ LockObserver (on_request / on_response / on_release / on_session_end)
//! Locker ──查询──▶ LockCache    (try_get，在任何网络 I/O 之前同步调用)
//! ```
//!
//! 策略由 Locker 独占，生命周期与 Locker 相同，缓存只在事件回调中被修改。

mod passthrough;
mod permanent;

use std::str::FromStr;
use std::sync::Arc;

pub use passthrough::PassthroughStrategy;
pub use permanent::{CacheEntry, PermanentStrategy};

use crate::error::SetupError;
use crate::events::PendingLock;

/// Locker 事件的同步观察者
pub trait LockObserver: Send {
    /// 发起加锁请求，`pending` 为进行中的共享结果
    fn on_request(&mut self, key: &str, pending: &PendingLock);

    /// 加锁请求完成
    fn on_response(&mut self, key: &str, granted: bool);

    /// 释放锁
    fn on_release(&mut self, key: &str);

    /// 会话结束，该会话下的所有锁均已失效
    fn on_session_end(&mut self, session_id: &str);
}

/// 加锁结果查询
pub trait LockCache: Send {
    /// 已知或进行中的结果；返回 None 时 Locker 会发起网络请求
    fn try_get(&self, key: &str) -> Option<PendingLock>;
}

/// 缓存策略 = 观察者 + 查询
pub trait Strategy: LockObserver + LockCache {}

impl<T: LockObserver + LockCache> Strategy for T {}

/// 为每个 Locker 构造独立的策略实例
pub type StrategyFactory = Arc<dyn Fn() -> Box<dyn Strategy> + Send + Sync>;

/// 内置策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    /// 缓存成功结果与进行中的请求，直到释放或会话结束
    #[default]
    Permanent,
    /// 不做任何缓存，每次加锁都访问后端
    Passthrough,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permanent => "permanent",
            Self::Passthrough => "passthrough",
        }
    }

    pub fn factory(self) -> StrategyFactory {
        match self {
            Self::Permanent => Arc::new(|| Box::new(PermanentStrategy::new()) as Box<dyn Strategy>),
            Self::Passthrough => {
                Arc::new(|| Box::new(PassthroughStrategy) as Box<dyn Strategy>)
            }
        }
    }
}

impl FromStr for StrategyKind {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permanent" => Ok(Self::Permanent),
            "passthrough" | "none" => Ok(Self::Passthrough),
            other => Err(SetupError::UnknownStrategy(other.to_string())),
        }
    }
}
