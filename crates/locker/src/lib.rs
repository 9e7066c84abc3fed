//! 基于会话的分布式锁客户端
//!
//! 多个独立进程通过协调服务（Consul）的会话与条件写竞争逻辑 key 的独占权，
//! 互斥由服务端的会话语义保证，本地只负责会话生命周期、请求合并与缓存。
//!
//! ## 组成
//!
//! - [`store`]：后端存储抽象，含 Consul HTTP 实现与进程内实现
//! - [`strategy`]：可插拔的结果缓存策略，合并同一 key 的并发请求
//! - [`locker`]：Locker 状态机，负责会话获取、重启与命令排队
//! - [`factory`]：组装后端与策略，创建 Locker
//!
//! ## 使用示例
//!
//! ```ignore
//! let factory = LockerFactory::from_config(&config)?;
//! let locker = factory.create(LockerOptions::new("cardWrites"));
//!
//! if locker.lock(123).await? {
//!     do_critical_work().await?;
//! }
//! locker.release(123).await?;
//! ```

pub mod error;
pub mod events;
pub mod factory;
pub mod key;
pub mod locker;
pub mod reboot;
pub mod store;
pub mod strategy;
pub mod test_utils;

pub use error::{LockError, SetupError, StoreError};
pub use events::{LockResult, LockerEvent, PendingLock};
pub use factory::LockerFactory;
pub use key::{LockId, lock_key};
pub use locker::{LockReply, Locker, LockerOptions, LockerState, LockerStatus};
pub use reboot::RebootPolicy;
pub use store::{BackingStore, ConsulStore, KvWrite, MemoryStore, SessionSpec, WriteMode};
pub use strategy::{PassthroughStrategy, PermanentStrategy, Strategy, StrategyFactory, StrategyKind};
