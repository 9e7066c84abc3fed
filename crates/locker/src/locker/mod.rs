//! Locker：基于会话的分布式锁客户端
//!
//! 每个 Locker 持有一个命名会话，对外提供 `lock(id)` / `release(id)`。
//!
//! 状态迁移：
//!
//! ```text
//! acquiring ──会话创建成功──▶ ready
//! acquiring ──会话创建失败──▶ paused ──等待 retry_interval──▶ acquiring
//! paused    ──重启次数耗尽──▶ stopped
//! 任意状态  ──stop()──────▶ stopped ──start()──▶ acquiring
//! ```
//!
//! 非 ready 状态下的 `lock` 调用进入队列，进入 ready 后按到达顺序重放。

mod actor;
mod command;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use locker_shared::config::LockerConfig;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use self::actor::LockerActor;
use self::command::Command;
use crate::error::{LockError, Result};
use crate::events::{LockResult, LockerEvent};
use crate::key::{LockId, lock_key};
use crate::reboot::RebootPolicy;
use crate::store::BackingStore;
use crate::strategy::Strategy;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 状态机状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockerState {
    Acquiring,
    Ready,
    Paused,
    Stopped,
}

impl LockerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquiring => "acquiring",
            Self::Ready => "ready",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LockerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 状态快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockerStatus {
    pub state: LockerState,
    pub session_id: Option<String>,
    pub reboot_count: u32,
    /// 因重启次数耗尽而停止
    pub retries_exhausted: bool,
}

/// Locker 构造参数
#[derive(Debug, Clone)]
pub struct LockerOptions {
    /// 会话名，同时是锁 key 的前缀
    pub name: String,
    pub reboot: RebootPolicy,
    /// 只有 `Stopped` 有特殊含义：不创建会话，直到显式 start()。其余值一律从 acquiring 开始
    pub initial_state: LockerState,
    /// 写入锁 key 的值，用于标识持有者
    pub lock_value: serde_json::Value,
}

impl LockerOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reboot: RebootPolicy::default(),
            initial_state: LockerState::Acquiring,
            lock_value: json!({ "pid": std::process::id() }),
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.reboot.max_retries = max_retries;
        self
    }

    pub fn retry_interval(mut self, retry_interval: Duration) -> Self {
        self.reboot = RebootPolicy::fixed(self.reboot.max_retries, retry_interval);
        self
    }

    pub fn reboot_policy(mut self, reboot: RebootPolicy) -> Self {
        self.reboot = reboot;
        self
    }

    pub fn initial_state(mut self, state: LockerState) -> Self {
        self.initial_state = state;
        self
    }

    pub fn lock_value(mut self, value: serde_json::Value) -> Self {
        self.lock_value = value;
        self
    }
}

impl From<&LockerConfig> for LockerOptions {
    fn from(config: &LockerConfig) -> Self {
        Self::new(config.name.clone()).reboot_policy(RebootPolicy::from(config))
    }
}

/// 等待 Locker 回复的 future
///
/// 命令在创建时已经发出，丢弃本 future 不会撤销命令。
#[must_use = "futures do nothing unless you `.await` or poll them"]
#[derive(Debug)]
pub struct LockReply(oneshot::Receiver<LockResult>);

impl Future for LockReply {
    type Output = LockResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|reply| reply.unwrap_or(Err(LockError::SessionEnded)))
    }
}

/// Locker 句柄
///
/// clone 开销很小，所有 clone 共享同一个状态机。最后一个句柄释放后
/// 状态机停止并销毁会话。
#[derive(Clone)]
pub struct Locker {
    name: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<LockerStatus>,
    events: broadcast::Sender<LockerEvent>,
}

impl fmt::Debug for Locker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locker")
            .field("name", &self.name)
            .field("status", &*self.status.borrow())
            .finish()
    }
}

impl Locker {
    /// 启动状态机任务，需要在 tokio 运行时中调用
    pub fn spawn(
        options: LockerOptions,
        store: Arc<dyn BackingStore>,
        strategy: Box<dyn Strategy>,
    ) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(LockerStatus {
            state: options.initial_state,
            session_id: None,
            reboot_count: 0,
            retries_exhausted: false,
        });
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let name: Arc<str> = Arc::from(options.name.as_str());

        let actor = LockerActor::new(
            options,
            store,
            strategy,
            rx,
            commands.downgrade(),
            status_tx,
            events.clone(),
        );
        tokio::spawn(actor.run());

        Self {
            name,
            commands,
            status,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `id` 对应的锁 key
    pub fn lock_key(&self, id: impl Into<LockId>) -> String {
        lock_key(&self.name, &id.into())
    }

    /// 获取锁
    ///
    /// 命令在调用时立即入队，返回的 future 只负责等待结果，
    /// 因此多次调用的处理顺序与调用顺序一致。
    ///
    /// - `Ok(true)`：已获得锁
    /// - `Err(AlreadyLocked)`：被其他会话持有
    /// - `Err(Transport)`：后端调用失败
    /// - `Err(SessionEnded)`：Locker 已停止
    pub fn lock(&self, id: impl Into<LockId>) -> LockReply {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Lock {
            id: id.into(),
            reply,
        });
        LockReply(rx)
    }

    /// 释放锁，无论后端结果如何都会清除该 key 的缓存
    ///
    /// 该 key 上进行中的加锁先落定再释放；释放完成前，同一 key 的后续调用排队等待。
    /// `Ok(false)` 表示该会话本来就没有持有这个 key。
    pub fn release(&self, id: impl Into<LockId>) -> LockReply {
        let (reply, rx) = oneshot::channel();
        let _ = self.commands.send(Command::Release {
            id: id.into(),
            reply,
        });
        LockReply(rx)
    }

    /// 从 stopped 重新开始获取会话；其他状态下无效果
    pub async fn start(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Start { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// 结束会话并进入 stopped，返回时会话销毁已尝试完成
    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stop { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn status(&self) -> LockerStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> LockerState {
        self.status.borrow().state
    }

    pub fn session_id(&self) -> Option<String> {
        self.status.borrow().session_id.clone()
    }

    /// 订阅生命周期事件，只能收到订阅之后发出的事件
    pub fn subscribe(&self) -> broadcast::Receiver<LockerEvent> {
        self.events.subscribe()
    }

    /// 等待进入 ready
    ///
    /// 已停止时返回 `SessionEnded`；因重启次数耗尽而停止时返回 `RetryLimitExceeded`。
    pub async fn ready(&self) -> Result<()> {
        let mut status = self.status.clone();
        loop {
            {
                let current = status.borrow_and_update();
                match current.state {
                    LockerState::Ready => return Ok(()),
                    LockerState::Stopped if current.retries_exhausted => {
                        return Err(LockError::RetryLimitExceeded {
                            attempts: current.reboot_count,
                        });
                    }
                    LockerState::Stopped => return Err(LockError::SessionEnded),
                    LockerState::Acquiring | LockerState::Paused => {}
                }
            }
            if status.changed().await.is_err() {
                return Err(LockError::SessionEnded);
            }
        }
    }
}
