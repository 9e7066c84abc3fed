//! Locker 状态机
//!
//! 每个 Locker 对应一个 tokio 任务，任务独占会话 ID、缓存策略和暂存队列，
//! 所有状态迁移与缓存修改都在这里串行执行，不需要额外加锁。
//! 后端调用在派生任务中进行，完成后以消息形式回到本任务。
//!
//! 同一 key 的写入按调用顺序串行：释放要等该 key 上进行中的加锁完成，
//! 释放期间到达的加锁/释放要等释放完成后再处理。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::future::join_all;
use locker_shared::observability::metrics;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::command::{Command, KeyCall, QueuedLock};
use super::{LockerOptions, LockerState, LockerStatus};
use crate::error::{LockError, StoreError};
use crate::events::{LockResult, LockerEvent, PendingLock};
use crate::key::{LockId, lock_key};
use crate::reboot::RebootPolicy;
use crate::store::{BackingStore, KvWrite, SessionSpec};
use crate::strategy::{LockCache, LockObserver, Strategy};

pub(super) struct LockerActor {
    name: String,
    lock_value: String,
    reboot: RebootPolicy,
    initial_state: LockerState,
    store: Arc<dyn BackingStore>,
    strategy: Box<dyn Strategy>,

    commands: mpsc::UnboundedReceiver<Command>,
    /// 后台任务回送消息用；弱引用保证所有句柄释放后通道能关闭
    notify: mpsc::WeakUnboundedSender<Command>,
    status: watch::Sender<LockerStatus>,
    events: broadcast::Sender<LockerEvent>,

    state: LockerState,
    session_id: Option<String>,
    reboot_count: u32,
    retries_exhausted: bool,
    /// 进入 acquiring 或 stopped 时递增
    epoch: u64,
    queue: VecDeque<QueuedLock>,
    /// 每个 key 上进行中的加锁请求
    acquires: HashMap<String, Vec<(u64, PendingLock)>>,
    /// 正在释放的 key，以及排在释放之后的调用
    releases: HashMap<String, VecDeque<KeyCall>>,
    next_request: u64,
}

impl LockerActor {
    pub(super) fn new(
        options: LockerOptions,
        store: Arc<dyn BackingStore>,
        strategy: Box<dyn Strategy>,
        commands: mpsc::UnboundedReceiver<Command>,
        notify: mpsc::WeakUnboundedSender<Command>,
        status: watch::Sender<LockerStatus>,
        events: broadcast::Sender<LockerEvent>,
    ) -> Self {
        Self {
            lock_value: options.lock_value.to_string(),
            name: options.name,
            reboot: options.reboot,
            initial_state: options.initial_state,
            store,
            strategy,
            commands,
            notify,
            status,
            events,
            state: LockerState::Stopped,
            session_id: None,
            reboot_count: 0,
            retries_exhausted: false,
            epoch: 0,
            queue: VecDeque::new(),
            acquires: HashMap::new(),
            releases: HashMap::new(),
            next_request: 0,
        }
    }

    pub(super) async fn run(mut self) {
        match self.initial_state {
            LockerState::Stopped => self.set_state(LockerState::Stopped),
            _ => self.enter_acquiring(),
        }

        while let Some(command) = self.commands.recv().await {
            self.handle(command).await;
        }

        // 所有句柄都已释放
        if self.state != LockerState::Stopped {
            self.enter_stopped().await;
        }
        debug!(locker = %self.name, "Locker task finished");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Lock { id, reply } => self.handle_lock(id, reply),
            Command::Release { id, reply } => self.handle_release(id, reply),
            Command::Start { reply } => {
                if self.state == LockerState::Stopped {
                    self.reboot_count = 0;
                    self.retries_exhausted = false;
                    self.enter_acquiring();
                }
                let _ = reply.send(());
            }
            Command::Stop { reply } => {
                if self.state != LockerState::Stopped {
                    self.enter_stopped().await;
                }
                let _ = reply.send(());
            }
            Command::SessionCreated { epoch, result } => {
                self.on_session_created(epoch, result).await
            }
            Command::RetryElapsed { epoch } => {
                if epoch == self.epoch && self.state == LockerState::Paused {
                    self.enter_acquiring();
                } else {
                    debug!(locker = %self.name, epoch, "Ignoring stale retry timer");
                }
            }
            Command::LockSettled {
                epoch,
                key,
                request,
                granted,
            } => {
                if epoch != self.epoch {
                    // 会话已经结束，旧会话下的结果不能再进入缓存
                    debug!(locker = %self.name, key = %key, "Dropping response from ended session");
                } else if !self.finish_acquire(&key, request) {
                    // 请求发出后该 key 已被释放，结果不能再进入缓存
                    debug!(locker = %self.name, key = %key, "Dropping response superseded by release");
                } else {
                    self.emit(LockerEvent::LockResponse { key, granted });
                }
            }
            Command::ReleaseSettled { epoch, key } => {
                if epoch == self.epoch {
                    self.finish_release(&key);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // 调用方命令
    // ------------------------------------------------------------------

    fn handle_lock(&mut self, id: LockId, reply: oneshot::Sender<LockResult>) {
        match self.state {
            LockerState::Ready => {
                let key = lock_key(&self.name, &id);
                match self.releases.get_mut(&key) {
                    Some(waiting) => {
                        debug!(locker = %self.name, key = %key, "Lock waits for release in flight");
                        waiting.push_back(KeyCall::Lock(QueuedLock { id, reply }));
                    }
                    None => self.dispatch_lock(key, reply),
                }
            }
            LockerState::Acquiring | LockerState::Paused => {
                debug!(locker = %self.name, id = %id, state = %self.state, "Queueing lock until ready");
                self.queue.push_back(QueuedLock { id, reply });
            }
            LockerState::Stopped => {
                let _ = reply.send(Err(LockError::SessionEnded));
            }
        }
    }

    fn dispatch_lock(&mut self, key: String, reply: oneshot::Sender<LockResult>) {
        if let Some(cached) = self.strategy.try_get(&key) {
            metrics::record_cache_hit(&self.name);
            tokio::spawn(async move {
                let _ = reply.send(cached.await);
            });
            return;
        }

        let Some(session_id) = self.session_id.clone() else {
            let _ = reply.send(Err(LockError::SessionEnded));
            return;
        };

        self.next_request += 1;
        let request = self.next_request;
        let pending = PendingLock::new(acquire(
            self.store.clone(),
            KvWrite::acquire(key.clone(), self.lock_value.clone(), session_id),
            self.notify.clone(),
            (self.epoch, request),
            self.name.clone(),
        ));
        self.acquires
            .entry(key.clone())
            .or_default()
            .push((request, pending.clone()));
        self.emit(LockerEvent::LockRequest {
            key,
            value: pending.clone(),
        });

        // 即使调用方已放弃等待，也要把请求驱动到完成，缓存才能收到结果
        tokio::spawn(async move {
            let _ = reply.send(pending.await);
        });
    }

    fn handle_release(&mut self, id: LockId, reply: oneshot::Sender<LockResult>) {
        if self.state == LockerState::Stopped {
            let _ = reply.send(Err(LockError::SessionEnded));
            return;
        }

        let key = lock_key(&self.name, &id);
        if let Some(waiting) = self.releases.get_mut(&key) {
            debug!(locker = %self.name, key = %key, "Release waits for previous release");
            waiting.push_back(KeyCall::Release(QueuedLock { id, reply }));
            return;
        }

        self.emit(LockerEvent::LockRelease { key: key.clone() });

        let session_id = match (&self.state, &self.session_id) {
            (LockerState::Ready, Some(session_id)) => session_id.clone(),
            _ => {
                // 会话尚未确认，不可能持有任何锁
                debug!(locker = %self.name, key = %key, state = %self.state, "Release without session");
                let _ = reply.send(Ok(true));
                return;
            }
        };

        // 先等该 key 上进行中的加锁落定，释放才不会被它覆盖
        let in_flight: Vec<PendingLock> = self
            .acquires
            .remove(&key)
            .into_iter()
            .flatten()
            .map(|(_, pending)| pending)
            .collect();
        self.releases.insert(key.clone(), VecDeque::new());

        let store = self.store.clone();
        let name = self.name.clone();
        let notify = self.notify.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            join_all(in_flight).await;
            let result = store
                .put(&KvWrite::release(key.as_str(), session_id))
                .await
                .map_err(LockError::from);
            match &result {
                Ok(released) => {
                    debug!(locker = %name, key = %key, released, "Lock released");
                    metrics::record_release(&name, if *released { "released" } else { "not_held" });
                }
                Err(e) => {
                    warn!(locker = %name, key = %key, error = %e, "Failed to release lock");
                    metrics::record_release(&name, "error");
                }
            }
            if let Some(tx) = notify.upgrade() {
                let _ = tx.send(Command::ReleaseSettled { epoch, key });
            }
            let _ = reply.send(result);
        });
    }

    /// 加锁请求落定；返回 false 表示请求已被之后的释放取代
    fn finish_acquire(&mut self, key: &str, request: u64) -> bool {
        let Some(in_flight) = self.acquires.get_mut(key) else {
            return false;
        };
        let Some(index) = in_flight.iter().position(|(id, _)| *id == request) else {
            return false;
        };
        in_flight.swap_remove(index);
        if in_flight.is_empty() {
            self.acquires.remove(key);
        }
        true
    }

    /// 释放落定，按到达顺序处理排在它后面的调用
    fn finish_release(&mut self, key: &str) {
        let Some(waiting) = self.releases.remove(key) else {
            return;
        };
        for call in waiting {
            match call {
                KeyCall::Lock(QueuedLock { id, reply }) => self.handle_lock(id, reply),
                KeyCall::Release(QueuedLock { id, reply }) => self.handle_release(id, reply),
            }
        }
    }

    // ------------------------------------------------------------------
    // 状态迁移
    // ------------------------------------------------------------------

    fn enter_acquiring(&mut self) {
        self.epoch += 1;
        self.set_state(LockerState::Acquiring);

        let store = self.store.clone();
        let notify = self.notify.clone();
        let spec = SessionSpec::immediate(self.name.clone());
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = store.create_session(&spec).await;
            let command = Command::SessionCreated { epoch, result };
            let undelivered = match notify.upgrade() {
                Some(tx) => tx.send(command).err().map(|e| e.0),
                None => Some(command),
            };
            // Locker 已经不存在，刚创建的会话没人会销毁
            if let Some(Command::SessionCreated {
                result: Ok(session_id),
                ..
            }) = undelivered
            {
                let _ = store.destroy_session(&session_id).await;
            }
        });
    }

    async fn on_session_created(&mut self, epoch: u64, result: Result<String, StoreError>) {
        if epoch != self.epoch || self.state != LockerState::Acquiring {
            if let Ok(session_id) = result {
                warn!(locker = %self.name, session_id = %session_id, "Destroying session created after locker moved on");
                let store = self.store.clone();
                tokio::spawn(async move {
                    let _ = store.destroy_session(&session_id).await;
                });
            }
            return;
        }

        match result {
            Ok(session_id) => {
                info!(locker = %self.name, session_id = %session_id, "Session started");
                metrics::record_session_start(&self.name);
                self.session_id = Some(session_id.clone());
                self.emit(LockerEvent::SessionStart { session_id });
                self.enter_ready();
            }
            Err(e) => {
                warn!(locker = %self.name, error = %e, "Failed to create session");
                self.reboot().await;
            }
        }
    }

    fn enter_ready(&mut self) {
        self.reboot_count = 0;
        self.retries_exhausted = false;
        self.set_state(LockerState::Ready);

        if !self.queue.is_empty() {
            debug!(locker = %self.name, queued = self.queue.len(), "Replaying queued locks");
        }
        while let Some(QueuedLock { id, reply }) = self.queue.pop_front() {
            self.handle_lock(id, reply);
        }
    }

    async fn reboot(&mut self) {
        self.reboot_count += 1;
        self.set_state(LockerState::Paused);
        metrics::record_reboot(&self.name);

        if !self.reboot.should_retry(self.reboot_count) {
            error!(
                locker = %self.name,
                reboot_count = self.reboot_count,
                max_retries = self.reboot.max_retries,
                "Session retry limit exceeded, locker stopped"
            );
            metrics::record_retry_exhausted(&self.name);
            self.retries_exhausted = true;
            self.enter_stopped().await;
            return;
        }

        let delay = self.reboot.delay_for_attempt(self.reboot_count);
        info!(
            locker = %self.name,
            reboot_count = self.reboot_count,
            delay_ms = delay.as_millis() as u64,
            "Scheduling session restart"
        );

        let notify = self.notify.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = notify.upgrade() {
                let _ = tx.send(Command::RetryElapsed { epoch });
            }
        });
    }

    async fn enter_stopped(&mut self) {
        self.epoch += 1;
        let session_id = self.session_id.take();
        self.set_state(LockerState::Stopped);

        for QueuedLock { reply, .. } in self.queue.drain(..) {
            let _ = reply.send(Err(LockError::SessionEnded));
        }
        self.acquires.clear();
        for (_, waiting) in self.releases.drain() {
            for call in waiting {
                let (KeyCall::Lock(QueuedLock { reply, .. })
                | KeyCall::Release(QueuedLock { reply, .. })) = call;
                let _ = reply.send(Err(LockError::SessionEnded));
            }
        }

        if let Some(session_id) = session_id {
            self.emit(LockerEvent::SessionEnd {
                session_id: session_id.clone(),
            });
            metrics::record_session_end(&self.name);

            // 尽力而为，失败时由后端的会话过期兜底
            match self.store.destroy_session(&session_id).await {
                Ok(()) => info!(locker = %self.name, session_id = %session_id, "Session ended"),
                Err(e) => warn!(
                    locker = %self.name,
                    session_id = %session_id,
                    error = %e,
                    "Failed to destroy session"
                ),
            }
        }
    }

    // ------------------------------------------------------------------
    // 辅助
    // ------------------------------------------------------------------

    fn set_state(&mut self, state: LockerState) {
        if self.state != state {
            info!(locker = %self.name, from = %self.state, to = %state, "Locker state changed");
        }
        self.state = state;
        metrics::set_locker_state(&self.name, state.as_str());
        self.status.send_replace(LockerStatus {
            state,
            session_id: self.session_id.clone(),
            reboot_count: self.reboot_count,
            retries_exhausted: self.retries_exhausted,
        });
    }

    /// 先同步通知策略，再广播给外部订阅者
    fn emit(&mut self, event: LockerEvent) {
        match &event {
            LockerEvent::SessionStart { .. } => {}
            LockerEvent::SessionEnd { session_id } => self.strategy.on_session_end(session_id),
            LockerEvent::LockRequest { key, value } => self.strategy.on_request(key, value),
            LockerEvent::LockResponse { key, granted } => self.strategy.on_response(key, *granted),
            LockerEvent::LockRelease { key } => self.strategy.on_release(key),
        }
        debug!(locker = %self.name, event = event.name(), key = ?event.key(), "Locker event");
        let _ = self.events.send(event);
    }
}

/// 加锁请求本体，由 [`PendingLock`] 共享给所有并发调用方
///
/// 结果先回送给 actor 再交给调用方，保证调用方拿到结果时缓存已经更新。
async fn acquire(
    store: Arc<dyn BackingStore>,
    write: KvWrite,
    notify: mpsc::WeakUnboundedSender<Command>,
    (epoch, request): (u64, u64),
    locker: String,
) -> LockResult {
    let result = match store.put(&write).await {
        Ok(true) => {
            debug!(locker = %locker, key = %write.key, "Lock acquired");
            metrics::record_lock_attempt(&locker, "granted");
            Ok(true)
        }
        Ok(false) => {
            debug!(locker = %locker, key = %write.key, "Lock held by another session");
            metrics::record_lock_attempt(&locker, "denied");
            Err(LockError::AlreadyLocked {
                key: write.key.clone(),
            })
        }
        Err(e) => {
            warn!(locker = %locker, key = %write.key, error = %e, "Lock request failed");
            metrics::record_lock_attempt(&locker, "error");
            Err(LockError::from(e))
        }
    };

    if let Some(tx) = notify.upgrade() {
        let _ = tx.send(Command::LockSettled {
            epoch,
            key: write.key,
            request,
            granted: result.is_ok(),
        });
    }
    result
}
