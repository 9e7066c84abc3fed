use tokio::sync::oneshot;

use crate::error::StoreError;
use crate::events::LockResult;
use crate::key::LockId;

/// 发往 Locker actor 的消息
///
/// 前四种来自调用方，其余由 actor 自己派生的后台任务回送。
/// 后台消息携带发出时的 epoch，epoch 不匹配说明状态机已经离开了当时的会话。
pub(crate) enum Command {
    Lock {
        id: LockId,
        reply: oneshot::Sender<LockResult>,
    },
    Release {
        id: LockId,
        reply: oneshot::Sender<LockResult>,
    },
    Start {
        reply: oneshot::Sender<()>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    SessionCreated {
        epoch: u64,
        result: Result<String, StoreError>,
    },
    RetryElapsed {
        epoch: u64,
    },
    LockSettled {
        epoch: u64,
        key: String,
        request: u64,
        granted: bool,
    },
    ReleaseSettled {
        epoch: u64,
        key: String,
    },
}

/// 非 ready 状态下暂存的加锁调用，进入 ready 后按 FIFO 重放
pub(crate) struct QueuedLock {
    pub id: LockId,
    pub reply: oneshot::Sender<LockResult>,
}

/// 等待同一 key 上的释放完成后才处理的调用，按到达顺序保存
pub(crate) enum KeyCall {
    Lock(QueuedLock),
    Release(QueuedLock),
}
