//! Locker 集成测试
//!
//! 多个 Locker 共享同一个进程内后端，验证互斥、请求合并与会话生命周期。

use std::sync::Arc;
use std::time::Duration;

use consul_locker::test_utils::{
    GatedStore, SlowReleaseStore, drain_events, test_options, unique_name,
};
use consul_locker::{LockError, LockerEvent, LockerFactory, LockerState, MemoryStore};

// ==================== 互斥 ====================

#[tokio::test]
async fn test_competing_lockers_only_one_wins() {
    let store = MemoryStore::new();
    let factory = LockerFactory::new(Arc::new(store.clone()));
    let name = unique_name("cardWrites");

    let a = factory.create(test_options(&name));
    let b = factory.create(test_options(&name));
    a.ready().await.unwrap();
    b.ready().await.unwrap();
    assert_ne!(a.session_id(), b.session_id());

    let (a1, a2, a3, b1, b2) = tokio::join!(
        a.lock(123),
        a.lock(123),
        a.lock(123),
        b.lock(123),
        b.lock(123)
    );

    let a_results = [a1, a2, a3];
    let b_results = [b1, b2];
    let granted = |results: &[Result<bool, LockError>]| results.iter().all(|r| matches!(r, Ok(true)));
    let denied = |results: &[Result<bool, LockError>]| {
        results
            .iter()
            .all(|r| matches!(r, Err(LockError::AlreadyLocked { .. })))
    };

    // 同一个 Locker 的调用方结果一致，两个 Locker 恰好一个成功
    if granted(&a_results) {
        assert!(denied(&b_results));
        assert_eq!(store.holder(&a.lock_key(123)), a.session_id());
    } else {
        assert!(denied(&a_results));
        assert!(granted(&b_results));
        assert_eq!(store.holder(&b.lock_key(123)), b.session_id());
    }
    assert_eq!(store.writes(), 2);
}

#[tokio::test]
async fn test_release_lets_other_locker_acquire() {
    let store = MemoryStore::new();
    let factory = LockerFactory::new(Arc::new(store.clone()));
    let name = unique_name("cardWrites");

    let a = factory.create(test_options(&name));
    let b = factory.create(test_options(&name));
    a.ready().await.unwrap();
    b.ready().await.unwrap();

    assert!(a.lock(123).await.unwrap());
    assert!(b.lock(123).await.is_err());

    assert!(a.release(123).await.unwrap());
    assert!(b.lock(123).await.unwrap());
    assert_eq!(store.holder(&b.lock_key(123)), b.session_id());

    // a 释放后缓存已清空，再次加锁会被拒绝而不是命中旧缓存
    assert!(matches!(
        a.lock(123).await,
        Err(LockError::AlreadyLocked { .. })
    ));
}

#[tokio::test]
async fn test_release_of_unheld_key() {
    let store = MemoryStore::new();
    let factory = LockerFactory::new(Arc::new(store));
    let locker = factory.create(test_options(&unique_name("jobs")));
    locker.ready().await.unwrap();

    assert!(!locker.release("never-locked").await.unwrap());
}

// ==================== 同一 key 的写入顺序 ====================

#[tokio::test]
async fn test_lock_after_release_waits_for_release() {
    let memory = MemoryStore::new();
    let slow = SlowReleaseStore::new(memory.clone(), Duration::from_millis(50));
    let name = unique_name("jobs");

    let a = LockerFactory::new(Arc::new(slow)).create(test_options(&name));
    let b = LockerFactory::new(Arc::new(memory.clone())).create(test_options(&name));
    a.ready().await.unwrap();
    b.ready().await.unwrap();

    assert!(a.lock(1).await.unwrap());

    // 释放还没到达后端时再次加锁
    let release = a.release(1);
    let relock = a.lock(1);
    assert!(release.await.unwrap());
    assert!(relock.await.unwrap());

    assert_eq!(memory.holder(&a.lock_key(1)), a.session_id());
    assert_eq!(memory.writes(), 3);
    assert!(matches!(
        b.lock(1).await,
        Err(LockError::AlreadyLocked { .. })
    ));
}

#[tokio::test]
async fn test_release_waits_for_lock_in_flight() {
    let store = GatedStore::new(MemoryStore::new());
    let factory = LockerFactory::new(Arc::new(store.clone()));
    let locker = factory.create(test_options(&unique_name("jobs")));
    locker.ready().await.unwrap();

    let lock = locker.lock(2);
    while store.puts() == 0 {
        tokio::task::yield_now().await;
    }
    let release = locker.release(2);
    tokio::task::yield_now().await;
    assert_eq!(store.puts(), 1);

    store.open();
    assert!(lock.await.unwrap());
    assert!(release.await.unwrap());
    assert_eq!(store.inner().holder(&locker.lock_key(2)), None);

    // 被释放取代的加锁结果不进入缓存
    assert!(locker.lock(2).await.unwrap());
    assert_eq!(store.puts(), 3);
    assert_eq!(store.inner().holder(&locker.lock_key(2)), locker.session_id());
}

#[tokio::test]
async fn test_stop_fails_calls_waiting_on_release() {
    let memory = MemoryStore::new();
    let slow = SlowReleaseStore::new(memory.clone(), Duration::from_millis(50));
    let locker = LockerFactory::new(Arc::new(slow)).create(test_options(&unique_name("jobs")));
    locker.ready().await.unwrap();
    assert!(locker.lock(4).await.unwrap());

    let release = locker.release(4);
    let relock = locker.lock(4);
    locker.stop().await;

    assert!(matches!(relock.await, Err(LockError::SessionEnded)));
    let _ = release.await;
    assert_eq!(memory.holder(&locker.lock_key(4)), None);
}

// ==================== 请求合并 ====================

#[tokio::test]
async fn test_concurrent_locks_share_one_request() {
    let store = GatedStore::new(MemoryStore::new());
    let factory = LockerFactory::new(Arc::new(store.clone()));
    let locker = factory.create(test_options(&unique_name("jobs")));
    locker.ready().await.unwrap();
    let mut events = locker.subscribe();

    let first = tokio::spawn(locker.lock(7));
    let second = tokio::spawn(locker.lock(7));
    let third = tokio::spawn(locker.lock("7"));

    // 让所有调用都到达 Locker 后再放行后端
    while store.puts() == 0 {
        tokio::task::yield_now().await;
    }
    tokio::task::yield_now().await;
    store.open();

    assert!(first.await.unwrap().unwrap());
    assert!(second.await.unwrap().unwrap());
    assert!(third.await.unwrap().unwrap());
    assert_eq!(store.puts(), 1);

    locker.stop().await;
    let requests = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, LockerEvent::LockRequest { .. }))
        .count();
    assert_eq!(requests, 1);
}

#[tokio::test]
async fn test_concurrent_denied_locks_share_rejection() {
    let memory = MemoryStore::new();
    let gated = GatedStore::new(memory.clone());
    let name = unique_name("jobs");

    let owner = LockerFactory::new(Arc::new(memory.clone())).create(test_options(&name));
    owner.ready().await.unwrap();
    assert!(owner.lock(1).await.unwrap());

    let locker = LockerFactory::new(Arc::new(gated.clone())).create(test_options(&name));
    locker.ready().await.unwrap();

    let first = tokio::spawn(locker.lock(1));
    let second = tokio::spawn(locker.lock(1));
    while gated.puts() == 0 {
        tokio::task::yield_now().await;
    }
    tokio::task::yield_now().await;
    gated.open();

    assert!(matches!(
        first.await.unwrap(),
        Err(LockError::AlreadyLocked { .. })
    ));
    assert!(matches!(
        second.await.unwrap(),
        Err(LockError::AlreadyLocked { .. })
    ));
    assert_eq!(gated.puts(), 1);

    // 拒绝结果不缓存
    assert!(locker.lock(1).await.is_err());
    assert_eq!(gated.puts(), 2);
}

// ==================== 会话生命周期 ====================

#[tokio::test]
async fn test_session_end_clears_cache() {
    let store = GatedStore::new(MemoryStore::new());
    store.open();
    let factory = LockerFactory::new(Arc::new(store.clone()));
    let locker = factory.create(test_options(&unique_name("jobs")));
    locker.ready().await.unwrap();

    assert!(locker.lock(5).await.unwrap());
    assert!(locker.lock(5).await.unwrap());
    assert_eq!(store.puts(), 1);

    locker.stop().await;
    locker.start().await;
    locker.ready().await.unwrap();

    // 新会话下必须重新访问后端
    assert!(locker.lock(5).await.unwrap());
    assert_eq!(store.puts(), 2);
    assert_eq!(store.inner().holder(&locker.lock_key(5)), locker.session_id());
}

#[tokio::test]
async fn test_stopped_locker_releases_locks_to_others() {
    let store = MemoryStore::new();
    let factory = LockerFactory::new(Arc::new(store.clone()));
    let name = unique_name("jobs");

    let a = factory.create(test_options(&name));
    let b = factory.create(test_options(&name));
    a.ready().await.unwrap();
    b.ready().await.unwrap();

    assert!(a.lock(9).await.unwrap());
    a.stop().await;

    assert_eq!(a.state(), LockerState::Stopped);
    assert!(matches!(a.lock(9).await, Err(LockError::SessionEnded)));
    assert!(b.lock(9).await.unwrap());
}

#[tokio::test]
async fn test_retry_limit_then_manual_start() {
    let store = MemoryStore::new();
    store.set_available(false);
    let factory = LockerFactory::new(Arc::new(store.clone()));
    let locker = factory.create(test_options(&unique_name("jobs")));

    let err = locker.ready().await.unwrap_err();
    assert!(matches!(err, LockError::RetryLimitExceeded { attempts: 4 }));
    assert_eq!(store.session_creates(), 4);
    assert_eq!(locker.state(), LockerState::Stopped);

    store.set_available(true);
    locker.start().await;
    locker.ready().await.unwrap();
    assert!(locker.lock(1).await.unwrap());
}

#[tokio::test]
async fn test_locks_wait_for_session_recovery() {
    let store = MemoryStore::new();
    store.fail_session_creates(2);
    let factory = LockerFactory::new(Arc::new(store.clone()));
    let locker = factory.create(test_options(&unique_name("jobs")));

    // 会话建立之前发起的调用会排队，直到 ready 后执行
    let (a, b) = tokio::join!(locker.lock(1), locker.lock(2));
    assert!(a.unwrap());
    assert!(b.unwrap());
    assert_eq!(store.session_creates(), 3);
    assert_eq!(locker.status().reboot_count, 0);
}
