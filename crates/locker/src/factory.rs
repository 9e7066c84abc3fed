//! Locker 工厂
//!
//! 持有一个共享的后端客户端和策略构造函数，为每个 Locker 装配独立的策略实例。

use std::sync::Arc;

use locker_shared::config::AppConfig;
use tracing::info;

use crate::error::SetupError;
use crate::locker::{Locker, LockerOptions};
use crate::store::{BackingStore, ConsulStore};
use crate::strategy::{StrategyFactory, StrategyKind};

#[derive(Clone)]
pub struct LockerFactory {
    store: Arc<dyn BackingStore>,
    strategy: StrategyFactory,
}

impl LockerFactory {
    /// 使用默认的 permanent 策略
    pub fn new(store: Arc<dyn BackingStore>) -> Self {
        Self {
            store,
            strategy: StrategyKind::default().factory(),
        }
    }

    pub fn with_strategy(mut self, strategy: StrategyFactory) -> Self {
        self.strategy = strategy;
        self
    }

    /// 按配置创建 Consul 客户端与缓存策略
    pub fn from_config(config: &AppConfig) -> Result<Self, SetupError> {
        let kind: StrategyKind = config.locker.strategy.parse()?;
        let store = ConsulStore::new(&config.consul)?;

        info!(
            address = %config.consul.address,
            strategy = kind.as_str(),
            "Locker factory configured"
        );

        Ok(Self::new(Arc::new(store)).with_strategy(kind.factory()))
    }

    pub fn create(&self, options: LockerOptions) -> Locker {
        Locker::spawn(options, self.store.clone(), (self.strategy)())
    }

    pub fn store(&self) -> Arc<dyn BackingStore> {
        self.store.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_lockers_share_store() {
        let store = MemoryStore::new();
        let factory = LockerFactory::new(Arc::new(store.clone()));

        let a = factory.create(LockerOptions::new("jobs"));
        let b = factory.create(LockerOptions::new("jobs"));
        a.ready().await.unwrap();
        b.ready().await.unwrap();

        assert_eq!(store.session_count(), 2);
        assert!(a.lock(1).await.unwrap());
        assert!(b.lock(1).await.is_err());
    }

    #[tokio::test]
    async fn test_each_locker_gets_own_strategy() {
        let store = MemoryStore::new();
        let factory = LockerFactory::new(Arc::new(store.clone()));

        let a = factory.create(LockerOptions::new("jobs"));
        let b = factory.create(LockerOptions::new("jobs"));
        a.ready().await.unwrap();
        b.ready().await.unwrap();

        assert!(a.lock(1).await.unwrap());
        assert!(a.lock(1).await.unwrap());
        // b 的缓存里没有 a 的结果，必须访问后端
        assert!(b.lock(1).await.is_err());
        assert_eq!(store.writes(), 2);
    }

    #[test]
    fn test_from_config_rejects_unknown_strategy() {
        let mut config = AppConfig::default();
        config.consul.address = "http://127.0.0.1:8500".to_string();
        config.locker.strategy = "ttl".to_string();

        assert!(matches!(
            LockerFactory::from_config(&config),
            Err(SetupError::UnknownStrategy(_))
        ));
    }

    #[test]
    fn test_from_config_rejects_bad_address() {
        let mut config = AppConfig::default();
        config.consul.address = "::not a url".to_string();

        assert!(matches!(
            LockerFactory::from_config(&config),
            Err(SetupError::Store(_))
        ));
    }

    #[test]
    fn test_from_config() {
        let mut config = AppConfig::default();
        config.locker.strategy = "passthrough".to_string();
        assert!(LockerFactory::from_config(&config).is_ok());
    }
}
