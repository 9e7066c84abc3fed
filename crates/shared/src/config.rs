//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::observability::ObservabilityConfig;

/// Consul 连接配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsulConfig {
    /// HTTP API 地址，如 http://127.0.0.1:8500
    pub address: String,
    /// ACL token，通过 X-Consul-Token 头发送
    pub token: Option<String>,
    /// 数据中心，为空时使用 agent 所在数据中心
    pub datacenter: Option<String>,
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            token: None,
            datacenter: None,
            timeout_secs: 10,
        }
    }
}

impl ConsulConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Locker 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockerConfig {
    /// 会话名，同时作为锁 key 的命名空间前缀
    pub name: String,
    /// 会话创建失败后的最大重启次数
    pub max_retries: u32,
    /// 两次重启之间的等待时间（秒）
    pub retry_interval_secs: u64,
    /// 缓存策略：permanent 或 passthrough
    pub strategy: String,
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            name: "consul-locker".to_string(),
            max_retries: 10,
            retry_interval_secs: 30,
            strategy: "permanent".to_string(),
        }
    }
}

impl LockerConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub consul: ConsulConfig,
    pub locker: LockerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（LOCKER_ 前缀，双下划线分隔层级，如 LOCKER_CONSUL__ADDRESS -> consul.address）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("LOCKER_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("LOCKER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let mut config: Self = builder.build()?.try_deserialize()?;

        // 可观测性配置里的服务名跟随顶层服务名，除非显式指定
        if config.observability.service_name.is_empty() {
            config.observability.service_name = config.service_name.clone();
        }

        Ok(config)
    }
}
