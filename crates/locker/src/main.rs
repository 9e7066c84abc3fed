//! 分布式锁命令行工具
//!
//! 创建会话并依次获取给定 id 的锁，收到 Ctrl+C 后释放并结束会话。

use anyhow::Result;
use clap::Parser;
use consul_locker::{LockError, LockerFactory, LockerOptions};
use locker_shared::{config::AppConfig, observability};
use tokio::signal;
use tracing::{info, warn};

/// 分布式锁命令行工具
///
/// 锁 key 为 `<name>/<id>/lock`，持有到进程收到 Ctrl+C 为止。
#[derive(Parser, Debug)]
#[command(name = "consul-locker")]
#[command(version, about = "基于 Consul 会话的分布式锁工具")]
struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)，默认取配置文件
    #[arg(short, long)]
    log_level: Option<String>,

    /// 会话名，覆盖配置中的 locker.name
    #[arg(short, long)]
    name: Option<String>,

    /// 要获取的锁 id
    #[arg(required = true)]
    ids: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. 加载配置：config/{service_name}.toml + LOCKER_ 前缀环境变量
    //    日志尚未初始化，加载失败只能直接打印
    let mut config = AppConfig::load("consul-locker").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    if let Some(name) = cli.name {
        config.locker.name = name;
    }

    // 2. 初始化日志与指标
    let _guard = observability::init(&config.observability).await?;

    info!(
        environment = %config.environment,
        consul = %config.consul.address,
        locker = %config.locker.name,
        "Starting consul-locker..."
    );

    // 3. 组装 Locker 并等待会话建立
    let factory = LockerFactory::from_config(&config)?;
    let locker = factory.create(LockerOptions::from(&config.locker));
    locker.ready().await?;
    info!(session_id = ?locker.session_id(), "Session established");

    // 4. 获取锁
    let mut held = Vec::new();
    for id in &cli.ids {
        match locker.lock(id.as_str()).await {
            Ok(_) => {
                info!(key = %locker.lock_key(id.as_str()), "Lock acquired");
                held.push(id.clone());
            }
            Err(LockError::AlreadyLocked { key }) => {
                warn!(key = %key, "Lock is held by another session");
            }
            Err(e) => return Err(e.into()),
        }
    }

    // 5. 等待退出信号
    info!(held = held.len(), "Holding locks, press Ctrl+C to release");
    signal::ctrl_c().await?;

    // 6. 释放锁并结束会话
    for id in &held {
        if let Err(e) = locker.release(id.as_str()).await {
            warn!(id = %id, error = %e, "Failed to release lock");
        }
    }
    locker.stop().await;
    info!("consul-locker stopped");

    Ok(())
}
