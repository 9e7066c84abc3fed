//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    server_handle: tokio::task::JoinHandle<()>,
}

impl MetricsHandle {
    /// 停止指标 HTTP 服务器
    pub fn shutdown(self) {
        self.server_handle.abort();
    }
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_common_metrics();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle { server_handle })
}

/// 注册通用指标描述
///
/// 这些描述会出现在 /metrics 端点的 HELP 注释中
fn register_common_metrics() {
    metrics::describe_counter!("lock_attempts_total", "Lock attempts by outcome");
    metrics::describe_counter!(
        "lock_cache_hits_total",
        "Lock calls answered by the caching strategy without a network round-trip"
    );
    metrics::describe_counter!("lock_releases_total", "Lock releases by outcome");
    metrics::describe_counter!("locker_sessions_started_total", "Sessions created");
    metrics::describe_counter!("locker_sessions_ended_total", "Sessions ended");
    metrics::describe_counter!(
        "locker_reboots_total",
        "Reboots scheduled after a failed session start"
    );
    metrics::describe_counter!(
        "locker_retry_exhausted_total",
        "Lockers stopped after exhausting their reboot budget"
    );
    metrics::describe_gauge!(
        "locker_state",
        "Current state: 0 acquiring, 1 ready, 2 paused, 3 stopped"
    );
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次加锁的结果（granted / denied / error）
#[inline]
pub fn record_lock_attempt(locker: &str, outcome: &str) {
    metrics::counter!(
        "lock_attempts_total",
        "locker" => locker.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录缓存命中
#[inline]
pub fn record_cache_hit(locker: &str) {
    metrics::counter!("lock_cache_hits_total", "locker" => locker.to_string()).increment(1);
}

/// 记录释放锁
#[inline]
pub fn record_release(locker: &str, outcome: &str) {
    metrics::counter!(
        "lock_releases_total",
        "locker" => locker.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

#[inline]
pub fn record_session_start(locker: &str) {
    metrics::counter!("locker_sessions_started_total", "locker" => locker.to_string())
        .increment(1);
}

#[inline]
pub fn record_session_end(locker: &str) {
    metrics::counter!("locker_sessions_ended_total", "locker" => locker.to_string())
        .increment(1);
}

/// 记录一次重启调度
#[inline]
pub fn record_reboot(locker: &str) {
    metrics::counter!("locker_reboots_total", "locker" => locker.to_string()).increment(1);
}

/// 记录重启次数耗尽
#[inline]
pub fn record_retry_exhausted(locker: &str) {
    metrics::counter!("locker_retry_exhausted_total", "locker" => locker.to_string())
        .increment(1);
}

/// 更新状态机当前状态
///
/// 未知状态名记为 -1，便于在面板上发现异常
#[inline]
pub fn set_locker_state(locker: &str, state: &str) {
    let value = match state {
        "acquiring" => 0.0,
        "ready" => 1.0,
        "paused" => 2.0,
        "stopped" => 3.0,
        _ => -1.0,
    };
    metrics::gauge!("locker_state", "locker" => locker.to_string()).set(value);
}
