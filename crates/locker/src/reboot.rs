//! 会话重启策略
//!
//! 会话创建失败时 Locker 进入 paused 状态，等待一段时间后重新创建会话。
//! 连续失败次数超过上限后 Locker 停止，只能通过显式 start() 恢复。

use std::time::Duration;

use locker_shared::config::LockerConfig;

// ---------------------------------------------------------------------------
// RebootPolicy
// ---------------------------------------------------------------------------

/// 会话重启策略
#[derive(Debug, Clone, PartialEq)]
pub struct RebootPolicy {
    /// 连续重启次数上限，超过后 Locker 停止
    pub max_retries: u32,
    /// 首次重启前的等待时间
    pub retry_interval: Duration,
    /// 退避时间上限
    pub max_interval: Duration,
    /// 每次重启的退避倍数，1.0 表示固定间隔
    pub multiplier: f64,
}

impl Default for RebootPolicy {
    /// 最多连续重启 10 次，每次间隔 30 秒
    fn default() -> Self {
        Self::fixed(10, Duration::from_secs(30))
    }
}

impl From<&LockerConfig> for RebootPolicy {
    fn from(config: &LockerConfig) -> Self {
        Self::fixed(config.max_retries, config.retry_interval())
    }
}

impl RebootPolicy {
    /// 固定间隔
    pub fn fixed(max_retries: u32, retry_interval: Duration) -> Self {
        Self {
            max_retries,
            retry_interval,
            max_interval: retry_interval,
            multiplier: 1.0,
        }
    }

    /// 改为指数退避
    pub fn with_backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.multiplier = multiplier;
        self.max_interval = max_interval.max(self.retry_interval);
        self
    }

    /// 第 N 次重启前的等待时间（reboot_count 从 1 开始）
    ///
    /// retry_interval * multiplier^(reboot_count - 1)，不超过 max_interval。
    pub fn delay_for_attempt(&self, reboot_count: u32) -> Duration {
        let exponent = reboot_count.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.retry_interval.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(exponent);
        let capped_ms = delay_ms.min(self.max_interval.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// 本次重启是否仍在上限之内
    pub fn should_retry(&self, reboot_count: u32) -> bool {
        reboot_count <= self.max_retries
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RebootPolicy::default();
        assert_eq!(policy.max_retries, 10);
        assert_eq!(policy.retry_interval, Duration::from_secs(30));
        assert_eq!(policy.multiplier, 1.0);
    }

    #[test]
    fn test_fixed_interval() {
        let policy = RebootPolicy::fixed(3, Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RebootPolicy::fixed(5, Duration::from_secs(1))
            .with_backoff(2.0, Duration::from_secs(10));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(8));
        // 超过上限后被截断
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(10));
    }

    #[test]
    fn test_should_retry_boundary() {
        let policy = RebootPolicy::fixed(2, Duration::from_millis(10));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_zero_retries_never_reboots() {
        let policy = RebootPolicy::fixed(0, Duration::from_secs(1));
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn test_from_config() {
        let config = LockerConfig {
            max_retries: 4,
            retry_interval_secs: 7,
            ..Default::default()
        };
        let policy = RebootPolicy::from(&config);
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.retry_interval, Duration::from_secs(7));
    }
}
