//! 服务配置

use std::time::Duration;

use cuba_common::RetryConfig;
use cuba_config::PolicySyncConfig;

/// 由策略同步配置构造规则写入的重试策略
///
/// 固定间隔 + 随机抖动，并受整体截止时间约束
pub fn policy_retry_config(config: &PolicySyncConfig) -> RetryConfig {
    RetryConfig::fixed(config.max_attempts, Duration::from_millis(config.retry_delay_ms))
        .with_jitter(Duration::from_millis(config.jitter_ms))
        .with_deadline(Duration::from_millis(config.deadline_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_retry() {
        let retry = policy_retry_config(&PolicySyncConfig::default());
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(50));
        assert_eq!(retry.jitter, Duration::from_millis(25));
        assert_eq!(retry.deadline, Some(Duration::from_secs(5)));
    }
}
