use std::time::Duration;

use crate::coordinator::RetryConfig;

// ============================================================================
// Pipeline Configuration
// ============================================================================
//
// Defaults cover the local single-broker setup; every value can be
// overridden with an ORDER_PIPELINE_* environment variable, the same way
// RUST_LOG overrides the log filter.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub brokers: String,
    pub orders_topic: String,
    pub dlq_topic: String,
    pub group_id: String,
    pub workers: usize,
    pub send_timeout: Duration,
    pub admin_port: u16,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            brokers: "127.0.0.1:9092".to_string(),
            orders_topic: "orders".to_string(),
            dlq_topic: "orders-dlq".to_string(),
            group_id: "order-pipeline".to_string(),
            workers: 4,
            send_timeout: Duration::from_secs(5),
            admin_port: 9090,
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            brokers: env_or("ORDER_PIPELINE_BROKERS", defaults.brokers),
            orders_topic: env_or("ORDER_PIPELINE_TOPIC", defaults.orders_topic),
            dlq_topic: env_or("ORDER_PIPELINE_DLQ_TOPIC", defaults.dlq_topic),
            group_id: env_or("ORDER_PIPELINE_GROUP_ID", defaults.group_id),
            workers: env_parsed("ORDER_PIPELINE_WORKERS", defaults.workers),
            send_timeout: Duration::from_millis(env_parsed(
                "ORDER_PIPELINE_SEND_TIMEOUT_MS",
                defaults.send_timeout.as_millis() as u64,
            )),
            admin_port: env_parsed("ORDER_PIPELINE_ADMIN_PORT", defaults.admin_port),
            max_retries: env_parsed("ORDER_PIPELINE_MAX_RETRIES", defaults.max_retries),
            base_delay: Duration::from_millis(env_parsed(
                "ORDER_PIPELINE_BASE_DELAY_MS",
                defaults.base_delay.as_millis() as u64,
            )),
            max_delay: Duration::from_millis(env_parsed(
                "ORDER_PIPELINE_MAX_DELAY_MS",
                defaults.max_delay.as_millis() as u64,
            )),
            jitter: env_parsed("ORDER_PIPELINE_JITTER", defaults.jitter),
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            jitter: self.jitter,
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key = %key, value = %raw, "Unparseable config value, using default");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = PipelineConfig::default();
        assert_eq!(config.orders_topic, "orders");
        assert_eq!(config.dlq_topic, "orders-dlq");
        assert_eq!(config.max_retries, 3);
        assert!(config.workers > 0);
    }

    #[test]
    fn test_retry_config_mirrors_pipeline_config() {
        let config = PipelineConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            jitter: false,
            ..PipelineConfig::default()
        };

        let retry = config.retry();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.base_delay, Duration::from_millis(50));
        assert_eq!(retry.max_delay, Duration::from_secs(2));
        assert!(!retry.jitter);
    }
}
