//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::backoff::RetryPolicy;

/// Configuration for the delivery scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Enable/disable the background loop.
    /// When disabled, documents are only delivered through `run_once`.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// How often to look for due documents (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum documents delivered in parallel.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Maximum due documents picked up per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Delay between ticket status polls (seconds).
    #[serde(default = "default_ticket_poll_delay")]
    pub ticket_poll_delay_secs: u64,

    /// Consecutive pending polls tolerated before counting a retry.
    #[serde(default = "default_max_ticket_polls")]
    pub max_ticket_polls: u32,

    /// Age after which a claim is presumed abandoned by a dead worker
    /// (seconds). Must outlast the longest attempt.
    #[serde(default = "default_claim_lease")]
    pub claim_lease_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_enabled() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    5000 // 5 seconds
}

fn default_max_workers() -> usize {
    4
}

fn default_batch_size() -> usize {
    50
}

fn default_ticket_poll_delay() -> u64 {
    60 // 1 minute
}

fn default_max_ticket_polls() -> u32 {
    30
}

fn default_claim_lease() -> u64 {
    600 // 10 minutes
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_ms: default_poll_interval(),
            max_workers: default_max_workers(),
            batch_size: default_batch_size(),
            ticket_poll_delay_secs: default_ticket_poll_delay(),
            max_ticket_polls: default_max_ticket_polls(),
            claim_lease_secs: default_claim_lease(),
            retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ticket_poll_delay(&self) -> Duration {
        Duration::from_secs(self.ticket_poll_delay_secs)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.poll_interval_ms, 5000);
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_ticket_polls, 30);
        assert_eq!(config.claim_lease(), Duration::from_secs(600));
        assert_eq!(config.retry.max_retries, 10);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            enabled = false
            poll_interval_ms = 1000
            max_workers = 8
            batch_size = 10
            ticket_poll_delay_secs = 5
            max_ticket_polls = 3
            claim_lease_secs = 120

            [retry]
            max_retries = 4
            backoff_base_ms = 500
            backoff_max_ms = 8000
            jitter_ratio = 0.1
        "#;
        let config: SchedulerConfig = toml::from_str(toml).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.ticket_poll_delay(), Duration::from_secs(5));
        assert_eq!(config.claim_lease_secs, 120);
        assert_eq!(config.retry.max_retries, 4);
        assert_eq!(config.retry.backoff_max_ms, 8000);
    }
}
