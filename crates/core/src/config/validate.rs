use super::{types::Config, ConfigError};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.numbering.default_serie.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "numbering.default_serie cannot be empty".to_string(),
        ));
    }

    let scheduler = &config.scheduler;
    if scheduler.max_workers == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.max_workers must be at least 1".to_string(),
        ));
    }
    if scheduler.batch_size == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.batch_size must be at least 1".to_string(),
        ));
    }

    let retry = &scheduler.retry;
    if retry.max_retries == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.retry.max_retries must be at least 1".to_string(),
        ));
    }
    if retry.backoff_base_ms > retry.backoff_max_ms {
        return Err(ConfigError::ValidationError(format!(
            "scheduler.retry.backoff_base_ms ({}) exceeds backoff_max_ms ({})",
            retry.backoff_base_ms, retry.backoff_max_ms
        )));
    }
    if !(0.0..1.0).contains(&retry.jitter_ratio) {
        return Err(ConfigError::ValidationError(
            "scheduler.retry.jitter_ratio must be in [0, 1)".to_string(),
        ));
    }

    if config.sender.default.factura_url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "sender.default.factura_url cannot be empty".to_string(),
        ));
    }
    if config.sender.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "sender.timeout_secs cannot be 0".to_string(),
        ));
    }

    // One attempt may consult and then submit, each bounded by the timeout.
    let longest_attempt = 2 * u64::from(config.sender.timeout_secs);
    if scheduler.claim_lease_secs <= longest_attempt {
        return Err(ConfigError::ValidationError(format!(
            "scheduler.claim_lease_secs ({}) must exceed twice sender.timeout_secs ({})",
            scheduler.claim_lease_secs, config.sender.timeout_secs
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn valid_config() -> Config {
        load_config_from_str(
            r#"
[sender.default]
factura_url = "http://localhost/billService"
username = "user"
password = "pass"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = valid_config();
        config.server.port = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_zero_workers_fails() {
        let mut config = valid_config();
        config.scheduler.max_workers = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_backoff_bounds() {
        let mut config = valid_config();
        config.scheduler.retry.backoff_base_ms = 10_000;
        config.scheduler.retry.backoff_max_ms = 1_000;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_jitter_ratio() {
        let mut config = valid_config();
        config.scheduler.retry.jitter_ratio = 1.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_claim_lease_outlasts_attempts() {
        let mut config = valid_config();
        config.sender.timeout_secs = 30;
        config.scheduler.claim_lease_secs = 60;
        assert!(validate_config(&config).is_err());

        config.scheduler.claim_lease_secs = 61;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_empty_factura_url() {
        let mut config = valid_config();
        config.sender.default.factura_url = " ".to_string();
        assert!(validate_config(&config).is_err());
    }
}
