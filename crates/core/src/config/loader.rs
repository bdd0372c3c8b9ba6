use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("COURIER_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[sender.default]
factura_url = "https://e-beta.sunat.gob.pe/ol-ti-itcpfegem-beta/billService"
username = "20123456789MODDATOS"
password = "MODDATOS"

[server]
port = 9000
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.sender.default.username, "20123456789MODDATOS");
    }

    #[test]
    fn test_load_config_from_str_missing_sender() {
        let toml = r#"
[server]
port = 8080
"#;
        let result = load_config_from_str(toml);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        // Inside a jail so env overrides set by other tests cannot leak in.
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
[server]
host = "127.0.0.1"
port = 3000

[numbering]
default_serie = "F002"

[sender.default]
factura_url = "http://localhost:9999/billService"
username = "user"
password = "secret"
"#,
            )?;

            let config = load_config(Path::new("config.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.server.port, 3000);
            assert_eq!(config.server.host.to_string(), "127.0.0.1");
            assert_eq!(config.numbering.default_serie, "F002");
            Ok(())
        });
    }

    const JAILED_CONFIG: &str = r#"
[scheduler]
max_workers = 2

[scheduler.retry]
max_retries = 10

[sender]
timeout_secs = 30

[sender.default]
factura_url = "http://localhost:9999/billService"
username = "user"
password = "from-file"
"#;

    #[test]
    fn test_env_overrides_nested_file_values() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("courier.toml", JAILED_CONFIG)?;
            jail.set_env("COURIER_SCHEDULER__RETRY__MAX_RETRIES", "3");
            jail.set_env("COURIER_SENDER__DEFAULT__PASSWORD", "from-env");

            let config = load_config(Path::new("courier.toml")).map_err(|e| e.to_string())?;
            assert_eq!(config.scheduler.retry.max_retries, 3);
            assert_eq!(config.sender.default.password, "from-env");
            // Untouched keys keep their file values.
            assert_eq!(config.scheduler.max_workers, 2);
            assert_eq!(config.sender.timeout_secs, 30);
            Ok(())
        });
    }

    #[test]
    fn test_env_can_add_namespace_override() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("courier.toml", JAILED_CONFIG)?;
            jail.set_env(
                "COURIER_SENDER__NAMESPACES__ACME__USERNAME",
                "20999999999ACME",
            );

            let config = load_config(Path::new("courier.toml")).map_err(|e| e.to_string())?;
            let resolved = config.sender.resolve("acme", "20999999999");
            assert_eq!(resolved.username, "20999999999ACME");
            assert_eq!(resolved.password, "from-file");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_env_value_is_a_parse_error() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("courier.toml", JAILED_CONFIG)?;
            jail.set_env("COURIER_SCHEDULER__MAX_WORKERS", "many");

            let result = load_config(Path::new("courier.toml"));
            assert!(matches!(result, Err(ConfigError::ParseError(_))));
            Ok(())
        });
    }
}
