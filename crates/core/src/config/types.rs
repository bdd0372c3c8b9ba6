use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::scheduler::SchedulerConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub numbering: NumberingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub sender: SenderSection,
}

/// Server configuration (health, status and metrics listener)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("courier.db")
}

/// Blob storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory for signed documents and receipts.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("blobs")
}

/// Fiscal numbering configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NumberingConfig {
    /// Serie used for every document type without an explicit override.
    #[serde(default = "default_serie")]
    pub default_serie: String,
    /// Per document type serie overrides (e.g. `credit_note = "FC01"`).
    #[serde(default)]
    pub series: HashMap<String, String>,
    /// How many times an allocation is retried after losing an optimistic race.
    #[serde(default = "default_conflict_retries")]
    pub max_conflict_retries: u32,
    /// Strategy used for document types not listed in `strategies`.
    #[serde(default = "default_strategy")]
    pub default_strategy: String,
    /// Per document type strategy identifiers (`sequential` or `none`).
    #[serde(default)]
    pub strategies: HashMap<String, String>,
}

impl NumberingConfig {
    /// Serie configured for a document type.
    pub fn serie_for(&self, document_type: &str) -> &str {
        self.series
            .get(document_type)
            .map(String::as_str)
            .unwrap_or(&self.default_serie)
    }
}

impl Default for NumberingConfig {
    fn default() -> Self {
        Self {
            default_serie: default_serie(),
            series: HashMap::new(),
            max_conflict_retries: default_conflict_retries(),
            default_strategy: default_strategy(),
            strategies: HashMap::new(),
        }
    }
}

fn default_serie() -> String {
    "F001".to_string()
}

fn default_conflict_retries() -> u32 {
    5
}

fn default_strategy() -> String {
    "sequential".to_string()
}

/// Endpoints and credentials used to talk to the tax authority.
///
/// Read once per attempt and never mutated by the delivery pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SenderConfig {
    /// Bill service for invoices, notes, voided documents and summaries.
    pub factura_url: String,
    /// Bill service for despatch advices.
    #[serde(default)]
    pub guia_remision_url: Option<String>,
    /// Bill service for perceptions and retentions.
    #[serde(default)]
    pub percepcion_retencion_url: Option<String>,
    /// Receipt consultation service, used to reconcile ambiguous attempts.
    #[serde(default)]
    pub consulta_url: Option<String>,
    pub username: String,
    pub password: String,
}

/// Partial sender settings layered over the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SenderOverride {
    #[serde(default)]
    pub factura_url: Option<String>,
    #[serde(default)]
    pub guia_remision_url: Option<String>,
    #[serde(default)]
    pub percepcion_retencion_url: Option<String>,
    #[serde(default)]
    pub consulta_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl SenderOverride {
    fn apply(&self, base: &mut SenderConfig) {
        if let Some(url) = &self.factura_url {
            base.factura_url = url.clone();
        }
        if let Some(url) = &self.guia_remision_url {
            base.guia_remision_url = Some(url.clone());
        }
        if let Some(url) = &self.percepcion_retencion_url {
            base.percepcion_retencion_url = Some(url.clone());
        }
        if let Some(url) = &self.consulta_url {
            base.consulta_url = Some(url.clone());
        }
        if let Some(username) = &self.username {
            base.username = username.clone();
        }
        if let Some(password) = &self.password {
            base.password = password.clone();
        }
    }
}

/// Sender settings for one namespace, with per-company overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NamespaceSender {
    #[serde(flatten)]
    pub overrides: SenderOverride,
    /// Keyed by taxpayer id.
    #[serde(default)]
    pub companies: HashMap<String, SenderOverride>,
}

/// `[sender]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SenderSection {
    /// Timeout for every call to the authority, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
    pub default: SenderConfig,
    #[serde(default)]
    pub namespaces: HashMap<String, NamespaceSender>,
}

impl SenderSection {
    /// Resolve the sender snapshot for a namespace and taxpayer.
    ///
    /// Company settings win over namespace settings, which win over the defaults.
    pub fn resolve(&self, namespace: &str, taxpayer_id: &str) -> SenderConfig {
        let mut config = self.default.clone();
        if let Some(ns) = self.namespaces.get(namespace) {
            ns.overrides.apply(&mut config);
            if let Some(company) = ns.companies.get(taxpayer_id) {
                company.apply(&mut config);
            }
        }
        config
    }
}

fn default_timeout() -> u32 {
    30
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub numbering: NumberingConfig,
    pub scheduler: SchedulerConfig,
    pub sender: SanitizedSenderConfig,
}

/// Sanitized sender config (password hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedSenderConfig {
    pub timeout_secs: u32,
    pub factura_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guia_remision_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percepcion_retencion_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consulta_url: Option<String>,
    pub username: String,
    pub password_configured: bool,
    pub namespaces: Vec<String>,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let sender = &config.sender;
        let mut namespaces: Vec<String> = sender.namespaces.keys().cloned().collect();
        namespaces.sort();

        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            storage: config.storage.clone(),
            numbering: config.numbering.clone(),
            scheduler: config.scheduler.clone(),
            sender: SanitizedSenderConfig {
                timeout_secs: sender.timeout_secs,
                factura_url: sender.default.factura_url.clone(),
                guia_remision_url: sender.default.guia_remision_url.clone(),
                percepcion_retencion_url: sender.default.percepcion_retencion_url.clone(),
                consulta_url: sender.default.consulta_url.clone(),
                username: sender.default.username.clone(),
                password_configured: !sender.default.password.is_empty(),
                namespaces,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[sender.default]
factura_url = "https://e-factura.sunat.gob.pe/ol-ti-itcpfegem/billService"
username = "20123456789USER"
password = "secret"
"#;

    #[test]
    fn test_deserialize_minimal_config() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "courier.db");
        assert_eq!(config.storage.root.to_str().unwrap(), "blobs");
        assert_eq!(config.numbering.default_serie, "F001");
        assert_eq!(config.numbering.max_conflict_retries, 5);
        assert_eq!(config.sender.timeout_secs, 30);
        assert!(config.sender.default.consulta_url.is_none());
    }

    #[test]
    fn test_deserialize_missing_sender_fails() {
        let toml = r#"
[server]
port = 8080
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_serie_overrides() {
        let toml = format!(
            "{}\n[numbering]\ndefault_serie = \"F001\"\n[numbering.series]\ncredit_note = \"FC01\"\n",
            MINIMAL
        );
        let config: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.numbering.serie_for("invoice"), "F001");
        assert_eq!(config.numbering.serie_for("credit_note"), "FC01");
    }

    #[test]
    fn test_sender_resolution_layers() {
        let toml = format!(
            r#"{}
[sender.namespaces.acme]
username = "20111111111ACME"
password = "acme-pass"

[sender.namespaces.acme.companies.20222222222]
factura_url = "http://company.local/billService"
"#,
            MINIMAL
        );
        let config: Config = toml::from_str(&toml).unwrap();

        let fallback = config.sender.resolve("other", "20222222222");
        assert_eq!(fallback, config.sender.default);

        let namespace = config.sender.resolve("acme", "20999999999");
        assert_eq!(namespace.username, "20111111111ACME");
        assert_eq!(namespace.factura_url, config.sender.default.factura_url);

        let company = config.sender.resolve("acme", "20222222222");
        assert_eq!(company.username, "20111111111ACME");
        assert_eq!(company.factura_url, "http://company.local/billService");
    }

    #[test]
    fn test_sanitized_config_hides_password() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        assert!(sanitized.sender.password_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret"));
    }
}
