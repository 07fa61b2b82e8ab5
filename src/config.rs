//! Configuration management with validation and defaults
//!
//! Loaded from a TOML file, then overridden by `SLOTGATE_*` environment
//! variables, then validated.

use crate::{
    credentials::{CredentialEntry, CredentialRegistry, Environment, WILDCARD_CURRENCY},
    currency::CurrencyTable,
    errors::ConfigurationError,
};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// Sequential wallet calls one callback may make: balance, movement, replay balance
pub const WALLET_CALLS_PER_REQUEST: u64 = 3;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_environment")]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub credentials: Vec<CredentialEntry>,
}

fn default_environment() -> Environment {
    Environment::Staging
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            wallet: WalletConfig::default(),
            credentials: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub allowed_origins: Vec<String>,
    /// Key required on `/internal` routes; those routes refuse everything when unset
    pub operator_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
            allowed_origins: vec!["*".to_string()],
            operator_key: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_directory: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/slotgate".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Upper bound for one wallet call, transport included
    pub timeout_ms: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

impl GatewayConfig {
    pub fn wallet_timeout(&self) -> Duration {
        Duration::from_millis(self.wallet.timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.server.port == 0 {
            return Err(ConfigurationError::ValidationFailed("server.port must be > 0".to_string()));
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigurationError::ValidationFailed(
                "server.request_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.wallet.timeout_ms == 0 {
            return Err(ConfigurationError::ValidationFailed("wallet.timeout_ms must be > 0".to_string()));
        }
        if self.wallet.timeout_ms.saturating_mul(WALLET_CALLS_PER_REQUEST)
            > self.server.request_timeout_secs.saturating_mul(1000)
        {
            return Err(ConfigurationError::ValidationFailed(format!(
                "server.request_timeout_secs must cover {} wallet calls of wallet.timeout_ms",
                WALLET_CALLS_PER_REQUEST
            )));
        }

        let currencies = CurrencyTable::default();
        for entry in &self.credentials {
            if entry.currency != WILDCARD_CURRENCY && !currencies.is_supported(&entry.currency) {
                return Err(ConfigurationError::InvalidValue {
                    field: format!("credentials.{}.currency", entry.provider),
                    value: entry.currency.clone(),
                    reason: "no scale factor known for this currency".to_string(),
                });
            }
            if !(entry.wallet_url.starts_with("http://") || entry.wallet_url.starts_with("https://")) {
                return Err(ConfigurationError::InvalidValue {
                    field: format!("credentials.{}.wallet_url", entry.provider),
                    value: entry.wallet_url.clone(),
                    reason: "must be an http(s) URL".to_string(),
                });
            }
            if entry.signing_secret.is_empty() {
                return Err(ConfigurationError::ValidationFailed(format!(
                    "credentials.{}.signing_secret must not be empty",
                    entry.provider
                )));
            }
        }

        CredentialRegistry::from_entries(&self.credentials)?;
        Ok(())
    }
}

/// Configuration loader with environment variable support
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load from file (if any) and the process environment, then validate
    pub fn load(&self) -> Result<GatewayConfig, ConfigurationError> {
        let mut config = match &self.config_path {
            Some(path) => Self::load_from_file(path)?,
            None => GatewayConfig::default(),
        };

        apply_overrides(&mut config, |key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(path: &str) -> Result<GatewayConfig, ConfigurationError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<GatewayConfig, ConfigurationError> {
        toml::from_str(content).map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)))
    }
}

/// Apply `SLOTGATE_*` overrides read through `lookup`
pub fn apply_overrides<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("SLOTGATE_HOST") {
        config.server.host = host;
    }
    if let Some(port) = lookup("SLOTGATE_PORT") {
        config.server.port = parse_number("SLOTGATE_PORT", port)?;
    }
    if let Some(environment) = lookup("SLOTGATE_ENVIRONMENT") {
        config.environment = environment.parse()?;
    }
    if let Some(dir) = lookup("SLOTGATE_DATA_DIR") {
        config.storage.data_directory = dir;
    }
    if let Some(timeout) = lookup("SLOTGATE_WALLET_TIMEOUT_MS") {
        config.wallet.timeout_ms = parse_number("SLOTGATE_WALLET_TIMEOUT_MS", timeout)?;
    }
    if let Some(key) = lookup("SLOTGATE_OPERATOR_KEY") {
        config.server.operator_key = Some(key).filter(|k| !k.is_empty());
    }
    Ok(())
}

fn parse_number<T: std::str::FromStr>(field: &str, value: String) -> Result<T, ConfigurationError> {
    value.trim().parse().map_err(|_| ConfigurationError::InvalidValue {
        field: field.to_string(),
        value,
        reason: "not a valid number".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
environment = "production"

[server]
port = 9090
operator_key = "ops"

[wallet]
timeout_ms = 2000

[[credentials]]
provider = "aurora"
environment = "production"
currency = "IDR"
wallet_url = "https://wallet.internal"
wallet_token = "wt"
signing_secret = "aurora-idr"

[credentials.identifiers]
agent_code = "AG-7"

[[credentials]]
provider = "nimbus"
environment = "staging"
currency = "*"
wallet_url = "http://wallet.staging"
wallet_token = "wt"
signing_secret = "nimbus-any"
"#;

    #[test]
    fn test_default_config_is_valid() {
        assert!(GatewayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_parse_sample_file() {
        let config = ConfigLoader::parse(SAMPLE).unwrap();
        assert_eq!(config.environment, Environment::Production);
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.credentials.len(), 2);
        assert_eq!(config.credentials[0].identifiers["agent_code"], "AG-7");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConfigLoader::parse(SAMPLE).unwrap();
        let vars = HashMap::from([
            ("SLOTGATE_PORT", "7000"),
            ("SLOTGATE_ENVIRONMENT", "staging"),
            ("SLOTGATE_OPERATOR_KEY", ""),
        ]);
        apply_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.environment, Environment::Staging);
        assert_eq!(config.server.operator_key, None);
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let mut config = GatewayConfig::default();
        let result = apply_overrides(&mut config, |k| (k == "SLOTGATE_PORT").then(|| "eighty".to_string()));
        assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
    }

    #[test]
    fn test_unknown_currency_rejected() {
        let mut config = ConfigLoader::parse(SAMPLE).unwrap();
        config.credentials[0].currency = "XAU".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_request_timeout_covers_three_wallet_calls() {
        let mut config = GatewayConfig::default();
        config.server.request_timeout_secs = 30;

        config.wallet.timeout_ms = 10_000;
        assert!(config.validate().is_ok());
        config.wallet.timeout_ms = 10_001;
        assert!(matches!(config.validate(), Err(ConfigurationError::ValidationFailed(_))));
        config.wallet.timeout_ms = 29_000;
        assert!(config.validate().is_err());
    }
}
