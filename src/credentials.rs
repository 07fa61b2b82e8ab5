//! Credential resolution
//!
//! Maps (provider, currency, environment) to the credential bundle needed to
//! verify a provider callback and talk to the wallet service. The registry is
//! built once from configuration and is read-only afterwards.

use crate::errors::{ConfigurationError, GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    str::FromStr,
    sync::Arc,
};

/// Any-currency marker, honoured in staging only
pub const WILDCARD_CURRENCY: &str = "*";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Staging,
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(ConfigurationError::InvalidValue {
                field: "environment".to_string(),
                value: other.to_string(),
                reason: "expected 'staging' or 'production'".to_string(),
            }),
        }
    }
}

/// One `[[credentials]]` entry as written in the config file
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CredentialEntry {
    pub provider: String,
    pub environment: Environment,
    pub currency: String,
    pub wallet_url: String,
    pub wallet_token: String,
    pub signing_secret: String,
    #[serde(default)]
    pub provider_base_url: String,
    /// Agent / vendor / kiosk codes and similar provider identifiers
    #[serde(default)]
    pub identifiers: BTreeMap<String, String>,
}

/// Immutable credential bundle lent to the authenticator and wallet client
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSet {
    pub provider: String,
    pub environment: Environment,
    pub currency: String,
    pub wallet_url: String,
    pub wallet_token: String,
    pub signing_secret: String,
    pub provider_base_url: String,
    pub identifiers: BTreeMap<String, String>,
}

impl CredentialSet {
    pub fn identifier(&self, name: &str) -> Option<&str> {
        self.identifiers.get(name).map(String::as_str)
    }
}

// Secrets stay out of logs
impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("provider", &self.provider)
            .field("environment", &self.environment)
            .field("currency", &self.currency)
            .field("wallet_url", &self.wallet_url)
            .field("provider_base_url", &self.provider_base_url)
            .field("identifiers", &self.identifiers)
            .finish_non_exhaustive()
    }
}

type RegistryKey = (String, Environment, String);

/// Static (provider, environment, currency) → credential registry
#[derive(Clone, Debug, Default)]
pub struct CredentialRegistry {
    entries: HashMap<RegistryKey, Arc<CredentialSet>>,
}

impl CredentialRegistry {
    pub fn from_entries(entries: &[CredentialEntry]) -> Result<Self, ConfigurationError> {
        let mut registry = Self::default();

        for entry in entries {
            let currency = entry.currency.trim().to_ascii_uppercase();
            if currency == WILDCARD_CURRENCY && entry.environment == Environment::Production {
                return Err(ConfigurationError::InvalidValue {
                    field: format!("credentials.{}.currency", entry.provider),
                    value: entry.currency.clone(),
                    reason: "production credentials must name an explicit currency".to_string(),
                });
            }

            let key = (entry.provider.to_ascii_lowercase(), entry.environment, currency.clone());
            let set = CredentialSet {
                provider: key.0.clone(),
                environment: entry.environment,
                currency,
                wallet_url: entry.wallet_url.trim_end_matches('/').to_string(),
                wallet_token: entry.wallet_token.clone(),
                signing_secret: entry.signing_secret.clone(),
                provider_base_url: entry.provider_base_url.clone(),
                identifiers: entry.identifiers.clone(),
            };

            if registry.entries.insert(key, Arc::new(set)).is_some() {
                return Err(ConfigurationError::ValidationFailed(format!(
                    "duplicate credentials for {} / {} / {}",
                    entry.provider, entry.environment, entry.currency
                )));
            }
        }

        Ok(registry)
    }

    /// Resolve the bundle for one request.
    ///
    /// Production is an allow-list keyed by currency. Staging falls back to a
    /// `"*"` entry when no currency-specific one exists.
    pub fn resolve(
        &self,
        provider: &str,
        currency: &str,
        environment: Environment,
    ) -> GatewayResult<Arc<CredentialSet>> {
        let provider = provider.to_ascii_lowercase();
        let currency = currency.trim().to_ascii_uppercase();

        if let Some(set) = self.entries.get(&(provider.clone(), environment, currency.clone())) {
            return Ok(Arc::clone(set));
        }

        if environment == Environment::Staging {
            if let Some(set) = self
                .entries
                .get(&(provider, environment, WILDCARD_CURRENCY.to_string()))
            {
                return Ok(Arc::clone(set));
            }
        }

        Err(GatewayError::UnsupportedCurrency(currency))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
