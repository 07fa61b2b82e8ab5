//! Provider adapters
//!
//! One adapter per game provider. An adapter owns everything provider
//! specific (wire format, signature scheme, response codes) and drives the
//! shared [`Gateway`] for the money movement itself.

pub mod aurora;
pub mod nimbus;

pub use aurora::Aurora;
pub use nimbus::Nimbus;

use crate::{
    errors::GatewayError,
    gateway::{Disposition, Gateway, GatewayOutcome},
};
use async_trait::async_trait;
use axum::{body::Bytes, http::HeaderMap};
use serde::Serialize;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;

/// One inbound provider request, before any parsing
#[derive(Clone, Debug)]
pub struct RawCallback {
    /// Currency segment of the request path
    pub currency: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RawCallback {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Provider-shaped response, always sent with HTTP 200
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderReply {
    /// Callback action, as named by the provider
    pub action: String,
    /// `applied`, `already_applied` or a [`GatewayError::kind`] label
    pub outcome: &'static str,
    pub body: Value,
}

impl ProviderReply {
    pub fn new<T: Serialize>(action: &str, outcome: &'static str, body: &T) -> Result<Self, CallbackError> {
        Ok(Self {
            action: action.to_string(),
            outcome,
            body: serde_json::to_value(body)?,
        })
    }
}

/// Failures that never reach the provider protocol and surface as HTTP errors
#[derive(Debug, Error)]
pub enum CallbackError {
    /// Body is not a request of this provider at all
    #[error("Unparseable callback: {0}")]
    Unparseable(String),

    #[error("Failed to encode reply: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Metrics label of a gateway result
pub fn outcome_label(result: &GatewayOutcome) -> &'static str {
    match result {
        Ok(receipt) => match receipt.disposition {
            Disposition::Applied => "applied",
            Disposition::AlreadyApplied => "already_applied",
        },
        Err(e) => e.kind(),
    }
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Lower-case path segment this adapter is mounted under
    fn name(&self) -> &'static str;

    async fn handle(&self, gateway: &Gateway, callback: RawCallback) -> Result<ProviderReply, CallbackError>;
}

/// Adapters by name, built once at startup
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<&'static str, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every adapter shipped with the gateway
    pub fn with_defaults() -> Self {
        Self::new().register(Aurora).register(Nimbus)
    }

    pub fn register<A: ProviderAdapter + 'static>(mut self, adapter: A) -> Self {
        self.adapters.insert(adapter.name(), Arc::new(adapter));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(name.to_ascii_lowercase().as_str()).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.adapters.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Shorthand for a validation rejection
pub(crate) fn invalid(message: impl Into<String>) -> GatewayError {
    GatewayError::Validation(message.into())
}
