//! HTTP client for the wallet service

use super::{
    check_reply, CancelRequest, ResettleRequest, TransferRequest, WagerAndPayoutRequest, WalletClient,
    WalletOperation,
};
use crate::{credentials::CredentialSet, errors::WalletError};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Single-attempt JSON-over-HTTP wallet client. No retries.
#[derive(Clone)]
pub struct HttpWalletClient {
    http: Client,
    timeout: Duration,
}

impl HttpWalletClient {
    pub fn new(timeout: Duration) -> Result<Self, WalletError> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::Transport {
                operation: "connect",
                reason: e.to_string(),
            })?;
        Ok(Self { http, timeout })
    }

    async fn call<B: Serialize + ?Sized>(
        &self,
        credentials: &CredentialSet,
        operation: WalletOperation,
        body: &B,
    ) -> Result<Decimal, WalletError> {
        let op = operation.as_str();
        let url = format!("{}/{}", credentials.wallet_url, op);
        debug!(operation = op, url = %url, "Calling wallet service");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&credentials.wallet_token)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(op, e))?;

        let reply: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.transport_error(op, e)
            } else {
                WalletError::MalformedReply {
                    operation: op,
                    reason: e.to_string(),
                }
            }
        })?;

        check_reply(operation, &reply)
    }

    fn transport_error(&self, operation: &'static str, e: reqwest::Error) -> WalletError {
        if e.is_timeout() {
            WalletError::Timeout {
                operation,
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            WalletError::Transport {
                operation,
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl WalletClient for HttpWalletClient {
    async fn balance(&self, credentials: &CredentialSet, play_id: &str) -> Result<Decimal, WalletError> {
        self.call(credentials, WalletOperation::Balance, &json!({ "play_id": play_id }))
            .await
    }

    async fn wager(&self, credentials: &CredentialSet, request: &TransferRequest) -> Result<Decimal, WalletError> {
        self.call(credentials, WalletOperation::Wager, request).await
    }

    async fn payout(&self, credentials: &CredentialSet, request: &TransferRequest) -> Result<Decimal, WalletError> {
        self.call(credentials, WalletOperation::Payout, request).await
    }

    async fn wager_and_payout(
        &self,
        credentials: &CredentialSet,
        request: &WagerAndPayoutRequest,
    ) -> Result<Decimal, WalletError> {
        self.call(credentials, WalletOperation::WagerAndPayout, request).await
    }

    async fn cancel(&self, credentials: &CredentialSet, request: &CancelRequest) -> Result<Decimal, WalletError> {
        self.call(credentials, WalletOperation::Cancel, request).await
    }

    async fn resettle(&self, credentials: &CredentialSet, request: &ResettleRequest) -> Result<Decimal, WalletError> {
        self.call(credentials, WalletOperation::Resettle, request).await
    }
}
