//! Wallet service client
//!
//! The wallet owns money-of-record; the gateway only asks it to move funds.
//! Every reply carries a status code and only [`SUCCESS_STATUS`] counts as
//! success. Anything else, including codes that are not even numbers, is a
//! [`WalletError`].

pub mod http;
pub mod memory;

pub use http::HttpWalletClient;
pub use memory::MemoryWallet;

use crate::{credentials::CredentialSet, errors::WalletError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;

/// The one status code the wallet uses for success
pub const SUCCESS_STATUS: i64 = 2100;

/// Where a monetary movement came from
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct WalletContext {
    pub provider: String,
    pub round_id: String,
    pub game_code: String,
}

/// Single-leg debit or credit (wager / payout)
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TransferRequest {
    pub play_id: String,
    pub currency: String,
    pub tx_id: String,
    pub amount: Decimal,
    #[serde(flatten)]
    pub context: WalletContext,
}

/// Bet and result reported together by the provider
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct WagerAndPayoutRequest {
    pub play_id: String,
    pub currency: String,
    pub wager_tx_id: String,
    pub wager_amount: Decimal,
    pub payout_tx_id: String,
    pub payout_amount: Decimal,
    #[serde(flatten)]
    pub context: WalletContext,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CancelRequest {
    pub play_id: String,
    pub tx_id: String,
    pub amount: Decimal,
    pub tx_id_to_cancel: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ResettleRequest {
    pub play_id: String,
    pub currency: String,
    pub tx_id: String,
    pub amount: Decimal,
    pub bet_id: String,
    pub settled_tx_id: String,
    pub bet_time: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalletOperation {
    Balance,
    Wager,
    Payout,
    WagerAndPayout,
    Cancel,
    Resettle,
}

impl WalletOperation {
    /// Path segment on the wallet service, also used as a metrics label
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletOperation::Balance => "balance",
            WalletOperation::Wager => "wager",
            WalletOperation::Payout => "payout",
            WalletOperation::WagerAndPayout => "wager-and-payout",
            WalletOperation::Cancel => "cancel",
            WalletOperation::Resettle => "resettle",
        }
    }
}

/// Narrow RPC interface to the wallet service. All amounts are wallet units;
/// every successful call returns the player's credit afterwards.
#[async_trait]
pub trait WalletClient: Send + Sync {
    async fn balance(&self, credentials: &CredentialSet, play_id: &str) -> Result<Decimal, WalletError>;

    async fn wager(&self, credentials: &CredentialSet, request: &TransferRequest) -> Result<Decimal, WalletError>;

    async fn payout(&self, credentials: &CredentialSet, request: &TransferRequest) -> Result<Decimal, WalletError>;

    async fn wager_and_payout(
        &self,
        credentials: &CredentialSet,
        request: &WagerAndPayoutRequest,
    ) -> Result<Decimal, WalletError>;

    async fn cancel(&self, credentials: &CredentialSet, request: &CancelRequest) -> Result<Decimal, WalletError>;

    async fn resettle(&self, credentials: &CredentialSet, request: &ResettleRequest) -> Result<Decimal, WalletError>;
}

/// Decode `{status_code, credit | credit_after}`, failing closed.
pub fn check_reply(operation: WalletOperation, reply: &Value) -> Result<Decimal, WalletError> {
    let op = operation.as_str();
    let status = reply.get("status_code");

    match status.and_then(Value::as_i64) {
        Some(SUCCESS_STATUS) => {}
        _ => {
            let status = match status {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => "<missing>".to_string(),
            };
            return Err(WalletError::Rejected { operation: op, status });
        }
    }

    reply
        .get("credit_after")
        .or_else(|| reply.get("credit"))
        .and_then(decimal_from_json)
        .ok_or_else(|| WalletError::MalformedReply {
            operation: op,
            reason: "missing or non-numeric credit".to_string(),
        })
}

/// Accept JSON numbers and numeric strings without going through f64.
pub fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
        }
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}
