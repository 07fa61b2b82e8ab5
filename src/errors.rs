//! Error types for the provider transaction gateway
//!
//! `GatewayError` is the business taxonomy every provider adapter maps onto
//! its own response codes. Infrastructure errors (storage, wallet, config)
//! are kept in their own enums and folded into the root type.

use rust_decimal::Decimal;
use thiserror::Error;

/// Root error type for one provider callback
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed or missing inbound fields
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Signature or shared secret mismatch. Never retried.
    #[error("Request authentication failed")]
    Authentication,

    /// No credentials configured for this provider/currency/environment
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Player not found: {0}")]
    PlayerNotFound(String),

    /// Settlement or refund references a round that was never wagered
    #[error("Transaction not found for round {round_id}")]
    TransactionNotFound { round_id: String },

    /// The round already carries a payout or cancel record
    #[error("Round {round_id} is already settled")]
    TransactionAlreadySettled { round_id: String, balance: Decimal },

    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFund { balance: Decimal, required: Decimal },

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    /// The provider's own outbound API answered with something unusable
    #[error("Third-party API error: {0}")]
    ThirdPartyApi(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The ledger/wallet unit ended without reporting an outcome
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Short stable label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation",
            GatewayError::Authentication => "authentication",
            GatewayError::UnsupportedCurrency(_) => "unsupported_currency",
            GatewayError::PlayerNotFound(_) => "player_not_found",
            GatewayError::TransactionNotFound { .. } => "transaction_not_found",
            GatewayError::TransactionAlreadySettled { .. } => "already_settled",
            GatewayError::InsufficientFund { .. } => "insufficient_fund",
            GatewayError::Wallet(_) => "wallet_error",
            GatewayError::ThirdPartyApi(_) => "third_party_error",
            GatewayError::Storage(_) => "storage_error",
            GatewayError::Internal(_) => "internal_error",
        }
    }
}

/// Failures reported by (or while talking to) the wallet service
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WalletError {
    /// Any status other than the success sentinel, including malformed ones
    #[error("wallet rejected {operation} with status {status}")]
    Rejected { operation: &'static str, status: String },

    #[error("wallet {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: &'static str, timeout_ms: u64 },

    #[error("wallet transport failure during {operation}: {reason}")]
    Transport { operation: &'static str, reason: String },

    #[error("undecodable wallet reply for {operation}: {reason}")]
    MalformedReply { operation: &'static str, reason: String },
}

/// Storage system errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    OpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),
}

/// Ledger-level failures
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The external transaction id is already recorded
    #[error("Duplicate ledger key: {0}")]
    DuplicateKey(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Configuration and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue { field: String, value: String, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::WriteFailed(e.to_string())
    }
}

impl From<LedgerError> for GatewayError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Storage(e) => GatewayError::Storage(e),
            // Callers that care about duplicates match on LedgerError directly
            LedgerError::DuplicateKey(key) => {
                GatewayError::Storage(StorageError::WriteFailed(format!("duplicate key {}", key)))
            }
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
