//! API Request and Response Models

use crate::ledger::{Player, TransactionRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub providers: Vec<String>,
}

/// Body of `POST /internal/{provider}/sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub play_id: String,
    pub username: String,
    pub currency: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub game_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub player: Player,
}

/// Ledger rows of one round, wager first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundResponse {
    pub provider: String,
    pub round_id: String,
    pub settled: bool,
    pub records: Vec<TransactionRecord>,
}
