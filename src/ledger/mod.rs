//! Transaction ledger
//!
//! Append-only, provider-scoped record of every wager, payout, cancel and
//! resettle applied to the wallet. A wager and its settlement are two rows,
//! never one mutated row, so "already applied" is a plain existence check on
//! the external transaction id.

pub mod rocks;

pub use rocks::RocksLedger;

use crate::errors::LedgerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Wager,
    Payout,
    Cancel,
    Resettle,
}

impl TxKind {
    pub const ALL: [TxKind; 4] = [TxKind::Wager, TxKind::Payout, TxKind::Cancel, TxKind::Resettle];

    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Wager => "wager",
            TxKind::Payout => "payout",
            TxKind::Cancel => "cancel",
            TxKind::Resettle => "resettle",
        }
    }

    /// Deterministic idempotency key for this kind of event on a round
    pub fn external_id(&self, round_id: &str) -> String {
        format!("{}-{}", self.as_str(), round_id)
    }

    /// Kinds that close a round
    pub fn is_settlement(&self) -> bool {
        matches!(self, TxKind::Payout | TxKind::Cancel)
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One economic event applied to the wallet
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub provider: String,
    pub external_id: String,
    pub kind: TxKind,
    pub round_id: String,
    pub play_id: String,
    pub currency: String,
    pub game_code: String,
    /// Wallet units
    pub bet_amount: Decimal,
    /// Wallet units
    pub win_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    pub fn wager(
        provider: &str,
        round_id: &str,
        play_id: &str,
        currency: &str,
        game_code: &str,
        bet_amount: Decimal,
    ) -> Self {
        Self {
            provider: provider.to_string(),
            external_id: TxKind::Wager.external_id(round_id),
            kind: TxKind::Wager,
            round_id: round_id.to_string(),
            play_id: play_id.to_string(),
            currency: currency.to_string(),
            game_code: game_code.to_string(),
            bet_amount,
            win_amount: Decimal::ZERO,
            created_at: Utc::now(),
            settled_at: None,
        }
    }

    /// Settlement-side row (payout, cancel, resettle) for an existing wager
    pub fn follow_up(kind: TxKind, wager: &TransactionRecord, win_amount: Decimal) -> Self {
        let now = Utc::now();
        Self {
            provider: wager.provider.clone(),
            external_id: kind.external_id(&wager.round_id),
            kind,
            round_id: wager.round_id.clone(),
            play_id: wager.play_id.clone(),
            currency: wager.currency.clone(),
            game_code: wager.game_code.clone(),
            bet_amount: wager.bet_amount,
            win_amount,
            created_at: now,
            settled_at: Some(now),
        }
    }
}

/// Player known to one provider
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub provider: String,
    pub play_id: String,
    pub username: String,
    pub currency: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub game_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Claim table: external-id key → receiver that resolves once the claim is released
pub(crate) type ReservationTable = DashMap<String, watch::Receiver<()>>;

/// Claim on an external id while its ledger entry is in flight.
/// Dropping it releases the claim and wakes every request waiting on it.
pub struct Reservation {
    key: String,
    table: Arc<ReservationTable>,
    _released: watch::Sender<()>,
}

impl Reservation {
    pub(crate) fn claim(key: String, table: Arc<ReservationTable>) -> (Self, watch::Receiver<()>) {
        let (released, waiter) = watch::channel(());
        (
            Self {
                key,
                table,
                _released: released,
            },
            waiter,
        )
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        // Unlisted before the sender drops, so woken waiters never see a stale claim
        self.table.remove(&self.key);
    }
}

/// Staged ledger records, not yet visible to readers.
///
/// Committing persists every record at once. Dropping the entry (or handing
/// it to [`Ledger::rollback`]) discards them.
pub struct LedgerEntry {
    records: Vec<TransactionRecord>,
    _reservations: Vec<Reservation>,
}

impl LedgerEntry {
    pub fn records(&self) -> &[TransactionRecord] {
        &self.records
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Idempotency oracle
    async fn find(&self, provider: &str, external_id: &str) -> Result<Option<TransactionRecord>, LedgerError>;

    async fn find_by_round(
        &self,
        provider: &str,
        round_id: &str,
        kind: TxKind,
    ) -> Result<Option<TransactionRecord>, LedgerError>;

    /// Every record of a round, wager first
    async fn round_records(&self, provider: &str, round_id: &str) -> Result<Vec<TransactionRecord>, LedgerError> {
        let mut records = Vec::new();
        for kind in TxKind::ALL {
            if let Some(record) = self.find_by_round(provider, round_id, kind).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// The payout or cancel row that closed the round, if any
    async fn settlement_of(&self, provider: &str, round_id: &str) -> Result<Option<TransactionRecord>, LedgerError> {
        for kind in [TxKind::Payout, TxKind::Cancel] {
            if let Some(record) = self.find_by_round(provider, round_id, kind).await? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Stage records. Fails with `DuplicateKey` if any external id is already
    /// persisted. An id staged by a concurrent request is waited on until
    /// that request commits or rolls back.
    async fn begin(&self, records: Vec<TransactionRecord>) -> Result<LedgerEntry, LedgerError>;

    async fn commit(&self, entry: LedgerEntry) -> Result<Vec<TransactionRecord>, LedgerError>;

    fn rollback(&self, entry: LedgerEntry) {
        drop(entry);
    }

    async fn find_player(&self, provider: &str, play_id: &str) -> Result<Option<Player>, LedgerError>;

    async fn find_player_by_token(&self, provider: &str, token: &str) -> Result<Option<Player>, LedgerError>;

    /// Create the player, or rotate its session token and game on re-launch
    async fn upsert_player(&self, player: Player) -> Result<Player, LedgerError>;
}
