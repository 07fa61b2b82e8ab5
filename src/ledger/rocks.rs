//! RocksDB-backed ledger and player table.
//!
//! Key layout:
//! - `ledger:tx:{provider}:{external_id}`           → JSON `TransactionRecord`
//! - `ledger:round:{provider}:{round_id}:{kind}`    → external id
//! - `player:{provider}:{play_id}`                  → JSON `Player`
//! - `player:token:{provider}:{token}`              → play id

use super::{Ledger, LedgerEntry, Player, Reservation, ReservationTable, TransactionRecord, TxKind};
use crate::{
    errors::{LedgerError, StorageError},
    storage::Storage,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

pub const LEDGER_TX_PREFIX: &str = "ledger:tx:";
const LEDGER_ROUND_PREFIX: &str = "ledger:round:";
const PLAYER_PREFIX: &str = "player:";
const PLAYER_TOKEN_PREFIX: &str = "player:token:";

pub fn tx_key(provider: &str, external_id: &str) -> String {
    format!("{}{}:{}", LEDGER_TX_PREFIX, provider, external_id)
}

fn round_key(provider: &str, round_id: &str, kind: TxKind) -> String {
    format!("{}{}:{}:{}", LEDGER_ROUND_PREFIX, provider, round_id, kind)
}

fn player_key(provider: &str, play_id: &str) -> String {
    format!("{}{}:{}", PLAYER_PREFIX, provider, play_id)
}

fn player_token_key(provider: &str, token: &str) -> String {
    format!("{}{}:{}", PLAYER_TOKEN_PREFIX, provider, token)
}

fn encode<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value).map_err(|e| StorageError::WriteFailed(format!("Failed to encode {}: {}", what, e)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::CorruptedData(format!("Failed to decode {}: {}", what, e)))
}

enum Claim {
    Claimed(Reservation),
    Persisted,
    /// Resolves when the other request commits or rolls back
    InFlight(watch::Receiver<()>),
}

#[derive(Clone)]
pub struct RocksLedger {
    storage: Storage,
    /// External-id keys staged by in-flight requests
    reservations: Arc<ReservationTable>,
}

impl RocksLedger {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            reservations: Arc::new(DashMap::new()),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.storage.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes, key)?)),
            None => Ok(None),
        }
    }

    /// Claim `key` unless it is persisted or claimed by an in-flight entry.
    fn reserve(&self, key: String) -> Result<Claim, LedgerError> {
        // The shard lock is held across the existence check, so two callers
        // cannot both observe "absent" for the same key.
        match self.reservations.entry(key.clone()) {
            Entry::Occupied(slot) => Ok(Claim::InFlight(slot.get().clone())),
            Entry::Vacant(slot) => {
                if self.storage.contains(key.as_bytes())? {
                    return Ok(Claim::Persisted);
                }
                let (reservation, waiter) = Reservation::claim(key, Arc::clone(&self.reservations));
                slot.insert(waiter);
                Ok(Claim::Claimed(reservation))
            }
        }
    }

    /// Records of one provider, in key order.
    pub fn provider_records(&self, provider: &str, limit: usize) -> Result<Vec<TransactionRecord>, LedgerError> {
        let prefix = format!("{}{}:", LEDGER_TX_PREFIX, provider);
        self.storage
            .scan_prefix(prefix.as_bytes(), limit)?
            .into_iter()
            .map(|(key, value)| decode(&value, &String::from_utf8_lossy(&key)).map_err(LedgerError::from))
            .collect()
    }
}

#[async_trait]
impl Ledger for RocksLedger {
    async fn find(&self, provider: &str, external_id: &str) -> Result<Option<TransactionRecord>, LedgerError> {
        Ok(self.load(&tx_key(provider, external_id))?)
    }

    async fn find_by_round(
        &self,
        provider: &str,
        round_id: &str,
        kind: TxKind,
    ) -> Result<Option<TransactionRecord>, LedgerError> {
        let Some(external_id) = self.storage.get(round_key(provider, round_id, kind).as_bytes())? else {
            return Ok(None);
        };
        let external_id = String::from_utf8(external_id)
            .map_err(|e| StorageError::CorruptedData(format!("round index for {}: {}", round_id, e)))?;
        self.find(provider, &external_id).await
    }

    async fn begin(&self, records: Vec<TransactionRecord>) -> Result<LedgerEntry, LedgerError> {
        'attempt: loop {
            let mut reservations = Vec::with_capacity(records.len());
            for record in &records {
                match self.reserve(tx_key(&record.provider, &record.external_id))? {
                    Claim::Claimed(reservation) => reservations.push(reservation),
                    Claim::Persisted => return Err(LedgerError::DuplicateKey(record.external_id.clone())),
                    Claim::InFlight(mut released) => {
                        // Release our own claims while waiting so no two entries wait on each other
                        drop(reservations);
                        debug!(external_id = %record.external_id, "Waiting for in-flight ledger entry");
                        // Errors once the holder's sender is dropped, which is the release signal
                        let _ = released.changed().await;
                        continue 'attempt;
                    }
                }
            }

            debug!(count = records.len(), "Staged ledger records");
            return Ok(LedgerEntry {
                records,
                _reservations: reservations,
            });
        }
    }

    async fn commit(&self, entry: LedgerEntry) -> Result<Vec<TransactionRecord>, LedgerError> {
        let mut puts = Vec::with_capacity(entry.records.len() * 2);
        for record in &entry.records {
            puts.push((
                tx_key(&record.provider, &record.external_id).into_bytes(),
                encode(record, &record.external_id)?,
            ));
            puts.push((
                round_key(&record.provider, &record.round_id, record.kind).into_bytes(),
                record.external_id.clone().into_bytes(),
            ));
        }

        self.storage.write(&puts, &[])?;

        for record in &entry.records {
            debug!(
                provider = %record.provider,
                external_id = %record.external_id,
                round_id = %record.round_id,
                "Committed ledger record"
            );
        }

        // Reservations are released only after the rows are durable
        let LedgerEntry { records, _reservations: reservations } = entry;
        drop(reservations);
        Ok(records)
    }

    async fn find_player(&self, provider: &str, play_id: &str) -> Result<Option<Player>, LedgerError> {
        Ok(self.load(&player_key(provider, play_id))?)
    }

    async fn find_player_by_token(&self, provider: &str, token: &str) -> Result<Option<Player>, LedgerError> {
        let Some(play_id) = self.storage.get(player_token_key(provider, token).as_bytes())? else {
            return Ok(None);
        };
        let play_id = String::from_utf8(play_id)
            .map_err(|e| StorageError::CorruptedData(format!("token index: {}", e)))?;
        self.find_player(provider, &play_id).await
    }

    async fn upsert_player(&self, mut player: Player) -> Result<Player, LedgerError> {
        let key = player_key(&player.provider, &player.play_id);
        let existing: Option<Player> = self.load(&key)?;

        let mut deletes = Vec::new();
        if let Some(existing) = &existing {
            player.created_at = existing.created_at;
            if let Some(old_token) = &existing.token {
                if player.token.as_ref() != Some(old_token) {
                    deletes.push(player_token_key(&player.provider, old_token).into_bytes());
                }
            }
        }
        player.updated_at = Utc::now();

        let mut puts = vec![(key.into_bytes(), encode(&player, &player.play_id)?)];
        if let Some(token) = &player.token {
            puts.push((
                player_token_key(&player.provider, token).into_bytes(),
                player.play_id.clone().into_bytes(),
            ));
        }

        self.storage.write(&puts, &deletes)?;
        debug!(
            provider = %player.provider,
            play_id = %player.play_id,
            created = existing.is_none(),
            "Upserted player"
        );
        Ok(player)
    }
}
