//! In-memory wallet for tests and local development
//!
//! Keeps balances in a map, logs every call, and can be told to reject
//! monetary operations or to stall long enough to trip a timeout.

use super::{CancelRequest, ResettleRequest, TransferRequest, WagerAndPayoutRequest, WalletClient, WalletOperation};
use crate::{credentials::CredentialSet, errors::WalletError};
use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

/// Status the fake returns when a debit exceeds the balance
pub const INSUFFICIENT_BALANCE_STATUS: &str = "2201";
/// Status the fake returns for an unknown account
pub const UNKNOWN_ACCOUNT_STATUS: &str = "2404";

/// One call received by the fake
#[derive(Clone, Debug, PartialEq)]
pub struct WalletCall {
    pub operation: WalletOperation,
    pub play_id: String,
    pub tx_id: Option<String>,
    pub amount: Decimal,
}

#[derive(Clone, Default)]
pub struct MemoryWallet {
    balances: Arc<DashMap<String, Decimal>>,
    calls: Arc<Mutex<Vec<WalletCall>>>,
    failure: Arc<Mutex<Option<String>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl MemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(self, play_id: &str, balance: Decimal) -> Self {
        self.set_balance(play_id, balance);
        self
    }

    pub fn set_balance(&self, play_id: &str, balance: Decimal) {
        self.balances.insert(play_id.to_string(), balance);
    }

    pub fn balance_of(&self, play_id: &str) -> Option<Decimal> {
        self.balances.get(play_id).map(|b| *b)
    }

    /// Reject every monetary call with `status` until cleared.
    /// Balance queries keep working.
    pub fn fail_monetary_with(&self, status: &str) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(status.to_string());
    }

    pub fn clear_failure(&self) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Stall every call for `delay` before answering
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(|e| e.into_inner()) = delay;
    }

    pub fn calls(&self) -> Vec<WalletCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Calls that moved (or tried to move) money
    pub fn monetary_calls(&self) -> Vec<WalletCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation != WalletOperation::Balance)
            .collect()
    }

    async fn enter(&self, operation: WalletOperation, play_id: &str, tx_id: Option<&str>, amount: Decimal) -> Result<(), WalletError> {
        let delay = *self.delay.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(WalletCall {
            operation,
            play_id: play_id.to_string(),
            tx_id: tx_id.map(str::to_string),
            amount,
        });

        if operation != WalletOperation::Balance {
            if let Some(status) = self.failure.lock().unwrap_or_else(|e| e.into_inner()).clone() {
                return Err(WalletError::Rejected {
                    operation: operation.as_str(),
                    status,
                });
            }
        }
        Ok(())
    }

    /// Apply `delta` to the balance; a negative result is rejected.
    fn adjust(&self, operation: WalletOperation, play_id: &str, delta: Decimal) -> Result<Decimal, WalletError> {
        let mut balance = self.balances.get_mut(play_id).ok_or(WalletError::Rejected {
            operation: operation.as_str(),
            status: UNKNOWN_ACCOUNT_STATUS.to_string(),
        })?;

        let next = *balance + delta;
        if next < Decimal::ZERO {
            return Err(WalletError::Rejected {
                operation: operation.as_str(),
                status: INSUFFICIENT_BALANCE_STATUS.to_string(),
            });
        }
        *balance = next;
        Ok(next)
    }
}

#[async_trait]
impl WalletClient for MemoryWallet {
    async fn balance(&self, _credentials: &CredentialSet, play_id: &str) -> Result<Decimal, WalletError> {
        self.enter(WalletOperation::Balance, play_id, None, Decimal::ZERO).await?;
        self.balance_of(play_id).ok_or(WalletError::Rejected {
            operation: WalletOperation::Balance.as_str(),
            status: UNKNOWN_ACCOUNT_STATUS.to_string(),
        })
    }

    async fn wager(&self, _credentials: &CredentialSet, request: &TransferRequest) -> Result<Decimal, WalletError> {
        self.enter(WalletOperation::Wager, &request.play_id, Some(&request.tx_id), request.amount)
            .await?;
        self.adjust(WalletOperation::Wager, &request.play_id, -request.amount)
    }

    async fn payout(&self, _credentials: &CredentialSet, request: &TransferRequest) -> Result<Decimal, WalletError> {
        self.enter(WalletOperation::Payout, &request.play_id, Some(&request.tx_id), request.amount)
            .await?;
        self.adjust(WalletOperation::Payout, &request.play_id, request.amount)
    }

    async fn wager_and_payout(
        &self,
        _credentials: &CredentialSet,
        request: &WagerAndPayoutRequest,
    ) -> Result<Decimal, WalletError> {
        self.enter(
            WalletOperation::WagerAndPayout,
            &request.play_id,
            Some(&request.wager_tx_id),
            request.wager_amount,
        )
        .await?;

        let current = self.balance_of(&request.play_id).unwrap_or(Decimal::ZERO);
        if current < request.wager_amount {
            return Err(WalletError::Rejected {
                operation: WalletOperation::WagerAndPayout.as_str(),
                status: INSUFFICIENT_BALANCE_STATUS.to_string(),
            });
        }
        self.adjust(
            WalletOperation::WagerAndPayout,
            &request.play_id,
            request.payout_amount - request.wager_amount,
        )
    }

    async fn cancel(&self, _credentials: &CredentialSet, request: &CancelRequest) -> Result<Decimal, WalletError> {
        self.enter(WalletOperation::Cancel, &request.play_id, Some(&request.tx_id), request.amount)
            .await?;
        self.adjust(WalletOperation::Cancel, &request.play_id, request.amount)
    }

    async fn resettle(&self, _credentials: &CredentialSet, request: &ResettleRequest) -> Result<Decimal, WalletError> {
        self.enter(WalletOperation::Resettle, &request.play_id, Some(&request.tx_id), request.amount)
            .await?;
        self.adjust(WalletOperation::Resettle, &request.play_id, request.amount)
    }
}
