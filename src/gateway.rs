//! Provider transaction gateway
//!
//! Turns an authenticated provider callback into an exactly-once wallet
//! movement. Per callback the engine walks
//! `Received → Authenticated → PlayerResolved → IdempotencyChecked →
//! FundsChecked → Applied → Responded`, and any step may reject.
//!
//! Provider adapters own parsing, authentication and response shapes; this
//! module owns ordering, idempotency and the ledger/wallet atomic unit.
//! Amounts enter and leave in provider units and are normalized here.

use crate::{
    credentials::{CredentialRegistry, CredentialSet, Environment},
    currency::CurrencyTable,
    errors::{GatewayError, GatewayResult, LedgerError, WalletError},
    ledger::{Ledger, Player, TransactionRecord, TxKind},
    metrics::GatewayMetrics,
    wallet::{
        CancelRequest, ResettleRequest, TransferRequest, WagerAndPayoutRequest, WalletClient, WalletContext,
        WalletOperation,
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::{
    fmt,
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

pub const DEFAULT_WALLET_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback lifecycle states, used to label log lines
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Received,
    Authenticated,
    PlayerResolved,
    IdempotencyChecked,
    FundsChecked,
    Applied,
    Responded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Authenticated => "authenticated",
            Stage::PlayerResolved => "player_resolved",
            Stage::IdempotencyChecked => "idempotency_checked",
            Stage::FundsChecked => "funds_checked",
            Stage::Applied => "applied",
            Stage::Responded => "responded",
        };
        f.write_str(name)
    }
}

/// Credentials and currency of one inbound callback
#[derive(Clone, Debug)]
pub struct Session {
    pub credentials: Arc<CredentialSet>,
    /// Upper-cased currency from the callback, never the `"*"` of a wildcard bundle
    pub currency: String,
}

impl Session {
    pub fn provider(&self) -> &str {
        &self.credentials.provider
    }
}

/// How a provider identifies the player on a callback
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayerRef {
    PlayId(String),
    Token(String),
}

impl fmt::Display for PlayerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerRef::PlayId(id) => write!(f, "play_id:{}", id),
            PlayerRef::Token(_) => write!(f, "token:<redacted>"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BetCommand {
    pub player: PlayerRef,
    pub round_id: String,
    pub game_code: String,
    /// Provider units
    pub amount: Decimal,
}

#[derive(Clone, Debug)]
pub struct SettleCommand {
    pub player: PlayerRef,
    pub round_id: String,
    /// Provider units; zero for a lost round
    pub win_amount: Decimal,
}

#[derive(Clone, Debug)]
pub struct BetAndSettleCommand {
    pub player: PlayerRef,
    pub round_id: String,
    pub game_code: String,
    pub bet_amount: Decimal,
    pub win_amount: Decimal,
}

#[derive(Clone, Debug)]
pub struct RefundCommand {
    pub player: PlayerRef,
    pub round_id: String,
}

#[derive(Clone, Debug)]
pub struct ResettleCommand {
    pub player: PlayerRef,
    pub round_id: String,
    /// Provider units; negative values claw back an over-payment
    pub amount: Decimal,
}

/// Player session reported by a game launch
#[derive(Clone, Debug)]
pub struct SessionRegistration {
    pub play_id: String,
    pub username: String,
    pub currency: String,
    pub token: Option<String>,
    pub game_code: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The wallet moved funds for this callback
    Applied,
    /// A replay of an event already on the ledger; nothing moved
    AlreadyApplied,
}

/// Successful outcome: the player's balance afterwards, in provider units
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Receipt {
    pub balance: Decimal,
    pub disposition: Disposition,
}

/// Result of one money-moving gateway operation
pub type GatewayOutcome = GatewayResult<Receipt>;

pub struct Gateway {
    ledger: Arc<dyn Ledger>,
    wallet: Arc<dyn WalletClient>,
    credentials: CredentialRegistry,
    currencies: CurrencyTable,
    environment: Environment,
    wallet_timeout: Duration,
    metrics: GatewayMetrics,
}

impl Gateway {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        wallet: Arc<dyn WalletClient>,
        credentials: CredentialRegistry,
        environment: Environment,
        metrics: GatewayMetrics,
    ) -> Self {
        Self {
            ledger,
            wallet,
            credentials,
            currencies: CurrencyTable::default(),
            environment,
            wallet_timeout: DEFAULT_WALLET_TIMEOUT,
            metrics,
        }
    }

    pub fn with_wallet_timeout(mut self, timeout: Duration) -> Self {
        self.wallet_timeout = timeout;
        self
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// `Received`: resolve credentials for the provider and path currency.
    pub fn open(&self, provider: &str, currency: &str) -> GatewayResult<Session> {
        let currency = currency.trim().to_ascii_uppercase();
        if !self.currencies.is_supported(&currency) {
            return Err(GatewayError::UnsupportedCurrency(currency));
        }
        let credentials = self.credentials.resolve(provider, &currency, self.environment)?;
        debug!(provider = %credentials.provider, currency = %currency, stage = %Stage::Received, "Opened callback session");
        Ok(Session { credentials, currency })
    }

    pub async fn balance(&self, session: &Session, player: &PlayerRef) -> GatewayResult<Receipt> {
        let player = self.resolve_player(session, player).await?;
        let credit = self.wallet_balance(session, &player).await?;
        Ok(Receipt {
            balance: self.currencies.to_provider_units(credit, &session.currency)?,
            disposition: Disposition::Applied,
        })
    }

    /// Debit a wager for a new round.
    pub async fn bet(&self, session: &Session, command: BetCommand) -> GatewayResult<Receipt> {
        let provider = session.provider();
        let player = self.resolve_player(session, &command.player).await?;

        let external_id = TxKind::Wager.external_id(&command.round_id);
        if self.ledger.find(provider, &external_id).await?.is_some() {
            info!(provider, external_id = %external_id, "Replayed wager, returning current balance");
            return self.already_applied(session, &player).await;
        }
        debug!(provider, external_id = %external_id, stage = %Stage::IdempotencyChecked, "New wager");

        let amount = self.wallet_amount(command.amount, &session.currency)?;
        self.ensure_funds(session, &player, amount, command.amount).await?;

        let record = TransactionRecord::wager(
            provider,
            &command.round_id,
            &player.play_id,
            &session.currency,
            &command.game_code,
            amount,
        );
        let request = TransferRequest {
            play_id: player.play_id.clone(),
            currency: session.currency.clone(),
            tx_id: external_id,
            amount,
            context: self.context(session, &command.round_id, &command.game_code),
        };

        self.apply(session, &player, vec![record], WalletMove::Wager(request)).await
    }

    /// Credit the result of a wagered round (zero for a loss).
    pub async fn settle(&self, session: &Session, command: SettleCommand) -> GatewayResult<Receipt> {
        let player = self.resolve_player(session, &command.player).await?;
        let wager = self.open_round(session, &player, &command.round_id).await?;

        let amount = self.wallet_amount(command.win_amount, &session.currency)?;
        let record = TransactionRecord::follow_up(TxKind::Payout, &wager, amount);
        let request = TransferRequest {
            play_id: player.play_id.clone(),
            currency: session.currency.clone(),
            tx_id: record.external_id.clone(),
            amount,
            context: self.context(session, &wager.round_id, &wager.game_code),
        };

        self.apply(session, &player, vec![record], WalletMove::Payout(request)).await
    }

    /// Wager and payout reported in one callback, applied as one unit.
    pub async fn bet_and_settle(&self, session: &Session, command: BetAndSettleCommand) -> GatewayResult<Receipt> {
        let provider = session.provider();
        let player = self.resolve_player(session, &command.player).await?;

        let wager_id = TxKind::Wager.external_id(&command.round_id);
        if self.ledger.find(provider, &wager_id).await?.is_some() {
            info!(provider, external_id = %wager_id, "Replayed wager+payout, returning current balance");
            return self.already_applied(session, &player).await;
        }

        let bet_amount = self.wallet_amount(command.bet_amount, &session.currency)?;
        let win_amount = self.wallet_amount(command.win_amount, &session.currency)?;
        self.ensure_funds(session, &player, bet_amount, command.bet_amount).await?;

        let wager = TransactionRecord::wager(
            provider,
            &command.round_id,
            &player.play_id,
            &session.currency,
            &command.game_code,
            bet_amount,
        );
        let payout = TransactionRecord::follow_up(TxKind::Payout, &wager, win_amount);
        let request = WagerAndPayoutRequest {
            play_id: player.play_id.clone(),
            currency: session.currency.clone(),
            wager_tx_id: wager.external_id.clone(),
            wager_amount: bet_amount,
            payout_tx_id: payout.external_id.clone(),
            payout_amount: win_amount,
            context: self.context(session, &command.round_id, &command.game_code),
        };

        self.apply(session, &player, vec![wager, payout], WalletMove::WagerAndPayout(request))
            .await
    }

    /// Return the stake of an open round to the player.
    pub async fn refund(&self, session: &Session, command: RefundCommand) -> GatewayResult<Receipt> {
        let player = self.resolve_player(session, &command.player).await?;
        let wager = self.open_round(session, &player, &command.round_id).await?;

        let record = TransactionRecord::follow_up(TxKind::Cancel, &wager, Decimal::ZERO);
        let request = CancelRequest {
            play_id: player.play_id.clone(),
            tx_id: record.external_id.clone(),
            amount: wager.bet_amount,
            tx_id_to_cancel: wager.external_id.clone(),
        };

        self.apply(session, &player, vec![record], WalletMove::Cancel(request)).await
    }

    /// Adjust the payout of an already settled round.
    pub async fn resettle(&self, session: &Session, command: ResettleCommand) -> GatewayResult<Receipt> {
        let provider = session.provider();
        let player = self.resolve_player(session, &command.player).await?;

        let external_id = TxKind::Resettle.external_id(&command.round_id);
        if self.ledger.find(provider, &external_id).await?.is_some() {
            info!(provider, external_id = %external_id, "Replayed resettle, returning current balance");
            return self.already_applied(session, &player).await;
        }

        let not_found = || GatewayError::TransactionNotFound { round_id: command.round_id.clone() };
        let wager = self
            .ledger
            .find_by_round(provider, &command.round_id, TxKind::Wager)
            .await?
            .filter(|w| w.play_id == player.play_id)
            .ok_or_else(not_found)?;
        let payout = self
            .ledger
            .find_by_round(provider, &command.round_id, TxKind::Payout)
            .await?
            .ok_or_else(not_found)?;

        // Signed adjustment: negative values are allowed here
        let amount = self.currencies.to_wallet_units(command.amount, &session.currency)?;
        let record = TransactionRecord::follow_up(TxKind::Resettle, &wager, amount);
        let request = ResettleRequest {
            play_id: player.play_id.clone(),
            currency: session.currency.clone(),
            tx_id: external_id,
            amount,
            bet_id: wager.external_id.clone(),
            settled_tx_id: payout.external_id.clone(),
            bet_time: wager.created_at,
        };

        self.apply(session, &player, vec![record], WalletMove::Resettle(request)).await
    }

    /// Create the player on first launch, rotate its token on re-launch.
    pub async fn register_session(&self, provider: &str, registration: SessionRegistration) -> GatewayResult<Player> {
        let currency = registration.currency.trim().to_ascii_uppercase();
        if !self.currencies.is_supported(&currency) {
            return Err(GatewayError::UnsupportedCurrency(currency));
        }
        if registration.play_id.trim().is_empty() {
            return Err(GatewayError::Validation("play_id must not be empty".to_string()));
        }

        let now = Utc::now();
        let player = Player {
            provider: provider.to_ascii_lowercase(),
            play_id: registration.play_id,
            username: registration.username,
            currency,
            token: registration.token,
            game_code: registration.game_code,
            created_at: now,
            updated_at: now,
        };
        Ok(self.ledger.upsert_player(player).await?)
    }

    async fn resolve_player(&self, session: &Session, player_ref: &PlayerRef) -> GatewayResult<Player> {
        let provider = session.provider();
        let found = match player_ref {
            PlayerRef::PlayId(id) => self.ledger.find_player(provider, id).await?,
            PlayerRef::Token(token) => self.ledger.find_player_by_token(provider, token).await?,
        };

        // A player exists in exactly one currency
        let player = found
            .filter(|p| p.currency.eq_ignore_ascii_case(&session.currency))
            .ok_or_else(|| GatewayError::PlayerNotFound(player_ref.to_string()))
            .inspect_err(|e| warn!(provider, player = %player_ref, stage = %rejection_stage(e), "Player not found"))?;

        debug!(provider, play_id = %player.play_id, stage = %Stage::PlayerResolved, "Resolved player");
        Ok(player)
    }

    /// Wager of a round that is still open for settlement.
    async fn open_round(&self, session: &Session, player: &Player, round_id: &str) -> GatewayResult<TransactionRecord> {
        let provider = session.provider();
        let wager = self
            .ledger
            .find_by_round(provider, round_id, TxKind::Wager)
            .await?
            .filter(|w| w.play_id == player.play_id)
            .ok_or_else(|| GatewayError::TransactionNotFound { round_id: round_id.to_string() })
            .inspect_err(|e| warn!(provider, round_id, stage = %rejection_stage(e), "Settlement for unknown round"))?;

        if let Some(settlement) = self.ledger.settlement_of(provider, round_id).await? {
            warn!(
                provider,
                round_id,
                settled_by = %settlement.external_id,
                stage = %Stage::IdempotencyChecked,
                "Round already settled"
            );
            let credit = self.wallet_balance(session, player).await?;
            return Err(GatewayError::TransactionAlreadySettled {
                round_id: round_id.to_string(),
                balance: self.currencies.to_provider_units(credit, &session.currency)?,
            });
        }

        debug!(provider, round_id, stage = %Stage::IdempotencyChecked, "Round open for settlement");
        Ok(wager)
    }

    fn wallet_amount(&self, amount: Decimal, currency: &str) -> GatewayResult<Decimal> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(GatewayError::Validation(format!("amount must not be negative: {}", amount)));
        }
        self.currencies.to_wallet_units(amount, currency)
    }

    /// `FundsChecked`: the unrounded wallet balance must cover the debit.
    async fn ensure_funds(
        &self,
        session: &Session,
        player: &Player,
        amount: Decimal,
        provider_amount: Decimal,
    ) -> GatewayResult<()> {
        let credit = self.wallet_balance(session, player).await?;
        if credit < amount {
            let rejection = GatewayError::InsufficientFund {
                balance: self.currencies.to_provider_units(credit, &session.currency)?,
                required: provider_amount,
            };
            warn!(
                provider = session.provider(),
                play_id = %player.play_id,
                stage = %rejection_stage(&rejection),
                "Insufficient funds"
            );
            return Err(rejection);
        }
        debug!(provider = session.provider(), play_id = %player.play_id, stage = %Stage::FundsChecked, "Funds available");
        Ok(())
    }

    async fn wallet_balance(&self, session: &Session, player: &Player) -> Result<Decimal, WalletError> {
        self.call_wallet(
            WalletOperation::Balance,
            self.wallet.balance(&session.credentials, &player.play_id),
        )
        .await
    }

    async fn already_applied(&self, session: &Session, player: &Player) -> GatewayResult<Receipt> {
        let credit = self.wallet_balance(session, player).await?;
        Ok(Receipt {
            balance: self.currencies.to_provider_units(credit, &session.currency)?,
            disposition: Disposition::AlreadyApplied,
        })
    }

    /// `Applied`: stage the ledger rows, run the wallet call, and keep the
    /// rows only if the wallet succeeded.
    ///
    /// The unit runs on its own task. Dropping this future (request timeout,
    /// provider hang-up) leaves the unit running to commit or rollback.
    async fn apply(
        &self,
        session: &Session,
        player: &Player,
        records: Vec<TransactionRecord>,
        movement: WalletMove,
    ) -> GatewayResult<Receipt> {
        let unit = AtomicUnit {
            ledger: Arc::clone(&self.ledger),
            wallet: Arc::clone(&self.wallet),
            credentials: Arc::clone(&session.credentials),
            metrics: self.metrics.clone(),
            wallet_timeout: self.wallet_timeout,
            play_id: player.play_id.clone(),
        };

        let credit = match tokio::spawn(unit.run(records, movement)).await {
            Ok(Ok(UnitOutcome::Applied(credit))) => credit,
            Ok(Ok(UnitOutcome::Duplicate(key))) => {
                info!(provider = session.provider(), external_id = %key, "Committed by a concurrent callback, returning current balance");
                return self.already_applied(session, player).await;
            }
            Ok(Err(e)) => return Err(e),
            Err(e) => return Err(GatewayError::Internal(format!("ledger unit did not finish: {}", e))),
        };

        Ok(Receipt {
            balance: self.currencies.to_provider_units(credit, &session.currency)?,
            disposition: Disposition::Applied,
        })
    }

    /// Bounded, metered wallet call. Never retried.
    async fn call_wallet<F>(&self, operation: WalletOperation, call: F) -> Result<Decimal, WalletError>
    where
        F: Future<Output = Result<Decimal, WalletError>>,
    {
        metered(&self.metrics, self.wallet_timeout, operation, call).await
    }

    fn context(&self, session: &Session, round_id: &str, game_code: &str) -> WalletContext {
        WalletContext {
            provider: session.provider().to_string(),
            round_id: round_id.to_string(),
            game_code: game_code.to_string(),
        }
    }
}

/// Stage for a rejection raised while trying to reach the next state
pub fn rejection_stage(error: &GatewayError) -> Stage {
    match error {
        GatewayError::UnsupportedCurrency(_) | GatewayError::Validation(_) => Stage::Received,
        GatewayError::Authentication => Stage::Authenticated,
        GatewayError::PlayerNotFound(_) => Stage::PlayerResolved,
        GatewayError::TransactionNotFound { .. } | GatewayError::TransactionAlreadySettled { .. } => {
            Stage::IdempotencyChecked
        }
        GatewayError::InsufficientFund { .. } => Stage::FundsChecked,
        GatewayError::Wallet(_)
        | GatewayError::ThirdPartyApi(_)
        | GatewayError::Storage(_)
        | GatewayError::Internal(_) => Stage::Applied,
    }
}

/// Money-moving wallet request, owned so it can outlive the callback
#[derive(Clone, Debug)]
enum WalletMove {
    Wager(TransferRequest),
    Payout(TransferRequest),
    WagerAndPayout(WagerAndPayoutRequest),
    Cancel(CancelRequest),
    Resettle(ResettleRequest),
}

impl WalletMove {
    fn operation(&self) -> WalletOperation {
        match self {
            WalletMove::Wager(_) => WalletOperation::Wager,
            WalletMove::Payout(_) => WalletOperation::Payout,
            WalletMove::WagerAndPayout(_) => WalletOperation::WagerAndPayout,
            WalletMove::Cancel(_) => WalletOperation::Cancel,
            WalletMove::Resettle(_) => WalletOperation::Resettle,
        }
    }

    async fn send(&self, wallet: &dyn WalletClient, credentials: &CredentialSet) -> Result<Decimal, WalletError> {
        match self {
            WalletMove::Wager(request) => wallet.wager(credentials, request).await,
            WalletMove::Payout(request) => wallet.payout(credentials, request).await,
            WalletMove::WagerAndPayout(request) => wallet.wager_and_payout(credentials, request).await,
            WalletMove::Cancel(request) => wallet.cancel(credentials, request).await,
            WalletMove::Resettle(request) => wallet.resettle(credentials, request).await,
        }
    }
}

enum UnitOutcome {
    Applied(Decimal),
    /// The external id is already on the ledger
    Duplicate(String),
}

/// Everything the begin → wallet → commit unit needs, owned
struct AtomicUnit {
    ledger: Arc<dyn Ledger>,
    wallet: Arc<dyn WalletClient>,
    credentials: Arc<CredentialSet>,
    metrics: GatewayMetrics,
    wallet_timeout: Duration,
    play_id: String,
}

impl AtomicUnit {
    async fn run(self, records: Vec<TransactionRecord>, movement: WalletMove) -> GatewayResult<UnitOutcome> {
        let provider = self.credentials.provider.as_str();
        let operation = movement.operation();

        let entry = match self.ledger.begin(records).await {
            Ok(entry) => entry,
            Err(LedgerError::DuplicateKey(key)) => return Ok(UnitOutcome::Duplicate(key)),
            Err(e) => return Err(e.into()),
        };

        let call = movement.send(self.wallet.as_ref(), &self.credentials);
        let credit = match metered(&self.metrics, self.wallet_timeout, operation, call).await {
            Ok(credit) => credit,
            Err(e) => {
                warn!(provider, operation = operation.as_str(), error = %e, "Wallet call failed, rolling back ledger entry");
                self.ledger.rollback(entry);
                return Err(e.into());
            }
        };

        let external_ids: Vec<String> = entry.records().iter().map(|r| r.external_id.clone()).collect();
        if let Err(e) = self.ledger.commit(entry).await {
            error!(
                provider,
                operation = operation.as_str(),
                external_ids = ?external_ids,
                error = %e,
                "Wallet applied but ledger commit failed; manual reconciliation required"
            );
            return Err(e.into());
        }

        info!(
            provider,
            play_id = %self.play_id,
            operation = operation.as_str(),
            external_ids = ?external_ids,
            stage = %Stage::Applied,
            "Applied"
        );
        Ok(UnitOutcome::Applied(credit))
    }
}

async fn metered<F>(
    metrics: &GatewayMetrics,
    timeout: Duration,
    operation: WalletOperation,
    call: F,
) -> Result<Decimal, WalletError>
where
    F: Future<Output = Result<Decimal, WalletError>>,
{
    let started = Instant::now();
    let result = match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(WalletError::Timeout {
            operation: operation.as_str(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    };
    metrics.record_wallet_call(operation.as_str(), result.is_ok(), started.elapsed());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        credentials::CredentialEntry,
        ledger::RocksLedger,
        storage::Storage,
        wallet::{memory::WalletCall, MemoryWallet},
    };
    use std::{collections::BTreeMap, str::FromStr};

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    struct Harness {
        _dir: tempfile::TempDir,
        gateway: Gateway,
        ledger: Arc<RocksLedger>,
        wallet: MemoryWallet,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(RocksLedger::new(Storage::open(dir.path()).unwrap()));
        let wallet = MemoryWallet::new().with_balance("p-1", dec("1000.00"));
        let registry = CredentialRegistry::from_entries(&[CredentialEntry {
            provider: "aurora".to_string(),
            environment: Environment::Staging,
            currency: "*".to_string(),
            wallet_url: "http://wallet".to_string(),
            wallet_token: "t".to_string(),
            signing_secret: "s".to_string(),
            provider_base_url: String::new(),
            identifiers: BTreeMap::new(),
        }])
        .unwrap();

        let gateway = Gateway::new(
            ledger.clone(),
            Arc::new(wallet.clone()),
            registry,
            Environment::Staging,
            GatewayMetrics::new().unwrap(),
        )
        .with_wallet_timeout(Duration::from_millis(200));

        for currency in ["IDR", "THB"] {
            gateway
                .register_session(
                    "aurora",
                    SessionRegistration {
                        play_id: if currency == "IDR" { "p-1" } else { "p-2" }.to_string(),
                        username: "alice".to_string(),
                        currency: currency.to_string(),
                        token: Some(format!("tok-{}", currency)),
                        game_code: None,
                    },
                )
                .await
                .unwrap();
        }

        Harness { _dir: dir, gateway, ledger, wallet }
    }

    fn bet(round: &str, amount: &str) -> BetCommand {
        BetCommand {
            player: PlayerRef::Token("tok-IDR".to_string()),
            round_id: round.to_string(),
            game_code: "slot-1".to_string(),
            amount: dec(amount),
        }
    }

    fn p1() -> PlayerRef {
        PlayerRef::PlayId("p-1".to_string())
    }

    #[tokio::test]
    async fn test_bet_debits_and_denormalizes() {
        let h = harness().await;
        let session = h.gateway.open("aurora", "idr").unwrap();

        let receipt = h.gateway.bet(&session, bet("R1", "100000")).await.unwrap();
        assert_eq!(receipt.disposition, Disposition::Applied);
        assert_eq!(receipt.balance, dec("900000"));
        assert_eq!(h.wallet.balance_of("p-1"), Some(dec("900")));

        let record = h.ledger.find("aurora", "wager-R1").await.unwrap().unwrap();
        assert_eq!(record.bet_amount, dec("100"));
    }

    #[tokio::test]
    async fn test_replayed_bet_is_a_no_op() {
        let h = harness().await;
        let session = h.gateway.open("aurora", "IDR").unwrap();

        let first = h.gateway.bet(&session, bet("R1", "100000")).await.unwrap();
        let second = h.gateway.bet(&session, bet("R1", "100000")).await.unwrap();

        assert_eq!(second.disposition, Disposition::AlreadyApplied);
        assert_eq!(second.balance, first.balance);
        assert_eq!(h.wallet.monetary_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_insufficient_funds_touches_nothing() {
        let h = harness().await;
        let session = h.gateway.open("aurora", "IDR").unwrap();

        let err = h.gateway.bet(&session, bet("R1", "1000000.01")).await.unwrap_err();
        assert!(matches!(err, GatewayError::InsufficientFund { balance, .. } if balance == dec("1000000")));
        assert!(h.ledger.find("aurora", "wager-R1").await.unwrap().is_none());
        assert!(h.wallet.monetary_calls().is_empty());
    }

    #[tokio::test]
    async fn test_wallet_rejection_rolls_back_ledger() {
        let h = harness().await;
        let session = h.gateway.open("aurora", "IDR").unwrap();
        h.wallet.fail_monetary_with("9999");

        let err = h.gateway.bet(&session, bet("R1", "1000")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Wallet(WalletError::Rejected { .. })));
        assert!(h.ledger.find("aurora", "wager-R1").await.unwrap().is_none());

        // The round can still be played once the wallet recovers
        h.wallet.clear_failure();
        assert_eq!(h.gateway.bet(&session, bet("R1", "1000")).await.unwrap().disposition, Disposition::Applied);
    }

    #[tokio::test]
    async fn test_wallet_timeout_rolls_back_ledger() {
        let h = harness().await;
        let session = h.gateway.open("aurora", "IDR").unwrap();
        h.wallet.set_delay(Some(Duration::from_millis(500)));

        let err = h.gateway.bet(&session, bet("R1", "1000")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Wallet(WalletError::Timeout { operation: "balance", .. })));
        assert!(h.ledger.find("aurora", "wager-R1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settle_requires_wager_and_settles_once() {
        let h = harness().await;
        let session = h.gateway.open("aurora", "IDR").unwrap();
        let settle = |round: &str| SettleCommand {
            player: p1(),
            round_id: round.to_string(),
            win_amount: dec("250000"),
        };

        let err = h.gateway.settle(&session, settle("R-missing")).await.unwrap_err();
        assert!(matches!(err, GatewayError::TransactionNotFound { .. }));
        assert!(h.ledger.find("aurora", "payout-R-missing").await.unwrap().is_none());

        h.gateway.bet(&session, bet("R1", "100000")).await.unwrap();
        let receipt = h.gateway.settle(&session, settle("R1")).await.unwrap();
        assert_eq!(receipt.balance, dec("1150000"));

        let err = h.gateway.settle(&session, settle("R1")).await.unwrap_err();
        assert!(matches!(err, GatewayError::TransactionAlreadySettled { balance, .. } if balance == dec("1150000")));
        let payouts: Vec<WalletCall> = h
            .wallet
            .monetary_calls()
            .into_iter()
            .filter(|c| c.operation == WalletOperation::Payout)
            .collect();
        assert_eq!(payouts.len(), 1);
    }

    #[tokio::test]
    async fn test_losing_round_records_zero_payout() {
        let h = harness().await;
        let session = h.gateway.open("aurora", "IDR").unwrap();
        h.gateway.bet(&session, bet("R1", "100000")).await.unwrap();

        let receipt = h
            .gateway
            .settle(&session, SettleCommand { player: p1(), round_id: "R1".to_string(), win_amount: Decimal::ZERO })
            .await
            .unwrap();
        assert_eq!(receipt.balance, dec("900000"));
        let payout = h.ledger.find_by_round("aurora", "R1", TxKind::Payout).await.unwrap().unwrap();
        assert_eq!(payout.win_amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_refund_returns_stake_and_closes_round() {
        let h = harness().await;
        let session = h.gateway.open("aurora", "IDR").unwrap();
        let refund = || RefundCommand { player: p1(), round_id: "R1".to_string() };

        assert!(matches!(
            h.gateway.refund(&session, refund()).await,
            Err(GatewayError::TransactionNotFound { .. })
        ));

        h.gateway.bet(&session, bet("R1", "100000")).await.unwrap();
        let receipt = h.gateway.refund(&session, refund()).await.unwrap();
        assert_eq!(receipt.balance, dec("1000000"));

        let cancel = h.wallet.monetary_calls().pop().unwrap();
        assert_eq!(cancel.operation, WalletOperation::Cancel);
        assert_eq!(cancel.amount, dec("100"));

        assert!(matches!(
            h.gateway.refund(&session, refund()).await,
            Err(GatewayError::TransactionAlreadySettled { .. })
        ));
        assert!(matches!(
            h.gateway
                .settle(&session, SettleCommand { player: p1(), round_id: "R1".to_string(), win_amount: dec("1") })
                .await,
            Err(GatewayError::TransactionAlreadySettled { .. })
        ));
    }

    #[tokio::test]
    async fn test_bet_and_settle_writes_both_rows() {
        let h = harness().await;
        let session = h.gateway.open("aurora", "IDR").unwrap();
        let command = BetAndSettleCommand {
            player: p1(),
            round_id: "R9".to_string(),
            game_code: "slot-1".to_string(),
            bet_amount: dec("10000"),
            win_amount: dec("30000"),
        };

        let receipt = h.gateway.bet_and_settle(&session, command.clone()).await.unwrap();
        assert_eq!(receipt.balance, dec("1020000"));
        assert_eq!(h.ledger.round_records("aurora", "R9").await.unwrap().len(), 2);

        let replay = h.gateway.bet_and_settle(&session, command).await.unwrap();
        assert_eq!(replay.disposition, Disposition::AlreadyApplied);
        assert_eq!(h.wallet.monetary_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_resettle_requires_payout_and_is_idempotent() {
        let h = harness().await;
        let session = h.gateway.open("aurora", "IDR").unwrap();
        let resettle = || ResettleCommand { player: p1(), round_id: "R1".to_string(), amount: dec("5000") };

        h.gateway.bet(&session, bet("R1", "100000")).await.unwrap();
        assert!(matches!(
            h.gateway.resettle(&session, resettle()).await,
            Err(GatewayError::TransactionNotFound { .. })
        ));

        h.gateway
            .settle(&session, SettleCommand { player: p1(), round_id: "R1".to_string(), win_amount: Decimal::ZERO })
            .await
            .unwrap();
        let receipt = h.gateway.resettle(&session, resettle()).await.unwrap();
        assert_eq!(receipt.balance, dec("905000"));
        assert_eq!(
            h.gateway.resettle(&session, resettle()).await.unwrap().disposition,
            Disposition::AlreadyApplied
        );
    }

    #[tokio::test]
    async fn test_player_resolution_is_currency_scoped() {
        let h = harness().await;
        let session = h.gateway.open("aurora", "THB").unwrap();

        h.wallet.set_balance("p-2", dec("50.00"));

        let err = h.gateway.balance(&session, &PlayerRef::Token("tok-IDR".to_string())).await.unwrap_err();
        assert!(matches!(err, GatewayError::PlayerNotFound(_)));
        let receipt = h.gateway.balance(&session, &PlayerRef::Token("tok-THB".to_string())).await.unwrap();
        assert_eq!(receipt.balance, dec("50"));
    }

    #[tokio::test]
    async fn test_negative_amount_rejected() {
        let h = harness().await;
        let session = h.gateway.open("aurora", "IDR").unwrap();
        assert!(matches!(
            h.gateway.bet(&session, bet("R1", "-5")).await,
            Err(GatewayError::Validation(_))
        ));
    }

    #[test]
    fn test_rejections_are_labelled_with_the_failing_step() {
        assert_eq!(rejection_stage(&GatewayError::Authentication), Stage::Authenticated);
        assert_eq!(rejection_stage(&GatewayError::PlayerNotFound("p".into())), Stage::PlayerResolved);
        assert_eq!(
            rejection_stage(&GatewayError::TransactionNotFound { round_id: "R".into() }),
            Stage::IdempotencyChecked
        );
        assert_eq!(
            rejection_stage(&GatewayError::InsufficientFund { balance: Decimal::ZERO, required: Decimal::ONE }),
            Stage::FundsChecked
        );
        assert_eq!(
            rejection_stage(&GatewayError::Wallet(WalletError::Rejected { operation: "wager", status: "9".into() })),
            Stage::Applied
        );
    }

    #[tokio::test]
    async fn test_unknown_currency_fails_at_open() {
        let h = harness().await;
        assert!(matches!(h.gateway.open("aurora", "XAU"), Err(GatewayError::UnsupportedCurrency(_))));
        assert!(matches!(h.gateway.open("nimbus", "IDR"), Err(GatewayError::UnsupportedCurrency(_))));
    }
}
