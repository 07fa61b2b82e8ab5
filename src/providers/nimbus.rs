//! `nimbus` seamless-wallet callbacks
//!
//! Signed with `x-signature: hex(hmac_sha256(secret, body))` over the exact
//! bytes received. Players are addressed by their play id (`userId`).

use super::{invalid, outcome_label, CallbackError, ProviderAdapter, ProviderReply, RawCallback};
use crate::{
    credentials::CredentialSet,
    currency,
    errors::{GatewayError, GatewayResult},
    gateway::{
        rejection_stage, BetAndSettleCommand, BetCommand, Gateway, GatewayOutcome, PlayerRef, RefundCommand,
        ResettleCommand, Session, SettleCommand, Stage,
    },
    signing::{HmacSha256Body, RequestAuthenticator},
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

const NAME: &str = "nimbus";

pub const SIGNATURE_HEADER: &str = "x-signature";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NimbusRequest {
    #[serde(rename = "type")]
    kind: String,
    user_id: String,
    #[serde(default)]
    transaction: Option<NimbusTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NimbusTransaction {
    round_id: String,
    #[serde(default)]
    game_id: String,
    #[serde(default)]
    bet_amount: Option<Decimal>,
    #[serde(default)]
    win_amount: Option<Decimal>,
}

impl NimbusRequest {
    fn transaction(&self) -> GatewayResult<&NimbusTransaction> {
        self.transaction
            .as_ref()
            .ok_or_else(|| invalid(format!("{} requires a transaction", self.kind)))
    }
}

impl NimbusTransaction {
    fn round_id(&self) -> GatewayResult<String> {
        if self.round_id.trim().is_empty() {
            return Err(invalid("transaction.roundId is required"));
        }
        Ok(self.round_id.clone())
    }

    fn bet_amount(&self) -> GatewayResult<Decimal> {
        self.bet_amount.ok_or_else(|| invalid("transaction.betAmount is required"))
    }

    fn win_amount(&self) -> GatewayResult<Decimal> {
        self.win_amount.ok_or_else(|| invalid("transaction.winAmount is required"))
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct NimbusReply {
    pub status: &'static str,
    #[serde(with = "rust_decimal::serde::float_option", skip_serializing_if = "Option::is_none")]
    pub balance: Option<Decimal>,
    pub currency: String,
}

/// `x-signature` value for a request body
pub fn sign(credentials: &CredentialSet, body: &[u8]) -> String {
    HmacSha256Body.sign(body, credentials)
}

fn status_of(outcome: &GatewayOutcome) -> (&'static str, Option<Decimal>) {
    match outcome {
        Ok(receipt) => ("OK", Some(receipt.balance)),
        // Settled rounds are answered as successful replays
        Err(GatewayError::TransactionAlreadySettled { balance, .. }) => ("OK", Some(*balance)),
        Err(GatewayError::InsufficientFund { balance, .. }) => ("INSUFFICIENT_FUNDS", Some(*balance)),
        Err(GatewayError::Validation(_)) => ("INVALID_REQUEST", None),
        Err(GatewayError::Authentication) => ("INVALID_SIGNATURE", None),
        Err(GatewayError::UnsupportedCurrency(_)) => ("UNSUPPORTED_CURRENCY", None),
        Err(GatewayError::PlayerNotFound(_)) => ("USER_NOT_FOUND", None),
        Err(GatewayError::TransactionNotFound { .. }) => ("TRANSACTION_NOT_FOUND", None),
        Err(GatewayError::Wallet(_)) => ("WALLET_ERROR", None),
        Err(GatewayError::ThirdPartyApi(_)) => ("THIRD_PARTY_ERROR", None),
        Err(e @ (GatewayError::Storage(_) | GatewayError::Internal(_))) => {
            error!(provider = NAME, error = %e, "Internal failure while handling callback");
            ("INTERNAL_ERROR", None)
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Nimbus;

impl Nimbus {
    async fn dispatch(&self, gateway: &Gateway, session: &Session, request: &NimbusRequest) -> GatewayOutcome {
        let player = PlayerRef::PlayId(request.user_id.clone());
        match request.kind.as_str() {
            "balance" => gateway.balance(session, &player).await,
            "debit" => {
                let tx = request.transaction()?;
                let command = BetCommand {
                    player,
                    round_id: tx.round_id()?,
                    game_code: tx.game_id.clone(),
                    amount: tx.bet_amount()?,
                };
                gateway.bet(session, command).await
            }
            "credit" => {
                let tx = request.transaction()?;
                let command = SettleCommand {
                    player,
                    round_id: tx.round_id()?,
                    win_amount: tx.win_amount()?,
                };
                gateway.settle(session, command).await
            }
            "debit_credit" => {
                let tx = request.transaction()?;
                let command = BetAndSettleCommand {
                    player,
                    round_id: tx.round_id()?,
                    game_code: tx.game_id.clone(),
                    bet_amount: tx.bet_amount()?,
                    win_amount: tx.win_amount()?,
                };
                gateway.bet_and_settle(session, command).await
            }
            "rollback" => {
                let tx = request.transaction()?;
                let command = RefundCommand {
                    player,
                    round_id: tx.round_id()?,
                };
                gateway.refund(session, command).await
            }
            "resettle" => {
                let tx = request.transaction()?;
                let command = ResettleCommand {
                    player,
                    round_id: tx.round_id()?,
                    amount: tx.win_amount()?,
                };
                gateway.resettle(session, command).await
            }
            other => Err(invalid(format!("unknown type {:?}", other))),
        }
    }
}

#[async_trait]
impl ProviderAdapter for Nimbus {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn handle(&self, gateway: &Gateway, callback: RawCallback) -> Result<ProviderReply, CallbackError> {
        let currency = callback.currency.to_ascii_uppercase();

        // Authenticate the raw bytes before trusting any of their content
        let session = match gateway.open(NAME, &currency) {
            Ok(session) => session,
            Err(e) => return respond("unknown", &currency, Err(e)),
        };
        let signature = callback.header(SIGNATURE_HEADER).unwrap_or_default();
        if !HmacSha256Body.verify(&callback.body, &session.credentials, signature) {
            let rejection = GatewayError::Authentication;
            warn!(provider = NAME, stage = %rejection_stage(&rejection), "Invalid signature");
            return respond("unknown", &currency, Err(rejection));
        }
        debug!(provider = NAME, stage = %Stage::Authenticated, "Signature verified");

        let request: NimbusRequest =
            serde_json::from_slice(&callback.body).map_err(|e| CallbackError::Unparseable(e.to_string()))?;
        let outcome = self.dispatch(gateway, &session, &request).await;
        respond(&request.kind, &currency, outcome)
    }
}

fn respond(action: &str, currency: &str, outcome: GatewayOutcome) -> Result<ProviderReply, CallbackError> {
    let label = outcome_label(&outcome);
    let (status, balance) = status_of(&outcome);
    debug!(provider = NAME, action, outcome = label, status, stage = %Stage::Responded, "Responding");

    let reply = NimbusReply {
        status,
        balance: balance.map(currency::render),
        currency: currency.to_string(),
    };
    ProviderReply::new(action, label, &reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use crate::providers::test_support::{fixture, Fixture};
    use axum::{
        body::Bytes,
        http::{HeaderMap, HeaderValue},
    };
    use serde_json::{json, Value};

    fn callback(f: &Fixture, body: &str, signature: Option<&str>) -> RawCallback {
        let credentials = f.gateway.open(NAME, "IDR").unwrap().credentials;
        let signature = signature.map(str::to_string).unwrap_or_else(|| sign(&credentials, body.as_bytes()));
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&signature).unwrap());
        RawCallback {
            currency: "IDR".to_string(),
            headers,
            body: Bytes::from(body.to_string()),
        }
    }

    async fn send(f: &Fixture, body: &Value) -> Value {
        Nimbus
            .handle(&f.gateway, callback(f, &body.to_string(), None))
            .await
            .unwrap()
            .body
    }

    fn tx(kind: &str, round_id: &str, bet: Option<&str>, win: Option<&str>) -> Value {
        json!({
            "type": kind,
            "userId": "p-1",
            "transaction": {"roundId": round_id, "gameId": "g-1", "betAmount": bet, "winAmount": win},
        })
    }

    #[tokio::test]
    async fn test_debit_credit_flow() {
        let f = fixture(NAME).await;

        let reply = send(&f, &tx("debit", "R1", Some("100000"), None)).await;
        assert_eq!(reply, json!({"status": "OK", "balance": 900000.0, "currency": "IDR"}));

        let reply = send(&f, &tx("credit", "R1", None, Some("300000"))).await;
        assert_eq!(reply["balance"], json!(1200000.0));

        // Settled rounds are acknowledged without another payout
        let reply = send(&f, &tx("credit", "R1", None, Some("300000"))).await;
        assert_eq!(reply["status"], "OK");
        assert_eq!(f.wallet.monetary_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_signature_covers_exact_bytes() {
        let f = fixture(NAME).await;
        let signed = r#"{"type":"balance","userId":"p-1"}"#;
        let credentials = f.gateway.open(NAME, "IDR").unwrap().credentials;
        let signature = sign(&credentials, signed.as_bytes());

        // Same JSON value, different bytes
        let respaced = r#"{"type": "balance", "userId": "p-1"}"#;
        let reply = Nimbus
            .handle(&f.gateway, callback(&f, respaced, Some(&signature)))
            .await
            .unwrap();
        assert_eq!(reply.body["status"], "INVALID_SIGNATURE");
        assert_eq!(reply.outcome, "authentication");

        let reply = Nimbus.handle(&f.gateway, callback(&f, signed, Some(&signature))).await.unwrap();
        assert_eq!(reply.body["balance"], json!(1000000.0));
    }

    #[tokio::test]
    async fn test_missing_signature_header() {
        let f = fixture(NAME).await;
        let mut cb = callback(&f, r#"{"type":"balance","userId":"p-1"}"#, None);
        cb.headers.clear();

        let reply = Nimbus.handle(&f.gateway, cb).await.unwrap();
        assert_eq!(reply.body["status"], "INVALID_SIGNATURE");
        assert!(f.wallet.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_and_resettle() {
        let f = fixture(NAME).await;

        let reply = send(&f, &tx("rollback", "R1", None, None)).await;
        assert_eq!(reply["status"], "TRANSACTION_NOT_FOUND");

        send(&f, &tx("debit_credit", "R2", Some("10000"), Some("0"))).await;
        let reply = send(&f, &tx("resettle", "R2", None, Some("4000"))).await;
        assert_eq!(reply["balance"], json!(994000.0));

        send(&f, &tx("debit", "R3", Some("50000"), None)).await;
        let reply = send(&f, &tx("rollback", "R3", None, None)).await;
        assert_eq!(reply["balance"], json!(994000.0));
    }

    #[tokio::test]
    async fn test_missing_amount_and_unknown_user() {
        let f = fixture(NAME).await;

        let reply = send(&f, &tx("debit", "R1", None, None)).await;
        assert_eq!(reply["status"], "INVALID_REQUEST");

        let reply = send(&f, &json!({"type": "balance", "userId": "ghost"})).await;
        assert_eq!(reply, json!({"status": "USER_NOT_FOUND", "currency": "IDR"}));
    }

    #[tokio::test]
    async fn test_empty_round_id_is_rejected() {
        let f = fixture(NAME).await;

        for kind in ["debit", "credit", "debit_credit", "rollback", "resettle"] {
            let reply = send(&f, &tx(kind, "", Some("100000"), Some("0"))).await;
            assert_eq!(reply["status"], "INVALID_REQUEST", "{}", kind);
        }
        let reply = send(&f, &tx("debit", "  ", Some("200000"), None)).await;
        assert_eq!(reply["status"], "INVALID_REQUEST");

        assert!(f.wallet.monetary_calls().is_empty());
        assert!(f.ledger.find(NAME, "wager-").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_signed_garbage_is_unparseable() {
        let f = fixture(NAME).await;
        let result = Nimbus.handle(&f.gateway, callback(&f, "not json", None)).await;
        assert!(matches!(result, Err(CallbackError::Unparseable(_))));
    }
}
