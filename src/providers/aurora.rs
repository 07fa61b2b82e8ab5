//! `aurora` wallet callbacks
//!
//! JSON body whose scalar fields are all strings, signed in-body with
//! `md5(action + token + roundId + amount + timestamp + secret)`. Players
//! are identified by their session token.

use super::{invalid, outcome_label, CallbackError, ProviderAdapter, ProviderReply, RawCallback};
use crate::{
    credentials::CredentialSet,
    currency,
    errors::{GatewayError, GatewayResult},
    gateway::{
        rejection_stage, BetCommand, Gateway, GatewayOutcome, PlayerRef, RefundCommand, Session, SettleCommand, Stage,
    },
    signing::{concat_fields, Md5Concat, RequestAuthenticator},
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, error, warn};

const NAME: &str = "aurora";

/// Response codes of the aurora wallet protocol
pub mod codes {
    pub const OK: u32 = 0;
    pub const INVALID_SIGNATURE: u32 = 1001;
    pub const PLAYER_NOT_FOUND: u32 = 1002;
    pub const INSUFFICIENT_FUNDS: u32 = 1003;
    pub const ROUND_NOT_FOUND: u32 = 1004;
    pub const ROUND_ALREADY_SETTLED: u32 = 1005;
    pub const UNSUPPORTED_CURRENCY: u32 = 1006;
    pub const INVALID_PARAMETER: u32 = 1007;
    pub const WALLET_ERROR: u32 = 1100;
    pub const THIRD_PARTY_ERROR: u32 = 1200;
    pub const INTERNAL_ERROR: u32 = 1999;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuroraRequest {
    action: String,
    #[serde(default)]
    token: String,
    #[serde(default)]
    round_id: String,
    #[serde(default)]
    game_code: String,
    #[serde(default)]
    amount: String,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    sign: String,
}

impl AuroraRequest {
    fn canonical(&self) -> String {
        canonical(&self.action, &self.token, &self.round_id, &self.amount, &self.timestamp)
    }

    fn amount(&self) -> GatewayResult<Decimal> {
        Decimal::from_str(self.amount.trim()).map_err(|_| invalid(format!("amount is not a number: {:?}", self.amount)))
    }

    fn round_id(&self) -> GatewayResult<String> {
        if self.round_id.is_empty() {
            return Err(invalid("roundId is required"));
        }
        Ok(self.round_id.clone())
    }
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AuroraReply {
    pub code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
}

impl AuroraReply {
    fn new(code: u32, message: &str, balance: Option<Decimal>) -> Self {
        Self {
            code,
            message: message.to_string(),
            balance: balance.map(|b| currency::render(b).to_string()),
        }
    }
}

fn canonical(action: &str, token: &str, round_id: &str, amount: &str, timestamp: &str) -> String {
    concat_fields(&[action, token, round_id, amount, timestamp])
}

/// Build the `sign` field for an aurora request
pub fn sign(
    credentials: &CredentialSet,
    action: &str,
    token: &str,
    round_id: &str,
    amount: &str,
    timestamp: &str,
) -> String {
    Md5Concat.sign(canonical(action, token, round_id, amount, timestamp).as_bytes(), credentials)
}

fn reply_for(outcome: &GatewayOutcome) -> AuroraReply {
    let error = match outcome {
        Ok(receipt) => return AuroraReply::new(codes::OK, "OK", Some(receipt.balance)),
        Err(e) => e,
    };

    match error {
        GatewayError::Validation(msg) => AuroraReply::new(codes::INVALID_PARAMETER, msg, None),
        GatewayError::Authentication => AuroraReply::new(codes::INVALID_SIGNATURE, "Invalid signature", None),
        GatewayError::UnsupportedCurrency(_) => AuroraReply::new(codes::UNSUPPORTED_CURRENCY, "Unsupported currency", None),
        GatewayError::PlayerNotFound(_) => AuroraReply::new(codes::PLAYER_NOT_FOUND, "Player not found", None),
        GatewayError::TransactionNotFound { .. } => AuroraReply::new(codes::ROUND_NOT_FOUND, "Round not found", None),
        GatewayError::TransactionAlreadySettled { balance, .. } => {
            AuroraReply::new(codes::ROUND_ALREADY_SETTLED, "Round already settled", Some(*balance))
        }
        GatewayError::InsufficientFund { balance, .. } => {
            AuroraReply::new(codes::INSUFFICIENT_FUNDS, "Insufficient funds", Some(*balance))
        }
        GatewayError::Wallet(_) => AuroraReply::new(codes::WALLET_ERROR, "Wallet error", None),
        GatewayError::ThirdPartyApi(_) => AuroraReply::new(codes::THIRD_PARTY_ERROR, "Third-party error", None),
        GatewayError::Storage(_) | GatewayError::Internal(_) => {
            error!(provider = NAME, error = %error, "Internal failure while handling callback");
            AuroraReply::new(codes::INTERNAL_ERROR, "Internal error", None)
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Aurora;

impl Aurora {
    async fn process(&self, gateway: &Gateway, currency: &str, request: &AuroraRequest) -> GatewayOutcome {
        let session = gateway.open(NAME, currency)?;
        if !Md5Concat.verify(request.canonical().as_bytes(), &session.credentials, &request.sign) {
            let rejection = GatewayError::Authentication;
            warn!(provider = NAME, action = %request.action, stage = %rejection_stage(&rejection), "Invalid signature");
            return Err(rejection);
        }
        debug!(provider = NAME, action = %request.action, stage = %Stage::Authenticated, "Signature verified");

        self.dispatch(gateway, &session, request).await
    }

    async fn dispatch(&self, gateway: &Gateway, session: &Session, request: &AuroraRequest) -> GatewayOutcome {
        let player = PlayerRef::Token(request.token.clone());
        match request.action.as_str() {
            "balance" => gateway.balance(session, &player).await,
            "bet" => {
                let command = BetCommand {
                    player,
                    round_id: request.round_id()?,
                    game_code: request.game_code.clone(),
                    amount: request.amount()?,
                };
                gateway.bet(session, command).await
            }
            "settle" => {
                let command = SettleCommand {
                    player,
                    round_id: request.round_id()?,
                    win_amount: request.amount()?,
                };
                gateway.settle(session, command).await
            }
            "refund" => {
                let command = RefundCommand {
                    player,
                    round_id: request.round_id()?,
                };
                gateway.refund(session, command).await
            }
            other => Err(invalid(format!("unknown action {:?}", other))),
        }
    }
}

#[async_trait]
impl ProviderAdapter for Aurora {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn handle(&self, gateway: &Gateway, callback: RawCallback) -> Result<ProviderReply, CallbackError> {
        let request: AuroraRequest =
            serde_json::from_slice(&callback.body).map_err(|e| CallbackError::Unparseable(e.to_string()))?;

        let outcome = self.process(gateway, &callback.currency, &request).await;
        let label = outcome_label(&outcome);
        debug!(provider = NAME, action = %request.action, outcome = label, stage = %Stage::Responded, "Responding");

        ProviderReply::new(&request.action, label, &reply_for(&outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use crate::providers::test_support::{fixture, Fixture};
    use axum::{body::Bytes, http::HeaderMap};
    use serde_json::{json, Value};

    const TS: &str = "1700000000";

    fn signed(f: &Fixture, action: &str, round_id: &str, amount: &str) -> Value {
        let credentials = f.gateway.open(NAME, "IDR").unwrap().credentials;
        json!({
            "action": action,
            "token": "tok-1",
            "roundId": round_id,
            "gameCode": "slot-7",
            "amount": amount,
            "timestamp": TS,
            "sign": sign(&credentials, action, "tok-1", round_id, amount, TS),
        })
    }

    async fn send(f: &Fixture, currency: &str, body: &Value) -> Value {
        let callback = RawCallback {
            currency: currency.to_string(),
            headers: HeaderMap::new(),
            body: Bytes::from(body.to_string()),
        };
        Aurora.handle(&f.gateway, callback).await.unwrap().body
    }

    #[tokio::test]
    async fn test_bet_is_applied_once() {
        let f = fixture(NAME).await;
        let body = signed(&f, "bet", "R1", "100000");

        let first = send(&f, "idr", &body).await;
        assert_eq!(first, json!({"code": 0, "message": "OK", "balance": "900000.00"}));

        let replay = send(&f, "IDR", &body).await;
        assert_eq!(replay, first);
        assert_eq!(f.wallet.monetary_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_mutated_amount_fails_signature() {
        let f = fixture(NAME).await;
        let mut body = signed(&f, "bet", "R1", "100000");
        body["amount"] = json!("100001");

        let reply = send(&f, "IDR", &body).await;
        assert_eq!(reply["code"], codes::INVALID_SIGNATURE);
        assert!(f.wallet.calls().is_empty());
        assert!(f.ledger.find(NAME, "wager-R1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settlement_codes() {
        let f = fixture(NAME).await;

        let reply = send(&f, "IDR", &signed(&f, "settle", "R-none", "5000")).await;
        assert_eq!(reply["code"], codes::ROUND_NOT_FOUND);

        send(&f, "IDR", &signed(&f, "bet", "R1", "100000")).await;
        let reply = send(&f, "IDR", &signed(&f, "settle", "R1", "50000")).await;
        assert_eq!(reply["balance"], "950000.00");

        let reply = send(&f, "IDR", &signed(&f, "settle", "R1", "50000")).await;
        assert_eq!(reply["code"], codes::ROUND_ALREADY_SETTLED);
        assert_eq!(reply["balance"], "950000.00");

        let reply = send(&f, "IDR", &signed(&f, "refund", "R1", "")).await;
        assert_eq!(reply["code"], codes::ROUND_ALREADY_SETTLED);
    }

    #[tokio::test]
    async fn test_insufficient_funds_reports_balance() {
        let f = fixture(NAME).await;
        let reply = send(&f, "IDR", &signed(&f, "bet", "R1", "2000000")).await;
        assert_eq!(reply["code"], codes::INSUFFICIENT_FUNDS);
        assert_eq!(reply["balance"], "1000000.00");
    }

    #[tokio::test]
    async fn test_unconfigured_currency_and_bad_action() {
        let f = fixture(NAME).await;

        let reply = send(&f, "THB", &signed(&f, "balance", "", "")).await;
        assert_eq!(reply["code"], codes::UNSUPPORTED_CURRENCY);

        let reply = send(&f, "IDR", &signed(&f, "jackpot", "R1", "1")).await;
        assert_eq!(reply["code"], codes::INVALID_PARAMETER);

        let reply = send(&f, "IDR", &signed(&f, "bet", "R1", "lots")).await;
        assert_eq!(reply["code"], codes::INVALID_PARAMETER);
    }

    #[tokio::test]
    async fn test_unknown_token_is_player_not_found() {
        let f = fixture(NAME).await;
        let credentials = f.gateway.open(NAME, "IDR").unwrap().credentials;
        let body = json!({
            "action": "balance",
            "token": "stale",
            "timestamp": TS,
            "sign": sign(&credentials, "balance", "stale", "", "", TS),
        });

        let reply = send(&f, "IDR", &body).await;
        assert_eq!(reply, json!({"code": codes::PLAYER_NOT_FOUND, "message": "Player not found"}));
    }

    #[tokio::test]
    async fn test_garbage_body_is_unparseable() {
        let f = fixture(NAME).await;
        let callback = RawCallback {
            currency: "IDR".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"action=bet"),
        };
        assert!(matches!(
            Aurora.handle(&f.gateway, callback).await,
            Err(CallbackError::Unparseable(_))
        ));
    }
}
