//! Currency unit normalization
//!
//! Providers quote amounts in their own unit; the wallet service keeps a base
//! unit per currency. Most currencies are 1:1, a few are quoted by providers
//! in units 1000x smaller than the wallet's.

use crate::errors::{GatewayError, GatewayResult, WalletError};
use once_cell::sync::Lazy;
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;

/// Decimal places used when an amount leaves the gateway
pub const RENDER_SCALE: u32 = 2;

static DEFAULT_SCALES: Lazy<HashMap<&'static str, u32>> = Lazy::new(|| {
    HashMap::from([
        ("IDR", 1000),
        ("VND", 1000),
        ("THB", 1),
        ("MYR", 1),
        ("USD", 1),
        ("CNY", 1),
        ("KRW", 1),
        ("PHP", 1),
        ("INR", 1),
    ])
});

/// Static currency → scale factor table
#[derive(Clone, Debug)]
pub struct CurrencyTable {
    scales: HashMap<String, Decimal>,
}

impl Default for CurrencyTable {
    fn default() -> Self {
        Self {
            scales: DEFAULT_SCALES
                .iter()
                .map(|(code, scale)| (code.to_string(), Decimal::from(*scale)))
                .collect(),
        }
    }
}

impl CurrencyTable {
    fn scale(&self, currency: &str) -> GatewayResult<Decimal> {
        self.scales
            .get(&currency.to_ascii_uppercase())
            .copied()
            .ok_or_else(|| GatewayError::UnsupportedCurrency(currency.to_string()))
    }

    pub fn is_supported(&self, currency: &str) -> bool {
        self.scales.contains_key(&currency.to_ascii_uppercase())
    }

    /// Provider amount → wallet base units (exact, unrounded)
    pub fn to_wallet_units(&self, amount: Decimal, currency: &str) -> GatewayResult<Decimal> {
        Ok(amount / self.scale(currency)?)
    }

    /// Wallet base units → provider amount (exact, unrounded).
    /// The amount comes from a wallet reply, so overflow is a malformed reply.
    pub fn to_provider_units(&self, amount: Decimal, currency: &str) -> GatewayResult<Decimal> {
        let scale = self.scale(currency)?;
        amount.checked_mul(scale).ok_or_else(|| {
            WalletError::MalformedReply {
                operation: "credit",
                reason: format!("{} {} overflows in provider units", amount, currency),
            }
            .into()
        })
    }
}

/// Round an outbound amount to two decimal places.
pub fn render(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(RENDER_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(RENDER_SCALE);
    rounded
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_idr_is_scaled_by_thousand() {
        let table = CurrencyTable::default();
        assert_eq!(table.to_wallet_units(dec("100000"), "IDR").unwrap(), dec("100"));
        assert_eq!(table.to_provider_units(dec("900.00"), "IDR").unwrap(), dec("900000"));
    }

    #[test]
    fn test_round_trip_for_every_supported_currency() {
        let table = CurrencyTable::default();
        let samples = ["0", "0.01", "1", "12.345", "999.99", "10000", "0.001", "123456789.123456"];

        for currency in DEFAULT_SCALES.keys() {
            for sample in samples {
                let x = dec(sample);
                let wallet = table.to_wallet_units(x, currency).unwrap();
                let back = table.to_provider_units(wallet, currency).unwrap();
                assert_eq!(back, x, "round trip failed for {} {}", sample, currency);
            }
        }
    }

    #[test]
    fn test_lowercase_currency_accepted() {
        let table = CurrencyTable::default();
        assert_eq!(table.to_wallet_units(dec("5000"), "vnd").unwrap(), dec("5"));
    }

    #[test]
    fn test_unknown_currency_fails_closed() {
        let table = CurrencyTable::default();
        assert!(matches!(
            table.to_wallet_units(dec("1"), "XAU"),
            Err(GatewayError::UnsupportedCurrency(_))
        ));
    }

    #[test]
    fn test_overflowing_credit_is_malformed_reply() {
        let table = CurrencyTable::default();
        let err = table.to_provider_units(Decimal::MAX, "IDR").unwrap_err();
        assert!(matches!(err, GatewayError::Wallet(WalletError::MalformedReply { .. })));
        assert_eq!(table.to_provider_units(Decimal::MAX, "USD").unwrap(), Decimal::MAX);
    }

    #[test]
    fn test_render_rounds_to_two_places() {
        assert_eq!(render(dec("12.345")), dec("12.35"));
        assert_eq!(render(dec("900000")).to_string(), "900000.00");
        assert_eq!(render(dec("0.004")), dec("0.00"));
    }
}
