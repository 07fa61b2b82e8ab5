//! Prometheus metrics for callbacks and wallet calls

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    callbacks_total: IntCounterVec,
    wallet_calls_total: IntCounterVec,
    wallet_call_duration: HistogramVec,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let callbacks_total = IntCounterVec::new(
            Opts::new("slotgate_callbacks_total", "Provider callbacks by action and outcome"),
            &["provider", "action", "outcome"],
        )?;
        let wallet_calls_total = IntCounterVec::new(
            Opts::new("slotgate_wallet_calls_total", "Wallet service calls by operation and result"),
            &["operation", "result"],
        )?;
        let wallet_call_duration = HistogramVec::new(
            HistogramOpts::new("slotgate_wallet_call_duration_seconds", "Wallet service call latency")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["operation"],
        )?;

        registry.register(Box::new(callbacks_total.clone()))?;
        registry.register(Box::new(wallet_calls_total.clone()))?;
        registry.register(Box::new(wallet_call_duration.clone()))?;

        Ok(Self {
            registry,
            callbacks_total,
            wallet_calls_total,
            wallet_call_duration,
        })
    }

    pub fn record_callback(&self, provider: &str, action: &str, outcome: &str) {
        self.callbacks_total
            .with_label_values(&[provider, action, outcome])
            .inc();
    }

    pub fn record_wallet_call(&self, operation: &str, success: bool, elapsed: Duration) {
        let result = if success { "ok" } else { "error" };
        self.wallet_calls_total
            .with_label_values(&[operation, result])
            .inc();
        self.wallet_call_duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    /// Text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
