//! Slotgate - Provider Transaction Gateway
//!
//! Lets third-party casino game providers drive one internal wallet service.
//! Every provider callback is authenticated with the provider's own signing
//! scheme, normalized to wallet currency units, and applied to the wallet at
//! most once, guarded by an append-only RocksDB ledger.

pub mod api;
pub mod config;
pub mod credentials;
pub mod currency;
pub mod errors;
pub mod gateway;
pub mod ledger;
pub mod metrics;
pub mod providers;
pub mod signing;
pub mod storage;
pub mod wallet;

pub use config::{ConfigLoader, GatewayConfig};
pub use errors::{GatewayError, GatewayResult};
pub use gateway::{Disposition, Gateway, Receipt, Session};
