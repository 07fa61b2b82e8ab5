//! HTTP surface
//!
//! Provider callbacks, operator routes, health and metrics.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use handlers::AppState;
pub use server::{create_app, ApiServer};
