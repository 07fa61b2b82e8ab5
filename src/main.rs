//! Slotgate server binary

use clap::Parser;
use slotgate::{
    api::ApiServer,
    config::{ConfigLoader, GatewayConfig},
    credentials::{CredentialRegistry, Environment},
    gateway::Gateway,
    ledger::RocksLedger,
    metrics::GatewayMetrics,
    providers::ProviderRegistry,
    storage::Storage,
    wallet::HttpWalletClient,
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "slotgate")]
#[command(about = "Provider transaction gateway", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Listen host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// RocksDB directory (overrides config)
    #[arg(long)]
    data_dir: Option<String>,

    /// staging or production (overrides config)
    #[arg(long)]
    environment: Option<Environment>,
}

impl Args {
    fn apply(self, config: &mut GatewayConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = self.data_dir {
            config.storage.data_directory = dir;
        }
        if let Some(environment) = self.environment {
            config.environment = environment;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slotgate=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;
    args.apply(&mut config);
    config.validate()?;

    info!("Opening ledger database: {}", config.storage.data_directory);
    let storage = Storage::open_with_config(&config.storage)?;
    let ledger = Arc::new(RocksLedger::new(storage));

    let credentials = CredentialRegistry::from_entries(&config.credentials)?;
    info!("Loaded {} credential bundles for {}", credentials.len(), config.environment);

    let wallet = Arc::new(HttpWalletClient::new(config.wallet_timeout())?);
    let gateway = Gateway::new(ledger, wallet, credentials, config.environment, GatewayMetrics::new()?)
        .with_wallet_timeout(config.wallet_timeout());

    ApiServer::new(config.server, gateway, ProviderRegistry::with_defaults())
        .run()
        .await
}
