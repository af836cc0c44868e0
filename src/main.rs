mod app_state;
mod cards;
mod config;
mod crypto;
mod db;
mod handlers;
mod lightning;
mod service;
mod validation;
mod withdraw;

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use app_state::AppState;
use config::Config;
use db::{SqliteCardRepository, init_pool};
use lightning::{MockGateway, PaymentGatewayPtr, StaticWalletOwners, WalletOwnersPtr};
use service::BoltCardService;
use withdraw::WithdrawHandler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boltcard_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse configuration
    let config = Arc::new(Config::parse());

    // Initialize database
    let pool = init_pool(&config.database_url).await?;
    let repo = Arc::new(SqliteCardRepository::new(pool));

    // Ledger and wallet directory are external; run against mocks
    let gateway: PaymentGatewayPtr = Arc::new(MockGateway);
    let owners: WalletOwnersPtr = Arc::new(StaticWalletOwners::default());

    let cards = Arc::new(BoltCardService::new(repo, config.limit_defaults()));
    let withdraw = Arc::new(WithdrawHandler::new(
        cards.clone(),
        gateway,
        owners,
        config.withdraw_settings(),
    ));

    let state = AppState {
        config: config.clone(),
        cards,
        withdraw,
    };
    let app = handlers::router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.socket_addr()).await?;

    tracing::info!("Server running on {}", config.socket_addr());
    tracing::info!("Public URL: {}", config.public_url);

    axum::serve(listener, app).await?;

    Ok(())
}
