use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audit_chain::collector::{self, LogCollector};
use audit_chain::config::CollectorConfig;
use audit_chain::ledger::Ledger;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audit_chain=debug,audit_collector=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting audit log collector");

    // Load configuration
    let config = CollectorConfig::load()?;
    info!("Configuration loaded");

    // Open ledger (runs migrations)
    let ledger = Ledger::connect(&config.database_url).await?;
    info!("Ledger connected");

    // Chain tail always comes from the ledger, never from a cache
    let collector = LogCollector::recover(ledger.clone(), config.chain_keys())
        .await?
        .with_redaction(config.redaction_filter())
        .with_max_range(config.max_range);

    let app = collector::router(collector);

    let addr = config.listen_addr()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ledger.close().await;
    info!("Audit log collector stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
