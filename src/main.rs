//! Cashflow ingestion boundary.
//!
//! A regulatory-safe HTTP front door for merchant cash-flow data: parses
//! tabular and event-feed batches, validates and classifies each row, and
//! commits only derived aggregates — never raw rows — to durable storage.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cashflow_ingest::api::{router, AppState};
use cashflow_ingest::config::Config;
use cashflow_ingest::storage::sqlite::SqliteStore;
use cashflow_ingest::storage::StoragePort;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env().context("loading configuration")?;
    info!(policy_version = %config.policy_version, "starting cashflow ingestion service");

    let storage = SqliteStore::new(&config.database_path).context("opening ingestion database")?;
    let storage: Arc<dyn StoragePort> = Arc::new(storage);

    let port = config.port;
    let state = AppState {
        storage,
        config: Arc::new(config),
    };

    let app = router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await.context("binding listener")?;
    info!(%addr, "ingestion API listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cashflow_ingest=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
