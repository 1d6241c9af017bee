mod associator;
mod config;
mod fusion;
mod localiser;
mod message;
mod parametric;
mod persistence;
mod query_store;
mod radar_client;
mod solver;
mod spherical;
mod track;
mod tracker;
mod truth;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::RwLock;
use tracing::info;

use config::Config;
use fusion::FusionEngine;
use query_store::{QueryStore, SharedQueryStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional; real deployments inject the environment directly
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fusion_backend=info".into()),
        )
        .init();

    // Configuration problems are the only fatal errors in this process
    let config = Config::from_env().context("configuration error")?;
    info!(
        "fusion backend v{} starting — tick 1 Hz, query socket :{}, save: {}",
        env!("CARGO_PKG_VERSION"),
        config.event_port,
        config.save
    );

    let store: SharedQueryStore = Arc::new(RwLock::new(QueryStore::new()));

    // Query intake listens independently of the fusion cadence
    let listener_store = store.clone();
    let event_port = config.event_port;
    tokio::spawn(async move {
        if let Err(e) = message::start_listener(event_port, listener_store).await {
            // a dead intake socket makes the engine unreachable
            tracing::error!("query listener failed: {e}");
            std::process::exit(1);
        }
    });

    FusionEngine::new(config, store).run().await;
    Ok(())
}
