#![warn(clippy::nursery, clippy::pedantic)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::StreamExt;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::task;
use tracing::{error, info, warn};

use crate::api::AppState;
use crate::config::{Config, Storage};
use crate::service::PasteService;
use crate::store::{MemoryStore, PasteStore, RocksStore};

mod api;
mod config;
mod error;
mod lifecycle;
mod paste;
mod service;
mod short_code;
mod store;
mod time;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;

    let store: Arc<dyn PasteStore> = match config.storage {
        Storage::RocksDb => Arc::new(
            RocksStore::open(&config.db_path)
                .with_context(|| format!("Failed to open database at {:?}", config.db_path))?,
        ),
        Storage::Memory => {
            warn!("Using in-memory storage; pastes will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let stop_signal = Arc::new(AtomicBool::new(false));
    if let Some(interval) = config.cleanup_interval {
        task::spawn(cleanup(
            Arc::clone(&stop_signal),
            Arc::clone(&store),
            interval,
        ));
    }

    let signals = Signals::new(&[SIGTERM, SIGINT])?;
    let signals_handle = signals.handle();

    let bind_addr = config.bind_addr;
    let state = Arc::new(AppState {
        service: PasteService::new(store),
        config,
    });

    info!("Listening on {}", bind_addr);
    axum::Server::bind(&bind_addr)
        .serve(api::router(state).into_make_service())
        .with_graceful_shutdown(shutdown(signals))
        .await?;

    signals_handle.close();
    stop_signal.store(true, Ordering::Release);
    info!("Server stopped");
    Ok(())
}

async fn shutdown(mut signals: Signals) {
    if let Some(signal) = signals.next().await {
        info!("Received signal {}, draining connections", signal);
    }
}

/// Periodic clean-up task that deletes expired entries.
async fn cleanup(stop_signal: Arc<AtomicBool>, store: Arc<dyn PasteStore>, interval: Duration) {
    while !stop_signal.load(Ordering::Acquire) {
        tokio::time::sleep(interval).await;

        let store = Arc::clone(&store);
        match task::spawn_blocking(move || store.sweep_expired(Utc::now())).await {
            Ok(Ok(0)) => (),
            Ok(Ok(removed)) => info!("Removed {} expired pastes", removed),
            Ok(Err(e)) => warn!("Failed to cleanup db: {}", e),
            Err(e) => error!("Failed to join handle?! {}", e),
        }
    }
}
