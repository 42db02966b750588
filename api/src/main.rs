use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use common::context::Context;
use common::prelude::FutureTimeout;
use common::{logging, signal};
use tokio::signal::unix::SignalKind;
use tokio::{select, time};

mod api;
mod config;
mod global;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::AppConfig::parse()?;

    logging::init(&config.logging.level, config.logging.json)?;

    tracing::info!("starting api service");

    let (ctx, handler) = Context::new();

    let rmq = Arc::new(
        common::rmq::ConnectionPool::connect(&config.broker, Duration::from_secs(30))
            .timeout(Duration::from_secs(5))
            .await
            .context("failed to connect to the broker, timed out")?
            .context("failed to connect to the broker")?,
    );

    let db = Arc::new(
        common::database::Database::connect(&config.database)
            .await
            .context("failed to connect to the database")?,
    );

    let global = Arc::new(global::GlobalState::new(config, ctx, rmq.clone(), db.clone()));

    let api_future = tokio::spawn(api::run(global.clone()));

    // Listen on both sigint and sigterm and cancel the context when either is received
    let mut signal_handler = signal::SignalHandler::new()
        .with_signal(SignalKind::interrupt())
        .with_signal(SignalKind::terminate());

    // An environmental failure must end with a non-zero exit so the
    // orchestrator restarts the worker.
    let mut exit = Ok(());

    select! {
        r = api_future => {
            tracing::error!("api stopped unexpectedly: {:?}", r);
            exit = Err(anyhow::anyhow!("api stopped unexpectedly"));
        },
        r = global.rmq.handle_reconnects() => {
            tracing::error!("broker stopped unexpectedly: {:?}", r);
            exit = Err(anyhow::anyhow!("broker connection lost"));
        },
        _ = signal_handler.recv() => tracing::info!("shutting down"),
    }

    // We cannot have a context in scope when we cancel the handler, otherwise it will deadlock.
    drop(global);

    tracing::info!("waiting for connections to finish");

    select! {
        _ = time::sleep(Duration::from_secs(60)) => tracing::warn!("force shutting down"),
        _ = signal_handler.recv() => tracing::warn!("force shutting down"),
        _ = handler.cancel() => tracing::info!("all connections closed"),
    }

    rmq.close().await;
    db.close().await;

    exit
}

#[cfg(test)]
mod tests;
