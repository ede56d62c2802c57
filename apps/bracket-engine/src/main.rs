//! Bracket Engine Binary
//!
//! Starts the bracket-order execution engine and its HTTP intake.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin bracket-engine
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `DELTA_API_KEY`: exchange API key
//! - `DELTA_API_SECRET`: exchange API secret
//!
//! ## Optional
//! - `DELTA_BASE_URL`: exchange REST endpoint
//! - `BRACKET_DB_URL`: SQLite URL for the bracket store (default: `sqlite://brackets.db?mode=rwc`)
//! - `HTTP_PORT`: intake port (default: 8080)
//! - `RUST_LOG`: log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use bracket_engine::config::EngineConfig;
use bracket_engine::engine::{BracketEngine, EngineOptions, SqliteBracketStore, TokioClock};
use bracket_engine::exchange::{DeltaCredentials, DeltaExchangeAdapter};
use bracket_engine::http::{AppState, create_router};
use bracket_engine::telemetry::init_telemetry;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry();

    let config = EngineConfig::from_env().context("loading configuration")?;

    let store = SqliteBracketStore::connect(&config.database_url)
        .await
        .context("connecting bracket store")?;

    let exchange = DeltaExchangeAdapter::new(
        config.exchange.base_url.clone(),
        DeltaCredentials::new(
            config.exchange.api_key.clone(),
            config.exchange.api_secret.clone(),
        ),
        config.exchange.timeout,
    )
    .context("building exchange adapter")?;

    let engine = BracketEngine::with_options(
        Arc::new(exchange),
        Arc::new(store),
        EngineOptions {
            confirmation_retry: config.confirmation_retry.clone(),
            leg_retry: config.leg_retry.clone(),
            clock: Arc::new(TokioClock),
        },
    );

    let resumed = engine
        .resume_pending()
        .await
        .context("resuming pending brackets")?;
    if resumed > 0 {
        tracing::info!(count = resumed, "Resumed pending bracket records");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, exchange = %config.exchange.base_url, "Bracket engine listening");

    let app = create_router(AppState {
        engine: engine.clone(),
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(engine))
        .await
        .context("serving HTTP")?;

    tracing::info!("Bracket engine stopped");
    Ok(())
}

/// Wait for SIGINT/SIGTERM, then stop the engine: in-flight exchange calls
/// finish, no new attempt starts, pending records resume on next start.
async fn shutdown_signal(engine: BracketEngine) {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown requested; draining in-flight work");
    engine.shutdown();
}
