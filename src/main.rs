//! Inbox Binary Entry Point
//!
//! Runs the ingestion server with its store, dispatcher and plugins.
//! Core functionality is provided by the `inbox` library crate.

use clap::Parser;
use inbox::{
    config::AppConfig,
    dispatcher::Dispatcher,
    limiter::RateLimiter,
    plugin::{Notifier, PushoverTransport, RetentionCleaner},
    server::{AppState, create_router},
    shutdown::{HARD_KILL_TIMEOUT, Shutdown, arm_hard_kill},
    store::{JsonStore, RecordStore},
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Inbox - drop-box ingestion service
#[derive(Parser, Debug)]
#[command(name = "inbox", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "inbox.yaml", env = "INBOX_CONFIG")]
    config: String,

    /// Listen address (overrides config file)
    #[arg(long, env = "INBOX_LISTEN")]
    listen: Option<String>,

    /// Data directory (overrides config file)
    #[arg(long, env = "INBOX_DATA_PATH")]
    data_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,inbox=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // A missing file means "run with defaults"; a broken one is fatal.
    let mut config = if Path::new(&cli.config).exists() {
        tracing::info!(path = %cli.config, "Loading configuration");
        AppConfig::load(&cli.config)?
    } else {
        tracing::warn!(path = %cli.config, "Config file not found, using defaults");
        AppConfig::default()
    };

    // Apply CLI/env overrides (CLI > ENV > config file)
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(path) = cli.data_path {
        config.storage.path = path;
    }
    config.validate()?;

    let addr = config.listen_addr()?;
    let data_path = config.data_path()?;
    tokio::fs::create_dir_all(&data_path).await?;

    tracing::info!(
        listen = %addr,
        data_path = %data_path.display(),
        max_file_size = config.storage.max_file_size,
        retention_days = config.storage.retention_days,
        "Inbox starting"
    );

    let shutdown = Shutdown::new();
    let _signals = shutdown.listen_for_signals();

    let store = Arc::new(
        JsonStore::builder(&data_path)
            .retention_days(config.storage.retention_days)
            .sweep_interval(config.storage.sweep_interval)
            .shutdown_token(shutdown.token())
            .build(),
    );

    let dispatcher = Arc::new(Dispatcher::spawn(&config.dispatcher, shutdown.token()));
    register_plugins(&config, &data_path, &dispatcher).await;

    let app_state = AppState {
        store: store.clone(),
        dispatcher: Arc::clone(&dispatcher),
        limiter: Arc::new(RateLimiter::new(config.limits.clone())),
        max_payload_size: config.storage.max_file_size,
    };
    let app = create_router(app_state);

    tracing::info!("Web server listening on: http://{}", addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let graceful = shutdown.clone();
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        graceful.wait().await;
        arm_hard_kill(HARD_KILL_TIMEOUT);
    })
    .await;

    // The server may also stop on its own error; make sure everything else stops too.
    shutdown.trigger();

    tracing::info!("Shutting down dispatcher...");
    dispatcher.shutdown().await;

    tracing::info!("Shutting down storage...");
    store.close().await;

    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// Register the plugins enabled by configuration, in a fixed order.
async fn register_plugins(config: &AppConfig, data_path: &Path, dispatcher: &Dispatcher) {
    if let Some(notifier) = config.enabled_notifier() {
        match PushoverTransport::new(notifier) {
            Ok(transport) => {
                dispatcher
                    .register(Notifier::with_queue(
                        transport,
                        notifier.queue_capacity,
                        notifier.enqueue_timeout,
                    ))
                    .await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to create notifier, skipping"),
        }
    } else {
        tracing::info!("Notifier disabled (user/token not configured)");
    }

    if config.housekeeping.is_enabled() {
        tracing::info!(days = config.housekeeping.days, interval = ?config.housekeeping.interval, "Housekeeping enabled");
        dispatcher
            .register(RetentionCleaner::from_config(&config.housekeeping, data_path))
            .await;
    }
}
