use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chat_channel_archiver::alert::{AlertDispatcher, LogAlerter, WebhookAlerter};
use chat_channel_archiver::automation::ChromiumAutomation;
use chat_channel_archiver::config::Config;
use chat_channel_archiver::control;
use chat_channel_archiver::cursor::CursorTable;
use chat_channel_archiver::session::SessionStore;
use chat_channel_archiver::storage::S3Store;
use chat_channel_archiver::worker::ArchiverWorker;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting chat-channel-archiver");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        channels = config.channels.len(),
        poll_interval_secs = config.poll_interval.as_secs(),
        batch_size = config.batch_size,
        "Configuration loaded"
    );

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create data directory: {}",
                config.data_dir.display()
            )
        })?;

    let sessions = SessionStore::new(&config.data_dir);
    let cursors = CursorTable::load(&config.data_dir)
        .await
        .context("Failed to load cursor table")?;

    let store = Arc::new(S3Store::new(&config).context("Failed to initialize object store")?);

    let alerts: Arc<dyn AlertDispatcher> = match config.alert_webhook_url.as_deref() {
        Some(url) => {
            info!("Alert webhook configured");
            Arc::new(WebhookAlerter::new(url).context("Failed to build alert dispatcher")?)
        }
        None => {
            info!("No alert webhook configured, alerts go to the log only");
            Arc::new(LogAlerter)
        }
    };

    let automation = Arc::new(ChromiumAutomation::new(&config));

    let (bridge, link) = control::bridge();

    let worker = ArchiverWorker::new(config, automation, store, alerts, sessions, cursors, link);
    let worker_handle = tokio::spawn(async move {
        worker.run().await;
    });
    info!("Archiver worker started");

    // Wait for shutdown signal, then let the worker finish its in-flight
    // flush and persist cursors before exiting.
    shutdown_signal().await;

    info!("Shutting down...");
    bridge.request_shutdown();

    if let Err(e) = worker_handle.await {
        error!("Worker task panicked: {e}");
    }

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chat_channel_archiver=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        // Structured JSON logging for production
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        // Pretty-printed logging for development
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
