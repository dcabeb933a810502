mod blob_server;
mod core;
mod mpv;
mod socket;

use std::sync::Arc;

use chronowave_core::catalog::{BlobRegistry, CatalogBackend, CatalogStore, DirBackend, MemoryBackend};
use chronowave_core::config::Config;
use chronowave_core::registry::TrackRegistry;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    Log(String),
    /// A client command failed; forwarded as `Broadcast::Error`.
    Error(String),
}

/// Forwards WARN and ERROR events to connected clients as log lines.
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = *event.metadata().level();
        if !matches!(level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }
        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        event.record(&mut MessageVisitor(&mut message));
        // nobody listening is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

fn init_logging(config: &Config, broadcast_tx: broadcast::Sender<BroadcastMessage>) -> anyhow::Result<()> {
    let log_path = &config.daemon.log_file;
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false),
        )
        .with(BroadcastLayer {
            sender: broadcast_tx,
        })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,chronowave_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);
    init_logging(&config, broadcast_tx.clone())?;
    info!("Config loaded from: {:?}", Config::config_path());

    let blobs = Arc::new(BlobRegistry::new());
    if config.catalog.in_memory {
        info!("Catalog: in memory (nothing survives a restart)");
        let backend = match config.catalog.quota_bytes {
            Some(limit) => MemoryBackend::with_quota(limit),
            None => MemoryBackend::new(),
        };
        serve(config, backend, blobs, broadcast_tx).await
    } else {
        info!("Catalog: {:?}", config.catalog.dir);
        let backend = DirBackend::new(&config.catalog.dir).with_quota(config.catalog.quota_bytes);
        serve(config, backend, blobs, broadcast_tx).await
    }
}

async fn serve<B: CatalogBackend + 'static>(
    config: Config,
    backend: B,
    blobs: Arc<BlobRegistry>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
) -> anyhow::Result<()> {
    let store = CatalogStore::new(backend, Arc::clone(&blobs));
    let registry = TrackRegistry::new(store, config.catalog.allowed_mime_types.clone());

    // every external input funnels into DaemonCore
    let (event_tx, event_rx) = mpsc::channel::<core::DaemonEvent>(256);

    let daemon_core =
        core::DaemonCore::new(config.clone(), registry, broadcast_tx.clone(), event_tx.clone()).await?;

    let _blob_handle = blob_server::start_server(
        config.http.bind_address.clone(),
        config.http.blob_port,
        blobs,
    );

    let _socket_handle = socket::start_server(
        config.daemon.bind_address.clone(),
        config.daemon.control_port,
        daemon_core.state_manager(),
        event_tx.clone(),
        broadcast_tx,
    );

    let shutdown_tx = event_tx;
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = shutdown_tx.send(core::DaemonEvent::Shutdown).await;
            }
            Err(e) => warn!("Cannot listen for ctrl-c: {}", e),
        }
    });

    info!("Daemon initialised, running event loop");
    daemon_core.run(event_rx).await
}
