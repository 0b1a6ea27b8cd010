//! Shopfront POS - offline-resilient checkout and sale synchronization.
//!
//! The library wires the checkout orchestrator, the durable offline queue
//! and the background sync manager around a remote document store. UI
//! layers embed it through [`AppState`]; the bundled binary runs it
//! headless so queued sales keep draining without a till attached.

use anyhow::Context;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod auth;
pub mod cart;
pub mod checkout;
pub mod config;
pub mod connectivity;
pub mod db;
pub mod diagnostics;
pub mod docstore;
pub mod error;
pub mod events;
pub mod models;
pub mod notify;
pub mod offline_queue;
pub mod storage;
pub mod sync;
pub mod writer;

#[cfg(test)]
mod test_support;

use auth::AuthState;
use checkout::{Checkout, CheckoutPorts};
use config::PosConfig;
use connectivity::{ConnectivityMonitor, ConnectivityProbe, HttpProbe};
use db::{DbState, SqliteKvStore};
use docstore::HttpDocumentStore;
use events::EventBus;
use notify::{HttpPushNotifier, PushNotifier};
use offline_queue::OfflineQueue;
use sync::SyncManager;
use writer::{BatchTransactionWriter, TransactionWriter};

// ============================================================================
// Application state
// ============================================================================

/// Collaborators that talk to the outside world. Swapped for fakes in tests
/// and by embedders with their own transports.
pub struct Adapters {
    pub probe: Arc<dyn ConnectivityProbe>,
    pub writer: Arc<dyn TransactionWriter>,
    pub notifier: Arc<dyn PushNotifier>,
}

impl Adapters {
    /// HTTP adapters for the configured backend.
    pub fn http(config: &PosConfig, auth: Arc<AuthState>) -> Result<Self, String> {
        let project_id = config
            .backend
            .project_id
            .as_deref()
            .ok_or("Backend project id is not configured (SHOPFRONT_PROJECT_ID)")?;
        let store = HttpDocumentStore::new(
            &config.backend.url,
            project_id,
            config.backend.api_key.clone(),
            auth.clone(),
            config.checkout.write_timeout,
        )?;
        Ok(Self {
            probe: Arc::new(HttpProbe::new(&config.probe.url, config.probe.timeout)?),
            writer: Arc::new(BatchTransactionWriter::new(Arc::new(store))),
            notifier: Arc::new(HttpPushNotifier::new(
                config.backend.notify_url.as_deref(),
                auth,
            )?),
        })
    }
}

pub struct AppState {
    pub config: PosConfig,
    pub db: Arc<DbState>,
    pub events: EventBus,
    pub auth: Arc<AuthState>,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub queue: Arc<OfflineQueue>,
    pub checkout: Checkout,
    pub sync: Arc<SyncManager>,
}

impl AppState {
    pub fn new(
        config: PosConfig,
        db: Arc<DbState>,
        events: EventBus,
        auth: Arc<AuthState>,
        adapters: Adapters,
    ) -> Self {
        let connectivity = Arc::new(ConnectivityMonitor::new(adapters.probe, events.clone()));
        let queue = Arc::new(OfflineQueue::new(Box::new(SqliteKvStore::new(db.clone()))));

        let checkout = Checkout::new(
            CheckoutPorts {
                probe: connectivity.clone(),
                writer: adapters.writer.clone(),
                queue: queue.clone(),
                auth: auth.clone(),
                notifier: adapters.notifier,
                events: events.clone(),
                journal: Some(db.clone()),
            },
            config.checkout.clone(),
            &config.backend.store_id,
        );
        let sync = Arc::new(
            SyncManager::new(
                queue.clone(),
                adapters.writer,
                connectivity.clone(),
                auth.clone(),
                events.clone(),
                config.sync.clone(),
            )
            .with_journal(db.clone()),
        );

        Self {
            config,
            db,
            events,
            auth,
            connectivity,
            queue,
            checkout,
            sync,
        }
    }

    /// Start the background sync loop. Cancel `token` to stop it.
    pub fn start_background_sync(&self, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        sync::start_sync_loop(
            self.sync.clone(),
            self.events.clone(),
            self.config.sync.clone(),
            token,
        )
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Console plus daily rolling file logging. The returned guard flushes the
/// file writer when dropped.
fn init_logging(config: &PosConfig) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shopfront_pos_lib=debug"));

    let log_dir = diagnostics::get_log_dir(&config.data_dir);
    // Prune before the appender opens today's file.
    diagnostics::prune_old_logs(&log_dir);
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}

// ============================================================================
// App entry point
// ============================================================================

pub fn run() -> anyhow::Result<()> {
    let bootstrap = PosConfig {
        data_dir: config::resolve_data_dir(),
        ..PosConfig::default()
    };
    let _log_guard = init_logging(&bootstrap);
    info!("Starting Shopfront POS v{}", env!("CARGO_PKG_VERSION"));

    // First run: persist a provided connection string so later runs only
    // need the keyring.
    if let Ok(raw) = std::env::var("SHOPFRONT_CONNECTION_STRING") {
        if !storage::is_configured() {
            match storage::apply_connection_string(&raw) {
                Ok(()) => info!("Stored backend credentials from SHOPFRONT_CONNECTION_STRING"),
                Err(e) => warn!("Could not store connection string credentials: {e}"),
            }
        }
    }

    let db = Arc::new(db::init(&bootstrap.data_dir).map_err(anyhow::Error::msg)?);
    let config = {
        let conn = db
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("database lock poisoned: {e}"))?;
        config::load(&conn)
    };
    info!(backend = ?config.backend, "Configuration loaded");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("shopfront-worker")
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async move {
        let events = EventBus::new();
        let auth = Arc::new(AuthState::new(events.clone()));
        let adapters = Adapters::http(&config, auth.clone())
            .map_err(anyhow::Error::msg)
            .context("Failed to configure backend adapters")?;
        let state = AppState::new(config, db, events, auth, adapters);

        let shutdown = CancellationToken::new();
        // Subscribed before the session is restored so its sign-in event
        // reaches the loop.
        let sync_task = state.start_background_sync(shutdown.clone());

        if state.auth.restore_session() {
            info!("Restored persisted session");
        } else {
            warn!(
                pending = state.queue.count(),
                "No persisted session; queued sales wait for sign-in"
            );
        }

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!(pending = state.queue.count(), "Shutting down");
        shutdown.cancel();
        if let Err(e) = sync_task.await {
            warn!("Sync loop ended abnormally: {e}");
        }
        Ok::<(), anyhow::Error>(())
    })
}
