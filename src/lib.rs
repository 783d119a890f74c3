pub mod aggregate;
pub mod bundle;
pub mod config;
pub mod db;
pub mod domain;
pub mod focus;
pub mod host;
pub mod models;
pub mod nudge;
pub mod protocol;
pub mod session;
pub mod settings;
mod utils;

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use config::HostConfig;
use db::Database;
use focus::FocusMode;
use host::HostNotifier;
use log::{info, warn};
use session::SessionController;
use settings::SettingsStore;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Everything a request handler can reach.
pub struct AppState {
    pub db: Database,
    pub settings: Arc<SettingsStore>,
    pub session: SessionController,
    /// Focus mode lives only as long as the host process.
    pub focus: Mutex<FocusMode>,
}

impl AppState {
    pub fn new(db: Database, settings: Arc<SettingsStore>, session: SessionController) -> Self {
        Self {
            db,
            settings,
            session,
            focus: Mutex::new(FocusMode::new()),
        }
    }
}

/// Entry point for the native-messaging host. Blocks until the browser closes
/// stdin.
pub fn run() -> anyhow::Result<()> {
    let config = HostConfig::from_env()?;

    // stdout carries the protocol, so logs must go to stderr (env_logger's
    // default). RUST_LOG still overrides.
    env_logger::Builder::new()
        .filter_level(config.log_level())
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    info!(
        "ConsciousTab host starting (data dir {}, debug {})",
        config.data_dir().display(),
        config.debug()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let result = runtime.block_on(serve_stdio(config));
    // The stdin reader sits on a blocking thread that may never return.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn serve_stdio(config: HostConfig) -> anyhow::Result<()> {
    let database = Database::new(config.db_path())?;
    let settings = Arc::new(SettingsStore::load(&database).await?);

    let (outbox, outbox_rx) = mpsc::unbounded_channel();
    let session = SessionController::new(
        database.clone(),
        settings.clone(),
        Arc::new(HostNotifier::new(outbox.clone())),
        config.heartbeat_every_ticks(),
    )
    .with_events(outbox.clone());

    // Close intervals left open by a previous run that never shut down.
    match session.recover_open_intervals().await {
        Ok(0) => {}
        Ok(count) => warn!("Recovered {count} interval(s) left open by a previous run"),
        Err(err) => warn!("Crash recovery failed: {err:?}"),
    }

    let cancel = CancellationToken::new();
    session.start(cancel.clone()).await;

    let app = Arc::new(AppState::new(database, settings, session.clone()));
    let result = host::serve(
        app,
        tokio::io::stdin(),
        tokio::io::stdout(),
        outbox,
        outbox_rx,
        cancel.clone(),
    )
    .await;

    cancel.cancel();
    session.shutdown().await;
    info!("ConsciousTab host stopped");
    result
}
