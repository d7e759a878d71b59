mod api;
mod core;
mod error;
mod http;
mod mpv;
mod poller;
mod timer;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use speech_proto::config::Config;
use speech_proto::state::StateManager;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::api::ApiClient;
use crate::core::{DaemonCore, DaemonEvent};

#[derive(Parser, Debug)]
#[command(
    name = "keospeech",
    version,
    about = "Plays newly generated speech files from a remote TTS service"
)]
struct Cli {
    /// Config file to use instead of the default one
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `api.base_url`
    #[arg(long)]
    api_url: Option<String>,

    /// Open the playback gate at startup
    #[arg(long)]
    authorize: bool,

    /// Log filter, e.g. `debug` or `info,speech_daemon=trace`
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(cli: &Cli) -> anyhow::Result<PathBuf> {
    let data_dir = speech_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("keospeech.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let filter = match &cli.log_level {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid log filter {:?}", directives))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,speech_daemon=debug")),
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(filter)
        .init();

    Ok(log_path)
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::load().unwrap_or_else(|e| {
            warn!("Config unreadable, using defaults: {}", e);
            Config::default()
        }),
    };

    if let Some(url) = &cli.api_url {
        config.api.base_url = url.clone();
    }
    if cli.authorize {
        config.playback.authorize_on_start = true;
    }
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_path = init_logging(&cli)?;
    info!("Log file: {:?}", log_path);

    let config = load_config(&cli)?;
    info!(
        "Config loaded from: {:?}",
        cli.config.clone().unwrap_or_else(Config::config_path)
    );

    let api = Arc::new(ApiClient::new(&config.api)?);
    info!("Polling {} every {:?}", api.base_url(), config.polling.interval());
    let state_manager = Arc::new(StateManager::new());

    // All external inputs funnel into DaemonCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<DaemonEvent>(256);
    let (refresh_tx, refresh_rx) = tokio::sync::mpsc::channel::<()>(1);

    let daemon_core = DaemonCore::new(
        config.clone(),
        Arc::clone(&api),
        Arc::clone(&state_manager),
        event_tx.clone(),
        refresh_tx,
    );

    let _poller_handle = poller::spawn(
        api,
        config.polling.interval(),
        event_tx.clone(),
        refresh_rx,
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state_manager,
            event_tx.clone(),
        );
    }

    let shutdown_tx = event_tx;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
            let _ = shutdown_tx.send(DaemonEvent::Shutdown).await;
        }
    });

    info!("Daemon initialised, running event loop");
    daemon_core.run(event_rx).await?;

    Ok(())
}
