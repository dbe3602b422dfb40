use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use backend_http::HttpBackend;
use clap::Parser;
use config::{AppConfig, ConfigStore};
use core_orchestrator::{Backends, Dashboard, DashboardOptions, SessionState};
use secrets::{SecretStore, default_session_dir_from};
use storage_sqlite::TranscriptStore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod shell;

use shell::Shell;

#[derive(Parser)]
#[command(name = "flowdeck")]
#[command(about = "Terminal dashboard for flows, their file collections and chat", long_about = None)]
struct Cli {
    /// Directory for session state, transcript archive and logs
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Directory holding config.json
    #[arg(long)]
    config_dir: Option<PathBuf>,
    /// Backend base URL, overriding the configured one
    #[arg(long)]
    base_url: Option<String>,
    /// Password for the encrypted session store
    #[arg(long)]
    password: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = match &cli.data_dir {
        Some(dir) => dir.clone(),
        None => {
            let mut dir = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
            dir.push("flowdeck");
            dir
        }
    };
    fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to prepare data dir {}", data_dir.display()))?;
    let _log_guard = init_local_logger(&data_dir.join("logs"));

    let config_store = match &cli.config_dir {
        Some(dir) => ConfigStore::from_dir(dir),
        None => ConfigStore::from_default_location()?,
    };
    let mut config = match config_store.load_or_init() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to load config: {err}");
            AppConfig::default()
        }
    };
    if let Some(base_url) = cli.base_url {
        config.backend.base_url = base_url.trim_end_matches('/').to_string();
    }

    if config.security.local_encryption_enabled && cli.password.is_none() {
        bail!("local encryption is enabled; pass --password to unlock the session store");
    }
    let session_store =
        SecretStore::new(default_session_dir_from(&data_dir)).with_password(cli.password);
    let session = Arc::new(SessionState::new(Arc::new(session_store)));

    let backend = Arc::new(HttpBackend::new(&config.backend, session.clone())?);
    let backends = Backends {
        auth: backend.clone(),
        flows: backend.clone(),
        files: backend.clone(),
        chat: backend,
    };
    let dashboard = Arc::new(Dashboard::new(
        backends,
        session,
        DashboardOptions {
            exclude_example_flows: config.dashboard.exclude_example_flows,
        },
    ));

    let runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    runtime.block_on(async {
        let transcripts = if config.dashboard.archive_transcript {
            match TranscriptStore::connect(data_dir.join("transcripts.db")).await {
                Ok(store) => Some(store),
                Err(err) => {
                    error!("transcript archive unavailable: {err}");
                    None
                }
            }
        } else {
            None
        };

        tokio::spawn(dashboard.coordinator().run());
        info!(base_url = %config.backend.base_url, "shell started");
        Shell::new(dashboard, transcripts).run().await
    })
}

fn init_local_logger(log_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    if let Err(err) = fs::create_dir_all(log_dir) {
        eprintln!("failed to create log dir `{}`: {err}", log_dir.display());
    }
    let file_appender = tracing_appender::rolling::daily(log_dir, "flowdeck.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,app_shell=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_writer(writer)
        .init();

    guard
}
