use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use vaultize_dispatch::{Dispatcher, DispatcherConfig};
use vaultize_engine::{Engine, EngineConfig};
use vaultize_server::api::{self, AppState};
use vaultize_server::config::Config;
use vaultize_state::StateStore;
use vaultize_store::{HttpStoreClient, SearchStore, StoreConfig};

/// Vaultize scheduled alert evaluation engine.
#[derive(Parser, Debug)]
#[command(name = "vaultize-alerting", about = "Scheduled alert evaluation over the search store")]
struct Cli {
    /// Override `RULES_DIR`.
    #[arg(long)]
    rules_dir: Option<PathBuf>,

    /// Override `MGMT_LISTEN_ADDR`.
    #[arg(long)]
    listen_addr: Option<String>,
}

enum RunError {
    /// Bad or missing configuration, or the store was unreachable during
    /// startup. Exit code 64.
    Config(String),
    /// Unexpected runtime failure. Exit code 70.
    Internal(String),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Config(msg)) => {
            error!(error = %msg, "configuration error");
            ExitCode::from(64)
        }
        Err(RunError::Internal(msg)) => {
            error!(error = %msg, "internal error");
            ExitCode::from(70)
        }
    }
}

async fn run(cli: Cli) -> Result<(), RunError> {
    let mut config = Config::from_env().map_err(|e| RunError::Config(e.to_string()))?;
    if let Some(dir) = cli.rules_dir {
        config.rules_dir = dir;
    }
    if let Some(addr) = cli.listen_addr {
        config.listen_addr = addr;
    }

    let mut store_config = StoreConfig::new(&config.store_url);
    if let (Some(user), password) = (&config.store_user, &config.store_password) {
        store_config = store_config
            .with_basic_auth(user, password.clone().unwrap_or_default());
    }
    if !config.store_tls_verify {
        store_config = store_config.with_no_tls_verify();
    }
    let store: Arc<dyn SearchStore> = Arc::new(
        HttpStoreClient::new(store_config).map_err(|e| RunError::Config(e.to_string()))?,
    );

    let states = Arc::new(StateStore::new(
        Arc::clone(&store),
        &config.state_index,
        &config.history_index,
    ));
    let dispatcher = Dispatcher::new(
        DispatcherConfig::default().with_max_concurrent(config.max_concurrent_deliveries),
    );
    let engine_config = EngineConfig::new(&config.rules_dir)
        .with_max_concurrent_evaluations(config.max_concurrent_evaluations)
        .with_shutdown_grace(config.shutdown_grace)
        .with_external_url(config.external_url());
    let engine = Engine::new(store, Arc::clone(&states), dispatcher, engine_config);

    // An unreachable store or unreadable rules directory at startup is a
    // configuration error, exit code 64.
    let summary = engine
        .start()
        .await
        .map_err(|e| RunError::Config(e.to_string()))?;
    info!(
        loaded = summary.loaded,
        errored = summary.errored,
        "rule set loaded"
    );

    let state = AppState {
        engine: engine.clone(),
        history: states,
        admin_token: config.admin_token.clone(),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .map_err(|e| RunError::Config(format!("cannot bind {}: {e}", config.listen_addr)))?;
    info!(address = %config.listen_addr, "management API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| RunError::Internal(e.to_string()))?;

    engine.shutdown().await;
    info!("vaultize-alerting shut down");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM, then return to trigger graceful
/// shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received SIGINT"); }
        () = terminate => { info!("received SIGTERM"); }
    }
}
