#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use formic_adapter::config::FormicConfig;
use formic_adapter::{router, telemetry, AppState};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "formic_http", about = "Form entry collection service")]
struct Args {
    /// TOML config file. Defaults to ./formic.toml when present.
    #[arg(long, env = "FORMIC_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides the configured one.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut config = match FormicConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("formic_http: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    telemetry::init(config.log_format);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "formic_http stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: FormicConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bind = config.bind;
    let variant = config.variant;
    let state = tokio::task::spawn_blocking(move || AppState::from_config(&config)).await??;
    let app = router(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, variant = variant.as_str(), "formic_http listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
