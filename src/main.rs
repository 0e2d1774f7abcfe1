mod api;
mod cli;
mod config;
mod dashboard;
mod error;
mod export;
mod gate;
mod query;
mod range;
mod session;
mod workbook;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use crate::{
    api::AuditApi,
    cli::Cli,
    config::DashboardConfig,
    dashboard::AuditDashboard,
    export::ExportPipeline,
    gate::{HttpTransport, SessionGate},
    range::DateTimeRangeResolver,
    session::{ClientStorage, SessionContext},
};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenv().ok();
    init_tracing();

    if let Err(err) = app_main().await {
        error!(?err, "application error");
        std::process::exit(1);
    }
}

async fn app_main() -> Result<()> {
    let cli = Cli::parse();
    let config = DashboardConfig::from_env()?;
    debug!(storage = %config.storage_path.display(), "loading client storage");

    let storage = ClientStorage::load(&config.storage_path)?;
    let session = Arc::new(SessionContext::init(storage));
    let transport = HttpTransport::new(config.timeout).context("failed to build http client")?;
    let api = AuditApi::new(SessionGate::new(transport, session), config.endpoints);

    let mut dashboard = AuditDashboard::new(
        api,
        DateTimeRangeResolver::new(),
        ExportPipeline::new(config.download_dir),
    );
    cli::run(cli.command, &mut dashboard).await
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
