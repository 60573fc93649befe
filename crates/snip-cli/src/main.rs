mod cli;
mod commands;
mod telemetry;

use crate::cli::Cli;
use clap::Parser;
use snip_core::Store;
use snip_storage::{normalize_base_url, open_store, redact_dsn};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse();
    telemetry::init(config.log_format);

    let store_config = config.store_config();
    let base_url = normalize_base_url(&config.base_url);

    info!(
        base_url = %base_url,
        log_format = %config.log_format,
        backend = %store_config.backend(),
        file_storage_path = ?store_config.file_storage_path,
        database_dsn = ?store_config.postgres.as_ref().map(|pg| redact_dsn(&pg.dsn)),
        "Initializing storage"
    );

    let store = open_store(&store_config).await?;
    let outcome = commands::run(config.command, &store, &base_url, &mut std::io::stdout()).await;

    if let Err(e) = store.close().await {
        error!(error = %e, "Failed to close storage");
    }

    outcome
}
