//! tributary — run one reconciliation pass over every stored mapping.
//!
//! Scheduling is external (cron, systemd timer); each invocation is one
//! pass. The redb file lock makes overlapping invocations fail fast at
//! startup instead of racing.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use tributary::config::Config;
use tributary::credentials::RedbCredentialStore;
use tributary::mapping_db::MappingDb;
use tributary::service::spotify::SpotifyServiceFactory;
use tributary::sync::SyncEngine;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tributary=info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "reconciliation pass failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    let db_path = config.store.db_path()?;

    // redb holds an exclusive file lock; a second concurrent pass fails
    // here rather than partway through.
    let db = Arc::new(redb::Database::create(&db_path).with_context(|| {
        format!(
            "failed to open database at {} (another pass may be running)",
            db_path.display()
        )
    })?);

    let mappings = Arc::new(MappingDb::new(Arc::clone(&db))?);
    let credentials = Arc::new(RedbCredentialStore::new(Arc::clone(&db))?);
    let services = Arc::new(SpotifyServiceFactory::new(
        config.spotify.api_config(),
        credentials,
    ));

    let engine = SyncEngine::new(mappings, services);
    let summary = engine.run_pass().await?;

    if summary.failed > 0 {
        anyhow::bail!(
            "{} of {} mappings failed; see log for details",
            summary.failed,
            summary.applied + summary.unchanged + summary.pruned + summary.failed
        );
    }
    Ok(())
}
