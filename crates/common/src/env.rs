//! Environment/runtime helpers
//!
//! Sanity checks to ensure expected directories exist at startup.

use std::path::Path;

use tracing::{info, warn};

/// Ensure the data directory exists and warn when the local registration file is missing.
pub async fn ensure_env(data_dir: &str, local_file: &str) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create {data_dir}: {e}"))?;
    if let Some(parent) = Path::new(local_file).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| anyhow::anyhow!("cannot create {}: {e}", parent.display()))?;
        }
    }
    if tokio::fs::metadata(local_file).await.is_err() {
        warn!(%local_file, "local registration file not found; it will be created on first save");
    } else {
        info!(%local_file, "local registration file present");
    }
    Ok(())
}
