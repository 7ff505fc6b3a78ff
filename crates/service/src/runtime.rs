//! Runtime environment helpers
//!
//! Thin wrapper around `common::env` to keep binary crates importing
//! `service::runtime::ensure_env` without depending directly on `common`.

/// Ensure the data directory exists; warn when the local registration file is missing.
pub async fn ensure_env(data_dir: &str, local_file: &str) -> anyhow::Result<()> {
    common::env::ensure_env(data_dir, local_file).await
}
