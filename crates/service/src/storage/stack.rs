use std::sync::Arc;
use std::time::Duration;

use configs::AppConfig;
use serde::Serialize;
use tracing::{info, warn};

use super::blob::{BlobMirror, BlobStatus};
use super::edge_config::{ClientStatus, EdgeConfigClient, EdgeConfigStore};
use super::facade::StorageFacade;
use super::health::{TierHealth, TierHealthSnapshot};
use super::local_file::LocalFileStore;
use super::{RegistrationBackend, Tier};

/// Operator view of the storage layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageStatus {
    pub tiers: Vec<Tier>,
    pub health: Vec<TierHealthSnapshot>,
    pub edge_config: Option<ClientStatus>,
    pub blob: Option<BlobStatus>,
    pub local_file: String,
}

/// Everything the storage layer owns, wired from configuration.
#[derive(Clone)]
pub struct StorageStack {
    pub facade: Arc<StorageFacade>,
    pub local: Arc<LocalFileStore>,
    pub blob: Option<Arc<BlobMirror>>,
    pub edge: Option<Arc<EdgeConfigClient>>,
}

impl StorageStack {
    /// Build the tiers. Edge Config joins only when enabled and its
    /// credentials resolve; Blob only when enabled with a token.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let local = Arc::new(LocalFileStore::new(&cfg.storage.local_file));
        let mut backends: Vec<Arc<dyn RegistrationBackend>> = vec![local.clone() as Arc<dyn RegistrationBackend>];

        let edge = if cfg.edge_config.enabled {
            let client = Arc::new(EdgeConfigClient::new(cfg.edge_config.clone())?);
            match client.init() {
                ClientStatus::Failed => {
                    warn!("edge config tier disabled: no usable credentials");
                    None
                }
                status => {
                    info!(?status, key = %cfg.storage.registrations_key, "edge config tier enabled");
                    backends.push(Arc::new(EdgeConfigStore::new(
                        client.clone(),
                        cfg.storage.registrations_key.clone(),
                    )));
                    Some(client)
                }
            }
        } else {
            None
        };

        let blob = if cfg.blob.enabled {
            let http = reqwest::Client::builder()
                .timeout(Duration::from_secs(cfg.edge_config.timeout_secs.max(1) * 3))
                .build()?;
            let mirror = Arc::new(BlobMirror::from_config(&cfg.blob, http, local.clone())?);
            info!(prefix = %cfg.blob.pathname_prefix, "blob mirror tier enabled");
            backends.push(mirror.clone());
            Some(mirror)
        } else {
            None
        };

        let health = Arc::new(TierHealth::new(cfg.storage.failure_threshold));
        Ok(Self {
            facade: Arc::new(StorageFacade::new(backends, health)),
            local,
            blob,
            edge,
        })
    }

    /// Local file only; used when no remote tier is wanted.
    pub fn local_only(local: LocalFileStore, failure_threshold: u32) -> Self {
        let local = Arc::new(local);
        let backends: Vec<Arc<dyn RegistrationBackend>> = vec![local.clone() as Arc<dyn RegistrationBackend>];
        Self {
            facade: Arc::new(StorageFacade::new(backends, Arc::new(TierHealth::new(failure_threshold)))),
            local,
            blob: None,
            edge: None,
        }
    }

    pub async fn status(&self) -> StorageStatus {
        let blob = match &self.blob {
            Some(b) => Some(b.status().await),
            None => None,
        };
        StorageStatus {
            tiers: self.facade.tiers(),
            health: self.facade.health_snapshot().await,
            edge_config: self.edge.as_ref().map(|e| e.status()),
            blob,
            local_file: self.local.path().display().to_string(),
        }
    }

    /// Clear tier health and re-run Edge Config initialization.
    pub async fn reset(&self) {
        self.facade.reset_health().await;
        if let Some(edge) = &self.edge {
            let status = edge.reinit();
            info!(?status, "edge config client reinitialized");
        }
    }
}
