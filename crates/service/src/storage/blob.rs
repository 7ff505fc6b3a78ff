//! Blob mirror of the registration collection.
//!
//! Every upload gets a random suffix from the blob service, so the current
//! object is discovered by listing the pathname prefix and taking the newest
//! `uploadedAt`. The discovered pointer is cached until a fetch misses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::utils::retry::{retry_with_policy, RetryPolicy, Retryable};
use configs::BlobConfig;
use models::Registration;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::local_file::LocalFileStore;
use super::{decode_collection, RegistrationBackend, StorageError, Tier};
use crate::observability::BLOB_SYNCS_TOTAL;

const BLOB_API_VERSION: &str = "7";

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob storage not configured")]
    NotConfigured,
    #[error("blob request failed: {0}")]
    Transport(String),
    #[error("blob service returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("blob response invalid: {0}")]
    Decode(String),
    #[error("local source unavailable: {0}")]
    Source(String),
}

impl Retryable for BlobError {
    fn is_retryable(&self) -> bool {
        match self {
            BlobError::Transport(_) => true,
            BlobError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Result of an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobObject {
    pub url: String,
    pub pathname: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobListItem {
    pub url: String,
    pub pathname: String,
    #[serde(default)]
    pub size: u64,
    pub uploaded_at: String,
}

impl BlobListItem {
    fn uploaded(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.uploaded_at).ok().map(|d| d.with_timezone(&Utc))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobListResponse {
    #[serde(default)]
    blobs: Vec<BlobListItem>,
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    has_more: bool,
}

/// Newest object whose pathname starts with `prefix`.
pub fn latest_matching<'a>(items: &'a [BlobListItem], prefix: &str) -> Option<&'a BlobListItem> {
    items
        .iter()
        .filter(|b| b.pathname.starts_with(prefix))
        .max_by(|a, b| match (a.uploaded(), b.uploaded()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => a.uploaded_at.cmp(&b.uploaded_at),
        })
}

/// Thin HTTP client for the blob API.
#[derive(Clone)]
pub struct BlobClient {
    http: reqwest::Client,
    api_base_url: String,
    token: String,
}

impl BlobClient {
    pub fn new(http: reqwest::Client, api_base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, BlobError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(BlobError::Http { status: status.as_u16(), body })
    }

    pub async fn put_json(&self, pathname: &str, body: Vec<u8>) -> Result<BlobObject, BlobError> {
        let resp = self
            .http
            .put(format!("{}/{}", self.api_base_url, pathname))
            .bearer_auth(&self.token)
            .header("x-api-version", BLOB_API_VERSION)
            .header("x-content-type", "application/json")
            .header("x-add-random-suffix", "1")
            .body(body)
            .send()
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))?;
        Self::check(resp)
            .await?
            .json::<BlobObject>()
            .await
            .map_err(|e| BlobError::Decode(e.to_string()))
    }

    /// All objects under `prefix`, following pagination cursors.
    pub async fn list(&self, prefix: &str) -> Result<Vec<BlobListItem>, BlobError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut query = vec![("prefix", prefix.to_string()), ("limit", "1000".to_string())];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }
            let resp = self
                .http
                .get(&self.api_base_url)
                .bearer_auth(&self.token)
                .header("x-api-version", BLOB_API_VERSION)
                .query(&query)
                .send()
                .await
                .map_err(|e| BlobError::Transport(e.to_string()))?;
            let page: BlobListResponse = Self::check(resp)
                .await?
                .json()
                .await
                .map_err(|e| BlobError::Decode(e.to_string()))?;
            items.extend(page.blobs);
            match (page.has_more, page.cursor) {
                (true, Some(c)) => cursor = Some(c),
                _ => break,
            }
        }
        Ok(items)
    }

    /// Fetch an object body; `Ok(None)` on 404.
    pub async fn fetch(&self, url: &str) -> Result<Option<Vec<u8>>, BlobError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = Self::check(resp)
            .await?
            .bytes()
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))?;
        Ok(Some(bytes.to_vec()))
    }

    pub async fn delete(&self, urls: &[String]) -> Result<(), BlobError> {
        if urls.is_empty() {
            return Ok(());
        }
        let resp = self
            .http
            .post(format!("{}/delete", self.api_base_url))
            .bearer_auth(&self.token)
            .header("x-api-version", BLOB_API_VERSION)
            .json(&serde_json::json!({ "urls": urls }))
            .send()
            .await
            .map_err(|e| BlobError::Transport(e.to_string()))?;
        Self::check(resp).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum SyncOutcome {
    Synced { count: usize, pathname: String },
    NotDue,
    InProgress,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobStatus {
    pub current_pathname: Option<String>,
    pub sync_in_progress: bool,
    pub seconds_since_last_sync: Option<u64>,
    pub sync_interval_secs: u64,
}

/// Clears the reentrancy flag when the sync finishes, even on error.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct BlobMirror {
    client: BlobClient,
    prefix: String,
    sync_interval: Duration,
    local: Arc<LocalFileStore>,
    policy: RetryPolicy,
    sync_in_progress: AtomicBool,
    last_sync: Mutex<Option<Instant>>,
    current: ArcSwapOption<BlobObject>,
}

impl BlobMirror {
    pub fn new(client: BlobClient, prefix: impl Into<String>, sync_interval: Duration, local: Arc<LocalFileStore>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            sync_interval,
            local,
            policy: RetryPolicy::new(3, Duration::from_millis(200), Duration::from_secs(2), true),
            sync_in_progress: AtomicBool::new(false),
            last_sync: Mutex::new(None),
            current: ArcSwapOption::empty(),
        }
    }

    pub fn from_config(
        cfg: &BlobConfig,
        http: reqwest::Client,
        local: Arc<LocalFileStore>,
    ) -> Result<Self, BlobError> {
        let token = cfg.token.clone().filter(|t| !t.trim().is_empty()).ok_or(BlobError::NotConfigured)?;
        let client = BlobClient::new(http, cfg.api_base_url.clone(), token);
        Ok(Self::new(client, cfg.pathname_prefix.clone(), Duration::from_secs(cfg.sync_interval_secs), local))
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn upload_pathname(&self) -> String {
        format!("{}.json", self.prefix)
    }

    pub fn current_pointer(&self) -> Option<BlobObject> {
        self.current.load_full().map(|p| p.as_ref().clone())
    }

    /// Upload the collection and make it the current pointer. Older objects
    /// under the prefix are pruned best-effort.
    pub async fn save_registrations_to_blob(&self, registrations: &[Registration]) -> Result<BlobObject, BlobError> {
        let body = serde_json::to_vec(registrations).map_err(|e| BlobError::Decode(e.to_string()))?;
        let pathname = self.upload_pathname();
        let object = retry_with_policy(&self.policy, "blob_put", || self.client.put_json(&pathname, body.clone())).await?;
        info!(pathname = %object.pathname, count = registrations.len(), "registrations mirrored to blob");
        self.current.store(Some(Arc::new(object.clone())));
        *self.last_sync.lock().await = Some(Instant::now());

        if let Err(e) = self.prune_except(&object).await {
            warn!(error = %e, "pruning old registration blobs failed");
        }
        Ok(object)
    }

    async fn prune_except(&self, keep: &BlobObject) -> Result<(), BlobError> {
        let stale: Vec<String> = self
            .client
            .list(&self.prefix)
            .await?
            .into_iter()
            .filter(|b| b.pathname.starts_with(&self.prefix) && b.pathname != keep.pathname)
            .map(|b| b.url)
            .collect();
        if !stale.is_empty() {
            debug!(count = stale.len(), "deleting stale registration blobs");
            self.client.delete(&stale).await?;
        }
        Ok(())
    }

    async fn discover(&self) -> Result<Option<BlobObject>, BlobError> {
        let items = retry_with_policy(&self.policy, "blob_list", || self.client.list(&self.prefix)).await?;
        let found = latest_matching(&items, &self.prefix).map(|b| BlobObject {
            url: b.url.clone(),
            pathname: b.pathname.clone(),
        });
        if let Some(obj) = &found {
            debug!(pathname = %obj.pathname, "discovered current registration blob");
            self.current.store(Some(Arc::new(obj.clone())));
        }
        Ok(found)
    }

    /// Load the mirrored collection; `Ok(None)` when nothing was uploaded yet.
    pub async fn get_registrations_from_blob(&self) -> Result<Option<Vec<Registration>>, BlobError> {
        if let Some(pointer) = self.current_pointer() {
            let url = pointer.url.clone();
            match retry_with_policy(&self.policy, "blob_fetch", || self.client.fetch(&url)).await? {
                Some(bytes) => return decode(&bytes).map(Some),
                None => {
                    debug!(pathname = %pointer.pathname, "cached blob pointer is stale");
                    self.current.store(None);
                }
            }
        }
        let Some(object) = self.discover().await? else {
            return Ok(None);
        };
        match retry_with_policy(&self.policy, "blob_fetch", || self.client.fetch(&object.url)).await? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Mirror `registrations` (or the local file when `None`).
    ///
    /// Without `force`, a sync within `sync_interval` of the previous upload
    /// is skipped. Concurrent calls never upload twice: the loser returns
    /// [`SyncOutcome::InProgress`].
    pub async fn sync_registrations_to_blob(
        &self,
        registrations: Option<Vec<Registration>>,
        force: bool,
    ) -> Result<SyncOutcome, BlobError> {
        if self
            .sync_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            BLOB_SYNCS_TOTAL.with_label_values(&["in_progress"]).inc();
            return Ok(SyncOutcome::InProgress);
        }
        let _guard = SyncGuard(&self.sync_in_progress);

        if !force {
            if let Some(last) = *self.last_sync.lock().await {
                if last.elapsed() < self.sync_interval {
                    BLOB_SYNCS_TOTAL.with_label_values(&["not_due"]).inc();
                    return Ok(SyncOutcome::NotDue);
                }
            }
        }

        let registrations = match registrations {
            Some(r) => r,
            None => self
                .local
                .read()
                .await
                .map_err(|e| BlobError::Source(e.to_string()))?
                .unwrap_or_default(),
        };
        match self.save_registrations_to_blob(&registrations).await {
            Ok(object) => {
                BLOB_SYNCS_TOTAL.with_label_values(&["synced"]).inc();
                Ok(SyncOutcome::Synced { count: registrations.len(), pathname: object.pathname })
            }
            Err(e) => {
                BLOB_SYNCS_TOTAL.with_label_values(&["error"]).inc();
                Err(e)
            }
        }
    }

    /// Mirror the local file every `every`, subject to the sync gate.
    ///
    /// The first tick is skipped. A missing local file is never uploaded.
    pub fn spawn_periodic_sync(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(Duration::from_millis(10)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let registrations = match self.local.read().await {
                    Ok(Some(r)) => r,
                    Ok(None) => {
                        debug!("no local registrations yet; blob sync skipped");
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "local registrations unreadable; blob sync skipped");
                        continue;
                    }
                };
                match self.sync_registrations_to_blob(Some(registrations), false).await {
                    Ok(outcome) => debug!(?outcome, "background blob sync"),
                    Err(e) => warn!(error = %e, event = "blob_sync_failed", "background blob sync failed"),
                }
            }
        })
    }

    pub async fn status(&self) -> BlobStatus {
        let last = *self.last_sync.lock().await;
        BlobStatus {
            current_pathname: self.current_pointer().map(|p| p.pathname),
            sync_in_progress: self.sync_in_progress.load(Ordering::Acquire),
            seconds_since_last_sync: last.map(|l| l.elapsed().as_secs()),
            sync_interval_secs: self.sync_interval.as_secs(),
        }
    }
}

fn decode(bytes: &[u8]) -> Result<Vec<Registration>, BlobError> {
    let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|e| BlobError::Decode(e.to_string()))?;
    decode_collection(value).map_err(|e| BlobError::Decode(e.to_string()))
}

#[async_trait]
impl RegistrationBackend for BlobMirror {
    fn tier(&self) -> Tier { Tier::Blob }

    async fn load(&self) -> Result<Option<Vec<Registration>>, StorageError> {
        Ok(self.get_registrations_from_blob().await?)
    }

    async fn store(&self, registrations: &[Registration]) -> Result<(), StorageError> {
        self.save_registrations_to_blob(registrations).await?;
        Ok(())
    }
}
