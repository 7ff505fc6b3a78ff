//! Edge Config client.
//!
//! Reads go to the low-latency read endpoint (`{edge}/{id}/item/{key}`) and
//! fall back to the management API (`{api}/v1/edge-config/{id}/item/{key}`).
//! Writes always use the management API (`PATCH .../items`).
//!
//! Client state machine:
//!
//! ```text
//! Uninitialized --init--> SdkReady | RawHttpReady | Failed
//! SdkReady --read endpoint failure, management token present--> RawHttpReady
//! any --reinit--> (init again)
//! ```

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use common::utils::retry::{retry_with_policy, RetryPolicy, Retryable};
use configs::EdgeConfigSettings;
use models::Registration;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{decode_collection, RegistrationBackend, StorageError, Tier};
use crate::observability::EDGE_CONFIG_DEGRADED_TOTAL;

#[derive(Debug, Error)]
pub enum EdgeConfigError {
    #[error("edge config not configured: {0}")]
    NotConfigured(String),
    #[error("edge config request failed: {0}")]
    Transport(String),
    #[error("edge config returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("edge config size limit exceeded: {0}")]
    SizeLimit(String),
    #[error("edge config response invalid: {0}")]
    Decode(String),
}

impl Retryable for EdgeConfigError {
    fn is_retryable(&self) -> bool {
        match self {
            EdgeConfigError::Transport(_) => true,
            EdgeConfigError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Map a non-success response to an error; size refusals get their own variant.
pub fn classify_http_error(status: u16, body: String) -> EdgeConfigError {
    let lower = body.to_lowercase();
    let mentions_size = lower.contains("too large")
        || (lower.contains("size") && (lower.contains("limit") || lower.contains("exceed")));
    if status == 413 || ((400..500).contains(&status) && mentions_size) {
        EdgeConfigError::SizeLimit(body)
    } else {
        EdgeConfigError::Http { status, body }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeCredentials {
    pub id: String,
    pub read_token: Option<String>,
    pub api_token: Option<String>,
    pub team_id: Option<String>,
    pub edge_base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    Uninitialized,
    SdkReady(EdgeCredentials),
    RawHttpReady(EdgeCredentials),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    Uninitialized,
    SdkReady,
    RawHttpReady,
    Failed,
}

impl ClientState {
    pub fn status(&self) -> ClientStatus {
        match self {
            ClientState::Uninitialized => ClientStatus::Uninitialized,
            ClientState::SdkReady(_) => ClientStatus::SdkReady,
            ClientState::RawHttpReady(_) => ClientStatus::RawHttpReady,
            ClientState::Failed(_) => ClientStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStrategy {
    ConnectionString,
    ExplicitCredentials,
    Minimal,
}

/// Split `https://edge-config.vercel.com/<id>?token=<t>` into (origin, id, token).
pub fn parse_connection_string(s: &str) -> Result<(String, String, String), String> {
    let url = Url::parse(s.trim()).map_err(|e| format!("invalid connection string: {e}"))?;
    let id = url
        .path_segments()
        .and_then(|segs| segs.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .ok_or_else(|| "connection string has no edge config id".to_string())?;
    let token = url
        .query_pairs()
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| "connection string has no token".to_string())?;
    Ok((url.origin().ascii_serialization(), id, token))
}

/// `base` with `segments` appended, each percent-encoded as one path segment.
pub fn endpoint(base: &str, segments: &[&str]) -> Result<Url, EdgeConfigError> {
    let mut url = Url::parse(base).map_err(|e| EdgeConfigError::NotConfigured(format!("invalid base url {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| EdgeConfigError::NotConfigured(format!("base url {base} cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Try the three initialization strategies in order.
pub fn resolve_state(settings: &EdgeConfigSettings) -> (Option<InitStrategy>, ClientState) {
    if let Some(cs) = &settings.connection_string {
        match parse_connection_string(cs) {
            Ok((origin, id, token)) => {
                let creds = EdgeCredentials {
                    id,
                    read_token: Some(token),
                    api_token: settings.api_token.clone(),
                    team_id: settings.team_id.clone(),
                    edge_base_url: origin,
                };
                return (Some(InitStrategy::ConnectionString), ClientState::SdkReady(creds));
            }
            Err(e) => warn!(error = %e, "edge config connection string rejected; trying explicit credentials"),
        }
    }

    if let (Some(id), Some(token)) = (&settings.id, &settings.read_token) {
        let creds = EdgeCredentials {
            id: id.clone(),
            read_token: Some(token.clone()),
            api_token: settings.api_token.clone(),
            team_id: settings.team_id.clone(),
            edge_base_url: settings.edge_base_url.clone(),
        };
        return (Some(InitStrategy::ExplicitCredentials), ClientState::SdkReady(creds));
    }

    if let (Some(id), Some(api_token)) = (&settings.id, &settings.api_token) {
        let creds = EdgeCredentials {
            id: id.clone(),
            read_token: None,
            api_token: Some(api_token.clone()),
            team_id: settings.team_id.clone(),
            edge_base_url: settings.edge_base_url.clone(),
        };
        return (Some(InitStrategy::Minimal), ClientState::RawHttpReady(creds));
    }

    (None, ClientState::Failed("no Edge Config credentials configured".into()))
}

pub struct EdgeConfigClient {
    http: reqwest::Client,
    settings: EdgeConfigSettings,
    state: ArcSwap<ClientState>,
    read_policy: RetryPolicy,
    write_policy: RetryPolicy,
}

impl EdgeConfigClient {
    pub fn new(settings: EdgeConfigSettings) -> Result<Self, EdgeConfigError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| EdgeConfigError::Transport(e.to_string()))?;
        let base = Duration::from_millis(settings.base_delay_ms);
        let max = Duration::from_millis(settings.max_delay_ms);
        Ok(Self {
            http,
            read_policy: RetryPolicy::new(settings.read_attempts, base, max, true),
            write_policy: RetryPolicy::new(settings.write_attempts, base, max, true),
            settings,
            state: ArcSwap::from_pointee(ClientState::Uninitialized),
        })
    }

    pub fn status(&self) -> ClientStatus {
        self.state.load().status()
    }

    /// Run the init strategies; a no-op unless the client is uninitialized.
    pub fn init(&self) -> ClientStatus {
        if self.status() != ClientStatus::Uninitialized {
            return self.status();
        }
        self.reinit()
    }

    /// Re-run the init strategies; the only way back to `SdkReady` after a degrade.
    pub fn reinit(&self) -> ClientStatus {
        let (strategy, state) = resolve_state(&self.settings);
        match (&strategy, &state) {
            (Some(s), _) => info!(strategy = ?s, status = ?state.status(), "edge config client initialized"),
            (None, ClientState::Failed(reason)) => warn!(%reason, "edge config client unavailable"),
            _ => {}
        }
        self.state.store(Arc::new(state));
        self.status()
    }

    fn current(&self) -> Arc<ClientState> {
        if self.status() == ClientStatus::Uninitialized {
            self.init();
        }
        self.state.load_full()
    }

    fn with_team(&self, req: reqwest::RequestBuilder, creds: &EdgeCredentials) -> reqwest::RequestBuilder {
        match &creds.team_id {
            Some(team) => req.query(&[("teamId", team.as_str())]),
            None => req,
        }
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        not_found_is_empty: bool,
    ) -> Result<Option<Value>, EdgeConfigError> {
        let resp = req.send().await.map_err(|e| EdgeConfigError::Transport(e.to_string()))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND && not_found_is_empty {
            return Ok(None);
        }
        let body = resp.text().await.map_err(|e| EdgeConfigError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(classify_http_error(status.as_u16(), body));
        }
        if body.trim().is_empty() {
            return Ok(Some(Value::Null));
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| EdgeConfigError::Decode(e.to_string()))
    }

    async fn read_endpoint_once(&self, creds: &EdgeCredentials, key: &str) -> Result<Option<Value>, EdgeConfigError> {
        let token = creds
            .read_token
            .as_deref()
            .ok_or_else(|| EdgeConfigError::NotConfigured("read token missing".into()))?;
        let url = endpoint(&creds.edge_base_url, &[&creds.id, "item", key])?;
        let req = self.http.get(url).query(&[("version", "1")]).bearer_auth(token);
        self.send(req, true).await
    }

    async fn management_read_once(&self, creds: &EdgeCredentials, key: &str) -> Result<Option<Value>, EdgeConfigError> {
        let token = creds
            .api_token
            .as_deref()
            .ok_or_else(|| EdgeConfigError::NotConfigured("management API token missing".into()))?;
        let url = endpoint(&self.settings.api_base_url, &["v1", "edge-config", &creds.id, "item", key])?;
        let req = self.with_team(self.http.get(url), creds).bearer_auth(token);
        let item = self.send(req, true).await?;
        // the management API wraps the value in an item object
        Ok(item.map(|mut v| v.get_mut("value").map(Value::take).unwrap_or(Value::Null)))
    }

    async fn management_write_once(&self, creds: &EdgeCredentials, key: &str, value: &Value) -> Result<(), EdgeConfigError> {
        let token = creds
            .api_token
            .as_deref()
            .ok_or_else(|| EdgeConfigError::NotConfigured("writes need a management API token".into()))?;
        let url = endpoint(&self.settings.api_base_url, &["v1", "edge-config", &creds.id, "items"])?;
        let body = json!({ "items": [{ "operation": "upsert", "key": key, "value": value }] });
        let req = self.with_team(self.http.patch(url), creds).bearer_auth(token).json(&body);
        self.send(req, false).await?;
        Ok(())
    }

    /// Read `key`; `Ok(None)` when the item does not exist.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, EdgeConfigError> {
        let state = self.current();
        match state.as_ref() {
            ClientState::SdkReady(creds) => {
                let first = retry_with_policy(&self.read_policy, "edge_config_read", || {
                    self.read_endpoint_once(creds, key)
                })
                .await;
                match first {
                    Ok(v) => Ok(v),
                    Err(e) if creds.api_token.is_some() && !matches!(e, EdgeConfigError::SizeLimit(_)) => {
                        warn!(error = %e, "edge config read endpoint failed; degrading to management API");
                        EDGE_CONFIG_DEGRADED_TOTAL.inc();
                        self.state.store(Arc::new(ClientState::RawHttpReady(creds.clone())));
                        retry_with_policy(&self.read_policy, "edge_config_management_read", || {
                            self.management_read_once(creds, key)
                        })
                        .await
                    }
                    Err(e) => Err(e),
                }
            }
            ClientState::RawHttpReady(creds) => {
                retry_with_policy(&self.read_policy, "edge_config_management_read", || {
                    self.management_read_once(creds, key)
                })
                .await
            }
            ClientState::Failed(reason) => Err(EdgeConfigError::NotConfigured(reason.clone())),
            ClientState::Uninitialized => Err(EdgeConfigError::NotConfigured("client not initialized".into())),
        }
    }

    /// Upsert `key` with `value`.
    pub async fn set(&self, key: &str, value: &Value) -> Result<(), EdgeConfigError> {
        let state = self.current();
        match state.as_ref() {
            ClientState::SdkReady(creds) | ClientState::RawHttpReady(creds) => {
                retry_with_policy(&self.write_policy, "edge_config_write", || {
                    self.management_write_once(creds, key, value)
                })
                .await?;
                debug!(%key, "edge config item written");
                Ok(())
            }
            ClientState::Failed(reason) => Err(EdgeConfigError::NotConfigured(reason.clone())),
            ClientState::Uninitialized => Err(EdgeConfigError::NotConfigured("client not initialized".into())),
        }
    }
}

/// Edge Config tier: the collection lives under one item key.
pub struct EdgeConfigStore {
    client: Arc<EdgeConfigClient>,
    key: String,
}

impl EdgeConfigStore {
    pub fn new(client: Arc<EdgeConfigClient>, key: impl Into<String>) -> Self {
        Self { client, key: key.into() }
    }
}

#[async_trait]
impl RegistrationBackend for EdgeConfigStore {
    fn tier(&self) -> Tier { Tier::EdgeConfig }

    async fn load(&self) -> Result<Option<Vec<Registration>>, StorageError> {
        match self.client.get(&self.key).await? {
            Some(value) => decode_collection(value).map(Some),
            None => Ok(None),
        }
    }

    async fn store(&self, registrations: &[Registration]) -> Result<(), StorageError> {
        let value = serde_json::to_value(registrations).map_err(|e| StorageError::Decode(e.to_string()))?;
        self.client.set(&self.key, &value).await?;
        Ok(())
    }
}
