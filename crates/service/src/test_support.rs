//! Helpers and in-process fakes for the remote services the tiers talk to.
//! Each fake is a small axum app bound to an ephemeral localhost port.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use configs::EdgeConfigSettings;
use models::Registration;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::storage::edge_config::EdgeConfigError;
use crate::storage::{RegistrationBackend, StorageError, Tier};

pub fn registration(id: &str) -> Registration {
    Registration {
        registration_id: id.to_string(),
        first_name: "Test".into(),
        last_name: id.to_uppercase(),
        email: format!("{id}@example.com"),
        seder_night1: true,
        seder_night2: false,
        has_donated: false,
        donation_amount: "0.00".into(),
        stripe_session_id: None,
        registration_date: Some(Utc::now()),
        donation_date: None,
        extra: Default::default(),
    }
}

/// Unique file path under the OS temp dir.
pub fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join("seder-site-tests")
        .join(format!("{}-{}.json", name, uuid::Uuid::new_v4()))
}

/// Settings pointing both the read endpoint and the management API at `base_url`.
pub fn edge_settings(base_url: &str) -> EdgeConfigSettings {
    EdgeConfigSettings {
        enabled: true,
        connection_string: Some(format!("{base_url}/ecfg_test?token=read-token")),
        api_token: Some("api-token".into()),
        api_base_url: base_url.to_string(),
        base_delay_ms: 1,
        max_delay_ms: 5,
        timeout_secs: 5,
        ..EdgeConfigSettings::default()
    }
}

async fn serve(app: Router) -> anyhow::Result<String> {
    let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
    let addr: SocketAddr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("fake server error: {e}");
        }
    });
    Ok(format!("http://{}:{}", addr.ip(), addr.port()))
}

fn path_segments(uri: &Uri) -> Vec<String> {
    uri.path()
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ---------- Edge Config ----------

#[derive(Default)]
struct EdgeState {
    items: Mutex<HashMap<String, Value>>,
    fail_read_endpoint: AtomicBool,
    reject_size: AtomicBool,
    patches: AtomicUsize,
    read_hits: AtomicUsize,
}

/// Serves `GET /{id}/item/{key}` (read endpoint) plus the management
/// `GET /v1/edge-config/{id}/item/{key}` and `PATCH /v1/edge-config/{id}/items`.
pub struct FakeEdgeConfig {
    pub base_url: String,
    state: Arc<EdgeState>,
}

async fn edge_handler(State(s): State<Arc<EdgeState>>, method: Method, uri: Uri, body: Bytes) -> Response {
    let segs = path_segments(&uri);
    let segs: Vec<&str> = segs.iter().map(String::as_str).collect();
    match (method, segs.as_slice()) {
        (Method::GET, ["v1", "edge-config", _id, "item", key]) => {
            let items = s.items.lock().expect("edge items");
            match items.get(*key) {
                Some(v) => Json(json!({ "key": key, "value": v })).into_response(),
                None => StatusCode::NOT_FOUND.into_response(),
            }
        }
        (Method::PATCH, ["v1", "edge-config", _id, "items"]) => {
            s.patches.fetch_add(1, Ordering::SeqCst);
            if s.reject_size.load(Ordering::SeqCst) {
                return (StatusCode::BAD_REQUEST, "Edge Config size limit exceeded").into_response();
            }
            let parsed: Value = match serde_json::from_slice(&body) {
                Ok(v) => v,
                Err(_) => return StatusCode::BAD_REQUEST.into_response(),
            };
            let mut items = s.items.lock().expect("edge items");
            for item in parsed["items"].as_array().cloned().unwrap_or_default() {
                if let Some(key) = item["key"].as_str() {
                    items.insert(key.to_string(), item["value"].clone());
                }
            }
            Json(json!({ "status": "ok" })).into_response()
        }
        (Method::GET, [_id, "item", key]) => {
            s.read_hits.fetch_add(1, Ordering::SeqCst);
            if s.fail_read_endpoint.load(Ordering::SeqCst) {
                return (StatusCode::INTERNAL_SERVER_ERROR, "read endpoint down").into_response();
            }
            let items = s.items.lock().expect("edge items");
            match items.get(*key) {
                Some(v) => Json(v.clone()).into_response(),
                None => StatusCode::NOT_FOUND.into_response(),
            }
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

impl FakeEdgeConfig {
    pub async fn spawn() -> anyhow::Result<Self> {
        let state = Arc::new(EdgeState::default());
        let app = Router::new().fallback(edge_handler).with_state(state.clone());
        Ok(Self { base_url: serve(app).await?, state })
    }

    pub fn insert(&self, key: &str, value: Value) {
        self.state.items.lock().expect("edge items").insert(key.to_string(), value);
    }

    pub fn fail_read_endpoint(&self, on: bool) {
        self.state.fail_read_endpoint.store(on, Ordering::SeqCst);
    }

    pub fn reject_writes_for_size(&self, on: bool) {
        self.state.reject_size.store(on, Ordering::SeqCst);
    }

    pub fn patch_count(&self) -> usize {
        self.state.patches.load(Ordering::SeqCst)
    }

    pub fn read_endpoint_hits(&self) -> usize {
        self.state.read_hits.load(Ordering::SeqCst)
    }
}

// ---------- Blob ----------

#[derive(Clone)]
struct StoredBlob {
    pathname: String,
    url: String,
    uploaded_at: String,
    body: Vec<u8>,
}

struct BlobState {
    base_url: Mutex<String>,
    objects: Mutex<Vec<StoredBlob>>,
    seq: AtomicUsize,
    puts: AtomicUsize,
    fail_puts: AtomicBool,
    put_delay_ms: AtomicUsize,
}

/// Serves `PUT /{pathname}`, list `GET /?prefix=`, `GET /files/{pathname}`
/// and `POST /delete`. Uploads get a `-{n}` suffix before `.json`.
pub struct FakeBlob {
    pub base_url: String,
    state: Arc<BlobState>,
}

async fn blob_handler(State(s): State<Arc<BlobState>>, method: Method, uri: Uri, body: Bytes) -> Response {
    let path = uri.path().trim_start_matches('/').to_string();
    match method {
        Method::PUT if !path.is_empty() => {
            s.puts.fetch_add(1, Ordering::SeqCst);
            let delay = s.put_delay_ms.load(Ordering::SeqCst) as u64;
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if s.fail_puts.load(Ordering::SeqCst) {
                return (StatusCode::INTERNAL_SERVER_ERROR, "upload failed").into_response();
            }
            let n = s.seq.fetch_add(1, Ordering::SeqCst) + 1;
            let pathname = match path.strip_suffix(".json") {
                Some(stem) => format!("{stem}-{n}.json"),
                None => format!("{path}-{n}"),
            };
            let base = s.base_url.lock().expect("blob base").clone();
            let uploaded_at = Utc
                .with_ymd_and_hms(2025, 3, 1, 0, 0, 0)
                .single()
                .map(|t| t + chrono::Duration::seconds(n as i64))
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            let blob = StoredBlob {
                url: format!("{base}/files/{pathname}"),
                pathname,
                uploaded_at,
                body: body.to_vec(),
            };
            let resp = json!({ "url": blob.url, "pathname": blob.pathname });
            s.objects.lock().expect("blob objects").push(blob);
            Json(resp).into_response()
        }
        Method::GET if path.is_empty() => {
            let prefix = uri
                .query()
                .and_then(|q| {
                    q.split('&')
                        .find_map(|kv| kv.strip_prefix("prefix="))
                        .map(|v| v.replace("%2F", "/"))
                })
                .unwrap_or_default();
            let objects = s.objects.lock().expect("blob objects");
            let blobs: Vec<Value> = objects
                .iter()
                .filter(|b| b.pathname.starts_with(&prefix))
                .map(|b| {
                    json!({
                        "url": b.url,
                        "pathname": b.pathname,
                        "size": b.body.len(),
                        "uploadedAt": b.uploaded_at,
                    })
                })
                .collect();
            Json(json!({ "blobs": blobs, "hasMore": false })).into_response()
        }
        Method::GET if path.starts_with("files/") => {
            let pathname = &path["files/".len()..];
            let objects = s.objects.lock().expect("blob objects");
            match objects.iter().find(|b| b.pathname == pathname) {
                Some(b) => b.body.clone().into_response(),
                None => StatusCode::NOT_FOUND.into_response(),
            }
        }
        Method::POST if path == "delete" => {
            let urls: Vec<String> = serde_json::from_slice::<Value>(&body)
                .ok()
                .and_then(|v| serde_json::from_value(v["urls"].clone()).ok())
                .unwrap_or_default();
            s.objects.lock().expect("blob objects").retain(|b| !urls.contains(&b.url));
            Json(json!({})).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

impl FakeBlob {
    pub async fn spawn() -> anyhow::Result<Self> {
        let state = Arc::new(BlobState {
            base_url: Mutex::new(String::new()),
            objects: Mutex::new(Vec::new()),
            seq: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            fail_puts: AtomicBool::new(false),
            put_delay_ms: AtomicUsize::new(0),
        });
        let app = Router::new().fallback(blob_handler).with_state(state.clone());
        let base_url = serve(app).await?;
        *state.base_url.lock().expect("blob base") = base_url.clone();
        Ok(Self { base_url, state })
    }

    pub fn object_count(&self) -> usize {
        self.state.objects.lock().expect("blob objects").len()
    }

    pub fn put_count(&self) -> usize {
        self.state.puts.load(Ordering::SeqCst)
    }

    pub fn set_put_delay(&self, delay: Duration) {
        self.state.put_delay_ms.store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn fail_puts(&self, on: bool) {
        self.state.fail_puts.store(on, Ordering::SeqCst);
    }
}

// ---------- Stripe ----------

#[derive(Default)]
struct StripeState {
    forms: Mutex<Vec<HashMap<String, String>>>,
    auth: Mutex<Vec<String>>,
    fail: AtomicBool,
}

/// Serves `POST /v1/checkout/sessions` and records the submitted form.
pub struct FakeStripe {
    pub base_url: String,
    state: Arc<StripeState>,
}

async fn stripe_handler(
    State(s): State<Arc<StripeState>>,
    method: Method,
    uri: Uri,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Response {
    if method != Method::POST || uri.path() != "/v1/checkout/sessions" {
        return StatusCode::NOT_FOUND.into_response();
    }
    if s.fail.load(Ordering::SeqCst) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": { "message": "Invalid currency: xyz", "type": "invalid_request_error" } })),
        )
            .into_response();
    }
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        s.auth.lock().expect("stripe auth").push(auth.to_string());
    }
    let form: HashMap<String, String> = url_decode_form(&body);
    let n = {
        let mut forms = s.forms.lock().expect("stripe forms");
        forms.push(form);
        forms.len()
    };
    let id = format!("cs_test_{n}");
    Json(json!({
        "id": id,
        "object": "checkout.session",
        "url": format!("https://checkout.stripe.test/c/pay/{id}"),
    }))
    .into_response()
}

fn url_decode_form(body: &[u8]) -> HashMap<String, String> {
    reqwest::Url::parse(&format!("http://form.local/?{}", String::from_utf8_lossy(body)))
        .map(|u| u.query_pairs().into_owned().collect())
        .unwrap_or_default()
}

impl FakeStripe {
    pub async fn spawn() -> anyhow::Result<Self> {
        let state = Arc::new(StripeState::default());
        let app = Router::new().fallback(stripe_handler).with_state(state.clone());
        Ok(Self { base_url: serve(app).await?, state })
    }

    pub fn last_form(&self) -> Option<HashMap<String, String>> {
        self.state.forms.lock().expect("stripe forms").last().cloned()
    }

    pub fn last_auth(&self) -> Option<String> {
        self.state.auth.lock().expect("stripe auth").last().cloned()
    }

    pub fn fail_requests(&self, on: bool) {
        self.state.fail.store(on, Ordering::SeqCst);
    }
}

// ---------- In-memory tier ----------

/// A tier that keeps the collection in memory, with switchable failures.
pub struct MemoryBackend {
    tier: Tier,
    data: Mutex<Option<Vec<Registration>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    size_limit: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(tier: Tier) -> Arc<Self> {
        Arc::new(Self {
            tier,
            data: Mutex::new(None),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            size_limit: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        })
    }

    pub fn with_data(tier: Tier, data: Vec<Registration>) -> Arc<Self> {
        let backend = Self::new(tier);
        *backend.data.lock().expect("memory data") = Some(data);
        backend
    }

    pub fn fail_reads(&self, on: bool) {
        self.fail_reads.store(on, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn size_limit(&self, on: bool) {
        self.size_limit.store(on, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<Vec<Registration>> {
        self.data.lock().expect("memory data").clone()
    }
}

#[async_trait]
impl RegistrationBackend for MemoryBackend {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn load(&self) -> Result<Option<Vec<Registration>>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Local("injected read failure".into()));
        }
        Ok(self.data.lock().expect("memory data").clone())
    }

    async fn store(&self, registrations: &[Registration]) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.size_limit.load(Ordering::SeqCst) {
            return Err(EdgeConfigError::SizeLimit("injected size limit".into()).into());
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Local("injected write failure".into()));
        }
        *self.data.lock().expect("memory data") = Some(registrations.to_vec());
        Ok(())
    }
}
