use anyhow::anyhow;
use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub edge_config: EdgeConfigSettings,
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub stripe: StripeConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub worker_threads: Option<usize>,
    /// Public origin used to build Stripe success/cancel URLs.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            worker_threads: Some(4),
            public_base_url: default_public_base_url(),
        }
    }
}

fn default_public_base_url() -> String { "http://localhost:3000".into() }

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_local_file")]
    pub local_file: String,
    /// Key under which the whole registration array is stored in Edge Config.
    #[serde(default = "default_registrations_key")]
    pub registrations_key: String,
    /// Consecutive Edge Config failures after which reads bypass it.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            local_file: default_local_file(),
            registrations_key: default_registrations_key(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

fn default_data_dir() -> String { "data".into() }
fn default_local_file() -> String { "data/passover-registrations.json".into() }
fn default_registrations_key() -> String { "passover_registrations".into() }
fn default_failure_threshold() -> u32 { 3 }

#[derive(Debug, Clone, Deserialize)]
pub struct EdgeConfigSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// `https://edge-config.vercel.com/<id>?token=<read token>`
    #[serde(default)]
    pub connection_string: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub read_token: Option<String>,
    /// Management API token, required for writes.
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default = "default_edge_base_url")]
    pub edge_base_url: String,
    #[serde(default = "default_vercel_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_read_attempts")]
    pub read_attempts: u32,
    #[serde(default = "default_write_attempts")]
    pub write_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EdgeConfigSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            connection_string: None,
            id: None,
            read_token: None,
            api_token: None,
            team_id: None,
            edge_base_url: default_edge_base_url(),
            api_base_url: default_vercel_api_base_url(),
            read_attempts: default_read_attempts(),
            write_attempts: default_write_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_true() -> bool { true }
fn default_edge_base_url() -> String { "https://edge-config.vercel.com".into() }
fn default_vercel_api_base_url() -> String { "https://api.vercel.com".into() }
fn default_read_attempts() -> u32 { 3 }
fn default_write_attempts() -> u32 { 5 }
fn default_base_delay_ms() -> u64 { 200 }
fn default_max_delay_ms() -> u64 { 5000 }
fn default_timeout_secs() -> u64 { 10 }

#[derive(Debug, Clone, Deserialize)]
pub struct BlobConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_blob_api_base_url")]
    pub api_base_url: String,
    /// The service appends a random suffix after this prefix on every upload.
    #[serde(default = "default_pathname_prefix")]
    pub pathname_prefix: String,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            api_base_url: default_blob_api_base_url(),
            pathname_prefix: default_pathname_prefix(),
            sync_interval_secs: default_sync_interval_secs(),
        }
    }
}

fn default_blob_api_base_url() -> String { "https://blob.vercel-storage.com".into() }
fn default_pathname_prefix() -> String { "registrations/passover-registrations".into() }
fn default_sync_interval_secs() -> u64 { 300 }

#[derive(Debug, Clone, Deserialize)]
pub struct StripeConfig {
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_stripe_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_success_path")]
    pub success_path: String,
    #[serde(default = "default_cancel_path")]
    pub cancel_path: String,
    #[serde(default = "default_product_name")]
    pub product_name: String,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            webhook_secret: None,
            api_base_url: default_stripe_api_base_url(),
            currency: default_currency(),
            success_path: default_success_path(),
            cancel_path: default_cancel_path(),
            product_name: default_product_name(),
        }
    }
}

fn default_stripe_api_base_url() -> String { "https://api.stripe.com".into() }
fn default_currency() -> String { "usd".into() }
fn default_success_path() -> String { "/donation-success?session_id={CHECKOUT_SESSION_ID}".into() }
fn default_cancel_path() -> String { "/donate".into() }
fn default_product_name() -> String { "Passover Seder Donation".into() }

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdminConfig {
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub addr: Option<String>,
}

pub fn load_default() -> Result<AppConfig> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    load_from_file(&path)
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let cfg: AppConfig = toml::from_str(&content)?;
    Ok(cfg)
}

impl AppConfig {
    /// File (if present) → environment overrides → validation.
    pub fn load_and_validate() -> Result<Self> {
        let mut cfg = match load_default() {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = %e, "config file not loaded; using defaults and environment");
                AppConfig::default()
            }
        };
        cfg.apply_env_with(|k| std::env::var(k).ok());
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    /// Overlay environment values; `lookup` makes this testable without touching the process env.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());

        if let Some(h) = get("SERVER_HOST") { self.server.host = h; }
        if let Some(p) = get("SERVER_PORT").and_then(|p| p.parse::<u16>().ok()) { self.server.port = p; }
        if let Some(u) = get("PUBLIC_BASE_URL") { self.server.public_base_url = u; }
        if let Some(d) = get("DATA_DIR") {
            self.storage.local_file = format!("{}/passover-registrations.json", d.trim_end_matches('/'));
            self.storage.data_dir = d;
        }

        if let Some(c) = get("EDGE_CONFIG") { self.edge_config.connection_string = Some(c); }
        if let Some(id) = get("EDGE_CONFIG_ID") { self.edge_config.id = Some(id); }
        if let Some(t) = get("EDGE_CONFIG_TOKEN") { self.edge_config.read_token = Some(t); }
        if let Some(t) = get("VERCEL_API_TOKEN") { self.edge_config.api_token = Some(t); }
        if let Some(t) = get("VERCEL_TEAM_ID") { self.edge_config.team_id = Some(t); }

        if let Some(t) = get("BLOB_READ_WRITE_TOKEN") {
            self.blob.token = Some(t);
            self.blob.enabled = true;
        }

        if let Some(k) = get("STRIPE_SECRET_KEY") { self.stripe.secret_key = Some(k); }
        if let Some(s) = get("STRIPE_WEBHOOK_SECRET") { self.stripe.webhook_secret = Some(s); }

        if let Some(t) = get("ADMIN_TOKEN") { self.admin.token = Some(t); }
        if let Some(a) = get("METRICS_ADDR") { self.metrics.addr = Some(a); }
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.server.normalize()?;
        self.storage.validate()?;
        self.edge_config.normalize();
        self.edge_config.validate()?;
        self.blob.validate()?;
        Ok(())
    }
}

impl ServerConfig {
    fn normalize(&mut self) -> Result<()> {
        if self.host.trim().is_empty() {
            self.host = "127.0.0.1".to_string();
        }
        if self.port == 0 {
            return Err(anyhow!("server.port must be within 1..=65535"));
        }
        match self.worker_threads {
            Some(0) | None => self.worker_threads = Some(4),
            Some(_) => {}
        }
        self.public_base_url = self.public_base_url.trim_end_matches('/').to_string();
        Ok(())
    }
}

impl StorageConfig {
    fn validate(&self) -> Result<()> {
        if self.local_file.trim().is_empty() {
            return Err(anyhow!("storage.local_file must not be empty"));
        }
        if self.registrations_key.trim().is_empty() {
            return Err(anyhow!("storage.registrations_key must not be empty"));
        }
        if self.failure_threshold == 0 {
            return Err(anyhow!("storage.failure_threshold must be >= 1"));
        }
        Ok(())
    }
}

impl EdgeConfigSettings {
    fn normalize(&mut self) {
        for v in [&mut self.connection_string, &mut self.id, &mut self.read_token, &mut self.api_token, &mut self.team_id] {
            if v.as_deref().map(|s| s.trim().is_empty()).unwrap_or(false) {
                *v = None;
            }
        }
        self.edge_base_url = self.edge_base_url.trim_end_matches('/').to_string();
        self.api_base_url = self.api_base_url.trim_end_matches('/').to_string();
    }

    fn validate(&self) -> Result<()> {
        if self.read_attempts == 0 || self.write_attempts == 0 {
            return Err(anyhow!("edge_config attempts must be >= 1"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("edge_config.timeout_secs must be >= 1"));
        }
        Ok(())
    }
}

impl BlobConfig {
    fn validate(&self) -> Result<()> {
        if self.enabled && self.token.as_deref().map(|t| t.trim().is_empty()).unwrap_or(true) {
            return Err(anyhow!("blob.enabled requires blob.token or BLOB_READ_WRITE_TOKEN"));
        }
        if self.pathname_prefix.trim().is_empty() {
            return Err(anyhow!("blob.pathname_prefix must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parses_partial_toml_with_defaults() {
        let cfg: AppConfig = toml::from_str(
            r#"
            [server]
            host = "0.0.0.0"
            port = 8080

            [storage]
            failure_threshold = 5

            [blob]
            enabled = true
            token = "vercel_blob_rw_x"
            sync_interval_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.storage.failure_threshold, 5);
        assert_eq!(cfg.storage.registrations_key, "passover_registrations");
        assert_eq!(cfg.edge_config.read_attempts, 3);
        assert_eq!(cfg.edge_config.write_attempts, 5);
        assert!(cfg.blob.enabled);
        assert_eq!(cfg.blob.sync_interval_secs, 60);
    }

    #[test]
    fn env_overrides_apply_and_enable_blob() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SERVER_PORT", "4000"),
            ("EDGE_CONFIG", "https://edge-config.vercel.com/ecfg_1?token=t"),
            ("BLOB_READ_WRITE_TOKEN", "rw"),
            ("ADMIN_TOKEN", "secret"),
            ("VERCEL_TEAM_ID", "  "),
        ]);
        let mut cfg = AppConfig::default();
        cfg.apply_env_with(|k| env.get(k).map(|v| v.to_string()));
        cfg.normalize_and_validate().unwrap();
        assert_eq!(cfg.server.port, 4000);
        assert!(cfg.blob.enabled);
        assert_eq!(cfg.admin.token.as_deref(), Some("secret"));
        assert!(cfg.edge_config.connection_string.is_some());
        assert!(cfg.edge_config.team_id.is_none());
    }

    #[test]
    fn rejects_enabled_blob_without_token() {
        let mut cfg = AppConfig::default();
        cfg.blob.enabled = true;
        assert!(cfg.normalize_and_validate().is_err());
    }

    #[test]
    fn rejects_zero_threshold() {
        let mut cfg = AppConfig::default();
        cfg.storage.failure_threshold = 0;
        assert!(cfg.normalize_and_validate().is_err());
    }

    #[test]
    fn example_config_parses_and_validates() {
        let mut cfg: AppConfig = toml::from_str(include_str!("../../../config.example.toml")).unwrap();
        cfg.normalize_and_validate().unwrap();
        assert_eq!(cfg.server.port, 3000);
        assert_eq!(cfg.edge_config.write_attempts, 5);
        assert!(!cfg.blob.enabled);
        assert!(cfg.stripe.secret_key.is_none());
    }
}
