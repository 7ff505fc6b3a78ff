use std::sync::Arc;

use configs::AppConfig;
use service::payments::StripeClient;
use service::registration::RegistrationService;
use service::storage::stack::StorageStack;
use tracing::{info, warn};

/// Shared handler state, cloned per request.
#[derive(Clone)]
pub struct ServerState {
    pub registrations: Arc<RegistrationService>,
    pub storage: StorageStack,
    pub stripe: Option<StripeClient>,
    pub webhook_secret: Option<String>,
    pub admin_token: Option<String>,
}

impl ServerState {
    pub fn new(storage: StorageStack) -> Self {
        Self {
            registrations: Arc::new(RegistrationService::new(storage.facade.clone())),
            storage,
            stripe: None,
            webhook_secret: None,
            admin_token: None,
        }
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_stripe(mut self, client: Option<StripeClient>, webhook_secret: Option<String>) -> Self {
        self.stripe = client;
        self.webhook_secret = webhook_secret.filter(|s| !s.trim().is_empty());
        self
    }

    /// Wire every component from configuration.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let storage = StorageStack::from_config(cfg)?;
        let stripe = match StripeClient::from_config(&cfg.stripe, &cfg.server.public_base_url) {
            Ok(client) => {
                info!("stripe checkout enabled");
                Some(client)
            }
            Err(e) => {
                warn!(error = %e, "stripe checkout disabled");
                None
            }
        };
        if cfg.admin.token.is_none() {
            warn!("ADMIN_TOKEN not set; admin endpoints will reject every request");
        }
        Ok(Self::new(storage)
            .with_admin_token(cfg.admin.token.clone())
            .with_stripe(stripe, cfg.stripe.webhook_secret.clone()))
    }
}
