use std::time::Duration;

use configs::StripeConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::PaymentError;

/// What the donate form asks for.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    /// Whole currency units, e.g. `36` or `18.50`.
    pub amount: f64,
    #[serde(default)]
    pub registration_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// Amount in the smallest currency unit.
pub fn to_minor_units(amount: f64) -> Result<i64, PaymentError> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(PaymentError::Validation("amount must be greater than zero".into()));
    }
    let cents = (amount * 100.0).round();
    if cents < 1.0 || cents > i64::MAX as f64 {
        return Err(PaymentError::Validation("amount out of range".into()));
    }
    Ok(cents as i64)
}

#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    api_base_url: String,
    secret_key: String,
    currency: String,
    product_name: String,
    success_url: String,
    cancel_url: String,
}

impl StripeClient {
    /// `public_base_url` is the site origin used for the redirect URLs.
    pub fn from_config(cfg: &StripeConfig, public_base_url: &str) -> Result<Self, PaymentError> {
        let secret_key = cfg
            .secret_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| PaymentError::NotConfigured("STRIPE_SECRET_KEY missing".into()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| PaymentError::Transport(e.to_string()))?;
        let origin = public_base_url.trim_end_matches('/');
        Ok(Self {
            http,
            api_base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            secret_key,
            currency: cfg.currency.clone(),
            product_name: cfg.product_name.clone(),
            success_url: format!("{origin}{}", cfg.success_path),
            cancel_url: format!("{origin}{}", cfg.cancel_path),
        })
    }

    fn form(&self, req: &CheckoutRequest, cents: i64) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), self.success_url.clone()),
            ("cancel_url".into(), self.cancel_url.clone()),
            ("line_items[0][quantity]".into(), "1".into()),
            ("line_items[0][price_data][currency]".into(), self.currency.clone()),
            ("line_items[0][price_data][unit_amount]".into(), cents.to_string()),
            ("line_items[0][price_data][product_data][name]".into(), self.product_name.clone()),
        ];
        if let Some(id) = req.registration_id.as_deref().filter(|s| !s.trim().is_empty()) {
            form.push(("client_reference_id".into(), id.to_string()));
            form.push(("metadata[registrationId]".into(), id.to_string()));
        }
        if let Some(email) = req.email.as_deref().filter(|s| !s.trim().is_empty()) {
            form.push(("customer_email".into(), email.to_string()));
        }
        form
    }

    pub async fn create_checkout_session(&self, req: &CheckoutRequest) -> Result<CheckoutSession, PaymentError> {
        let cents = to_minor_units(req.amount)?;
        let resp = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base_url))
            .bearer_auth(&self.secret_key)
            .form(&self.form(req, cents))
            .send()
            .await
            .map_err(|e| PaymentError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| PaymentError::Transport(e.to_string()))?;
        if !status.is_success() {
            let message = serde_json::from_str::<StripeErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or(body);
            warn!(status = status.as_u16(), %message, "stripe checkout session rejected");
            return Err(PaymentError::Http { status: status.as_u16(), message });
        }
        let session: CheckoutSession =
            serde_json::from_str(&body).map_err(|e| PaymentError::Decode(e.to_string()))?;
        info!(
            event = "checkout_session_created",
            session_id = %session.id,
            amount_cents = cents,
            registration_id = req.registration_id.as_deref().unwrap_or(""),
            "checkout session created"
        );
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeStripe;

    fn config(base: &str) -> StripeConfig {
        StripeConfig {
            secret_key: Some("sk_test_123".into()),
            api_base_url: base.to_string(),
            ..StripeConfig::default()
        }
    }

    #[test]
    fn minor_units_round_and_reject_non_positive() {
        assert_eq!(to_minor_units(36.0).unwrap(), 3600);
        assert_eq!(to_minor_units(18.5).unwrap(), 1850);
        assert_eq!(to_minor_units(0.1 + 0.2).unwrap(), 30);
        assert!(to_minor_units(0.0).is_err());
        assert!(to_minor_units(-5.0).is_err());
        assert!(to_minor_units(f64::NAN).is_err());
    }

    #[test]
    fn missing_secret_key_is_not_configured() {
        let err = StripeClient::from_config(&StripeConfig::default(), "http://localhost:3000").err();
        assert!(matches!(err, Some(PaymentError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn creates_session_with_form_fields() -> anyhow::Result<()> {
        let fake = FakeStripe::spawn().await?;
        let client = StripeClient::from_config(&config(&fake.base_url), "https://seder.example/")?;
        let session = client
            .create_checkout_session(&CheckoutRequest {
                amount: 36.0,
                registration_id: Some("reg-1".into()),
                email: Some("j@x.com".into()),
            })
            .await?;
        assert_eq!(session.id, "cs_test_1");
        assert!(session.url.is_some());

        let form = fake.last_form().unwrap_or_default();
        assert_eq!(form.get("mode").map(String::as_str), Some("payment"));
        assert_eq!(form.get("line_items[0][price_data][unit_amount]").map(String::as_str), Some("3600"));
        assert_eq!(form.get("line_items[0][price_data][currency]").map(String::as_str), Some("usd"));
        assert_eq!(form.get("metadata[registrationId]").map(String::as_str), Some("reg-1"));
        assert_eq!(form.get("customer_email").map(String::as_str), Some("j@x.com"));
        assert_eq!(
            form.get("success_url").map(String::as_str),
            Some("https://seder.example/donation-success?session_id={CHECKOUT_SESSION_ID}")
        );
        assert_eq!(fake.last_auth().as_deref(), Some("Bearer sk_test_123"));
        Ok(())
    }

    #[tokio::test]
    async fn stripe_error_message_is_surfaced() -> anyhow::Result<()> {
        let fake = FakeStripe::spawn().await?;
        fake.fail_requests(true);
        let client = StripeClient::from_config(&config(&fake.base_url), "http://localhost:3000")?;
        let err = client
            .create_checkout_session(&CheckoutRequest { amount: 10.0, ..Default::default() })
            .await
            .unwrap_err();
        match err {
            PaymentError::Http { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("Invalid currency"));
            }
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn zero_amount_never_reaches_stripe() -> anyhow::Result<()> {
        let fake = FakeStripe::spawn().await?;
        let client = StripeClient::from_config(&config(&fake.base_url), "http://localhost:3000")?;
        let err = client
            .create_checkout_session(&CheckoutRequest { amount: 0.0, ..Default::default() })
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));
        assert!(fake.last_form().is_none());
        Ok(())
    }
}
