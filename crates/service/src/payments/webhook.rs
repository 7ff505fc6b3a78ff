//! Stripe webhook signature check and event decoding.
//!
//! The `Stripe-Signature` header looks like `t=1700000000,v1=<hex>,v1=<hex>`.
//! The signed payload is `"{t}.{raw body}"`, signed with HMAC-SHA256 under the
//! endpoint secret.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

use super::PaymentError;

pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

fn parse_header(header: &str) -> Result<(i64, Vec<Vec<u8>>), PaymentError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let Some((k, v)) = part.trim().split_once('=') else { continue };
        match k {
            "t" => timestamp = v.parse::<i64>().ok(),
            // undecodable entries are skipped; a valid one may follow
            "v1" => {
                if let Ok(sig) = hex::decode(v) {
                    signatures.push(sig);
                }
            }
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or_else(|| PaymentError::InvalidSignature("missing timestamp".into()))?;
    if signatures.is_empty() {
        return Err(PaymentError::InvalidSignature("no v1 signature".into()));
    }
    Ok((timestamp, signatures))
}

/// Hex HMAC of `"{timestamp}.{payload}"`; what Stripe puts in `v1`.
pub fn compute_signature(payload: &[u8], timestamp: i64, secret: &str) -> Result<String, PaymentError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| PaymentError::InvalidSignature("unusable secret".into()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check `header` against `payload`; `now` is unix seconds.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), PaymentError> {
    let (timestamp, signatures) = parse_header(header)?;
    if now.abs_diff(timestamp) > tolerance_secs.unsigned_abs() {
        return Err(PaymentError::InvalidSignature("timestamp outside tolerance".into()));
    }
    for sig in &signatures {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| PaymentError::InvalidSignature("unusable secret".into()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(sig).is_ok() {
            return Ok(());
        }
    }
    Err(PaymentError::InvalidSignature("no matching signature".into()))
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, PaymentError> {
    serde_json::from_slice(payload).map_err(|e| PaymentError::Validation(format!("invalid event payload: {e}")))
}

/// A completed checkout tied to a registration.
#[derive(Debug, Clone, PartialEq)]
pub struct DonationCompleted {
    pub registration_id: String,
    pub session_id: String,
    pub amount: f64,
}

impl WebhookEvent {
    /// `Some` for `checkout.session.completed` carrying a registration id,
    /// from `metadata.registrationId` or `client_reference_id`.
    pub fn donation(&self) -> Option<DonationCompleted> {
        if self.event_type != "checkout.session.completed" {
            return None;
        }
        let session = &self.data.object;
        let registration_id = session["metadata"]["registrationId"]
            .as_str()
            .or_else(|| session["client_reference_id"].as_str())
            .filter(|s| !s.trim().is_empty())?
            .to_string();
        let session_id = session["id"].as_str().unwrap_or_default().to_string();
        let amount = session["amount_total"].as_i64().unwrap_or(0) as f64 / 100.0;
        Some(DonationCompleted { registration_id, session_id, amount })
    }
}
