use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::ModelError;
use crate::flags::{deserialize_amount, deserialize_truthy, format_amount};

/// Keys owned by the server; never accepted from a submit payload.
const SERVER_OWNED_KEYS: [&str; 5] = [
    "hasDonated",
    "donationAmount",
    "stripeSessionId",
    "registrationDate",
    "donationDate",
];

/// One attendee's signup record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub registration_id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, deserialize_with = "deserialize_truthy")]
    pub seder_night1: bool,
    #[serde(default, deserialize_with = "deserialize_truthy")]
    pub seder_night2: bool,
    #[serde(default, deserialize_with = "deserialize_truthy")]
    pub has_donated: bool,
    #[serde(default = "default_donation_amount", deserialize_with = "deserialize_amount")]
    pub donation_amount: String,
    #[serde(default)]
    pub stripe_session_id: Option<String>,
    #[serde(default)]
    pub registration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub donation_date: Option<DateTime<Utc>>,
    /// Additional form fields, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub fn default_donation_amount() -> String {
    format_amount(0.0)
}

impl Registration {
    /// Mark as donated; the amount is stored with two fraction digits.
    pub fn record_donation(&mut self, amount: f64, session_id: Option<String>, now: DateTime<Utc>) {
        self.has_donated = true;
        self.donation_amount = format_amount(amount);
        if session_id.is_some() {
            self.stripe_session_id = session_id;
        }
        self.donation_date = Some(now);
    }
}

/// Submit payload of the registration form.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationInput {
    #[serde(default)]
    pub registration_id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_truthy")]
    pub seder_night1: bool,
    #[serde(default, deserialize_with = "deserialize_truthy")]
    pub seder_night2: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, ModelError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ModelError::Validation(format!("{field} is required"))),
    }
}

impl RegistrationInput {
    pub fn validate(&self) -> Result<(), ModelError> {
        required(&self.first_name, "firstName")?;
        required(&self.last_name, "lastName")?;
        let email = required(&self.email, "email")?;
        validate_email(email)?;
        if let Some(id) = &self.registration_id {
            if id.trim().is_empty() {
                return Err(ModelError::Validation("registrationId must not be blank".into()));
            }
        }
        Ok(())
    }

    /// Build the stored record: id (generated when absent), defaults, `registrationDate = now`.
    pub fn into_registration(self, now: DateTime<Utc>) -> Result<Registration, ModelError> {
        self.validate()?;
        let registration_id = self
            .registration_id
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut extra = self.extra;
        for key in SERVER_OWNED_KEYS {
            extra.remove(key);
        }
        Ok(Registration {
            registration_id,
            first_name: self.first_name.unwrap_or_default().trim().to_string(),
            last_name: self.last_name.unwrap_or_default().trim().to_string(),
            email: self.email.unwrap_or_default().trim().to_string(),
            seder_night1: self.seder_night1,
            seder_night2: self.seder_night2,
            has_donated: false,
            donation_amount: default_donation_amount(),
            stripe_session_id: None,
            registration_date: Some(now),
            donation_date: None,
            extra,
        })
    }
}

pub fn validate_email(email: &str) -> Result<(), ModelError> {
    let mut parts = email.splitn(2, '@');
    match (parts.next(), parts.next()) {
        (Some(local), Some(domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(ModelError::Validation("invalid email".into())),
    }
}

/// Lowercase, hyphens removed: `"ABC-123"` and `"abc123"` normalize alike.
pub fn normalize_id(id: &str) -> String {
    id.trim()
        .chars()
        .filter(|c| *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Index of the record with `id`: exact match first, then normalized match.
pub fn position_by_id(registrations: &[Registration], id: &str) -> Option<usize> {
    if let Some(i) = registrations.iter().position(|r| r.registration_id == id) {
        return Some(i);
    }
    let wanted = normalize_id(id);
    if wanted.is_empty() {
        return None;
    }
    registrations
        .iter()
        .position(|r| normalize_id(&r.registration_id) == wanted)
}
