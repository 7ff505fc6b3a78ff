//! Donation checkout: Stripe Checkout sessions and signed webhooks.

use thiserror::Error;

pub mod stripe;
pub mod webhook;

pub use stripe::{CheckoutRequest, CheckoutSession, StripeClient};
pub use webhook::{parse_event, verify_signature, DonationCompleted, WebhookEvent};

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payments not configured: {0}")]
    NotConfigured(String),
    #[error("invalid payment request: {0}")]
    Validation(String),
    #[error("stripe returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("stripe request failed: {0}")]
    Transport(String),
    #[error("stripe response invalid: {0}")]
    Decode(String),
    #[error("webhook signature rejected: {0}")]
    InvalidSignature(String),
}

impl PaymentError {
    /// Errors caused by the remote service rather than the caller.
    pub fn is_upstream(&self) -> bool {
        matches!(self, PaymentError::Http { .. } | PaymentError::Transport(_) | PaymentError::Decode(_))
    }
}
