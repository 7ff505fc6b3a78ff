use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use common::types::ApiResponse;
use serde_json::{json, Value};
use service::errors::ServiceError;
use service::payments::webhook::DEFAULT_TOLERANCE_SECS;
use service::payments::{parse_event, verify_signature, CheckoutRequest, CheckoutSession};
use tracing::{info, warn};

use crate::errors::ApiError;
use crate::state::ServerState;

#[utoipa::path(
    post,
    path = "/create-checkout-session",
    tag = "payments",
    request_body = crate::openapi::CheckoutRequestDoc,
    responses(
        (status = 200, description = "Session created", body = crate::openapi::CheckoutSessionDoc),
        (status = 400, description = "Invalid amount"),
        (status = 502, description = "Stripe error"),
        (status = 503, description = "Payments not configured")
    )
)]
pub async fn create_checkout_session(
    State(state): State<ServerState>,
    payload: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<CheckoutSession>>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;
    let stripe = state
        .stripe
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("payments are not configured".into()))?;
    let session = stripe.create_checkout_session(&req).await?;
    Ok(Json(ApiResponse::ok(session)))
}

/// Stripe calls this with the raw event body; the signature covers those
/// exact bytes, so the body is taken unparsed.
#[utoipa::path(
    post,
    path = "/stripe-webhook",
    tag = "payments",
    responses(
        (status = 200, description = "Event acknowledged"),
        (status = 400, description = "Bad signature or payload"),
        (status = 503, description = "Webhook secret not configured or storage unavailable")
    )
)]
pub async fn stripe_webhook(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let secret = state
        .webhook_secret
        .as_deref()
        .ok_or_else(|| ApiError::Unavailable("webhook secret is not configured".into()))?;
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Validation("missing Stripe-Signature header".into()))?;
    verify_signature(&body, signature, secret, Utc::now().timestamp(), DEFAULT_TOLERANCE_SECS)?;

    let event = parse_event(&body)?;
    let Some(donation) = event.donation() else {
        info!(event_id = %event.id, event_type = %event.event_type, "webhook event ignored");
        return Ok(Json(ApiResponse::ok_with_message(json!({ "received": true }), "event ignored")));
    };

    match state
        .registrations
        .update_registration_donation(&donation.registration_id, donation.amount, Some(donation.session_id.clone()))
        .await
    {
        Ok(updated) => {
            info!(
                event = "donation_webhook",
                event_id = %event.id,
                registration_id = %updated.registration_id,
                amount = %updated.donation_amount,
                "donation recorded from webhook"
            );
            Ok(Json(ApiResponse::ok_with_message(json!({ "received": true }), "donation recorded")))
        }
        // unknown registration: acknowledge, nothing to apply
        Err(ServiceError::NotFound(_)) => {
            warn!(
                event_id = %event.id,
                registration_id = %donation.registration_id,
                "webhook references unknown registration"
            );
            Ok(Json(ApiResponse::ok_with_message(json!({ "received": true }), "registration not found")))
        }
        Err(e) => Err(e.into()),
    }
}
