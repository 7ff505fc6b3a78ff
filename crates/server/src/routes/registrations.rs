use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use common::types::ApiResponse;
use models::flags::parse_amount;
use models::{Registration, RegistrationInput};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::errors::ApiError;
use crate::state::ServerState;

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub id: Option<String>,
}

/// Either the whole collection or the single record asked for with `?id=`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RegistrationsPayload {
    One(Registration),
    Many(Vec<Registration>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationUpdate {
    #[serde(default)]
    pub registration_id: String,
    #[serde(default)]
    pub amount: Value,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Amounts arrive as JSON numbers or as strings like `"25.00"`.
fn amount_from(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|a| a.is_finite() && *a >= 0.0),
        Value::String(s) => parse_amount(s),
        _ => None,
    }
}

#[utoipa::path(
    post,
    path = "/store-passover-registration",
    tag = "registrations",
    request_body = crate::openapi::RegistrationInputDoc,
    responses(
        (status = 200, description = "Stored"),
        (status = 400, description = "Missing or invalid fields"),
        (status = 409, description = "Duplicate registrationId"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn store_registration(
    State(state): State<ServerState>,
    payload: Result<Json<RegistrationInput>, JsonRejection>,
) -> Result<Json<ApiResponse<Registration>>, ApiError> {
    let Json(input) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;
    let stored = state.registrations.store_registration(input).await?;
    Ok(Json(ApiResponse::ok_with_message(stored, "Registration saved")))
}

#[utoipa::path(
    get,
    path = "/get-passover-registrations",
    tag = "registrations",
    params(("id" = Option<String>, Query, description = "Return only this registration")),
    responses((status = 200, description = "OK"), (status = 404, description = "Unknown id"))
)]
pub async fn get_registrations(
    State(state): State<ServerState>,
    Query(q): Query<IdQuery>,
) -> Result<Json<ApiResponse<RegistrationsPayload>>, ApiError> {
    match q.id.filter(|id| !id.trim().is_empty()) {
        Some(id) => {
            let found = state
                .registrations
                .get_registration_by_id(&id)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("registration {id} not found")))?;
            Ok(Json(ApiResponse::ok(RegistrationsPayload::One(found))))
        }
        None => {
            let all = state.registrations.get_registrations().await?;
            Ok(Json(ApiResponse::ok(RegistrationsPayload::Many(all))))
        }
    }
}

#[utoipa::path(
    get,
    path = "/registration/{id}",
    tag = "registrations",
    params(("id" = String, Path, description = "Registration id; case and hyphens are ignored")),
    responses((status = 200, description = "OK"), (status = 404, description = "Unknown id"))
)]
pub async fn get_registration(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Registration>>, ApiError> {
    let found = state
        .registrations
        .get_registration_by_id(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("registration {id} not found")))?;
    Ok(Json(ApiResponse::ok(found)))
}

#[utoipa::path(
    post,
    path = "/update-registration-donation",
    tag = "registrations",
    request_body = crate::openapi::DonationUpdateDoc,
    responses(
        (status = 200, description = "Updated"),
        (status = 400, description = "Invalid amount or id"),
        (status = 404, description = "Unknown id")
    )
)]
pub async fn update_donation(
    State(state): State<ServerState>,
    payload: Result<Json<DonationUpdate>, JsonRejection>,
) -> Result<Json<ApiResponse<Registration>>, ApiError> {
    let Json(update) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;
    if update.registration_id.trim().is_empty() {
        return Err(ApiError::Validation("registrationId is required".into()));
    }
    let amount = amount_from(&update.amount)
        .ok_or_else(|| ApiError::Validation("amount must be a non-negative number".into()))?;
    let updated = state
        .registrations
        .update_registration_donation(&update.registration_id, amount, update.session_id)
        .await?;
    info!(registration_id = %updated.registration_id, "donation recorded via api");
    Ok(Json(ApiResponse::ok_with_message(updated, "Donation recorded")))
}
