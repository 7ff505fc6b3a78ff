use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, Uri};
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use common::types::ApiResponse;
use models::Registration;
use service::storage::blob::SyncOutcome;
use serde::Deserialize;
use service::storage::stack::StorageStatus;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::errors::ApiError;
use crate::state::ServerState;

#[derive(Debug, Deserialize)]
struct AdminTokenQuery {
    admin_token: Option<String>,
}

fn token_from_request(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string());
    let header = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string());
    // fallback to query param (percent-decoded)
    let from_query = || {
        Query::<AdminTokenQuery>::try_from_uri(uri)
            .ok()
            .and_then(|Query(q)| q.admin_token)
    };
    bearer.or(header).or_else(from_query).filter(|t| !t.is_empty())
}

fn token_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Middleware: the request must carry the configured admin token.
/// Without a configured token every admin request is refused.
pub async fn require_admin_token(
    State(state): State<ServerState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        warn!(path = %req.uri().path(), "admin request refused: no admin token configured");
        return Err(ApiError::Unauthorized("admin access is not configured".into()));
    };
    let presented = token_from_request(req.headers(), req.uri());
    match presented {
        Some(token) if token_matches(&token, expected) => Ok(next.run(req).await),
        _ => {
            warn!(path = %req.uri().path(), "admin request with missing or invalid token");
            Err(ApiError::Unauthorized("invalid admin token".into()))
        }
    }
}

#[utoipa::path(
    delete,
    path = "/delete-passover-registration/{id}",
    tag = "admin",
    params(("id" = String, Path, description = "Registration id")),
    responses((status = 200, description = "Deleted"), (status = 401, description = "Unauthorized"), (status = 404, description = "Unknown id"))
)]
pub async fn delete_registration(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Registration>>, ApiError> {
    let removed = state.registrations.delete_registration(&id).await?;
    Ok(Json(ApiResponse::ok_with_message(removed, "Registration deleted")))
}

#[utoipa::path(get, path = "/admin/registrations", tag = "admin", responses((status = 200, description = "OK"), (status = 401, description = "Unauthorized")))]
pub async fn list_registrations(
    State(state): State<ServerState>,
) -> Result<Json<ApiResponse<Vec<Registration>>>, ApiError> {
    let all = state.registrations.get_registrations().await?;
    let message = format!("{} registrations", all.len());
    Ok(Json(ApiResponse::ok_with_message(all, message)))
}

#[utoipa::path(get, path = "/admin/storage", tag = "admin", responses((status = 200, description = "Tier health"), (status = 401, description = "Unauthorized")))]
pub async fn storage_status(State(state): State<ServerState>) -> Json<ApiResponse<StorageStatus>> {
    Json(ApiResponse::ok(state.storage.status().await))
}

#[utoipa::path(post, path = "/admin/storage/reset", tag = "admin", responses((status = 200, description = "Health reset"), (status = 401, description = "Unauthorized")))]
pub async fn reset_storage(State(state): State<ServerState>) -> Json<ApiResponse<StorageStatus>> {
    state.storage.reset().await;
    info!(event = "storage_reset", "storage tier health reset by admin");
    Json(ApiResponse::ok_with_message(state.storage.status().await, "Storage health reset"))
}

#[utoipa::path(post, path = "/admin/storage/sync", tag = "admin", responses((status = 200, description = "Synced"), (status = 401, description = "Unauthorized"), (status = 503, description = "Blob mirror disabled")))]
pub async fn sync_storage(State(state): State<ServerState>) -> Result<Json<ApiResponse<SyncOutcome>>, ApiError> {
    let blob = state
        .storage
        .blob
        .clone()
        .ok_or_else(|| ApiError::Unavailable("blob mirror is not enabled".into()))?;
    let current = state.registrations.get_registrations().await?;
    let outcome = blob
        .sync_registrations_to_blob(Some(current), true)
        .await
        .map_err(|e| ApiError::Upstream(e.to_string()))?;
    info!(event = "blob_sync", outcome = ?outcome, "manual blob sync");
    Ok(Json(ApiResponse::ok(outcome)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn token_sources_in_order() {
        let q: Uri = "/admin/storage?admin_token=q".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(token_from_request(&headers, &q), Some("q".into()));
        headers.insert("x-admin-token", HeaderValue::from_static("h"));
        assert_eq!(token_from_request(&headers, &q), Some("h".into()));
        headers.insert("authorization", HeaderValue::from_static("Bearer b"));
        let bare: Uri = "/admin/storage".parse().unwrap();
        assert_eq!(token_from_request(&headers, &bare), Some("b".into()));
        let other: Uri = "/admin/storage?other=1".parse().unwrap();
        assert_eq!(token_from_request(&HeaderMap::new(), &other), None);
    }

    #[test]
    fn query_token_is_percent_decoded() {
        let uri: Uri = "/admin/registrations?admin_token=s%26cret%2Bx".parse().unwrap();
        assert_eq!(token_from_request(&HeaderMap::new(), &uri), Some("s&cret+x".into()));
    }

    #[test]
    fn token_compare() {
        assert!(token_matches("secret", "secret"));
        assert!(!token_matches("secreT", "secret"));
        assert!(!token_matches("secret-longer", "secret"));
        assert!(!token_matches("", "secret"));
    }
}
