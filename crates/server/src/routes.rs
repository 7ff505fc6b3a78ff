pub mod admin;
pub mod payments;
pub mod registrations;

use axum::{
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use utoipa::OpenApi;

use common::types::Health;

use crate::openapi::ApiDoc;
use crate::state::ServerState;

#[utoipa::path(get, path = "/health", tag = "health", responses((status = 200, description = "OK", body = crate::openapi::HealthResponse)))]
pub async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the full application router: public registration and payment
/// routes plus the token-guarded admin routes.
pub fn build_router(state: ServerState, cors: CorsLayer) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/openapi.json", get(openapi_json))
        .route("/store-passover-registration", post(registrations::store_registration))
        .route("/get-passover-registrations", get(registrations::get_registrations))
        .route("/registration/:id", get(registrations::get_registration))
        .route("/update-registration-donation", post(registrations::update_donation))
        .route("/create-checkout-session", post(payments::create_checkout_session))
        .route("/stripe-webhook", post(payments::stripe_webhook));

    let admin_routes = Router::new()
        .route("/delete-passover-registration/:id", delete(admin::delete_registration))
        .route("/admin/registrations", get(admin::list_registrations))
        .route("/admin/storage", get(admin::storage_status))
        .route("/admin/storage/reset", post(admin::reset_storage))
        .route("/admin/storage/sync", post(admin::sync_storage))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin::require_admin_token));

    public
        .merge(admin_routes)
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                // 每次请求一个 span，INFO 级别
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO).include_headers(false))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                // 响应：状态码与耗时
                .on_response(DefaultOnResponse::new().level(Level::INFO).include_headers(false))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        )
}
