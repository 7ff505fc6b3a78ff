use serde::Serialize;
use utoipa::OpenApi;
use utoipa::ToSchema;

#[derive(ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

/// Registration form payload. Extra fields are stored verbatim.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationInputDoc {
    pub registration_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// `true`, `"on"`, `"yes"`, `"true"`, `"1"` or `1`.
    pub seder_night1: Option<String>,
    pub seder_night2: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DonationUpdateDoc {
    pub registration_id: String,
    /// Number or decimal string.
    pub amount: String,
    pub session_id: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequestDoc {
    pub amount: f64,
    pub registration_id: Option<String>,
    pub email: Option<String>,
}

#[derive(ToSchema)]
pub struct CheckoutSessionDoc {
    pub id: String,
    pub url: Option<String>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health,
        crate::routes::registrations::store_registration,
        crate::routes::registrations::get_registrations,
        crate::routes::registrations::get_registration,
        crate::routes::registrations::update_donation,
        crate::routes::payments::create_checkout_session,
        crate::routes::payments::stripe_webhook,
        crate::routes::admin::delete_registration,
        crate::routes::admin::list_registrations,
        crate::routes::admin::storage_status,
        crate::routes::admin::reset_storage,
        crate::routes::admin::sync_storage,
    ),
    components(
        schemas(
            HealthResponse,
            RegistrationInputDoc,
            DonationUpdateDoc,
            CheckoutRequestDoc,
            CheckoutSessionDoc,
        )
    ),
    tags(
        (name = "health"),
        (name = "registrations"),
        (name = "payments"),
        (name = "admin")
    )
)]
pub struct ApiDoc;
