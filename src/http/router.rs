use crate::http::handlers::{admin, ops, payments, webhooks};
use crate::http::middleware::admin_auth::require_internal_api_key;
use crate::AppState;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

pub fn build(state: AppState, admin_key: String) -> Router {
    let admin_routes = Router::new()
        .route("/admin/payments/compensation-gaps", get(admin::compensation_gaps))
        .route(
            "/admin/payments/:payment_id/replay-booking",
            post(admin::replay_booking),
        )
        .route("/admin/accounts/:payer_id/erase", post(admin::erase_account))
        .layer(from_fn_with_state(admin_key, require_internal_api_key));

    Router::new()
        .route("/health", get(payments::health))
        .route("/checkout", post(payments::checkout))
        .route("/payments", get(payments::list_payments))
        .route("/payments/confirm", post(payments::confirm))
        .route("/payments/:payment_id", get(payments::get_payment))
        .route("/payments/:payment_id/refund", post(payments::refund))
        .route("/webhooks/card", post(webhooks::card_webhook))
        .route("/ops/readiness", get(ops::readiness))
        .route("/ops/liveness", get(ops::liveness))
        .merge(admin_routes)
        .with_state(state)
}
