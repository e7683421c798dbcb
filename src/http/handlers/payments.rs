use crate::domain::context::build_auth_context;
use crate::domain::payment::{
    CheckoutRequest, CheckoutResponse, ConfirmRequest, PaymentView, RefundRequest,
};
use crate::error::CheckoutError;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct PayerQuery {
    pub payer_id: Uuid,
}

pub async fn checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, CheckoutError> {
    let auth = build_auth_context(&headers);
    let resp = state.orchestrator.initiate_checkout(req, &auth).await?;
    Ok(Json(resp))
}

pub async fn confirm(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<PaymentView>, CheckoutError> {
    let auth = build_auth_context(&headers);
    let view = state
        .orchestrator
        .confirm(&req.reference, req.payer_token.as_deref(), &auth)
        .await?;
    Ok(Json(view))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentView>, CheckoutError> {
    Ok(Json(state.orchestrator.get_payment(payment_id).await?))
}

pub async fn list_payments(
    State(state): State<AppState>,
    Query(q): Query<PayerQuery>,
) -> Result<Json<Vec<PaymentView>>, CheckoutError> {
    Ok(Json(state.orchestrator.list_payer_payments(q.payer_id).await?))
}

pub async fn refund(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    body: Option<Json<RefundRequest>>,
) -> Result<Json<PaymentView>, CheckoutError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(state.orchestrator.refund_payment(payment_id, req.amount).await?))
}

pub async fn health() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "ok")
}
