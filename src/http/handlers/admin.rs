use crate::domain::context::build_auth_context;
use crate::domain::payment::{Payment, PaymentView};
use crate::error::CheckoutError;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct GapQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Serialize)]
pub struct ErasureResult {
    pub payer_id: Uuid,
    pub cancelled_payments: usize,
}

pub async fn compensation_gaps(
    State(state): State<AppState>,
    Query(q): Query<GapQuery>,
) -> Result<Json<Vec<Payment>>, CheckoutError> {
    Ok(Json(state.orchestrator.list_compensation_gaps(q.limit).await?))
}

pub async fn replay_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentView>, CheckoutError> {
    let auth = build_auth_context(&headers);
    Ok(Json(
        state
            .orchestrator
            .replay_pending_booking(payment_id, &auth)
            .await?,
    ))
}

pub async fn erase_account(
    State(state): State<AppState>,
    Path(payer_id): Path<Uuid>,
) -> Result<Json<ErasureResult>, CheckoutError> {
    let cancelled_payments = state.orchestrator.handle_account_deleted(payer_id).await?;
    Ok(Json(ErasureResult {
        payer_id,
        cancelled_payments,
    }))
}
