use crate::domain::context::AuthContext;
use crate::error::CheckoutError;
use crate::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Card-Signature";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature header missing or malformed")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Stale,
    #[error("signature mismatch")]
    Mismatch,
}

/// Checks a `t=<unix>,v1=<hex>` header against HMAC-SHA256 of `"<t>.<body>"`.
pub fn verify_signature(
    secret: &str,
    header: &str,
    body: &[u8],
    now_unix: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }
    if secret.is_empty() {
        return Err(SignatureError::Mismatch);
    }
    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if (now_unix - timestamp).abs() > tolerance_secs {
        return Err(SignatureError::Stale);
    }

    for candidate in signatures {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }
    Err(SignatureError::Mismatch)
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

fn routes_to_confirm(event_type: &str) -> bool {
    matches!(
        event_type,
        "checkout.session.completed"
            | "checkout.session.async_payment_succeeded"
            | "checkout.session.async_payment_failed"
            | "checkout.session.expired"
            | "payment_intent.succeeded"
            | "payment_intent.canceled"
            | "payment_intent.payment_failed"
    )
}

pub async fn card_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let header = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    if let Err(e) = verify_signature(
        &state.webhook.card_secret,
        header,
        &body,
        chrono::Utc::now().timestamp(),
        state.webhook.tolerance_secs,
    ) {
        tracing::warn!(error = %e, "card webhook rejected");
        return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response();
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))).into_response();
        }
    };

    if !routes_to_confirm(&event.event_type) {
        return (StatusCode::OK, Json(json!({"received": true, "ignored": event.event_type}))).into_response();
    }

    let reference = event.data.object.id;
    match state
        .orchestrator
        .confirm(&reference, None, &AuthContext::anonymous())
        .await
    {
        Ok(view) => (
            StatusCode::OK,
            Json(json!({"received": true, "payment_id": view.payment_id, "status": view.status})),
        )
            .into_response(),
        // unknown references are acknowledged, not retried
        Err(CheckoutError::NotFound(_)) => {
            tracing::info!(reference = %reference, event_type = %event.event_type, "webhook for unknown reference");
            (StatusCode::OK, Json(json!({"received": true, "ignored": "unknown reference"}))).into_response()
        }
        Err(e) => e.into_response(),
    }
}
