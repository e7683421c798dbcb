use crate::booking::BookingError;
use crate::domain::payment::{ErrorEnvelope, ErrorPayload, InvalidTransition};
use crate::gateways::GatewayError;
use crate::repo::payments_repo::BookingAlreadyLinked;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("payment provider call failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("booking creation failed: {0}")]
    Booking(#[from] BookingError),

    #[error(transparent)]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for CheckoutError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<BookingAlreadyLinked>() {
            Ok(linked) => CheckoutError::Conflict(linked.to_string()),
            Err(e) => CheckoutError::Internal(e),
        }
    }
}

impl From<InvalidTransition> for CheckoutError {
    fn from(e: InvalidTransition) -> Self {
        CheckoutError::Conflict(e.to_string())
    }
}

impl CheckoutError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CheckoutError::Validation(_) => StatusCode::BAD_REQUEST,
            CheckoutError::NotFound(_) => StatusCode::NOT_FOUND,
            CheckoutError::Conflict(_) => StatusCode::CONFLICT,
            CheckoutError::Gateway(_) | CheckoutError::Booking(_) => StatusCode::BAD_GATEWAY,
            CheckoutError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CheckoutError::Validation(_) => "VALIDATION_ERROR",
            CheckoutError::NotFound(_) => "NOT_FOUND",
            CheckoutError::Conflict(_) => "CONFLICT",
            CheckoutError::Gateway(_) => "GATEWAY_ERROR",
            CheckoutError::Booking(_) => "BOOKING_ERROR",
            CheckoutError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        let details = match self {
            CheckoutError::Gateway(e) => e.provider_code().map(str::to_string),
            _ => None,
        };
        ErrorEnvelope {
            error: ErrorPayload {
                code: self.code().to_string(),
                message: self.to_string(),
                details,
            },
        }
    }
}

impl IntoResponse for CheckoutError {
    fn into_response(self) -> Response {
        if let CheckoutError::Internal(e) = &self {
            tracing::error!(error = %e, "internal error while handling payment request");
        }
        (self.status_code(), Json(self.envelope())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_http_status() {
        assert_eq!(
            CheckoutError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(CheckoutError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(CheckoutError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            CheckoutError::from(GatewayError::Timeout).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn stale_booking_link_becomes_conflict() {
        let err: anyhow::Error = BookingAlreadyLinked {
            payment_id: uuid::Uuid::new_v4(),
            existing: uuid::Uuid::new_v4(),
        }
        .into();
        assert!(matches!(CheckoutError::from(err), CheckoutError::Conflict(_)));
        assert!(matches!(
            CheckoutError::from(anyhow::anyhow!("connection reset")),
            CheckoutError::Internal(_)
        ));
    }

    #[test]
    fn gateway_decline_code_lands_in_details() {
        let err = CheckoutError::from(GatewayError::Declined {
            code: "card_declined".to_string(),
            message: "insufficient funds".to_string(),
        });
        let env = err.envelope();
        assert_eq!(env.error.code, "GATEWAY_ERROR");
        assert_eq!(env.error.details.as_deref(), Some("card_declined"));
    }
}
