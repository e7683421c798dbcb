use crate::domain::payment::{ErrorEnvelope, ErrorPayload};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use subtle::ConstantTimeEq;

pub const ADMIN_KEY_HEADER: &str = "X-Internal-Api-Key";

/// Gates operator routes behind the shared internal key.
pub async fn require_internal_api_key(
    State(expected): State<String>,
    request: Request,
    next: Next,
) -> Response {
    let provided = request
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|h| h.to_str().ok());

    match provided {
        Some(key) if !expected.is_empty() && keys_match(key, &expected) => next.run(request).await,
        _ => {
            tracing::warn!(path = %request.uri().path(), "rejected admin request");
            let body = ErrorEnvelope {
                error: ErrorPayload {
                    code: "UNAUTHORIZED".to_string(),
                    message: "missing or invalid internal api key".to_string(),
                    details: None,
                },
            };
            (StatusCode::UNAUTHORIZED, Json(body)).into_response()
        }
    }
}

fn keys_match(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::keys_match;

    #[test]
    fn compares_keys_exactly() {
        assert!(keys_match("secret", "secret"));
        assert!(!keys_match("secret", "secreT"));
        assert!(!keys_match("secret", "secret2"));
    }
}
