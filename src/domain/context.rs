use axum::http::HeaderMap;

/// Caller credentials forwarded to downstream services. Never inspected here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub authorization: Option<String>,
    pub forwarded_for: Option<String>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn bearer(token: &str) -> Self {
        Self {
            authorization: Some(format!("Bearer {token}")),
            forwarded_for: None,
        }
    }
}

pub fn build_auth_context(headers: &HeaderMap) -> AuthContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
    };

    AuthContext {
        authorization: header(axum::http::header::AUTHORIZATION.as_str()),
        forwarded_for: header("x-forwarded-for"),
    }
}
