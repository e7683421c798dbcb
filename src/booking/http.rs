use crate::booking::{BookingCommand, BookingDelegate, BookingError};
use crate::domain::context::AuthContext;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

pub struct HttpBookingClient {
    pub base_url: String,
    /// Used when the saga runs without a caller token, e.g. from a webhook.
    pub service_token: Option<String>,
    pub timeout_ms: u64,
    pub client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CreatedBooking {
    id: Uuid,
}

#[async_trait::async_trait]
impl BookingDelegate for HttpBookingClient {
    async fn create_booking(&self, command: BookingCommand, auth: &AuthContext) -> Result<Uuid, BookingError> {
        let mut req = self
            .client
            .post(format!("{}/subscriptions", self.base_url))
            .json(&command)
            .timeout(Duration::from_millis(self.timeout_ms));
        match (&auth.authorization, &self.service_token) {
            (Some(authorization), _) => req = req.header(reqwest::header::AUTHORIZATION, authorization),
            (None, Some(token)) => req = req.bearer_auth(token),
            (None, None) => {}
        }
        if let Some(ip) = &auth.forwarded_for {
            req = req.header("X-Forwarded-For", ip);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| BookingError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BookingError::Rejected {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        let created: CreatedBooking = resp
            .json()
            .await
            .map_err(|e| BookingError::InvalidReply(e.to_string()))?;
        tracing::info!(booking_id = %created.id, trip_id = %command.trip_id, "booking created");
        Ok(created.id)
    }
}
