use crate::domain::context::AuthContext;
use crate::domain::payment::{BookingSnapshotV1, Participant};
use serde::Serialize;
use uuid::Uuid;

pub mod http;

#[derive(Debug, Clone, Serialize)]
pub struct BookingCommand {
    pub trip_id: Uuid,
    pub participant_count: u32,
    pub participants: Vec<Participant>,
    pub payer_id: Uuid,
    pub payer_name: String,
}

impl BookingCommand {
    pub fn from_snapshot(snapshot: &BookingSnapshotV1, payer_id: Uuid) -> Self {
        Self {
            trip_id: snapshot.trip_id,
            participant_count: snapshot.participant_count,
            participants: snapshot.participants.clone(),
            payer_id,
            payer_name: snapshot.payer_name.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("booking service rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("booking service unreachable: {0}")]
    Unavailable(String),

    #[error("booking service returned an unreadable reply: {0}")]
    InvalidReply(String),
}

/// Creates the reservation once the charge has settled. Callers guarantee it
/// runs at most once per payment.
#[async_trait::async_trait]
pub trait BookingDelegate: Send + Sync {
    async fn create_booking(&self, command: BookingCommand, auth: &AuthContext) -> Result<Uuid, BookingError>;
}
