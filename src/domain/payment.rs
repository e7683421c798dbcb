use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::fees::compute_fees;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    Wallet,
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "CARD",
            PaymentMethod::Wallet => "WALLET",
            PaymentMethod::Other => "OTHER",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CARD" => Ok(PaymentMethod::Card),
            "WALLET" => Ok(PaymentMethod::Wallet),
            "OTHER" => Ok(PaymentMethod::Other),
            other => Err(anyhow::anyhow!("unknown payment method {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Processing => "PROCESSING",
            PaymentStatus::Completed => "COMPLETED",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::Refunded => "REFUNDED",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }

    /// Forward edges of the payment lifecycle. Writing a status onto itself is
    /// accepted as an idempotent re-write.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Completed, Refunded)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PROCESSING" => Ok(PaymentStatus::Processing),
            "COMPLETED" => Ok(PaymentStatus::Completed),
            "FAILED" => Ok(PaymentStatus::Failed),
            "CANCELLED" => Ok(PaymentStatus::Cancelled),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            other => Err(anyhow::anyhow!("unknown payment status {other}")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("payment cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub birth_date: Option<chrono::NaiveDate>,
}

/// Parameters needed to create the booking once money has moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingParams {
    pub trip_id: Uuid,
    pub participant_count: u32,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

/// Version 1 of the deferred booking snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingSnapshotV1 {
    pub trip_id: Uuid,
    pub participant_count: u32,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub payer_name: String,
}

/// Work stored on a payment while its booking is deferred. New layouts get a
/// new variant; rows written by older releases keep deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum PendingBookingDetails {
    #[serde(rename = "1")]
    V1(BookingSnapshotV1),
}

impl PendingBookingDetails {
    pub fn capture(params: BookingParams, payer_name: &str) -> Self {
        PendingBookingDetails::V1(BookingSnapshotV1 {
            trip_id: params.trip_id,
            participant_count: params.participant_count,
            participants: params.participants,
            payer_name: payer_name.to_string(),
        })
    }

    pub fn snapshot(&self) -> &BookingSnapshotV1 {
        match self {
            PendingBookingDetails::V1(snapshot) => snapshot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub transaction_ref: String,
    pub amount: Decimal,
    pub currency: String,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub payer_id: Uuid,
    pub trip_id: Option<Uuid>,
    pub manager_id: Option<Uuid>,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub provider_charge_ref: Option<String>,
    pub provider_session_ref: Option<String>,
    pub provider_transaction_ref: Option<String>,
    pub booking_id: Option<Uuid>,
    pub pending_booking_details: Option<PendingBookingDetails>,
    pub failure_reason: Option<String>,
    pub refunded_amount: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Either the booking already exists or its creation is deferred.
#[derive(Debug, Clone)]
pub enum BookingLink {
    Existing(Uuid),
    Deferred(BookingParams),
}

pub struct NewPayment {
    pub payer_id: Uuid,
    pub payer_name: String,
    pub trip_id: Option<Uuid>,
    pub manager_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub method: PaymentMethod,
    pub booking: BookingLink,
}

impl Payment {
    pub fn new(input: NewPayment, now: DateTime<Utc>) -> Self {
        let fees = compute_fees(input.method, input.amount);
        let (booking_id, pending_booking_details) = match input.booking {
            BookingLink::Existing(id) => (Some(id), None),
            BookingLink::Deferred(params) => (
                None,
                Some(PendingBookingDetails::capture(params, &input.payer_name)),
            ),
        };

        Self {
            id: Uuid::new_v4(),
            transaction_ref: generate_transaction_ref(now),
            amount: input.amount,
            currency: input.currency,
            fee: fees.fee,
            net_amount: fees.net_amount,
            payer_id: input.payer_id,
            trip_id: input.trip_id,
            manager_id: input.manager_id,
            method: input.method,
            status: PaymentStatus::Pending,
            provider_charge_ref: None,
            provider_session_ref: None,
            provider_transaction_ref: None,
            booking_id,
            pending_booking_details,
            failure_reason: None,
            refunded_amount: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            refunded_at: None,
            cancelled_at: None,
        }
    }

    pub fn transition(&mut self, next: PaymentStatus, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        match next {
            PaymentStatus::Completed => {
                self.paid_at.get_or_insert(now);
            }
            PaymentStatus::Cancelled => {
                self.cancelled_at.get_or_insert(now);
            }
            PaymentStatus::Refunded => {
                self.refunded_at.get_or_insert(now);
            }
            _ => {}
        }
        Ok(())
    }

    pub fn awaits_booking(&self) -> bool {
        self.booking_id.is_none() && self.pending_booking_details.is_some()
    }

    /// A charge that succeeded while its booking could not be created.
    pub fn has_compensation_gap(&self) -> bool {
        self.status == PaymentStatus::Completed && self.awaits_booking()
    }

    pub fn resolve_booking(&mut self, booking_id: Uuid, now: DateTime<Utc>) {
        self.booking_id = Some(booking_id);
        self.pending_booking_details = None;
        self.failure_reason = None;
        self.updated_at = now;
    }

    pub fn backfill_refs(&mut self, charge_ref: Option<String>, transaction_ref: Option<String>) {
        if self.provider_charge_ref.is_none() {
            self.provider_charge_ref = charge_ref;
        }
        if self.provider_transaction_ref.is_none() {
            self.provider_transaction_ref = transaction_ref;
        }
    }
}

pub fn generate_transaction_ref(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect();
    format!("TXN-{}-{}", now.format("%Y%m%d"), suffix)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckoutRequest {
    pub payer_id: Uuid,
    pub payer_name: String,
    #[serde(default)]
    pub trip_id: Option<Uuid>,
    #[serde(default)]
    pub manager_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub method: PaymentMethod,
    #[serde(default)]
    pub method_token: Option<String>,
    #[serde(default)]
    pub save_method: bool,
    #[serde(default)]
    pub customer_reference: Option<String>,
    #[serde(default)]
    pub booking_id: Option<Uuid>,
    #[serde(default)]
    pub booking: Option<BookingParams>,
}

/// What the client must do next to finish paying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Continuation {
    ClientSecret { client_secret: String },
    Redirect { redirect_url: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub payment: PaymentView,
    pub continuation: Continuation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmRequest {
    pub reference: String,
    #[serde(default)]
    pub payer_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefundRequest {
    #[serde(default)]
    pub amount: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentView {
    pub payment_id: Uuid,
    pub transaction_ref: String,
    pub status: PaymentStatus,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
    pub booking_id: Option<Uuid>,
    pub booking_pending: bool,
    pub failure_reason: Option<String>,
    pub refunded_amount: Option<Decimal>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl From<&Payment> for PaymentView {
    fn from(p: &Payment) -> Self {
        Self {
            payment_id: p.id,
            transaction_ref: p.transaction_ref.clone(),
            status: p.status,
            method: p.method,
            amount: p.amount,
            fee: p.fee,
            net_amount: p.net_amount,
            currency: p.currency.clone(),
            booking_id: p.booking_id,
            booking_pending: p.awaits_booking(),
            failure_reason: p.failure_reason.clone(),
            refunded_amount: p.refunded_amount,
            paid_at: p.paid_at,
            refunded_at: p.refunded_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorPayload,
}

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}
