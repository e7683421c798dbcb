use crate::domain::payment::Payment;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const PAYMENT_COMPLETED_TOPIC: &str = "payment-completed";
pub const PAYMENT_REFUNDED_TOPIC: &str = "payment-refunded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentEventKind {
    PaymentCompleted,
    PaymentRefunded,
}

impl PaymentEventKind {
    pub fn topic(&self) -> &'static str {
        match self {
            PaymentEventKind::PaymentCompleted => PAYMENT_COMPLETED_TOPIC,
            PaymentEventKind::PaymentRefunded => PAYMENT_REFUNDED_TOPIC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub event_type: PaymentEventKind,
    pub payment_id: Uuid,
    pub transaction_ref: String,
    pub payer_id: Uuid,
    pub trip_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub timestamp: DateTime<Utc>,
}

impl PaymentEvent {
    pub fn completed(payment: &Payment, at: DateTime<Utc>) -> Self {
        Self::build(PaymentEventKind::PaymentCompleted, payment, payment.amount, at)
    }

    /// `amount` is what was actually returned to the payer.
    pub fn refunded(payment: &Payment, amount: Decimal, at: DateTime<Utc>) -> Self {
        Self::build(PaymentEventKind::PaymentRefunded, payment, amount, at)
    }

    fn build(kind: PaymentEventKind, payment: &Payment, amount: Decimal, at: DateTime<Utc>) -> Self {
        Self {
            event_type: kind,
            payment_id: payment.id,
            transaction_ref: payment.transaction_ref.clone(),
            payer_id: payment.payer_id,
            trip_id: payment.trip_id,
            amount,
            currency: payment.currency.clone(),
            timestamp: at,
        }
    }
}

/// Inbound notice that an account was erased upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountDeleted {
    #[serde(alias = "payer_id", alias = "user_id")]
    pub account_id: Uuid,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl AccountDeleted {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_deleted_accepts_aliases() {
        let id = Uuid::new_v4();
        let a = AccountDeleted::parse(&format!(r#"{{"account_id":"{id}"}}"#)).unwrap();
        let b = AccountDeleted::parse(&format!(r#"{{"user_id":"{id}","deleted_at":"2026-01-02T03:04:05Z"}}"#)).unwrap();
        assert_eq!(a.account_id, id);
        assert_eq!(b.account_id, id);
        assert!(b.deleted_at.is_some());
        assert!(AccountDeleted::parse(r#"{"account_id":"nope"}"#).is_err());
    }

    #[test]
    fn event_kinds_map_to_topics() {
        assert_eq!(PaymentEventKind::PaymentCompleted.topic(), "payment-completed");
        assert_eq!(PaymentEventKind::PaymentRefunded.topic(), "payment-refunded");
    }
}
