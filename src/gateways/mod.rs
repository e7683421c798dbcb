use crate::domain::payment::{Continuation, Payment, PaymentMethod};
use reqwest::StatusCode;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub mod card;
pub mod mock;
pub mod wallet;

#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub payment_id: Uuid,
    pub transaction_ref: String,
    pub payer_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub method_token: Option<String>,
    pub save_method: bool,
    pub customer_reference: Option<String>,
    pub return_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeMode {
    Immediate,
    Redirect,
}

#[derive(Debug, Clone)]
pub struct ChargeCreation {
    pub mode: ChargeMode,
    pub charge_reference: Option<String>,
    pub session_reference: Option<String>,
    pub transaction_reference: Option<String>,
    pub continuation: Continuation,
    pub settled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderStatus {
    Settled,
    Voided,
    Pending,
    RequiresAction,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub status: ProviderStatus,
    pub charge_reference: Option<String>,
    pub transaction_reference: Option<String>,
    pub detail: Option<String>,
}

impl StatusReport {
    pub fn bare(status: ProviderStatus) -> Self {
        Self {
            status,
            charge_reference: None,
            transaction_reference: None,
            detail: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RefundReceipt {
    pub refund_reference: String,
}

/// Provider identifiers recorded on a payment so far.
#[derive(Debug, Clone, Default)]
pub struct ProviderRefs {
    pub charge: Option<String>,
    pub session: Option<String>,
    pub transaction: Option<String>,
}

impl From<&Payment> for ProviderRefs {
    fn from(p: &Payment) -> Self {
        Self {
            charge: p.provider_charge_ref.clone(),
            session: p.provider_session_ref.clone(),
            transaction: p.provider_transaction_ref.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("declined by provider ({code}): {message}")]
    Declined { code: String, message: String },

    #[error("provider timed out")]
    Timeout,

    #[error("provider unreachable: {0}")]
    Transport(String),

    #[error("provider answered HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected provider response: {0}")]
    UnexpectedResponse(String),

    #[error("payment has no {0} reference for this provider")]
    MissingReference(&'static str),
}

impl GatewayError {
    pub fn provider_code(&self) -> Option<&str> {
        match self {
            GatewayError::Declined { code, .. } => Some(code),
            GatewayError::Timeout => Some("TIMEOUT"),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() {
            GatewayError::UnexpectedResponse(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

/// Turns a non-2xx provider reply into an error, keeping the first 200 chars.
pub(crate) fn rejected(status: StatusCode, body: String) -> GatewayError {
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        return GatewayError::Timeout;
    }
    GatewayError::Rejected {
        status: status.as_u16(),
        body: body.chars().take(200).collect(),
    }
}

pub(crate) fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| GatewayError::UnexpectedResponse(format!("amount {amount} out of range")))
}

#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Opens a charge. With a method token the adapter tries to capture right
    /// away, otherwise it hands back a hosted checkout to redirect to.
    async fn create(&self, request: ChargeRequest) -> Result<ChargeCreation, GatewayError>;

    async fn retrieve_status(
        &self,
        refs: &ProviderRefs,
        payer_token: Option<&str>,
    ) -> Result<StatusReport, GatewayError>;

    async fn refund(
        &self,
        refs: &ProviderRefs,
        amount: Decimal,
        currency: &str,
    ) -> Result<RefundReceipt, GatewayError>;
}

#[derive(Clone, Default)]
pub struct GatewayRegistry {
    adapters: HashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, method: PaymentMethod, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.adapters.insert(method, gateway);
        self
    }

    pub fn for_method(&self, method: PaymentMethod) -> Option<Arc<dyn PaymentGateway>> {
        self.adapters.get(&method).cloned()
    }
}
