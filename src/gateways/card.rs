use crate::domain::payment::Continuation;
use crate::gateways::{
    rejected, to_minor_units, ChargeCreation, ChargeMode, ChargeRequest, GatewayError,
    PaymentGateway, ProviderRefs, ProviderStatus, RefundReceipt, StatusReport,
};
use reqwest::{RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

/// Card processor speaking a payment-intent / hosted-checkout API.
pub struct CardGateway {
    pub base_url: String,
    pub secret_key: String,
    pub timeout_ms: u64,
    pub client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct IntentReply {
    id: String,
    status: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    latest_charge: Option<String>,
    #[serde(default)]
    last_payment_error: Option<ProviderError>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IntentField {
    Id(String),
    Expanded(IntentReply),
}

#[derive(Debug, Deserialize)]
struct SessionReply {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    payment_intent: Option<IntentField>,
}

#[derive(Debug, Deserialize)]
struct RefundReply {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorReply {
    error: ProviderError,
}

pub fn map_intent_status(status: &str) -> ProviderStatus {
    match status {
        "succeeded" => ProviderStatus::Settled,
        "canceled" => ProviderStatus::Voided,
        "requires_action" | "requires_confirmation" | "requires_payment_method" => {
            ProviderStatus::RequiresAction
        }
        _ => ProviderStatus::Pending,
    }
}

pub fn map_session_status(status: Option<&str>, payment_status: Option<&str>) -> ProviderStatus {
    match (status, payment_status) {
        (_, Some("paid")) | (_, Some("no_payment_required")) => ProviderStatus::Settled,
        (Some("expired"), _) => ProviderStatus::Voided,
        (Some("open"), _) => ProviderStatus::RequiresAction,
        _ => ProviderStatus::Pending,
    }
}

impl CardGateway {
    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(&self.secret_key)
            .timeout(Duration::from_millis(self.timeout_ms))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, GatewayError> {
        let resp = self.authed(builder).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }

        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::PAYMENT_REQUIRED {
            if let Ok(reply) = serde_json::from_str::<ErrorReply>(&body) {
                return Err(GatewayError::Declined {
                    code: reply.error.code.unwrap_or_else(|| "card_error".to_string()),
                    message: reply.error.message.unwrap_or_default(),
                });
            }
        }
        Err(rejected(status, body))
    }

    async fn confirm_intent(&self, request: &ChargeRequest, token: &str) -> Result<ChargeCreation, GatewayError> {
        let mut form = vec![
            ("amount".to_string(), to_minor_units(request.amount)?.to_string()),
            ("currency".to_string(), request.currency.to_lowercase()),
            ("payment_method".to_string(), token.to_string()),
            ("confirm".to_string(), "true".to_string()),
            ("description".to_string(), request.description.clone()),
            ("return_url".to_string(), request.return_url.clone()),
            ("metadata[payment_id]".to_string(), request.payment_id.to_string()),
            ("metadata[transaction_ref]".to_string(), request.transaction_ref.clone()),
        ];
        if let Some(customer) = &request.customer_reference {
            form.push(("customer".to_string(), customer.clone()));
        }

        let intent: IntentReply = self
            .send(
                self.client
                    .post(format!("{}/v1/payment_intents", self.base_url))
                    .form(&form),
            )
            .await?;

        if intent.status == "requires_payment_method" {
            let err = intent.last_payment_error.unwrap_or(ProviderError {
                code: None,
                message: None,
            });
            return Err(GatewayError::Declined {
                code: err.code.unwrap_or_else(|| "payment_failed".to_string()),
                message: err.message.unwrap_or_else(|| "payment method was refused".to_string()),
            });
        }

        let client_secret = intent
            .client_secret
            .clone()
            .ok_or_else(|| GatewayError::UnexpectedResponse("payment intent without client secret".to_string()))?;
        let settled = map_intent_status(&intent.status) == ProviderStatus::Settled;

        if settled && request.save_method {
            self.save_method(token, request.customer_reference.as_deref()).await;
        }

        Ok(ChargeCreation {
            mode: ChargeMode::Immediate,
            charge_reference: Some(intent.id),
            session_reference: None,
            transaction_reference: intent.latest_charge,
            continuation: Continuation::ClientSecret { client_secret },
            settled,
        })
    }

    async fn open_session(&self, request: &ChargeRequest) -> Result<ChargeCreation, GatewayError> {
        let form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.return_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("client_reference_id".to_string(), request.transaction_ref.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                request.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                to_minor_units(request.amount)?.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                request.description.clone(),
            ),
            ("metadata[payment_id]".to_string(), request.payment_id.to_string()),
            ("metadata[transaction_ref]".to_string(), request.transaction_ref.clone()),
        ];

        let session: SessionReply = self
            .send(
                self.client
                    .post(format!("{}/v1/checkout/sessions", self.base_url))
                    .form(&form),
            )
            .await?;

        let redirect_url = session
            .url
            .ok_or_else(|| GatewayError::UnexpectedResponse("checkout session without url".to_string()))?;
        let charge_reference = match session.payment_intent {
            Some(IntentField::Id(id)) => Some(id),
            Some(IntentField::Expanded(intent)) => Some(intent.id),
            None => None,
        };

        Ok(ChargeCreation {
            mode: ChargeMode::Redirect,
            charge_reference,
            session_reference: Some(session.id),
            transaction_reference: None,
            continuation: Continuation::Redirect { redirect_url },
            settled: false,
        })
    }

    /// Attaches the payment method to the payer's customer for later reuse.
    /// Never fails the charge.
    async fn save_method(&self, token: &str, customer: Option<&str>) {
        let Some(customer) = customer else {
            tracing::debug!("save_method requested without a customer reference, skipping");
            return;
        };

        let res: Result<serde_json::Value, GatewayError> = self
            .send(
                self.client
                    .post(format!("{}/v1/payment_methods/{}/attach", self.base_url, token))
                    .form(&[("customer", customer)]),
            )
            .await;

        if let Err(e) = res {
            tracing::warn!(customer, error = %e, "could not save card for reuse");
        }
    }
}

#[async_trait::async_trait]
impl PaymentGateway for CardGateway {
    fn name(&self) -> &'static str {
        "card"
    }

    async fn create(&self, request: ChargeRequest) -> Result<ChargeCreation, GatewayError> {
        match request.method_token.as_deref() {
            Some(token) => self.confirm_intent(&request, token).await,
            None => self.open_session(&request).await,
        }
    }

    async fn retrieve_status(
        &self,
        refs: &ProviderRefs,
        _payer_token: Option<&str>,
    ) -> Result<StatusReport, GatewayError> {
        if let Some(session_id) = &refs.session {
            let session: SessionReply = self
                .send(
                    self.client
                        .get(format!("{}/v1/checkout/sessions/{}", self.base_url, session_id))
                        .query(&[("expand[]", "payment_intent")]),
                )
                .await?;

            let status = map_session_status(session.status.as_deref(), session.payment_status.as_deref());
            let (charge_reference, transaction_reference) = match session.payment_intent {
                Some(IntentField::Expanded(intent)) => (Some(intent.id), intent.latest_charge),
                Some(IntentField::Id(id)) => (Some(id), None),
                None => (None, None),
            };
            return Ok(StatusReport {
                status,
                charge_reference,
                transaction_reference,
                detail: Some(format!(
                    "checkout session {} is {} / {}",
                    session.id,
                    session.status.as_deref().unwrap_or("unknown"),
                    session.payment_status.as_deref().unwrap_or("unknown")
                )),
            });
        }

        let intent_id = refs.charge.as_ref().ok_or(GatewayError::MissingReference("payment intent"))?;
        let intent: IntentReply = self
            .send(
                self.client
                    .get(format!("{}/v1/payment_intents/{}", self.base_url, intent_id)),
            )
            .await?;

        Ok(StatusReport {
            status: map_intent_status(&intent.status),
            charge_reference: Some(intent.id.clone()),
            transaction_reference: intent.latest_charge,
            detail: Some(format!("payment intent {} is {}", intent.id, intent.status)),
        })
    }

    async fn refund(
        &self,
        refs: &ProviderRefs,
        amount: Decimal,
        _currency: &str,
    ) -> Result<RefundReceipt, GatewayError> {
        let intent_id = refs.charge.as_ref().ok_or(GatewayError::MissingReference("payment intent"))?;
        let form = [
            ("payment_intent".to_string(), intent_id.clone()),
            ("amount".to_string(), to_minor_units(amount)?.to_string()),
        ];

        let refund: RefundReply = self
            .send(self.client.post(format!("{}/v1/refunds", self.base_url)).form(&form))
            .await?;

        if refund.status == "failed" || refund.status == "canceled" {
            return Err(GatewayError::Declined {
                code: format!("refund_{}", refund.status),
                message: format!("refund {} was not accepted", refund.id),
            });
        }

        Ok(RefundReceipt {
            refund_reference: refund.id,
        })
    }
}
