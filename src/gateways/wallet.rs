use crate::domain::fees::round_money;
use crate::domain::payment::Continuation;
use crate::gateways::{
    rejected, ChargeCreation, ChargeMode, ChargeRequest, GatewayError, PaymentGateway,
    ProviderRefs, ProviderStatus, RefundReceipt, StatusReport,
};
use reqwest::{RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Wallet provider with an approve-then-capture order flow. Every charge goes
/// through the provider's approval page, so `create` never settles.
pub struct WalletGateway {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub timeout_ms: u64,
    pub client: reqwest::Client,
    pub token_cache: TokenCache,
}

/// Last OAuth token issued to this gateway.
#[derive(Default)]
pub struct TokenCache(Mutex<Option<AccessToken>>);

struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenReply {
    access_token: String,
    #[serde(default = "default_token_ttl")]
    expires_in: u64,
}

fn default_token_ttl() -> u64 {
    300
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct Capture {
    id: String,
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct UnitPayments {
    #[serde(default)]
    captures: Vec<Capture>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    #[serde(default)]
    payments: Option<UnitPayments>,
}

#[derive(Debug, Deserialize)]
struct OrderReply {
    id: String,
    status: String,
    #[serde(default)]
    links: Vec<Link>,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

impl OrderReply {
    fn capture(&self) -> Option<&Capture> {
        self.purchase_units
            .iter()
            .filter_map(|u| u.payments.as_ref())
            .flat_map(|p| p.captures.iter())
            .next()
    }

    fn approval_url(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct RefundReply {
    id: String,
    status: String,
}

pub fn map_order_status(order_status: &str, capture_status: Option<&str>) -> ProviderStatus {
    match order_status {
        "COMPLETED" => match capture_status {
            None | Some("COMPLETED") => ProviderStatus::Settled,
            Some(_) => ProviderStatus::Pending,
        },
        "VOIDED" => ProviderStatus::Voided,
        "CREATED" | "SAVED" | "APPROVED" | "PAYER_ACTION_REQUIRED" => ProviderStatus::RequiresAction,
        _ => ProviderStatus::Pending,
    }
}

fn money_value(amount: Decimal) -> String {
    format!("{:.2}", round_money(amount))
}

impl WalletGateway {
    async fn access_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token_cache.0.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let resp = self
            .client
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .timeout(Duration::from_millis(self.timeout_ms))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            return Err(rejected(status, resp.text().await.unwrap_or_default()));
        }

        let reply: TokenReply = resp.json().await?;
        // refresh 30s before expiry
        let ttl = reply.expires_in.saturating_sub(30).max(1);
        *cached = Some(AccessToken {
            value: reply.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });
        Ok(reply.access_token)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, GatewayError> {
        let token = self.access_token().await?;
        let resp = builder
            .bearer_auth(token)
            .timeout(Duration::from_millis(self.timeout_ms))
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }

        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::UNPROCESSABLE_ENTITY {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&body) {
                let issue = v
                    .pointer("/details/0/issue")
                    .and_then(|i| i.as_str())
                    .unwrap_or("UNPROCESSABLE_ENTITY");
                let message = v
                    .pointer("/details/0/description")
                    .or_else(|| v.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or_default();
                return Err(GatewayError::Declined {
                    code: issue.to_string(),
                    message: message.to_string(),
                });
            }
        }
        Err(rejected(status, body))
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderReply, GatewayError> {
        self.send(
            self.client
                .get(format!("{}/v2/checkout/orders/{}", self.base_url, order_id)),
        )
        .await
    }

    /// Second leg of the flow: captures the order the payer approved.
    async fn execute(&self, order_id: &str, payer_token: &str) -> Result<OrderReply, GatewayError> {
        let res = self
            .send(
                self.client
                    .post(format!("{}/v2/checkout/orders/{}/capture", self.base_url, order_id))
                    .header("PayPal-Request-Id", format!("capture-{order_id}"))
                    .json(&json!({ "payer_id": payer_token })),
            )
            .await;

        match res {
            Err(GatewayError::Declined { code, .. }) if code == "ORDER_ALREADY_CAPTURED" => {
                self.get_order(order_id).await
            }
            other => other,
        }
    }
}

#[async_trait::async_trait]
impl PaymentGateway for WalletGateway {
    fn name(&self) -> &'static str {
        "wallet"
    }

    async fn create(&self, request: ChargeRequest) -> Result<ChargeCreation, GatewayError> {
        if request.method_token.is_some() {
            tracing::debug!(
                transaction_ref = %request.transaction_ref,
                "wallet orders always need payer approval, ignoring method token"
            );
        }

        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": request.transaction_ref,
                "custom_id": request.payment_id.to_string(),
                "description": request.description,
                "amount": {
                    "currency_code": request.currency.to_uppercase(),
                    "value": money_value(request.amount),
                }
            }],
            "application_context": {
                "return_url": request.return_url,
                "cancel_url": request.cancel_url,
                "user_action": "PAY_NOW",
            }
        });

        let order: OrderReply = self
            .send(
                self.client
                    .post(format!("{}/v2/checkout/orders", self.base_url))
                    .header("PayPal-Request-Id", request.transaction_ref.clone())
                    .json(&body),
            )
            .await?;

        let redirect_url = order
            .approval_url()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::UnexpectedResponse(format!("order {} has no approval link", order.id)))?;

        Ok(ChargeCreation {
            mode: ChargeMode::Redirect,
            charge_reference: None,
            session_reference: Some(order.id),
            transaction_reference: None,
            continuation: Continuation::Redirect { redirect_url },
            settled: false,
        })
    }

    async fn retrieve_status(
        &self,
        refs: &ProviderRefs,
        payer_token: Option<&str>,
    ) -> Result<StatusReport, GatewayError> {
        let order_id = refs.session.as_deref().ok_or(GatewayError::MissingReference("order"))?;
        let order = match payer_token {
            Some(token) => self.execute(order_id, token).await?,
            None => self.get_order(order_id).await?,
        };

        let capture = order.capture();
        let status = map_order_status(&order.status, capture.map(|c| c.status.as_str()));
        Ok(StatusReport {
            status,
            charge_reference: Some(order.id.clone()),
            transaction_reference: capture.map(|c| c.id.clone()),
            detail: Some(match capture {
                Some(c) => format!("order {} is {}, capture {} is {}", order.id, order.status, c.id, c.status),
                None => format!("order {} is {}", order.id, order.status),
            }),
        })
    }

    async fn refund(
        &self,
        refs: &ProviderRefs,
        amount: Decimal,
        currency: &str,
    ) -> Result<RefundReceipt, GatewayError> {
        let capture_id = refs
            .transaction
            .as_deref()
            .ok_or(GatewayError::MissingReference("capture"))?;

        let refund: RefundReply = self
            .send(
                self.client
                    .post(format!("{}/v2/payments/captures/{}/refund", self.base_url, capture_id))
                    .json(&json!({
                        "amount": {
                            "value": money_value(amount),
                            "currency_code": currency.to_uppercase(),
                        }
                    })),
            )
            .await?;

        if refund.status == "CANCELLED" || refund.status == "FAILED" {
            return Err(GatewayError::Declined {
                code: format!("REFUND_{}", refund.status),
                message: format!("refund {} was not accepted", refund.id),
            });
        }

        Ok(RefundReceipt {
            refund_reference: refund.id,
        })
    }
}
