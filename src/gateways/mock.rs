use crate::domain::payment::Continuation;
use crate::gateways::{
    ChargeCreation, ChargeMode, ChargeRequest, GatewayError, PaymentGateway, ProviderRefs,
    ProviderStatus, RefundReceipt, StatusReport,
};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Scriptable in-process gateway. `behavior` is one of `SETTLE` (capture when
/// a token is given, redirect otherwise), `REDIRECT`, `DECLINE` or `TIMEOUT`.
pub struct MockGateway {
    pub gateway_name: String,
    pub behavior: String,
    status: Mutex<ProviderStatus>,
    refund_fails: AtomicBool,
    create_calls: AtomicUsize,
    status_calls: AtomicUsize,
    refund_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new(gateway_name: &str, behavior: &str) -> Self {
        Self {
            gateway_name: gateway_name.to_string(),
            behavior: behavior.to_uppercase(),
            status: Mutex::new(ProviderStatus::Settled),
            refund_fails: AtomicBool::new(false),
            create_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
        }
    }

    /// What `retrieve_status` reports from now on.
    pub fn set_status(&self, status: ProviderStatus) {
        if let Ok(mut s) = self.status.lock() {
            *s = status;
        }
    }

    pub fn fail_refunds(&self, fail: bool) {
        self.refund_fails.store(fail, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }

    fn reference(&self, prefix: &str) -> String {
        format!("{}_{}_{}", self.gateway_name, prefix, uuid::Uuid::new_v4().simple())
    }
}

#[async_trait::async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create(&self, request: ChargeRequest) -> Result<ChargeCreation, GatewayError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        match self.behavior.as_str() {
            "DECLINE" => {
                return Err(GatewayError::Declined {
                    code: "MOCK_DECLINED".to_string(),
                    message: "mock decline".to_string(),
                })
            }
            "TIMEOUT" => return Err(GatewayError::Timeout),
            _ => {}
        }

        if self.behavior == "SETTLE" && request.method_token.is_some() {
            let charge = self.reference("intent");
            return Ok(ChargeCreation {
                mode: ChargeMode::Immediate,
                continuation: Continuation::ClientSecret {
                    client_secret: format!("{charge}_secret"),
                },
                charge_reference: Some(charge),
                session_reference: None,
                transaction_reference: Some(self.reference("txn")),
                settled: true,
            });
        }

        let session = self.reference("session");
        Ok(ChargeCreation {
            mode: ChargeMode::Redirect,
            continuation: Continuation::Redirect {
                redirect_url: format!("{}?session={}", request.return_url, session),
            },
            charge_reference: None,
            session_reference: Some(session),
            transaction_reference: None,
            settled: false,
        })
    }

    async fn retrieve_status(
        &self,
        refs: &ProviderRefs,
        _payer_token: Option<&str>,
    ) -> Result<StatusReport, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.behavior == "TIMEOUT" {
            return Err(GatewayError::Timeout);
        }

        let status = self
            .status
            .lock()
            .map(|s| *s)
            .map_err(|_| GatewayError::UnexpectedResponse("mock status lock poisoned".to_string()))?;
        let settled = status == ProviderStatus::Settled;
        Ok(StatusReport {
            status,
            charge_reference: refs.charge.clone().or_else(|| settled.then(|| self.reference("intent"))),
            transaction_reference: settled.then(|| self.reference("txn")),
            detail: Some(format!("mock reports {status:?}")),
        })
    }

    async fn refund(
        &self,
        _refs: &ProviderRefs,
        _amount: Decimal,
        _currency: &str,
    ) -> Result<RefundReceipt, GatewayError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        if self.refund_fails.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                status: 500,
                body: "mock refund failure".to_string(),
            });
        }
        Ok(RefundReceipt {
            refund_reference: self.reference("refund"),
        })
    }
}
