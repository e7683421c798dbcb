use crate::booking::{BookingCommand, BookingDelegate, BookingError};
use crate::domain::context::AuthContext;
use crate::domain::events::PaymentEvent;
use crate::domain::fees::round_money;
use crate::domain::payment::{
    BookingLink, CheckoutRequest, CheckoutResponse, NewPayment, Payment, PaymentStatus, PaymentView,
};
use crate::error::CheckoutError;
use crate::gateways::{ChargeRequest, GatewayRegistry, PaymentGateway, ProviderRefs, ProviderStatus};
use crate::repo::payments_repo::PaymentStore;
use crate::service::event_publisher::EventPublisher;
use crate::service::payment_locks::PaymentLocks;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub return_url: String,
    pub cancel_url: String,
}

/// Result of trying to create the booking a payment was waiting for.
#[derive(Debug)]
pub enum BookingOutcome {
    Created(Uuid),
    Failed(BookingError),
    NotPending,
}

/// Drives a payment from checkout to settlement, refund or cancellation and
/// creates the deferred booking once money has moved.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    pub store: Arc<dyn PaymentStore>,
    pub gateways: GatewayRegistry,
    pub booking: Arc<dyn BookingDelegate>,
    pub events: Arc<dyn EventPublisher>,
    pub locks: PaymentLocks,
    pub urls: CheckoutUrls,
}

impl PaymentOrchestrator {
    pub async fn initiate_checkout(
        &self,
        req: CheckoutRequest,
        auth: &AuthContext,
    ) -> Result<CheckoutResponse, CheckoutError> {
        let link = validate_checkout(&req)?;
        let gateway = self.gateways.for_method(req.method).ok_or_else(|| {
            CheckoutError::Validation(format!("payment method {} is not available", req.method.as_str()))
        })?;

        let trip_id = match &link {
            BookingLink::Deferred(params) => Some(params.trip_id),
            BookingLink::Existing(_) => req.trip_id,
        };
        let now = Utc::now();
        let mut payment = Payment::new(
            NewPayment {
                payer_id: req.payer_id,
                payer_name: req.payer_name.clone(),
                trip_id,
                manager_id: req.manager_id,
                amount: req.amount,
                currency: req.currency.trim().to_uppercase(),
                method: req.method,
                booking: link,
            },
            now,
        );

        let charge = ChargeRequest {
            payment_id: payment.id,
            transaction_ref: payment.transaction_ref.clone(),
            payer_id: payment.payer_id,
            amount: payment.amount,
            currency: payment.currency.clone(),
            description: match payment.trip_id {
                Some(trip) => format!("Trip {trip} ({})", payment.transaction_ref),
                None => format!("Travel booking {}", payment.transaction_ref),
            },
            method_token: req.method_token.clone(),
            save_method: req.save_method,
            customer_reference: req.customer_reference.clone(),
            return_url: self.urls.return_url.clone(),
            cancel_url: self.urls.cancel_url.clone(),
        };

        let creation = match gateway.create(charge).await {
            Ok(c) => c,
            Err(e) => {
                payment.transition(PaymentStatus::Processing, now)?;
                payment.transition(PaymentStatus::Failed, now)?;
                payment.failure_reason = Some(format!("{} gateway rejected the charge: {e}", gateway.name()));
                self.store.insert(&payment).await?;
                tracing::warn!(
                    payment_id = %payment.id,
                    transaction_ref = %payment.transaction_ref,
                    gateway = gateway.name(),
                    error = %e,
                    "checkout failed at gateway"
                );
                return Err(e.into());
            }
        };

        payment.provider_charge_ref = creation.charge_reference;
        payment.provider_session_ref = creation.session_reference;
        payment.provider_transaction_ref = creation.transaction_reference;
        payment.transition(PaymentStatus::Processing, now)?;
        if creation.settled {
            payment.transition(PaymentStatus::Completed, now)?;
        }
        // held through the booking attempt; the row is visible to replay once inserted
        let _guard = self.locks.acquire(payment.id).await;
        self.store.insert(&payment).await?;
        tracing::info!(
            payment_id = %payment.id,
            transaction_ref = %payment.transaction_ref,
            status = %payment.status,
            mode = ?creation.mode,
            "checkout initiated"
        );

        if payment.status == PaymentStatus::Completed {
            self.publish_completed(&payment);
            self.attach_deferred_booking(&mut payment, auth).await?;
        }

        Ok(CheckoutResponse {
            payment: PaymentView::from(&payment),
            continuation: creation.continuation,
        })
    }

    /// Settles a payment from whichever provider reference the caller holds.
    /// Replays on a payment that already left PROCESSING are no-ops.
    pub async fn confirm(
        &self,
        reference: &str,
        payer_token: Option<&str>,
        auth: &AuthContext,
    ) -> Result<PaymentView, CheckoutError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(CheckoutError::Validation("reference is required".to_string()));
        }

        let found = self
            .store
            .find_by_provider_reference(reference)
            .await?
            .ok_or_else(|| CheckoutError::NotFound(format!("no payment for reference {reference}")))?;

        let _guard = self.locks.acquire(found.id).await;
        let mut payment = self.load(found.id).await?;
        if !payment.status.is_open() {
            tracing::debug!(payment_id = %payment.id, status = %payment.status, "confirm replay ignored");
            return Ok(PaymentView::from(&payment));
        }

        let gateway = self.gateway_for(&payment)?;
        let report = gateway
            .retrieve_status(&ProviderRefs::from(&payment), payer_token)
            .await?;

        let now = Utc::now();
        if payment.status == PaymentStatus::Pending {
            payment.transition(PaymentStatus::Processing, now)?;
        }
        match report.status {
            ProviderStatus::Settled => {
                payment.transition(PaymentStatus::Completed, now)?;
                payment.backfill_refs(report.charge_reference, report.transaction_reference);
            }
            ProviderStatus::Voided => {
                payment.transition(PaymentStatus::Cancelled, now)?;
            }
            ProviderStatus::Pending | ProviderStatus::RequiresAction => {
                payment.transition(PaymentStatus::Failed, now)?;
                payment.failure_reason = Some(format!(
                    "provider has not settled the payment ({:?}): {}",
                    report.status,
                    report.detail.as_deref().unwrap_or("no detail")
                ));
            }
        }
        self.store.update(&payment).await?;
        tracing::info!(
            payment_id = %payment.id,
            transaction_ref = %payment.transaction_ref,
            status = %payment.status,
            "payment confirmed"
        );

        if payment.status == PaymentStatus::Completed {
            self.publish_completed(&payment);
            self.attach_deferred_booking(&mut payment, auth).await?;
        }

        Ok(PaymentView::from(&payment))
    }

    pub async fn refund_payment(
        &self,
        payment_id: Uuid,
        amount: Option<Decimal>,
    ) -> Result<PaymentView, CheckoutError> {
        let _guard = self.locks.acquire(payment_id).await;
        let mut payment = self.load(payment_id).await?;
        if payment.status != PaymentStatus::Completed {
            return Err(CheckoutError::Conflict(
                "only completed payments can be refunded".to_string(),
            ));
        }

        let amount = round_money(amount.unwrap_or(payment.amount));
        if amount <= Decimal::ZERO || amount > payment.amount {
            return Err(CheckoutError::Validation(format!(
                "refund amount must be between 0 and {}",
                payment.amount
            )));
        }

        let gateway = self.gateway_for(&payment)?;
        let receipt = gateway
            .refund(&ProviderRefs::from(&payment), amount, &payment.currency)
            .await?;

        let now = Utc::now();
        payment.transition(PaymentStatus::Refunded, now)?;
        payment.refunded_amount = Some(amount);
        self.store.update(&payment).await?;
        tracing::info!(
            payment_id = %payment.id,
            refund_reference = %receipt.refund_reference,
            amount = %amount,
            "payment refunded"
        );

        let event = PaymentEvent::refunded(&payment, amount, now);
        self.events
            .publish(event.event_type.topic(), payment.id.to_string(), event);

        Ok(PaymentView::from(&payment))
    }

    /// Operator-triggered retry of a booking that failed after the charge
    /// settled. Runs the delegate once; nothing retries it automatically.
    pub async fn replay_pending_booking(
        &self,
        payment_id: Uuid,
        auth: &AuthContext,
    ) -> Result<PaymentView, CheckoutError> {
        let _guard = self.locks.acquire(payment_id).await;
        let mut payment = self.load(payment_id).await?;
        if !payment.has_compensation_gap() {
            return Err(CheckoutError::Conflict(format!(
                "payment {} has no pending booking to replay",
                payment.id
            )));
        }

        match self.attach_deferred_booking(&mut payment, auth).await? {
            BookingOutcome::Failed(e) => Err(e.into()),
            _ => Ok(PaymentView::from(&payment)),
        }
    }

    pub async fn list_compensation_gaps(&self, limit: i64) -> Result<Vec<Payment>, CheckoutError> {
        Ok(self.store.list_compensation_gaps(limit.clamp(1, 500)).await?)
    }

    /// Cancels every still-open payment of a deleted account. Settled and
    /// refunded records stay for audit.
    pub async fn handle_account_deleted(&self, payer_id: Uuid) -> Result<usize, CheckoutError> {
        let candidates = self.store.list_by_payer(payer_id).await?;
        let mut cancelled = 0;

        for candidate in candidates.into_iter().filter(|p| p.status.is_open()) {
            let _guard = self.locks.acquire(candidate.id).await;
            let mut payment = self.load(candidate.id).await?;
            if !payment.status.is_open() {
                continue;
            }

            let now = Utc::now();
            if payment.status == PaymentStatus::Pending {
                payment.transition(PaymentStatus::Processing, now)?;
            }
            payment.transition(PaymentStatus::Cancelled, now)?;
            payment.pending_booking_details = None;
            payment.failure_reason = Some("payer account deleted".to_string());
            self.store.update(&payment).await?;
            cancelled += 1;
        }

        tracing::info!(payer_id = %payer_id, cancelled, "account erasure applied to payments");
        Ok(cancelled)
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> Result<PaymentView, CheckoutError> {
        Ok(PaymentView::from(&self.load(payment_id).await?))
    }

    pub async fn list_payer_payments(&self, payer_id: Uuid) -> Result<Vec<PaymentView>, CheckoutError> {
        let payments = self.store.list_by_payer(payer_id).await?;
        Ok(payments.iter().map(PaymentView::from).collect())
    }

    async fn load(&self, payment_id: Uuid) -> Result<Payment, CheckoutError> {
        self.store
            .get(payment_id)
            .await?
            .ok_or_else(|| CheckoutError::NotFound(format!("payment {payment_id} not found")))
    }

    fn gateway_for(&self, payment: &Payment) -> Result<Arc<dyn PaymentGateway>, CheckoutError> {
        self.gateways.for_method(payment.method).ok_or_else(|| {
            CheckoutError::Internal(anyhow::anyhow!(
                "no gateway registered for {} payments",
                payment.method.as_str()
            ))
        })
    }

    fn publish_completed(&self, payment: &Payment) {
        let event = PaymentEvent::completed(payment, payment.paid_at.unwrap_or_else(Utc::now));
        self.events
            .publish(event.event_type.topic(), payment.id.to_string(), event);
    }

    /// Creates the booking a settled payment is waiting for. The
    /// `booking_id == None` check is the only guard against double booking,
    /// so callers must hold the payment's lock.
    async fn attach_deferred_booking(
        &self,
        payment: &mut Payment,
        auth: &AuthContext,
    ) -> Result<BookingOutcome, CheckoutError> {
        if !payment.awaits_booking() {
            return Ok(BookingOutcome::NotPending);
        }
        let Some(details) = payment.pending_booking_details.as_ref() else {
            return Ok(BookingOutcome::NotPending);
        };

        let command = BookingCommand::from_snapshot(details.snapshot(), payment.payer_id);
        let outcome = match self.booking.create_booking(command, auth).await {
            Ok(booking_id) => {
                payment.resolve_booking(booking_id, Utc::now());
                tracing::info!(payment_id = %payment.id, booking_id = %booking_id, "deferred booking created");
                BookingOutcome::Created(booking_id)
            }
            Err(e) => {
                payment.failure_reason = Some(format!("payment captured but booking creation failed: {e}"));
                payment.updated_at = Utc::now();
                tracing::warn!(
                    payment_id = %payment.id,
                    transaction_ref = %payment.transaction_ref,
                    error = %e,
                    "compensation gap: charge settled without booking"
                );
                BookingOutcome::Failed(e)
            }
        };

        self.store.update(payment).await?;
        Ok(outcome)
    }
}

/// Checks the request shape and decides between the subscribe-first and the
/// payment-first flow.
pub fn validate_checkout(req: &CheckoutRequest) -> Result<BookingLink, CheckoutError> {
    if req.amount <= Decimal::ZERO {
        return Err(CheckoutError::Validation("amount must be > 0".to_string()));
    }
    if req.amount.scale() > 2 && round_money(req.amount) != req.amount {
        return Err(CheckoutError::Validation("amount has more than two decimals".to_string()));
    }
    let currency = req.currency.trim();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(CheckoutError::Validation(format!("invalid currency {currency:?}")));
    }

    match (req.booking_id, &req.booking) {
        (Some(_), Some(_)) => Err(CheckoutError::Validation(
            "booking_id and booking parameters are mutually exclusive".to_string(),
        )),
        (None, None) => Err(CheckoutError::Validation(
            "either booking_id or booking parameters are required".to_string(),
        )),
        (Some(id), None) => Ok(BookingLink::Existing(id)),
        (None, Some(params)) => {
            if params.participant_count == 0 {
                return Err(CheckoutError::Validation("participant_count must be >= 1".to_string()));
            }
            if params.participants.len() > params.participant_count as usize {
                return Err(CheckoutError::Validation(
                    "more participant details than participant_count".to_string(),
                ));
            }
            if matches!(req.trip_id, Some(trip) if trip != params.trip_id) {
                return Err(CheckoutError::Validation(
                    "trip_id does not match booking.trip_id".to_string(),
                ));
            }
            if req.payer_name.trim().is_empty() {
                return Err(CheckoutError::Validation("payer_name is required".to_string()));
            }
            Ok(BookingLink::Deferred(params.clone()))
        }
    }
}
