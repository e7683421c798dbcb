use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use travel_checkout::booking::{BookingCommand, BookingDelegate, BookingError};
use travel_checkout::domain::context::AuthContext;
use travel_checkout::domain::events::{PaymentEvent, PaymentEventKind};
use travel_checkout::domain::payment::{
    BookingLink, BookingParams, CheckoutRequest, Continuation, NewPayment, Participant, Payment,
    PaymentMethod, PaymentStatus,
};
use travel_checkout::error::CheckoutError;
use travel_checkout::gateways::mock::MockGateway;
use travel_checkout::gateways::{GatewayRegistry, ProviderStatus};
use travel_checkout::repo::in_memory::InMemoryPaymentStore;
use travel_checkout::repo::payments_repo::PaymentStore;
use travel_checkout::service::event_publisher::EventPublisher;
use travel_checkout::service::payment_locks::PaymentLocks;
use travel_checkout::service::payment_orchestrator::{CheckoutUrls, PaymentOrchestrator};
use uuid::Uuid;

#[derive(Default)]
struct RecordingBooking {
    calls: AtomicUsize,
    fail: AtomicBool,
    commands: Mutex<Vec<BookingCommand>>,
    booking_id: Mutex<Option<Uuid>>,
}

impl RecordingBooking {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BookingDelegate for RecordingBooking {
    async fn create_booking(&self, command: BookingCommand, _auth: &AuthContext) -> Result<Uuid, BookingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // widen the window so concurrent confirms would both get here without the lock
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        self.commands.lock().unwrap().push(command);
        if self.fail.load(Ordering::SeqCst) {
            return Err(BookingError::Rejected {
                status: 409,
                message: "trip is full".to_string(),
            });
        }
        let id = Uuid::new_v4();
        *self.booking_id.lock().unwrap() = Some(id);
        Ok(id)
    }
}

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<(&'static str, String, PaymentEvent)>>,
}

impl RecordingPublisher {
    fn of_kind(&self, kind: PaymentEventKind) -> Vec<PaymentEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, e)| e.event_type == kind)
            .map(|(_, _, e)| e.clone())
            .collect()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, topic: &'static str, key: String, event: PaymentEvent) {
        self.events.lock().unwrap().push((topic, key, event));
    }
}

struct Harness {
    orchestrator: PaymentOrchestrator,
    store: InMemoryPaymentStore,
    gateway: Arc<MockGateway>,
    booking: Arc<RecordingBooking>,
    events: Arc<RecordingPublisher>,
}

fn harness(behavior: &str) -> Harness {
    let store = InMemoryPaymentStore::new();
    let gateway = Arc::new(MockGateway::new("mock", behavior));
    let booking = Arc::new(RecordingBooking::default());
    let events = Arc::new(RecordingPublisher::default());
    let orchestrator = PaymentOrchestrator {
        store: Arc::new(store.clone()),
        gateways: GatewayRegistry::new()
            .register(PaymentMethod::Card, gateway.clone())
            .register(PaymentMethod::Wallet, gateway.clone()),
        booking: booking.clone(),
        events: events.clone(),
        locks: PaymentLocks::new(),
        urls: CheckoutUrls {
            return_url: "https://trips.example/return".to_string(),
            cancel_url: "https://trips.example/cancel".to_string(),
        },
    };
    Harness {
        orchestrator,
        store,
        gateway,
        booking,
        events,
    }
}

fn deferred_request(method_token: Option<&str>) -> CheckoutRequest {
    let trip_id = Uuid::new_v4();
    CheckoutRequest {
        payer_id: Uuid::new_v4(),
        payer_name: "Grace Hopper".to_string(),
        trip_id: Some(trip_id),
        manager_id: Some(Uuid::new_v4()),
        amount: dec!(100.00),
        currency: "USD".to_string(),
        method: PaymentMethod::Card,
        method_token: method_token.map(str::to_string),
        save_method: false,
        customer_reference: None,
        booking_id: None,
        booking: Some(BookingParams {
            trip_id,
            participant_count: 2,
            participants: vec![Participant {
                full_name: "Grace Hopper".to_string(),
                email: Some("grace@example.com".to_string()),
                phone: None,
                birth_date: None,
            }],
        }),
    }
}

fn existing_booking_request(booking_id: Uuid) -> CheckoutRequest {
    let mut req = deferred_request(Some("pm_card_visa"));
    req.booking = None;
    req.booking_id = Some(booking_id);
    req
}

fn session_of(continuation: &Continuation) -> String {
    match continuation {
        Continuation::Redirect { redirect_url } => redirect_url
            .split("session=")
            .nth(1)
            .expect("redirect carries the session")
            .to_string(),
        other => panic!("expected redirect, got {other:?}"),
    }
}

async fn settle_via_redirect(h: &Harness) -> (Uuid, String) {
    let resp = h
        .orchestrator
        .initiate_checkout(deferred_request(None), &AuthContext::anonymous())
        .await
        .unwrap();
    let session = session_of(&resp.continuation);
    h.orchestrator
        .confirm(&session, None, &AuthContext::bearer("user-token"))
        .await
        .unwrap();
    (resp.payment.payment_id, session)
}

#[tokio::test]
async fn immediate_settlement_with_existing_booking() {
    let h = harness("SETTLE");
    let booking_id = Uuid::new_v4();

    let resp = h
        .orchestrator
        .initiate_checkout(existing_booking_request(booking_id), &AuthContext::anonymous())
        .await
        .unwrap();

    assert_eq!(resp.payment.status, PaymentStatus::Completed);
    assert_eq!(resp.payment.booking_id, Some(booking_id));
    assert!(!resp.payment.booking_pending);
    assert_eq!(resp.payment.fee, dec!(3.20));
    assert_eq!(resp.payment.net_amount, dec!(96.80));
    assert!(resp.payment.paid_at.is_some());
    assert!(matches!(resp.continuation, Continuation::ClientSecret { .. }));
    assert_eq!(h.booking.calls(), 0);

    let completed = h.events.of_kind(PaymentEventKind::PaymentCompleted);
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].payment_id, resp.payment.payment_id);
    assert_eq!(completed[0].amount, dec!(100.00));
}

#[tokio::test]
async fn redirect_then_confirm_creates_booking_once() {
    let h = harness("SETTLE");

    let resp = h
        .orchestrator
        .initiate_checkout(deferred_request(None), &AuthContext::anonymous())
        .await
        .unwrap();
    assert_eq!(resp.payment.status, PaymentStatus::Processing);
    assert!(resp.payment.booking_pending);
    assert!(h.events.of_kind(PaymentEventKind::PaymentCompleted).is_empty());

    let session = session_of(&resp.continuation);
    let view = h
        .orchestrator
        .confirm(&session, None, &AuthContext::bearer("user-token"))
        .await
        .unwrap();

    assert_eq!(view.status, PaymentStatus::Completed);
    assert_eq!(h.booking.calls(), 1);
    let created = *h.booking.booking_id.lock().unwrap();
    assert_eq!(view.booking_id, created);
    assert!(!view.booking_pending);

    let stored = h.store.get(view.payment_id).await.unwrap().unwrap();
    assert!(stored.pending_booking_details.is_none());
    assert!(stored.provider_transaction_ref.is_some());

    let command = &h.booking.commands.lock().unwrap()[0];
    assert_eq!(command.participant_count, 2);
    assert_eq!(command.payer_name, "Grace Hopper");
    assert_eq!(h.events.of_kind(PaymentEventKind::PaymentCompleted).len(), 1);
}

#[tokio::test]
async fn repeated_confirm_is_idempotent() {
    let h = harness("SETTLE");
    let (payment_id, session) = settle_via_redirect(&h).await;
    let status_checks = h.gateway.status_calls();

    let again = h
        .orchestrator
        .confirm(&session, None, &AuthContext::anonymous())
        .await
        .unwrap();

    assert_eq!(again.payment_id, payment_id);
    assert_eq!(again.status, PaymentStatus::Completed);
    assert_eq!(h.booking.calls(), 1);
    assert_eq!(h.gateway.status_calls(), status_checks);
    assert_eq!(h.events.of_kind(PaymentEventKind::PaymentCompleted).len(), 1);
}

#[tokio::test]
async fn concurrent_confirms_book_once() {
    let h = harness("SETTLE");
    let resp = h
        .orchestrator
        .initiate_checkout(deferred_request(None), &AuthContext::anonymous())
        .await
        .unwrap();
    let session = session_of(&resp.continuation);

    let auth = AuthContext::anonymous();
    let (a, b) = tokio::join!(
        h.orchestrator.confirm(&session, None, &auth),
        h.orchestrator.confirm(&session, None, &auth),
    );

    assert_eq!(a.unwrap().status, PaymentStatus::Completed);
    assert_eq!(b.unwrap().status, PaymentStatus::Completed);
    assert_eq!(h.booking.calls(), 1);
    assert_eq!(h.events.of_kind(PaymentEventKind::PaymentCompleted).len(), 1);
}

#[tokio::test]
async fn booking_failure_leaves_compensation_gap() {
    let h = harness("SETTLE");
    h.booking.fail.store(true, Ordering::SeqCst);

    let (payment_id, _) = settle_via_redirect(&h).await;

    let stored = h.store.get(payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
    assert!(stored.booking_id.is_none());
    assert!(stored.pending_booking_details.is_some());
    assert!(stored
        .failure_reason
        .as_deref()
        .is_some_and(|r| r.contains("booking creation failed")));

    let gaps = h.orchestrator.list_compensation_gaps(10).await.unwrap();
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].id, payment_id);
}

#[tokio::test]
async fn replay_closes_compensation_gap() {
    let h = harness("SETTLE");
    h.booking.fail.store(true, Ordering::SeqCst);
    let (payment_id, _) = settle_via_redirect(&h).await;

    let err = h
        .orchestrator
        .replay_pending_booking(payment_id, &AuthContext::anonymous())
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::Booking(_)));

    h.booking.fail.store(false, Ordering::SeqCst);
    let view = h
        .orchestrator
        .replay_pending_booking(payment_id, &AuthContext::anonymous())
        .await
        .unwrap();
    assert!(view.booking_id.is_some());
    assert!(view.failure_reason.is_none());
    assert_eq!(h.booking.calls(), 3);
    assert!(h.orchestrator.list_compensation_gaps(10).await.unwrap().is_empty());

    let err = h
        .orchestrator
        .replay_pending_booking(payment_id, &AuthContext::anonymous())
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::Conflict(_)));
}

#[tokio::test]
async fn partial_refund_keeps_gross_amount() {
    let h = harness("SETTLE");
    let resp = h
        .orchestrator
        .initiate_checkout(existing_booking_request(Uuid::new_v4()), &AuthContext::anonymous())
        .await
        .unwrap();

    let view = h
        .orchestrator
        .refund_payment(resp.payment.payment_id, Some(dec!(50.00)))
        .await
        .unwrap();

    assert_eq!(view.status, PaymentStatus::Refunded);
    assert_eq!(view.amount, dec!(100.00));
    assert_eq!(view.refunded_amount, Some(dec!(50.00)));
    assert!(view.refunded_at.is_some());
    assert_eq!(h.gateway.refund_calls(), 1);

    let refunded = h.events.of_kind(PaymentEventKind::PaymentRefunded);
    assert_eq!(refunded.len(), 1);
    assert_eq!(refunded[0].amount, dec!(50.00));
}

#[tokio::test]
async fn refund_rejects_out_of_range_amounts() {
    let h = harness("SETTLE");
    let resp = h
        .orchestrator
        .initiate_checkout(existing_booking_request(Uuid::new_v4()), &AuthContext::anonymous())
        .await
        .unwrap();
    let id = resp.payment.payment_id;

    for amount in [dec!(0), dec!(-1), dec!(100.01)] {
        let err = h.orchestrator.refund_payment(id, Some(amount)).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)), "{amount}");
    }
    assert_eq!(h.gateway.refund_calls(), 0);
}

#[tokio::test]
async fn refund_requires_completed_payment() {
    let h = harness("SETTLE");
    let now = chrono::Utc::now();

    for status in [
        PaymentStatus::Pending,
        PaymentStatus::Processing,
        PaymentStatus::Failed,
        PaymentStatus::Cancelled,
        PaymentStatus::Refunded,
    ] {
        let mut payment = Payment::new(
            NewPayment {
                payer_id: Uuid::new_v4(),
                payer_name: "Alan Turing".to_string(),
                trip_id: None,
                manager_id: None,
                amount: dec!(40.00),
                currency: "USD".to_string(),
                method: PaymentMethod::Card,
                booking: BookingLink::Existing(Uuid::new_v4()),
            },
            now,
        );
        let path: &[PaymentStatus] = match status {
            PaymentStatus::Pending => &[],
            PaymentStatus::Processing => &[PaymentStatus::Processing],
            PaymentStatus::Refunded => &[
                PaymentStatus::Processing,
                PaymentStatus::Completed,
                PaymentStatus::Refunded,
            ],
            other => &[PaymentStatus::Processing, other],
        };
        for step in path {
            payment.transition(*step, now).unwrap();
        }
        h.store.insert(&payment).await.unwrap();

        let err = h.orchestrator.refund_payment(payment.id, None).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Conflict(_)), "{status}");
    }
    assert_eq!(h.gateway.refund_calls(), 0);
    assert!(h.events.of_kind(PaymentEventKind::PaymentRefunded).is_empty());
}

#[tokio::test]
async fn refund_gateway_failure_leaves_payment_completed() {
    let h = harness("SETTLE");
    let resp = h
        .orchestrator
        .initiate_checkout(existing_booking_request(Uuid::new_v4()), &AuthContext::anonymous())
        .await
        .unwrap();
    h.gateway.fail_refunds(true);

    let err = h
        .orchestrator
        .refund_payment(resp.payment.payment_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::Gateway(_)));

    let view = h.orchestrator.get_payment(resp.payment.payment_id).await.unwrap();
    assert_eq!(view.status, PaymentStatus::Completed);
    assert!(view.refunded_amount.is_none());
}

#[tokio::test]
async fn declined_checkout_is_recorded_as_failed() {
    let h = harness("DECLINE");
    let req = deferred_request(Some("pm_card_declined"));
    let payer_id = req.payer_id;

    let err = h
        .orchestrator
        .initiate_checkout(req, &AuthContext::anonymous())
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::Gateway(_)));
    assert_eq!(err.envelope().error.details.as_deref(), Some("MOCK_DECLINED"));

    let history = h.orchestrator.list_payer_payments(payer_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, PaymentStatus::Failed);
    assert!(history[0].failure_reason.is_some());
    assert_eq!(h.booking.calls(), 0);
}

#[tokio::test]
async fn confirm_gateway_error_leaves_state_untouched() {
    let h = harness("SETTLE");
    let resp = h
        .orchestrator
        .initiate_checkout(deferred_request(None), &AuthContext::anonymous())
        .await
        .unwrap();
    let session = session_of(&resp.continuation);

    let flaky = Harness {
        orchestrator: PaymentOrchestrator {
            gateways: GatewayRegistry::new()
                .register(PaymentMethod::Card, Arc::new(MockGateway::new("mock", "TIMEOUT"))),
            ..h.orchestrator.clone()
        },
        ..h
    };

    let err = flaky
        .orchestrator
        .confirm(&session, None, &AuthContext::anonymous())
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::Gateway(_)));

    let stored = flaky.store.get(resp.payment.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Processing);
    assert!(stored.pending_booking_details.is_some());
    assert_eq!(flaky.booking.calls(), 0);
}

#[tokio::test]
async fn voided_and_unsettled_reports_close_the_payment() {
    let h = harness("SETTLE");

    h.gateway.set_status(ProviderStatus::Voided);
    let resp = h
        .orchestrator
        .initiate_checkout(deferred_request(None), &AuthContext::anonymous())
        .await
        .unwrap();
    let view = h
        .orchestrator
        .confirm(&session_of(&resp.continuation), None, &AuthContext::anonymous())
        .await
        .unwrap();
    assert_eq!(view.status, PaymentStatus::Cancelled);

    h.gateway.set_status(ProviderStatus::RequiresAction);
    let resp = h
        .orchestrator
        .initiate_checkout(deferred_request(None), &AuthContext::anonymous())
        .await
        .unwrap();
    let view = h
        .orchestrator
        .confirm(&session_of(&resp.continuation), None, &AuthContext::anonymous())
        .await
        .unwrap();
    assert_eq!(view.status, PaymentStatus::Failed);
    assert!(view.failure_reason.is_some());

    assert_eq!(h.booking.calls(), 0);
    assert!(h.events.of_kind(PaymentEventKind::PaymentCompleted).is_empty());
}

#[tokio::test]
async fn confirm_rejects_unknown_and_blank_references() {
    let h = harness("SETTLE");
    let auth = AuthContext::anonymous();
    assert!(matches!(
        h.orchestrator.confirm("cs_unknown", None, &auth).await,
        Err(CheckoutError::NotFound(_))
    ));
    assert!(matches!(
        h.orchestrator.confirm("  ", None, &auth).await,
        Err(CheckoutError::Validation(_))
    ));
}

#[tokio::test]
async fn invalid_request_never_reaches_gateway() {
    let h = harness("SETTLE");
    let mut req = deferred_request(None);
    req.booking_id = Some(Uuid::new_v4());

    let err = h
        .orchestrator
        .initiate_checkout(req, &AuthContext::anonymous())
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::Validation(_)));
    assert_eq!(h.gateway.create_calls(), 0);
}

#[tokio::test]
async fn unregistered_method_is_a_validation_error() {
    let h = harness("SETTLE");
    let mut req = deferred_request(None);
    req.method = PaymentMethod::Other;

    let err = h
        .orchestrator
        .initiate_checkout(req, &AuthContext::anonymous())
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::Validation(_)));
}

#[tokio::test]
async fn account_erasure_cancels_only_open_payments() {
    let h = harness("SETTLE");
    let open = h
        .orchestrator
        .initiate_checkout(deferred_request(None), &AuthContext::anonymous())
        .await
        .unwrap();
    let payer_id = h.store.get(open.payment.payment_id).await.unwrap().unwrap().payer_id;

    let mut settled_req = existing_booking_request(Uuid::new_v4());
    settled_req.payer_id = payer_id;
    let settled = h
        .orchestrator
        .initiate_checkout(settled_req, &AuthContext::anonymous())
        .await
        .unwrap();

    let cancelled = h.orchestrator.handle_account_deleted(payer_id).await.unwrap();
    assert_eq!(cancelled, 1);

    let erased = h.store.get(open.payment.payment_id).await.unwrap().unwrap();
    assert_eq!(erased.status, PaymentStatus::Cancelled);
    assert!(erased.pending_booking_details.is_none());
    assert!(erased.cancelled_at.is_some());

    let kept = h.store.get(settled.payment.payment_id).await.unwrap().unwrap();
    assert_eq!(kept.status, PaymentStatus::Completed);

    assert_eq!(h.orchestrator.handle_account_deleted(payer_id).await.unwrap(), 0);
}

#[tokio::test]
async fn immediate_settlement_creates_pending_booking() {
    let h = harness("SETTLE");

    let resp = h
        .orchestrator
        .initiate_checkout(deferred_request(Some("pm_card_visa")), &AuthContext::bearer("user-token"))
        .await
        .unwrap();

    assert_eq!(resp.payment.status, PaymentStatus::Completed);
    assert_eq!(h.booking.calls(), 1);
    let created = *h.booking.booking_id.lock().unwrap();
    assert!(created.is_some());
    assert_eq!(resp.payment.booking_id, created);
    assert!(!resp.payment.booking_pending);

    let stored = h.store.get(resp.payment.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.booking_id, created);
    assert!(stored.pending_booking_details.is_none());
    assert_eq!(h.events.of_kind(PaymentEventKind::PaymentCompleted).len(), 1);
}

#[tokio::test]
async fn immediate_settlement_booking_failure_keeps_details() {
    let h = harness("SETTLE");
    h.booking.fail.store(true, Ordering::SeqCst);

    let resp = h
        .orchestrator
        .initiate_checkout(deferred_request(Some("pm_card_visa")), &AuthContext::anonymous())
        .await
        .unwrap();

    assert_eq!(resp.payment.status, PaymentStatus::Completed);
    assert!(resp.payment.booking_id.is_none());
    assert!(resp.payment.booking_pending);
    assert!(resp.payment.failure_reason.is_some());
    assert_eq!(h.booking.calls(), 1);

    let stored = h.store.get(resp.payment.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Completed);
    assert!(stored.pending_booking_details.is_some());
    assert!(stored.has_compensation_gap());
}

#[tokio::test]
async fn replay_waits_for_checkout_booking_attempt() {
    let h = harness("SETTLE");
    let req = deferred_request(Some("pm_card_visa"));
    let payer_id = req.payer_id;
    let auth = AuthContext::anonymous();

    let checkout = h.orchestrator.initiate_checkout(req, &auth);
    let replay = async {
        let payment_id = loop {
            if let Some(p) = h.store.list_by_payer(payer_id).await.unwrap().first() {
                break p.id;
            }
            tokio::task::yield_now().await;
        };
        h.orchestrator.replay_pending_booking(payment_id, &auth).await
    };
    let (checkout, replay) = tokio::join!(checkout, replay);

    assert!(checkout.unwrap().payment.booking_id.is_some());
    assert!(matches!(replay, Err(CheckoutError::Conflict(_))));
    assert_eq!(h.booking.calls(), 1);
}
