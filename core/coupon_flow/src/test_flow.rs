use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::clock::ManualClock;
use crate::errors::{FlowError, PaymentFieldError};
use crate::flow::{FlowConfig, VerificationFlow, RESEND_COOLDOWN};
use crate::invariants::assert_all_flow_invariants;
use crate::mock::{MockOtpTransport, MockPaymentTransport};
use crate::transport::{OtpTransport, PaymentError, PaymentTransport, SendError, VerifyError};
use crate::types::{
    Destination, FieldKind, FlowState, PaymentDetails, PurchaseRequest, TransactionId,
};

fn setup_field(
    kind: FieldKind,
    verified: &str,
) -> (Arc<MockOtpTransport>, Arc<ManualClock>, VerificationFlow) {
    let otp = Arc::new(MockOtpTransport::default());
    let clock = Arc::new(ManualClock::default());
    let flow = VerificationFlow::for_field_change(
        kind,
        verified,
        otp.clone(),
        clock.clone(),
        FlowConfig::default(),
    );
    (otp, clock, flow)
}

fn setup_purchase() -> (
    Arc<MockOtpTransport>,
    Arc<MockPaymentTransport>,
    VerificationFlow,
) {
    let otp = Arc::new(MockOtpTransport::default());
    let payment = Arc::new(MockPaymentTransport::default());
    let flow = VerificationFlow::for_purchase(
        Destination::new(FieldKind::Email, "buyer@x.com"),
        PurchaseRequest {
            package_id: "premium".to_string(),
            price: 49_900,
        },
        otp.clone(),
        payment.clone(),
        Arc::new(ManualClock::default()),
        FlowConfig::default(),
    );
    (otp, payment, flow)
}

fn enter_code(flow: &VerificationFlow, code: &str) {
    for (i, ch) in code.chars().enumerate() {
        flow.enter_digit(i, &ch.to_string()).unwrap();
    }
}

fn good_card() -> PaymentDetails {
    PaymentDetails {
        card_number: "4111111111111111".to_string(),
        expiry: "12/29".to_string(),
        cvv: "123".to_string(),
        holder_name: "John Doe".to_string(),
    }
}

fn check_invariants(flow: &VerificationFlow) {
    assert_all_flow_invariants(&flow.transitions(), &flow.snapshot());
}

/// OTP transport that parks every call until the test releases it.
#[derive(Default)]
struct GatedOtp {
    gate: Notify,
    calls: AtomicUsize,
    fail: AtomicBool,
}

#[async_trait]
impl OtpTransport for GatedOtp {
    async fn send_code(&self, _destination: &Destination) -> Result<(), SendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(SendError("SMS gateway unavailable".to_string()));
        }
        Ok(())
    }

    async fn verify_code(
        &self,
        _destination: &Destination,
        _code: &str,
    ) -> Result<(), VerifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(())
    }
}

/// Payment gateway that parks every charge until the test releases it.
#[derive(Default)]
struct GatedPayment {
    gate: Notify,
    calls: AtomicUsize,
}

#[async_trait]
impl PaymentTransport for GatedPayment {
    async fn charge(
        &self,
        _details: &PaymentDetails,
        _amount: u64,
    ) -> Result<TransactionId, PaymentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(TransactionId("TXN-LATE".to_string()))
    }
}

fn gated_field(
    kind: FieldKind,
    verified: &str,
) -> (Arc<GatedOtp>, Arc<ManualClock>, Arc<VerificationFlow>) {
    let otp = Arc::new(GatedOtp::default());
    let clock = Arc::new(ManualClock::default());
    let flow = Arc::new(VerificationFlow::for_field_change(
        kind,
        verified,
        otp.clone(),
        clock.clone(),
        FlowConfig::default(),
    ));
    (otp, clock, flow)
}

async fn wait_for(flow: &VerificationFlow, state: FlowState) {
    while flow.state() != state {
        tokio::task::yield_now().await;
    }
}

// ─────────────────────────────────────────────────────────
// Field change
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_email_change_verifies_new_value() {
    let (otp, _clock, flow) = setup_field(FieldKind::Email, "old@x.com");

    assert_eq!(flow.request_change("new@x.com"), Ok(FlowState::Idle));
    assert_eq!(flow.send_code().await, Ok(FlowState::AwaitingCode));
    assert_eq!(otp.sent(), vec![Destination::new(FieldKind::Email, "new@x.com")]);

    enter_code(&flow, "123456");
    assert_eq!(flow.submit_code().await, Ok(FlowState::Verified));

    let snapshot = flow.snapshot();
    assert_eq!(snapshot.verified_value, "new@x.com");
    assert!(snapshot.pending.is_none());
    assert!(snapshot.change.is_none());
    assert!(flow.is_verified());
    check_invariants(&flow);
}

#[tokio::test]
async fn test_send_code_focuses_first_digit() {
    let (_otp, _clock, flow) = setup_field(FieldKind::Phone, "+15550000");
    flow.request_change("+15551111").unwrap();
    flow.send_code().await.unwrap();

    let pending = flow.snapshot().pending.unwrap();
    assert_eq!(pending.code_digits, vec![None; 6]);
    assert_eq!(pending.destination, "+15551111");
    assert_eq!(flow.resend_remaining(), RESEND_COOLDOWN);
}

#[tokio::test]
async fn test_unchanged_value_is_a_no_op() {
    let (_otp, _clock, flow) = setup_field(FieldKind::Phone, "+15550000");
    assert_eq!(flow.request_change("+15550000"), Err(FlowError::Unchanged));
    assert!(!flow.has_pending_change());
    assert!(flow.transitions().is_empty());
}

#[tokio::test]
async fn test_send_code_without_change_is_rejected() {
    let (otp, _clock, flow) = setup_field(FieldKind::Phone, "+15550000");
    assert!(matches!(
        flow.send_code().await,
        Err(FlowError::InvalidTransition { op: "send_code", .. })
    ));
    assert_eq!(otp.send_count(), 0);
}

#[tokio::test]
async fn test_send_failure_returns_to_idle() {
    let (otp, _clock, flow) = setup_field(FieldKind::Phone, "+15550000");
    otp.set_fail_sends(true);
    flow.request_change("+15551111").unwrap();

    assert!(matches!(flow.send_code().await, Err(FlowError::SendFailed(_))));
    assert_eq!(flow.state(), FlowState::Idle);
    assert!(matches!(flow.snapshot().error, Some(FlowError::SendFailed(_))));

    otp.set_fail_sends(false);
    assert_eq!(flow.send_code().await, Ok(FlowState::AwaitingCode));
    assert_eq!(flow.snapshot().error, None);
    check_invariants(&flow);
}

#[tokio::test]
async fn test_incomplete_code_never_reaches_transport() {
    let (otp, _clock, flow) = setup_field(FieldKind::Email, "old@x.com");
    flow.request_change("new@x.com").unwrap();
    flow.send_code().await.unwrap();

    enter_code(&flow, "1234");
    assert_eq!(
        flow.submit_code().await,
        Err(FlowError::IncompleteCode {
            entered: 4,
            expected: 6
        })
    );
    assert_eq!(otp.verify_count(), 0);
    assert_eq!(flow.state(), FlowState::AwaitingCode);
    check_invariants(&flow);
}

#[tokio::test]
async fn test_wrong_code_keeps_digits_until_resend() {
    let (otp, clock, flow) = setup_field(FieldKind::Email, "old@x.com");
    flow.request_change("new@x.com").unwrap();
    flow.send_code().await.unwrap();

    enter_code(&flow, "654321");
    assert!(matches!(flow.submit_code().await, Err(FlowError::VerifyRejected(_))));
    assert_eq!(flow.state(), FlowState::AwaitingCode);

    let pending = flow.snapshot().pending.unwrap();
    assert_eq!(pending.code(), "654321");
    assert!(matches!(pending.attempt_error, Some(FlowError::VerifyRejected(_))));

    // fixing one digit clears the error
    flow.enter_digit(0, "1").unwrap();
    let snapshot = flow.snapshot();
    assert_eq!(snapshot.error, None);
    assert_eq!(snapshot.pending.unwrap().attempt_error, None);

    clock.advance(RESEND_COOLDOWN);
    flow.resend_code().await.unwrap();
    assert_eq!(flow.snapshot().pending.unwrap().entered(), 0);
    assert_eq!(otp.send_count(), 2);

    let hops: Vec<_> = flow.transitions().iter().map(|t| t.to).collect();
    assert!(hops.contains(&FlowState::CodeRejected));
    check_invariants(&flow);
}

#[tokio::test]
async fn test_resend_respects_cooldown() {
    let (otp, clock, flow) = setup_field(FieldKind::Phone, "+15550000");
    flow.request_change("+15551111").unwrap();
    flow.send_code().await.unwrap();
    enter_code(&flow, "12");

    clock.advance(Duration::from_secs(29));
    let before = flow.snapshot();
    assert!(!flow.can_resend());
    assert_eq!(
        flow.resend_code().await,
        Err(FlowError::CooldownActive {
            remaining: Duration::from_secs(1)
        })
    );
    assert_eq!(flow.snapshot(), before);
    assert_eq!(otp.send_count(), 1);

    clock.advance(Duration::from_secs(1));
    assert!(flow.can_resend());
    assert_eq!(flow.resend_code().await, Ok(FlowState::AwaitingCode));
    assert_eq!(otp.send_count(), 2);

    let pending = flow.snapshot().pending.unwrap();
    assert_eq!(pending.entered(), 0);
    assert_eq!(flow.resend_remaining(), RESEND_COOLDOWN);
    assert!(!flow.can_resend());
}

#[tokio::test]
async fn test_resend_failure_reopens_resend() {
    let (otp, clock, flow) = setup_field(FieldKind::Phone, "+15550000");
    flow.request_change("+15551111").unwrap();
    flow.send_code().await.unwrap();

    clock.advance(RESEND_COOLDOWN);
    otp.set_fail_sends(true);
    assert!(matches!(flow.resend_code().await, Err(FlowError::SendFailed(_))));
    assert_eq!(flow.state(), FlowState::AwaitingCode);
    assert!(matches!(flow.snapshot().error, Some(FlowError::SendFailed(_))));
    assert!(flow.can_resend());
    assert_eq!(flow.resend_remaining(), Duration::ZERO);

    otp.set_fail_sends(false);
    assert_eq!(flow.resend_code().await, Ok(FlowState::AwaitingCode));
    assert_eq!(flow.snapshot().error, None);
    assert!(!flow.can_resend());
    assert_eq!(otp.send_count(), 3);
    check_invariants(&flow);
}

#[tokio::test]
async fn test_reverting_to_verified_value_drops_pending_change() {
    let (_otp, _clock, flow) = setup_field(FieldKind::Email, "old@x.com");
    flow.request_change("new@x.com").unwrap();
    assert!(flow.has_pending_change());

    assert_eq!(flow.request_change("old@x.com"), Err(FlowError::Unchanged));
    assert!(!flow.has_pending_change());
    assert!(flow.snapshot().change.is_none());
    assert!(matches!(
        flow.send_code().await,
        Err(FlowError::InvalidTransition { op: "send_code", .. })
    ));
    check_invariants(&flow);
}

#[tokio::test]
async fn test_edit_after_verification_invalidates_it() {
    let (_otp, _clock, flow) = setup_field(FieldKind::Phone, "+15550000");
    flow.request_change("+15551111").unwrap();
    flow.send_code().await.unwrap();
    enter_code(&flow, "123456");
    flow.submit_code().await.unwrap();
    assert!(flow.is_verified());

    assert_eq!(flow.request_change("+15552222"), Ok(FlowState::Idle));
    assert!(!flow.is_verified());
    assert!(flow.has_pending_change());

    let change = flow.snapshot().change.unwrap();
    assert_eq!(change.current_value, "+15551111");
    assert_eq!(change.proposed_value, "+15552222");
    check_invariants(&flow);
}

#[tokio::test]
async fn test_enter_digit_auto_advances_and_validates() {
    let (_otp, _clock, flow) = setup_field(FieldKind::Phone, "+15550000");
    flow.request_change("+15551111").unwrap();
    flow.send_code().await.unwrap();

    assert_eq!(flow.enter_digit(0, "4"), Ok(1));
    assert_eq!(flow.enter_digit(5, "9"), Ok(5));
    assert_eq!(flow.enter_digit(1, ""), Ok(1));
    assert_eq!(flow.enter_digit(1, "x"), Err(FlowError::InvalidDigit { index: 1 }));
    assert_eq!(flow.enter_digit(2, "12"), Err(FlowError::InvalidDigit { index: 2 }));
    assert_eq!(flow.enter_digit(6, "1"), Err(FlowError::InvalidDigit { index: 6 }));

    // backspace on an empty slot moves left, on a filled slot stays
    assert_eq!(flow.focus_after_backspace(1), 0);
    assert_eq!(flow.focus_after_backspace(5), 5);
    assert_eq!(flow.focus_after_backspace(0), 0);
}

#[tokio::test]
async fn test_enter_digit_outside_code_entry_is_rejected() {
    let (_otp, _clock, flow) = setup_field(FieldKind::Phone, "+15550000");
    assert!(matches!(
        flow.enter_digit(0, "1"),
        Err(FlowError::InvalidTransition { op: "enter_digit", state: FlowState::Idle })
    ));
}

#[tokio::test]
async fn test_cancel_discards_everything() {
    let (_otp, _clock, flow) = setup_field(FieldKind::Email, "old@x.com");
    flow.request_change("new@x.com").unwrap();
    flow.send_code().await.unwrap();
    enter_code(&flow, "123");

    assert_eq!(flow.cancel(), FlowState::Idle);
    let snapshot = flow.snapshot();
    assert!(snapshot.pending.is_none());
    assert!(snapshot.change.is_none());
    assert_eq!(snapshot.verified_value, "old@x.com");
    check_invariants(&flow);
}

#[tokio::test]
async fn test_subscribers_see_each_change() {
    let (_otp, _clock, flow) = setup_field(FieldKind::Email, "old@x.com");
    let mut rx = flow.subscribe();

    flow.request_change("new@x.com").unwrap();
    assert!(rx.has_changed().unwrap());
    assert!(rx.borrow_and_update().change.is_some());

    flow.send_code().await.unwrap();
    assert_eq!(rx.borrow_and_update().state, FlowState::AwaitingCode);
}

// ─────────────────────────────────────────────────────────
// In-flight requests
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reentrant_calls_are_ignored_while_in_flight() {
    let (otp, _clock, flow) = gated_field(FieldKind::Phone, "+15550000");
    flow.request_change("+15551111").unwrap();

    let task = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.send_code().await })
    };
    wait_for(&flow, FlowState::AwaitingSend).await;

    assert_eq!(flow.send_code().await, Err(FlowError::InFlight));
    assert_eq!(flow.request_change("+15552222"), Err(FlowError::InFlight));
    assert_eq!(otp.calls.load(Ordering::SeqCst), 1);

    otp.gate.notify_one();
    assert_eq!(task.await.unwrap(), Ok(FlowState::AwaitingCode));
}

#[tokio::test]
async fn test_late_response_after_cancel_is_dropped() {
    let (otp, _clock, flow) = gated_field(FieldKind::Email, "old@x.com");
    flow.request_change("new@x.com").unwrap();

    let task = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.send_code().await })
    };
    wait_for(&flow, FlowState::AwaitingSend).await;

    assert_eq!(flow.cancel(), FlowState::Idle);
    otp.gate.notify_one();

    assert_eq!(task.await.unwrap(), Err(FlowError::Superseded));
    let snapshot = flow.snapshot();
    assert_eq!(snapshot.state, FlowState::Idle);
    assert!(snapshot.pending.is_none());
    check_invariants(&flow);
}

#[tokio::test]
async fn test_resend_is_in_flight_until_transport_answers() {
    let (otp, clock, flow) = gated_field(FieldKind::Phone, "+15550000");
    flow.request_change("+15551111").unwrap();
    // a stored permit lets the first send through straight away
    otp.gate.notify_one();
    flow.send_code().await.unwrap();
    clock.advance(RESEND_COOLDOWN);

    otp.fail.store(true, Ordering::SeqCst);
    let task = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.resend_code().await })
    };
    wait_for(&flow, FlowState::AwaitingSend).await;

    assert!(flow.snapshot().pending.is_some());
    assert!(!flow.can_resend());
    assert_eq!(flow.enter_digit(0, "1"), Err(FlowError::InFlight));
    assert_eq!(flow.submit_code().await, Err(FlowError::InFlight));
    assert_eq!(flow.resend_code().await, Err(FlowError::InFlight));
    assert_eq!(otp.calls.load(Ordering::SeqCst), 2);

    otp.gate.notify_one();
    assert!(matches!(task.await.unwrap(), Err(FlowError::SendFailed(_))));
    assert_eq!(flow.state(), FlowState::AwaitingCode);
    assert!(matches!(flow.snapshot().error, Some(FlowError::SendFailed(_))));
    assert!(flow.can_resend());
    check_invariants(&flow);
}

#[tokio::test]
async fn test_late_verify_after_cancel_is_dropped() {
    let (otp, _clock, flow) = gated_field(FieldKind::Email, "old@x.com");
    flow.request_change("new@x.com").unwrap();
    otp.gate.notify_one();
    flow.send_code().await.unwrap();
    enter_code(&flow, "123456");

    let task = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.submit_code().await })
    };
    wait_for(&flow, FlowState::Verifying).await;

    assert_eq!(flow.cancel(), FlowState::Idle);
    otp.gate.notify_one();

    assert_eq!(task.await.unwrap(), Err(FlowError::Superseded));
    let snapshot = flow.snapshot();
    assert_eq!(snapshot.state, FlowState::Idle);
    assert_eq!(snapshot.verified_value, "old@x.com");
    assert!(snapshot.change.is_none());
    assert!(!flow.is_verified());
    check_invariants(&flow);
}

#[tokio::test]
async fn test_late_charge_after_cancel_is_dropped() {
    let payment = Arc::new(GatedPayment::default());
    let flow = Arc::new(VerificationFlow::for_purchase(
        Destination::new(FieldKind::Email, "buyer@x.com"),
        PurchaseRequest {
            package_id: "family".to_string(),
            price: 79_900,
        },
        Arc::new(MockOtpTransport::default()),
        payment.clone(),
        Arc::new(ManualClock::default()),
        FlowConfig::default(),
    ));
    flow.send_code().await.unwrap();
    enter_code(&flow, "123456");
    flow.submit_code().await.unwrap();

    let task = {
        let flow = flow.clone();
        tokio::spawn(async move { flow.submit_payment(good_card()).await })
    };
    wait_for(&flow, FlowState::ProcessingPayment).await;

    assert_eq!(flow.cancel(), FlowState::Idle);
    payment.gate.notify_one();

    assert_eq!(task.await.unwrap(), Err(FlowError::Superseded));
    let snapshot = flow.snapshot();
    assert_eq!(snapshot.state, FlowState::Idle);
    assert!(snapshot.transaction.is_none());
    assert_eq!(payment.calls.load(Ordering::SeqCst), 1);
    check_invariants(&flow);
}

// ─────────────────────────────────────────────────────────
// Purchase
// ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_package_purchase_completes() {
    let (otp, payment, flow) = setup_purchase();

    assert_eq!(flow.send_code().await, Ok(FlowState::AwaitingCode));
    assert_eq!(otp.sent()[0].address, "buyer@x.com");

    enter_code(&flow, "123456");
    assert_eq!(flow.submit_code().await, Ok(FlowState::AwaitingPayment));

    let txn = flow.submit_payment(good_card()).await.unwrap();
    assert!(txn.0.starts_with("TXN-"));
    assert_eq!(payment.charges(), vec![49_900]);

    let snapshot = flow.snapshot();
    assert_eq!(snapshot.state, FlowState::Completed);
    assert_eq!(snapshot.transaction, Some(txn));
    assert_eq!(snapshot.purchase.unwrap().package_id, "premium");

    let hops: Vec<_> = flow.transitions().iter().map(|t| t.to).collect();
    assert_eq!(
        hops,
        vec![
            FlowState::AwaitingSend,
            FlowState::AwaitingCode,
            FlowState::Verifying,
            FlowState::Verified,
            FlowState::AwaitingPayment,
            FlowState::ProcessingPayment,
            FlowState::Completed,
        ]
    );
    check_invariants(&flow);
}

#[tokio::test]
async fn test_invalid_card_never_reaches_gateway() {
    let (_otp, payment, flow) = setup_purchase();
    flow.send_code().await.unwrap();
    enter_code(&flow, "123456");
    flow.submit_code().await.unwrap();

    let details = PaymentDetails {
        card_number: "4111111111".to_string(),
        ..good_card()
    };
    assert_eq!(
        flow.submit_payment(details).await,
        Err(FlowError::PaymentValidation(vec![PaymentFieldError::CardNumber]))
    );
    assert_eq!(flow.state(), FlowState::AwaitingPayment);
    assert!(matches!(
        flow.snapshot().error,
        Some(FlowError::PaymentValidation(_))
    ));
    assert_eq!(payment.charge_count(), 0);
}

#[tokio::test]
async fn test_declined_payment_can_be_retried() {
    let (_otp, payment, flow) = setup_purchase();
    flow.send_code().await.unwrap();
    enter_code(&flow, "123456");
    flow.submit_code().await.unwrap();

    payment.set_decline(true);
    assert!(matches!(
        flow.submit_payment(good_card()).await,
        Err(FlowError::PaymentDeclined(_))
    ));
    assert_eq!(flow.state(), FlowState::AwaitingPayment);

    payment.set_decline(false);
    assert!(flow.submit_payment(good_card()).await.is_ok());
    assert_eq!(flow.state(), FlowState::Completed);
    assert_eq!(payment.charge_count(), 2);
    check_invariants(&flow);
}

#[tokio::test]
async fn test_purchase_flow_rejects_field_ops() {
    let (_otp, _payment, flow) = setup_purchase();
    assert!(matches!(
        flow.request_change("other@x.com"),
        Err(FlowError::InvalidTransition { op: "request_change", .. })
    ));

    let (_otp, _clock, field) = setup_field(FieldKind::Email, "old@x.com");
    assert!(matches!(
        field.submit_payment(good_card()).await,
        Err(FlowError::InvalidTransition { op: "submit_payment", .. })
    ));
}

#[tokio::test]
async fn test_cancel_after_completion_keeps_result() {
    let (_otp, _payment, flow) = setup_purchase();
    flow.send_code().await.unwrap();
    enter_code(&flow, "123456");
    flow.submit_code().await.unwrap();
    flow.submit_payment(good_card()).await.unwrap();

    assert_eq!(flow.cancel(), FlowState::Completed);
    assert!(flow.snapshot().transaction.is_some());
}
