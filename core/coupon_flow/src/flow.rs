//! # Verification flow
//!
//! One [`VerificationFlow`] drives a single "prove you own this phone / email"
//! exchange, optionally followed by a card payment. Screens hold the flow in an
//! `Arc`, call its operations from UI events, and render from the
//! [`FlowSnapshot`] stream returned by [`VerificationFlow::subscribe`].
//!
//! ## In-flight requests
//!
//! Transport calls are awaited without holding the state lock. While one is
//! outstanding the flow sits in an in-flight state (`AwaitingSend`,
//! `Verifying`, `ProcessingPayment`) and rejects further input with
//! [`FlowError::InFlight`].
//!
//! Every dispatch is tagged with a fresh request id. [`VerificationFlow::cancel`]
//! bumps the id, so a response that lands after the user dismissed the modal is
//! dropped instead of reopening it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::{cooldown_remaining, Clock};
use crate::errors::{FlowError, Result};
use crate::payment;
use crate::transport::{OtpTransport, PaymentTransport};
use crate::types::{
    Destination, FieldChangeRequest, FieldKind, FlowSnapshot, FlowState, PaymentDetails,
    PendingVerification, PurchaseRequest, TransactionId, Transition,
};

/// Digits in a one-time code.
pub const CODE_LENGTH: usize = 6;

/// Wait before "Resend" becomes available again.
pub const RESEND_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FlowConfig {
    pub code_length: usize,
    pub resend_cooldown: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            code_length: CODE_LENGTH,
            resend_cooldown: RESEND_COOLDOWN,
        }
    }
}

enum Purpose {
    FieldChange(FieldKind),
    Purchase {
        destination: Destination,
        request: PurchaseRequest,
        payment: Arc<dyn PaymentTransport>,
    },
}

struct Inner {
    state: FlowState,
    change: Option<FieldChangeRequest>,
    pending: Option<PendingVerification>,
    error: Option<FlowError>,
    verified_value: String,
    transaction: Option<TransactionId>,
    request_id: u64,
    transitions: Vec<Transition>,
}

impl Inner {
    fn new(verified_value: String) -> Self {
        Self {
            state: FlowState::Idle,
            change: None,
            pending: None,
            error: None,
            verified_value,
            transaction: None,
            request_id: 0,
            transitions: Vec::new(),
        }
    }

    fn move_to(&mut self, to: FlowState) {
        self.transitions.push(Transition {
            from: self.state,
            to,
        });
        self.state = to;
    }

    /// Reject input while a transport call is outstanding or outside `allowed`.
    fn guard(&self, op: &'static str, allowed: &[FlowState]) -> Result<()> {
        if self.state.is_in_flight() {
            return Err(FlowError::InFlight);
        }
        if !allowed.contains(&self.state) {
            return Err(FlowError::InvalidTransition {
                op,
                state: self.state,
            });
        }
        Ok(())
    }

    fn pending_mut(&mut self, op: &'static str) -> Result<&mut PendingVerification> {
        let state = self.state;
        self.pending
            .as_mut()
            .ok_or(FlowError::InvalidTransition { op, state })
    }

    /// Start a new transport request, superseding any earlier one.
    fn next_request(&mut self) -> u64 {
        self.request_id += 1;
        self.request_id
    }

    fn fail(&mut self, err: FlowError) -> FlowError {
        if let Some(pending) = self.pending.as_mut() {
            pending.attempt_error = Some(err.clone());
        }
        self.error = Some(err.clone());
        err
    }

    fn snapshot(&self, purchase: Option<&PurchaseRequest>) -> FlowSnapshot {
        FlowSnapshot {
            state: self.state,
            change: self.change.clone(),
            pending: self.pending.clone(),
            purchase: purchase.cloned(),
            error: self.error.clone(),
            verified_value: self.verified_value.clone(),
            transaction: self.transaction.clone(),
        }
    }
}

pub struct VerificationFlow {
    purpose: Purpose,
    otp: Arc<dyn OtpTransport>,
    clock: Arc<dyn Clock>,
    config: FlowConfig,
    inner: Mutex<Inner>,
    tx: watch::Sender<FlowSnapshot>,
}

impl VerificationFlow {
    /// Flow for changing a verified profile field currently set to `verified_value`.
    pub fn for_field_change(
        kind: FieldKind,
        verified_value: impl Into<String>,
        otp: Arc<dyn OtpTransport>,
        clock: Arc<dyn Clock>,
        config: FlowConfig,
    ) -> Self {
        Self::build(
            Purpose::FieldChange(kind),
            Inner::new(verified_value.into()),
            otp,
            clock,
            config,
        )
    }

    /// Flow for buying a package: verify `destination`, then take payment.
    ///
    /// Starts in `Idle` ready for [`send_code`](Self::send_code); there is no
    /// change request step.
    pub fn for_purchase(
        destination: Destination,
        request: PurchaseRequest,
        otp: Arc<dyn OtpTransport>,
        payment: Arc<dyn PaymentTransport>,
        clock: Arc<dyn Clock>,
        config: FlowConfig,
    ) -> Self {
        Self::build(
            Purpose::Purchase {
                destination,
                request,
                payment,
            },
            Inner::new(String::new()),
            otp,
            clock,
            config,
        )
    }

    fn build(
        purpose: Purpose,
        inner: Inner,
        otp: Arc<dyn OtpTransport>,
        clock: Arc<dyn Clock>,
        config: FlowConfig,
    ) -> Self {
        let purchase = match &purpose {
            Purpose::Purchase { request, .. } => Some(request),
            Purpose::FieldChange(_) => None,
        };
        let (tx, _) = watch::channel(inner.snapshot(purchase));
        Self {
            purpose,
            otp,
            clock,
            config,
            inner: Mutex::new(inner),
            tx,
        }
    }

    // ─────────────────────────────────────────────────────────
    // Observation
    // ─────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> FlowSnapshot {
        self.tx.borrow().clone()
    }

    /// Receiver that sees a fresh snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<FlowSnapshot> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> FlowState {
        self.lock().state
    }

    /// Value most recently proven by a successful code check.
    pub fn verified_value(&self) -> String {
        self.lock().verified_value.clone()
    }

    /// The latest requested value has been proven and not edited since.
    pub fn is_verified(&self) -> bool {
        matches!(
            self.lock().state,
            FlowState::Verified
                | FlowState::AwaitingPayment
                | FlowState::ProcessingPayment
                | FlowState::Completed
        )
    }

    /// A change was requested and has not been verified yet.
    pub fn has_pending_change(&self) -> bool {
        self.lock().change.is_some()
    }

    /// Every state hop so far, oldest first.
    pub fn transitions(&self) -> Vec<Transition> {
        self.lock().transitions.clone()
    }

    pub fn resend_remaining(&self) -> Duration {
        let inner = self.lock();
        match &inner.pending {
            Some(pending) => cooldown_remaining(self.clock.now(), pending.resend_available_at),
            None => Duration::ZERO,
        }
    }

    pub fn can_resend(&self) -> bool {
        let inner = self.lock();
        inner.state == FlowState::AwaitingCode
            && inner
                .pending
                .as_ref()
                .is_some_and(|p| self.clock.now() >= p.resend_available_at)
    }

    /// Where focus goes when backspace is pressed on digit `index`.
    pub fn focus_after_backspace(&self, index: usize) -> usize {
        let inner = self.lock();
        let empty = inner
            .pending
            .as_ref()
            .and_then(|p| p.code_digits.get(index))
            .is_some_and(Option::is_none);
        if empty && index > 0 {
            index - 1
        } else {
            index
        }
    }

    // ─────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────

    /// Record that the user edited the field to `proposed`.
    ///
    /// Editing a verified field drops its verified status immediately.
    /// Proposing the verified value itself withdraws any pending change and
    /// returns [`FlowError::Unchanged`].
    pub fn request_change(&self, proposed: impl Into<String>) -> Result<FlowState> {
        let proposed = proposed.into();
        let kind = match &self.purpose {
            Purpose::FieldChange(kind) => *kind,
            Purpose::Purchase { .. } => {
                return Err(FlowError::InvalidTransition {
                    op: "request_change",
                    state: self.state(),
                })
            }
        };

        self.update(|inner| -> Result<_> {
            inner.guard("request_change", &[FlowState::Idle, FlowState::Verified])?;
            if proposed == inner.verified_value {
                // typed back to the verified value: nothing left to verify
                inner.change = None;
                return Err(FlowError::Unchanged);
            }

            inner.next_request();
            inner.pending = None;
            inner.error = None;
            inner.change = Some(FieldChangeRequest {
                kind,
                current_value: inner.verified_value.clone(),
                proposed_value: proposed,
            });
            if inner.state != FlowState::Idle {
                inner.move_to(FlowState::Idle);
            }
            Ok(FlowState::Idle)
        })
    }

    /// Ask the OTP transport to deliver a code.
    pub async fn send_code(&self) -> Result<FlowState> {
        let (id, destination) = self.update(|inner| -> Result<_> {
            inner.guard("send_code", &[FlowState::Idle])?;
            let destination = self.destination(inner).ok_or(FlowError::InvalidTransition {
                op: "send_code",
                state: inner.state,
            })?;
            inner.error = None;
            inner.move_to(FlowState::AwaitingSend);
            Ok((inner.next_request(), destination))
        })?;

        let result = self.otp.send_code(&destination).await;

        self.update(|inner| -> Result<_> {
            self.ensure_current(inner, id, "send_code")?;
            match result {
                Ok(()) => {
                    inner.pending = Some(PendingVerification {
                        kind: destination.kind,
                        destination: destination.address,
                        code_digits: vec![None; self.config.code_length],
                        attempt_error: None,
                        resend_available_at: self.resend_deadline(),
                    });
                    inner.move_to(FlowState::AwaitingCode);
                    Ok(FlowState::AwaitingCode)
                }
                Err(e) => {
                    warn!("OTP send to {} failed: {e}", destination.address);
                    inner.move_to(FlowState::Idle);
                    Err(inner.fail(FlowError::SendFailed(e.0)))
                }
            }
        })
    }

    /// Write one digit (or clear it with `""`) and return the index that
    /// should receive focus next.
    pub fn enter_digit(&self, index: usize, value: &str) -> Result<usize> {
        self.update(|inner| -> Result<_> {
            inner.guard("enter_digit", &[FlowState::AwaitingCode])?;
            let pending = inner.pending_mut("enter_digit")?;
            if index >= pending.code_digits.len() {
                return Err(FlowError::InvalidDigit { index });
            }

            let mut chars = value.chars();
            let digit = match (chars.next(), chars.next()) {
                (None, _) => None,
                (Some(c), None) if c.is_ascii_digit() => Some(c),
                _ => return Err(FlowError::InvalidDigit { index }),
            };

            pending.code_digits[index] = digit;
            pending.attempt_error = None;
            let last = pending.code_digits.len() - 1;
            inner.error = None;

            Ok(if digit.is_some() && index < last {
                index + 1
            } else {
                index
            })
        })
    }

    /// Check the entered code with the transport.
    ///
    /// A partial code fails locally with [`FlowError::IncompleteCode`] and never
    /// reaches the transport. A wrong code keeps the entered digits.
    pub async fn submit_code(&self) -> Result<FlowState> {
        let (id, destination, code) = self.update(|inner| -> Result<_> {
            inner.guard("submit_code", &[FlowState::AwaitingCode])?;
            let pending = inner.pending_mut("submit_code")?;
            if !pending.is_complete() {
                let err = FlowError::IncompleteCode {
                    entered: pending.entered(),
                    expected: pending.code_digits.len(),
                };
                return Err(inner.fail(err));
            }

            let destination = Destination::new(pending.kind, pending.destination.clone());
            let code = pending.code();
            inner.error = None;
            inner.move_to(FlowState::Verifying);
            Ok((inner.next_request(), destination, code))
        })?;

        let result = self.otp.verify_code(&destination, &code).await;

        self.update(|inner| -> Result<_> {
            self.ensure_current(inner, id, "submit_code")?;
            match result {
                Ok(()) => {
                    inner.verified_value = destination.address;
                    inner.pending = None;
                    inner.change = None;
                    inner.move_to(FlowState::Verified);
                    if matches!(self.purpose, Purpose::Purchase { .. }) {
                        inner.move_to(FlowState::AwaitingPayment);
                    }
                    Ok(inner.state)
                }
                Err(e) => {
                    inner.move_to(FlowState::CodeRejected);
                    inner.move_to(FlowState::AwaitingCode);
                    Err(inner.fail(FlowError::VerifyRejected(e.0)))
                }
            }
        })
    }

    /// Send a fresh code once the cooldown has elapsed. Clears entered digits
    /// and restarts the cooldown.
    ///
    /// The pending challenge is kept while the send is in flight; a failed
    /// resend reopens "Resend" straight away.
    pub async fn resend_code(&self) -> Result<FlowState> {
        let (id, destination) = self.update(|inner| -> Result<_> {
            inner.guard("resend_code", &[FlowState::AwaitingCode])?;
            let now = self.clock.now();
            let deadline = self.resend_deadline();
            let pending = inner.pending_mut("resend_code")?;
            let remaining = cooldown_remaining(now, pending.resend_available_at);
            if !remaining.is_zero() {
                return Err(FlowError::CooldownActive { remaining });
            }

            pending.code_digits.fill(None);
            pending.attempt_error = None;
            pending.resend_available_at = deadline;
            let destination = Destination::new(pending.kind, pending.destination.clone());
            inner.error = None;
            inner.move_to(FlowState::AwaitingSend);
            Ok((inner.next_request(), destination))
        })?;

        let result = self.otp.send_code(&destination).await;

        self.update(|inner| -> Result<_> {
            self.ensure_current(inner, id, "resend_code")?;
            inner.move_to(FlowState::AwaitingCode);
            match result {
                Ok(()) => Ok(FlowState::AwaitingCode),
                Err(e) => {
                    warn!("OTP resend to {} failed: {e}", destination.address);
                    let now = self.clock.now();
                    if let Some(pending) = inner.pending.as_mut() {
                        pending.resend_available_at = now;
                    }
                    Err(inner.fail(FlowError::SendFailed(e.0)))
                }
            }
        })
    }

    /// Abandon the flow. Always succeeds; nothing is committed.
    pub fn cancel(&self) -> FlowState {
        self.update(|inner| {
            if inner.state == FlowState::Completed {
                return inner.state;
            }
            inner.next_request();
            inner.change = None;
            inner.pending = None;
            inner.error = None;
            if inner.state != FlowState::Idle {
                inner.move_to(FlowState::Cancelled);
                inner.move_to(FlowState::Idle);
            }
            FlowState::Idle
        })
    }

    /// Validate `details` locally, then charge the package price.
    pub async fn submit_payment(&self, details: PaymentDetails) -> Result<TransactionId> {
        let (request, payment) = match &self.purpose {
            Purpose::Purchase {
                request, payment, ..
            } => (request, payment),
            Purpose::FieldChange(_) => {
                return Err(FlowError::InvalidTransition {
                    op: "submit_payment",
                    state: self.state(),
                })
            }
        };

        let id = self.update(|inner| -> Result<_> {
            inner.guard("submit_payment", &[FlowState::AwaitingPayment])?;
            if let Err(fields) = payment::validate(&details) {
                return Err(inner.fail(FlowError::PaymentValidation(fields)));
            }
            inner.error = None;
            inner.move_to(FlowState::ProcessingPayment);
            Ok(inner.next_request())
        })?;

        let result = payment.charge(&details, request.price).await;

        self.update(|inner| -> Result<_> {
            self.ensure_current(inner, id, "submit_payment")?;
            match result {
                Ok(txn) => {
                    info!("package {} purchased, transaction {txn}", request.package_id);
                    inner.transaction = Some(txn.clone());
                    inner.move_to(FlowState::Completed);
                    Ok(txn)
                }
                Err(e) => {
                    warn!("payment for package {} declined: {e}", request.package_id);
                    inner.move_to(FlowState::AwaitingPayment);
                    Err(inner.fail(FlowError::PaymentDeclined(e.0)))
                }
            }
        })
    }

    // ─────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the lock, log new transitions, and publish a snapshot.
    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.lock();
        let seen = inner.transitions.len();
        let out = f(&mut *inner);

        for t in &inner.transitions[seen..] {
            info!("{} flow: {} -> {}", self.label(), t.from, t.to);
        }
        self.tx.send_replace(inner.snapshot(self.purchase()));
        out
    }

    fn ensure_current(&self, inner: &Inner, id: u64, op: &'static str) -> Result<()> {
        if inner.request_id == id {
            Ok(())
        } else {
            debug!(
                "{} flow: dropping stale {op} response (request {id}, current {})",
                self.label(),
                inner.request_id
            );
            Err(FlowError::Superseded)
        }
    }

    fn destination(&self, inner: &Inner) -> Option<Destination> {
        match &self.purpose {
            Purpose::FieldChange(kind) => inner
                .change
                .as_ref()
                .map(|c| Destination::new(*kind, c.proposed_value.clone())),
            Purpose::Purchase { destination, .. } => Some(destination.clone()),
        }
    }

    fn purchase(&self) -> Option<&PurchaseRequest> {
        match &self.purpose {
            Purpose::Purchase { request, .. } => Some(request),
            Purpose::FieldChange(_) => None,
        }
    }

    fn label(&self) -> &str {
        match &self.purpose {
            Purpose::FieldChange(kind) => kind.as_str(),
            Purpose::Purchase { request, .. } => &request.package_id,
        }
    }

    fn resend_deadline(&self) -> DateTime<Utc> {
        let cooldown = chrono::Duration::from_std(self.config.resend_cooldown)
            .unwrap_or(chrono::Duration::zero());
        self.clock.now() + cooldown
    }
}
