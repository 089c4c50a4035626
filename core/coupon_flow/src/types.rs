//! # Types
//!
//! Shared data structures for the verification and purchase flows.
//!
//! ## Flow state as a finite-state machine
//!
//! [`FlowState`] drives every screen that changes a sensitive field or buys a
//! package:
//!
//! ```text
//! Idle ──► AwaitingSend ──► AwaitingCode ──► Verifying ──► Verified
//!  ▲            │                ▲               │            │ (purchase only)
//!  └── failed ──┘                └─ CodeRejected ┘            ▼
//!                                                     AwaitingPayment ◄──┐
//!                                                            │           │ declined
//!                                                            ▼           │
//!                                                   ProcessingPayment ───┘
//!                                                            │
//!                                                            ▼
//!                                                        Completed
//! ```
//!
//! A resend goes back from `AwaitingCode` to `AwaitingSend` while the code is
//! re-sent, keeping the pending challenge, and returns to `AwaitingCode`
//! whether or not the send succeeded.
//!
//! `CodeRejected` and `Cancelled` are transient: they appear in the transition
//! log but the flow never rests in them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::FlowError;

/// A field whose changes must be proven with a one-time code.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Phone,
    Email,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Email => "email",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a one-time code is delivered.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub kind: FieldKind,
    pub address: String,
}

impl Destination {
    pub fn new(kind: FieldKind, address: impl Into<String>) -> Self {
        Self {
            kind,
            address: address.into(),
        }
    }
}

/// The user edited a verified field away from its last verified value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldChangeRequest {
    pub kind: FieldKind,
    pub current_value: String,
    pub proposed_value: String,
}

/// An outstanding one-time-code challenge.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PendingVerification {
    pub kind: FieldKind,
    /// Phone number or email address the code went to.
    pub destination: String,
    /// One slot per digit; `None` until the user types it.
    pub code_digits: Vec<Option<char>>,
    pub attempt_error: Option<FlowError>,
    pub resend_available_at: DateTime<Utc>,
}

impl PendingVerification {
    pub fn entered(&self) -> usize {
        self.code_digits.iter().filter(|d| d.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.code_digits.iter().all(Option::is_some)
    }

    /// Concatenated digits, skipping empty slots.
    pub fn code(&self) -> String {
        self.code_digits.iter().flatten().collect()
    }
}

/// Package purchase driving the payment stage after verification.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub package_id: String,
    /// Price in minor currency units.
    pub price: u64,
}

/// Card details collected by the payment form. Never persisted.
#[derive(Clone, Eq, PartialEq, Default)]
pub struct PaymentDetails {
    pub card_number: String,
    /// `MM/YY`
    pub expiry: String,
    pub cvv: String,
    pub holder_name: String,
}

impl fmt::Debug for PaymentDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits: String = self
            .card_number
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        let tail = &digits[digits.len().saturating_sub(4)..];
        f.debug_struct("PaymentDetails")
            .field("card_number", &format_args!("****{tail}"))
            .field("expiry", &self.expiry)
            .field("cvv", &"***")
            .field("holder_name", &self.holder_name)
            .finish()
    }
}

/// Identifier handed back by the payment gateway for an accepted charge.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub String);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a [`crate::flow::VerificationFlow`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Idle,
    /// Code dispatch in flight.
    AwaitingSend,
    AwaitingCode,
    /// Code check in flight.
    Verifying,
    CodeRejected,
    Verified,
    AwaitingPayment,
    /// Charge in flight.
    ProcessingPayment,
    Completed,
    Cancelled,
}

impl FlowState {
    /// A transport call is outstanding; user input is ignored.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::AwaitingSend | Self::Verifying | Self::ProcessingPayment
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingSend => "awaiting_send",
            Self::AwaitingCode => "awaiting_code",
            Self::Verifying => "verifying",
            Self::CodeRejected => "code_rejected",
            Self::Verified => "verified",
            Self::AwaitingPayment => "awaiting_payment",
            Self::ProcessingPayment => "processing_payment",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded hop of the state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Transition {
    pub from: FlowState,
    pub to: FlowState,
}

/// Observable view of a flow, published to subscribers after every change.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowSnapshot {
    pub state: FlowState,
    pub change: Option<FieldChangeRequest>,
    pub pending: Option<PendingVerification>,
    pub purchase: Option<PurchaseRequest>,
    /// Last recoverable error, cleared by the next relevant input.
    pub error: Option<FlowError>,
    pub verified_value: String,
    pub transaction: Option<TransactionId>,
}
