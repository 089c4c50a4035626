//! Error types for the flows, the profile editor, and the package catalog.

use std::time::Duration;

use thiserror::Error;

use crate::types::{FieldKind, FlowState};

/// A single payment form field that failed local validation.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq, Hash)]
pub enum PaymentFieldError {
    #[error("card number must have at least 16 digits")]
    CardNumber,

    #[error("expiry must be MM/YY")]
    Expiry,

    #[error("CVV must have at least 3 digits")]
    Cvv,

    #[error("card holder name is required")]
    HolderName,
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FlowError {
    // Recoverable errors surfaced through the flow snapshot.
    #[error("failed to send verification code: {0}")]
    SendFailed(String),

    #[error("enter all {expected} digits (got {entered})")]
    IncompleteCode { entered: usize, expected: usize },

    #[error("verification code rejected: {0}")]
    VerifyRejected(String),

    #[error("invalid payment details: {0:?}")]
    PaymentValidation(Vec<PaymentFieldError>),

    #[error("payment declined: {0}")]
    PaymentDeclined(String),

    // Call rejections: nothing changed.
    #[error("`{op}` is not allowed while {state}")]
    InvalidTransition { op: &'static str, state: FlowState },

    #[error("a request is already in flight")]
    InFlight,

    #[error("request was superseded before its response arrived")]
    Superseded,

    #[error("value matches the verified value")]
    Unchanged,

    #[error("resend available in {remaining:?}")]
    CooldownActive { remaining: Duration },

    #[error("invalid digit input at position {index}")]
    InvalidDigit { index: usize },
}

impl FlowError {
    /// `true` for the errors that are kept on the snapshot for display.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SendFailed(_)
                | Self::IncompleteCode { .. }
                | Self::VerifyRejected(_)
                | Self::PaymentValidation(_)
                | Self::PaymentDeclined(_)
        )
    }
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProfileError {
    #[error("nothing to save")]
    NothingToSave,

    #[error("{0} change has not been verified")]
    UnverifiedChange(FieldKind),

    #[error(transparent)]
    Flow(#[from] FlowError),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate package id: {0}")]
    DuplicateId(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;
