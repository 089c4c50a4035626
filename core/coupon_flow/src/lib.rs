//! # Coupon Flow
//!
//! Core logic behind the coupon app's screens, kept free of any UI concern.
//!
//! | Concern            | Entry point(s)                                     |
//! |--------------------|----------------------------------------------------|
//! | Coupon image       | [`pattern::generate`], [`ClaimedCoupon::grid`]     |
//! | Coupon claim       | [`ClaimedCoupon::claim`], [`coupon::claim_code`]   |
//! | OTP verification   | [`VerificationFlow`]                               |
//! | Package purchase   | [`VerificationFlow::for_purchase`], [`PackageCatalog`] |
//! | Profile save gate  | [`ProfileDraft`]                                   |
//! | Payment form       | [`payment::validate`], [`payment::format_card_number`] |
//!
//! ## Architecture
//!
//! SMS / email delivery and card charging sit behind the [`OtpTransport`] and
//! [`PaymentTransport`] traits. The [`mock`] module provides the fixed-latency
//! implementations the app runs against. Time is read through [`Clock`] so the
//! resend cooldown can be tested without sleeping.

pub mod catalog;
pub mod clock;
pub mod coupon;
pub mod errors;
pub mod flow;
pub mod mock;
pub mod pattern;
pub mod payment;
pub mod profile;
pub mod transport;
mod types;

#[cfg(test)]
mod test_flow;

pub use catalog::{Package, PackageCatalog};
pub use clock::{Clock, SystemClock};
pub use coupon::ClaimedCoupon;
pub use errors::{CatalogError, FlowError, PaymentFieldError, ProfileError};
pub use flow::{FlowConfig, VerificationFlow};
pub use pattern::ModuleGrid;
pub use profile::{FieldStatus, Profile, ProfileDraft};
pub use transport::{OtpTransport, PaymentTransport};
pub use types::{
    Destination, FieldChangeRequest, FieldKind, FlowSnapshot, FlowState, PaymentDetails,
    PendingVerification, PurchaseRequest, TransactionId, Transition,
};
