//! Service boundaries the flows call but do not implement: SMS / email code
//! dispatch and the payment gateway.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Destination, PaymentDetails, TransactionId};

#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{0}")]
pub struct SendError(pub String);

#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{0}")]
pub struct VerifyError(pub String);

#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{0}")]
pub struct PaymentError(pub String);

/// One-time-code delivery and checking.
#[async_trait]
pub trait OtpTransport: Send + Sync {
    async fn send_code(&self, destination: &Destination) -> Result<(), SendError>;

    async fn verify_code(&self, destination: &Destination, code: &str)
        -> Result<(), VerifyError>;
}

/// Card charging.
#[async_trait]
pub trait PaymentTransport: Send + Sync {
    /// Charge `amount` (minor units) to the card in `details`.
    async fn charge(
        &self,
        details: &PaymentDetails,
        amount: u64,
    ) -> Result<TransactionId, PaymentError>;
}
