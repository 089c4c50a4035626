//! In-process transports standing in for the SMS, email and payment services.
//!
//! Both mocks resolve after a fixed delay and record every call, so tests can
//! use them as spies and the simulator can use them as the "backend".

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::transport::{
    OtpTransport, PaymentError, PaymentTransport, SendError, VerifyError,
};
use crate::types::{Destination, PaymentDetails, TransactionId};

/// Code the mock OTP service accepts unless configured otherwise.
pub const DEFAULT_ACCEPTED_CODE: &str = "123456";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct MockOtpTransport {
    latency: Duration,
    accepted_code: String,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<Destination>>,
    checked: Mutex<Vec<(Destination, String)>>,
}

impl Default for MockOtpTransport {
    fn default() -> Self {
        Self::new(Duration::ZERO, DEFAULT_ACCEPTED_CODE)
    }
}

impl MockOtpTransport {
    pub fn new(latency: Duration, accepted_code: impl Into<String>) -> Self {
        Self {
            latency,
            accepted_code: accepted_code.into(),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            checked: Mutex::new(Vec::new()),
        }
    }

    /// Make subsequent `send_code` calls fail (or succeed again).
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Destination> {
        lock(&self.sent).clone()
    }

    pub fn send_count(&self) -> usize {
        lock(&self.sent).len()
    }

    pub fn verify_count(&self) -> usize {
        lock(&self.checked).len()
    }

    pub fn checked_codes(&self) -> Vec<String> {
        lock(&self.checked).iter().map(|(_, c)| c.clone()).collect()
    }
}

#[async_trait]
impl OtpTransport for MockOtpTransport {
    async fn send_code(&self, destination: &Destination) -> Result<(), SendError> {
        lock(&self.sent).push(destination.clone());
        tokio::time::sleep(self.latency).await;

        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SendError(format!(
                "could not deliver code to {}",
                destination.address
            )));
        }
        debug!("mock OTP sent to {} {}", destination.kind, destination.address);
        Ok(())
    }

    async fn verify_code(
        &self,
        destination: &Destination,
        code: &str,
    ) -> Result<(), VerifyError> {
        lock(&self.checked).push((destination.clone(), code.to_string()));
        tokio::time::sleep(self.latency).await;

        if code == self.accepted_code {
            Ok(())
        } else {
            Err(VerifyError("invalid OTP. please try again".to_string()))
        }
    }
}

#[derive(Debug)]
pub struct MockPaymentTransport {
    latency: Duration,
    decline: AtomicBool,
    next_id: AtomicU64,
    charges: Mutex<Vec<u64>>,
}

impl Default for MockPaymentTransport {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl MockPaymentTransport {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            decline: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            charges: Mutex::new(Vec::new()),
        }
    }

    pub fn set_decline(&self, decline: bool) {
        self.decline.store(decline, Ordering::SeqCst);
    }

    pub fn charge_count(&self) -> usize {
        lock(&self.charges).len()
    }

    /// Amounts of every attempted charge, in call order.
    pub fn charges(&self) -> Vec<u64> {
        lock(&self.charges).clone()
    }
}

#[async_trait]
impl PaymentTransport for MockPaymentTransport {
    async fn charge(
        &self,
        details: &PaymentDetails,
        amount: u64,
    ) -> Result<TransactionId, PaymentError> {
        lock(&self.charges).push(amount);
        tokio::time::sleep(self.latency).await;

        if self.decline.load(Ordering::SeqCst) {
            return Err(PaymentError("card declined by issuer".to_string()));
        }

        let seq = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = TransactionId(format!("TXN-{}", hex::encode_upper(seq.to_be_bytes())));
        debug!("mock charge of {amount} accepted as {id} for {details:?}");
        Ok(id)
    }
}
