//! Local checks and input formatting for the card payment form.
//!
//! Validation runs before any charge is attempted; a form that fails here never
//! reaches the payment gateway.

use crate::errors::PaymentFieldError;
use crate::types::PaymentDetails;

const MIN_CARD_DIGITS: usize = 16;
const MIN_CVV_DIGITS: usize = 3;
const EXPIRY_LEN: usize = 5;

/// Validate every field, reporting all failures together.
pub fn validate(details: &PaymentDetails) -> Result<(), Vec<PaymentFieldError>> {
    let mut errors = Vec::new();

    if !card_number_ok(&details.card_number) {
        errors.push(PaymentFieldError::CardNumber);
    }
    if !expiry_ok(&details.expiry) {
        errors.push(PaymentFieldError::Expiry);
    }
    if details.cvv.len() < MIN_CVV_DIGITS || !details.cvv.chars().all(|c| c.is_ascii_digit()) {
        errors.push(PaymentFieldError::Cvv);
    }
    if details.holder_name.trim().is_empty() {
        errors.push(PaymentFieldError::HolderName);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn card_number_ok(raw: &str) -> bool {
    let stripped: Vec<char> = raw.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
    stripped.len() >= MIN_CARD_DIGITS && stripped.iter().all(char::is_ascii_digit)
}

fn expiry_ok(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    if bytes.len() != EXPIRY_LEN || bytes[2] != b'/' {
        return false;
    }
    let (month, year) = (&raw[..2], &raw[3..]);
    if !month.bytes().chain(year.bytes()).all(|b| b.is_ascii_digit()) {
        return false;
    }
    matches!(month.parse::<u8>(), Ok(1..=12))
}

/// Reformat raw card input as space-separated groups of four, keeping at most
/// 16 digits.
pub fn format_card_number(input: &str) -> String {
    let digits: Vec<char> = input
        .chars()
        .filter(char::is_ascii_digit)
        .take(MIN_CARD_DIGITS)
        .collect();
    digits
        .chunks(4)
        .map(|group| group.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reformat raw expiry input as `MM/YY`, inserting the slash once the month is
/// complete.
pub fn format_expiry(input: &str) -> String {
    let digits: String = input.chars().filter(char::is_ascii_digit).take(4).collect();
    if digits.len() > 2 {
        format!("{}/{}", &digits[..2], &digits[2..])
    } else {
        digits
    }
}
