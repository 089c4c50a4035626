//! Simulator configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::errors::{Result, SimulatorError};

#[derive(Debug, Clone)]
pub struct Config {
    /// JSON file holding the package catalog
    pub catalog_path: String,
    /// Simulated SMS / email delivery and check delay
    pub otp_latency: Duration,
    /// Simulated payment gateway delay
    pub payment_latency: Duration,
    /// The one code the mock OTP service accepts
    pub accepted_code: String,
    /// Wait before a code may be resent
    pub resend_cooldown: Duration,
    /// Package bought in the purchase scenario
    pub package_id: String,
    /// Make the mock gateway decline every charge
    pub payment_decline: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; missing keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Config {
            catalog_path: get("CATALOG_PATH", "./data/packages.json"),
            otp_latency: Duration::from_millis(parse(
                "OTP_LATENCY_MS",
                &get("OTP_LATENCY_MS", "1500"),
            )?),
            payment_latency: Duration::from_millis(parse(
                "PAYMENT_LATENCY_MS",
                &get("PAYMENT_LATENCY_MS", "2000"),
            )?),
            accepted_code: accepted_code(get("OTP_ACCEPTED_CODE", "123456"))?,
            resend_cooldown: Duration::from_secs(parse(
                "RESEND_COOLDOWN_SECS",
                &get("RESEND_COOLDOWN_SECS", "30"),
            )?),
            package_id: get("PACKAGE_ID", "premium"),
            payment_decline: parse("PAYMENT_DECLINE", &get("PAYMENT_DECLINE", "false"))?,
        })
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| SimulatorError::Config(format!("Invalid {key}: {raw:?}")))
}

fn accepted_code(code: String) -> Result<String> {
    if code.len() == 6 && code.chars().all(|c| c.is_ascii_digit()) {
        Ok(code)
    } else {
        Err(SimulatorError::Config(
            "OTP_ACCEPTED_CODE must be six digits".to_string(),
        ))
    }
}
