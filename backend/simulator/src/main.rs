//! Coupon app flow simulator: entry point.
//!
//! Plays the claim-coupon, edit-profile and buy-package journeys against the
//! in-process OTP and payment mocks, logging every state the screens would
//! render. Latencies, the accepted code and the package are set from the
//! environment.

mod config;
mod errors;
mod scenario;

use std::sync::Arc;

use coupon_flow::mock::{MockOtpTransport, MockPaymentTransport};
use coupon_flow::{Profile, SystemClock};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use scenario::SimulatorState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    let catalog = scenario::load_catalog(&config.catalog_path)?;

    let payment = Arc::new(MockPaymentTransport::new(config.payment_latency));
    payment.set_decline(config.payment_decline);

    let state = SimulatorState {
        otp: Arc::new(MockOtpTransport::new(
            config.otp_latency,
            config.accepted_code.clone(),
        )),
        payment,
        clock: Arc::new(SystemClock),
        catalog,
        config,
    };

    // ─── Claim a coupon ───────────────────────────────────
    scenario::claim_coupon("deal-welcome-20", "user-1");

    // ─── Edit profile ─────────────────────────────────────
    let profile = Profile {
        name: "Asha Rao".to_string(),
        phone: "+919800000000".to_string(),
        email: "asha@x.com".to_string(),
    };
    let saved = scenario::run_profile_edit(&state, profile).await?;

    // ─── Buy a package ────────────────────────────────────
    match scenario::run_purchase(&state, &saved.email).await? {
        Some(txn) => info!("Navigating to wallet with {txn}"),
        None => info!("Staying on packages screen"),
    }

    Ok(())
}
