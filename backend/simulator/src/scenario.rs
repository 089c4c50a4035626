//! Scripted user journeys run against the mock transports.
//!
//! Each journey plays the part of a screen: it feeds UI events into the core
//! flows and logs what the screen would render from the snapshot stream.

use std::sync::Arc;

use chrono::Utc;
use coupon_flow::clock::{seconds_label, Clock};
use coupon_flow::mock::{MockOtpTransport, MockPaymentTransport};
use coupon_flow::{
    ClaimedCoupon, Destination, FieldKind, FlowConfig, FlowError, FlowSnapshot, PackageCatalog,
    PaymentDetails, Profile, ProfileDraft, TransactionId, VerificationFlow,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::{Result, SimulatorError};

pub struct SimulatorState {
    pub config: Config,
    pub catalog: PackageCatalog,
    pub otp: Arc<MockOtpTransport>,
    pub payment: Arc<MockPaymentTransport>,
    pub clock: Arc<dyn Clock>,
}

impl SimulatorState {
    fn flow_config(&self) -> FlowConfig {
        FlowConfig {
            resend_cooldown: self.config.resend_cooldown,
            ..FlowConfig::default()
        }
    }
}

/// Read the package catalog injected into the purchase screen.
pub fn load_catalog(path: &str) -> Result<PackageCatalog> {
    let json = std::fs::read_to_string(path)?;
    let catalog = PackageCatalog::from_json(&json)?;
    info!("Loaded {} packages from {path}", catalog.len());
    Ok(catalog)
}

/// Log every snapshot a screen would re-render from, until the flow is dropped.
fn watch_flow(label: &'static str, mut rx: watch::Receiver<FlowSnapshot>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            match &snapshot.error {
                Some(err) => info!("[{label}] {} (error: {err})", snapshot.state),
                None => info!("[{label}] {}", snapshot.state),
            }
        }
    })
}

fn type_code(flow: &VerificationFlow, code: &str) -> Result<()> {
    let mut focus = 0;
    for ch in code.chars() {
        focus = flow.enter_digit(focus, &ch.to_string())?;
    }
    Ok(())
}

/// Claim a deal and render its coupon image.
pub fn claim_coupon(deal_id: &str, user_id: &str) -> ClaimedCoupon {
    let coupon = ClaimedCoupon::claim(deal_id, user_id, Utc::now());
    let grid = coupon.grid();
    info!(
        "Claimed {} → code {} ({} of {} modules filled)\n{grid}",
        coupon.deal_id,
        coupon.code,
        grid.filled_count(),
        grid.size() * grid.size()
    );
    coupon
}

/// Edit name and phone, fumble the first code, then save.
pub async fn run_profile_edit(state: &SimulatorState, profile: Profile) -> Result<Profile> {
    let mut draft = ProfileDraft::new(
        profile,
        state.otp.clone(),
        state.clock.clone(),
        state.flow_config(),
    );
    let phone = draft.flow(FieldKind::Phone).clone();
    let watcher = watch_flow("phone", phone.subscribe());

    draft.set_name("Asha R.");
    draft.edit_field(FieldKind::Phone, "+919811111111")?;
    info!("Save enabled after edits: {}", draft.can_save());

    phone.send_code().await?;
    info!(
        "Code sent, resend available in {}s",
        seconds_label(phone.resend_remaining())
    );

    type_code(&phone, "000000")?;
    match phone.submit_code().await {
        Err(FlowError::VerifyRejected(reason)) => warn!("First attempt rejected: {reason}"),
        other => info!("First attempt: {other:?}"),
    }

    // Wrong digits stay in place; overwrite them all.
    type_code(&phone, &state.config.accepted_code)?;
    phone.submit_code().await?;
    info!("Save enabled after verification: {}", draft.can_save());

    let saved = draft.commit()?;
    info!("Profile saved: {saved:?}");

    drop(draft);
    drop(phone);
    let _ = watcher.await;
    Ok(saved)
}

/// Buy the configured package: verify email, then pay.
pub async fn run_purchase(state: &SimulatorState, email: &str) -> Result<Option<TransactionId>> {
    let package = state
        .catalog
        .get(&state.config.package_id)
        .ok_or_else(|| SimulatorError::UnknownPackage(state.config.package_id.clone()))?;
    info!(
        "Buying {} ({}) for {}, {} coupons / {} days",
        package.name, package.id, package.price, package.coupons, package.validity_days
    );

    let request = state
        .catalog
        .purchase_request(&package.id)
        .ok_or_else(|| SimulatorError::UnknownPackage(package.id.clone()))?;
    let flow = VerificationFlow::for_purchase(
        Destination::new(FieldKind::Email, email),
        request,
        state.otp.clone(),
        state.payment.clone(),
        state.clock.clone(),
        state.flow_config(),
    );
    let watcher = watch_flow("purchase", flow.subscribe());

    flow.send_code().await?;
    type_code(&flow, &state.config.accepted_code)?;
    flow.submit_code().await?;

    let details = PaymentDetails {
        card_number: coupon_flow::payment::format_card_number("4111111111111111"),
        expiry: coupon_flow::payment::format_expiry("1229"),
        cvv: "123".to_string(),
        holder_name: "Asha Rao".to_string(),
    };

    let outcome = match flow.submit_payment(details).await {
        Ok(txn) => {
            info!("Purchase complete, transaction {txn}");
            Some(txn)
        }
        Err(FlowError::PaymentDeclined(reason)) => {
            warn!("Purchase declined: {reason}");
            flow.cancel();
            None
        }
        Err(e) => return Err(e.into()),
    };

    drop(flow);
    let _ = watcher.await;
    Ok(outcome)
}
