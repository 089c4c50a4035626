//! # Profile editing
//!
//! The edit-profile screen lets the user change their name freely, but a new
//! phone number or email only counts once it has been proven with a one-time
//! code. [`ProfileDraft`] owns one [`VerificationFlow`] per verifiable field and
//! decides when "Save" is enabled:
//!
//! * something changed: the name, or a field that has since been verified, and
//! * no field has a change still waiting for verification.
//!
//! Editing a field again after it was verified drops the verification at once.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::errors::{FlowError, ProfileError};
use crate::flow::{FlowConfig, VerificationFlow};
use crate::transport::OtpTransport;
use crate::types::{FieldKind, FlowState};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub phone: String,
    pub email: String,
}

impl Profile {
    fn field(&self, kind: FieldKind) -> &str {
        match kind {
            FieldKind::Phone => &self.phone,
            FieldKind::Email => &self.email,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldStatus {
    Unchanged,
    NeedsVerification,
    Verified,
}

pub struct ProfileDraft {
    original: Profile,
    name: String,
    phone: Arc<VerificationFlow>,
    email: Arc<VerificationFlow>,
}

impl ProfileDraft {
    pub fn new(
        profile: Profile,
        otp: Arc<dyn OtpTransport>,
        clock: Arc<dyn Clock>,
        config: FlowConfig,
    ) -> Self {
        let phone = VerificationFlow::for_field_change(
            FieldKind::Phone,
            profile.phone.clone(),
            otp.clone(),
            clock.clone(),
            config,
        );
        let email = VerificationFlow::for_field_change(
            FieldKind::Email,
            profile.email.clone(),
            otp,
            clock,
            config,
        );

        Self {
            name: profile.name.clone(),
            original: profile,
            phone: Arc::new(phone),
            email: Arc::new(email),
        }
    }

    pub fn original(&self) -> &Profile {
        &self.original
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn flow(&self, kind: FieldKind) -> &Arc<VerificationFlow> {
        match kind {
            FieldKind::Phone => &self.phone,
            FieldKind::Email => &self.email,
        }
    }

    /// What the input box shows: the pending value if any, else the verified one.
    pub fn field_value(&self, kind: FieldKind) -> String {
        let snapshot = self.flow(kind).snapshot();
        snapshot
            .change
            .map(|c| c.proposed_value)
            .unwrap_or(snapshot.verified_value)
    }

    /// Apply a keystroke-level edit to a verifiable field.
    ///
    /// Typing the verified value back in withdraws the pending change.
    pub fn edit_field(
        &self,
        kind: FieldKind,
        value: impl Into<String>,
    ) -> Result<FlowState, FlowError> {
        let flow = self.flow(kind);
        match flow.request_change(value) {
            Err(FlowError::Unchanged) => Ok(flow.state()),
            other => other,
        }
    }

    pub fn field_status(&self, kind: FieldKind) -> FieldStatus {
        let flow = self.flow(kind);
        if flow.has_pending_change() || flow.state().is_in_flight() {
            FieldStatus::NeedsVerification
        } else if flow.verified_value() != self.original.field(kind) {
            FieldStatus::Verified
        } else {
            FieldStatus::Unchanged
        }
    }

    pub fn can_save(&self) -> bool {
        self.blocking_field().is_none() && self.has_changes()
    }

    /// Produce the saved profile and make it the new baseline.
    pub fn commit(&mut self) -> Result<Profile, ProfileError> {
        if let Some(kind) = self.blocking_field() {
            return Err(ProfileError::UnverifiedChange(kind));
        }
        if !self.has_changes() {
            return Err(ProfileError::NothingToSave);
        }

        let saved = Profile {
            name: self.name.trim().to_string(),
            phone: self.phone.verified_value(),
            email: self.email.verified_value(),
        };
        self.name = saved.name.clone();
        self.original = saved.clone();
        Ok(saved)
    }

    fn has_changes(&self) -> bool {
        self.name.trim() != self.original.name
            || [FieldKind::Phone, FieldKind::Email]
                .into_iter()
                .any(|k| self.field_status(k) == FieldStatus::Verified)
    }

    fn blocking_field(&self) -> Option<FieldKind> {
        [FieldKind::Phone, FieldKind::Email]
            .into_iter()
            .find(|&k| self.field_status(k) == FieldStatus::NeedsVerification)
    }
}
