//! Coupon claiming: a claim produces a short redemption code and, from it, the
//! module grid shown on the coupon screen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pattern::{self, ModuleGrid};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ClaimedCoupon {
    pub deal_id: String,
    pub code: String,
    pub claimed_at: DateTime<Utc>,
}

impl ClaimedCoupon {
    pub fn claim(deal_id: impl Into<String>, user_id: &str, claimed_at: DateTime<Utc>) -> Self {
        let deal_id = deal_id.into();
        let code = claim_code(&deal_id, user_id, claimed_at);
        Self {
            deal_id,
            code,
            claimed_at,
        }
    }

    pub fn grid(&self) -> ModuleGrid {
        pattern::generate(&self.code)
    }
}

/// `CPN-XXXX-XXXX`, derived from the deal, the user and the claim time.
pub fn claim_code(deal_id: &str, user_id: &str, claimed_at: DateTime<Utc>) -> String {
    let millis = claimed_at.timestamp_millis().to_be_bytes();
    let parts: [&[u8]; 3] = [deal_id.as_bytes(), user_id.as_bytes(), &millis];

    let mut hash = FNV_OFFSET;
    for part in parts {
        for &b in part.iter().chain(std::iter::once(&0xff)) {
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }

    let digest = hex::encode_upper(&hash.to_be_bytes()[..4]);
    format!("CPN-{}-{}", &digest[..4], &digest[4..])
}
