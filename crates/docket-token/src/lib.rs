//! Content hashes and confirm tokens.
//!
//! Three identities live here, all SHA-256 based:
//!
//! - the **plan checksum**, a digest over the plan id and its items in
//!   canonical order, stable across JSON re-encodings,
//! - **decision-pack and preset ids**, content hashes that exclude volatile
//!   fields (`decided_by`, `decided_at`) so resubmitting identical content
//!   yields the same id,
//! - the **confirm token**, an HMAC over `plan_id || checksum || issued_at`
//!   with a process-held secret and a 30-minute TTL. A plan edit, a wrong
//!   secret or an expired clock all refuse execution.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

use docket_types::{
    CONFIRM_TOKEN_TTL_SECONDS, PackDecision, PlanItem, PlanMeta, PresetScope, SubmissionPlan,
};

type HmacSha256 = Hmac<Sha256>;

/// Compute the checksum of a frozen plan.
///
/// Items are hashed sorted by `item_id` with a fixed field order; hints and
/// blocking issues are presentation, not identity, and stay out of the
/// digest.
pub fn plan_checksum(plan: &SubmissionPlan) -> String {
    let mut items: Vec<&PlanItem> = plan.items.iter().collect();
    items.sort_by_key(|i| i.item_id);

    let mut hasher = Sha256::new();
    hasher.update(plan.plan_id.as_bytes());
    hasher.update(b"\n");
    for item in items {
        hasher.update(item.item_id.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(item.pending_ref.pending_item_key.as_bytes());
        hasher.update(b"|");
        hasher.update(item.pending_ref.tipo_doc.as_bytes());
        hasher.update(b"|");
        hasher.update(item.pending_ref.elemento.as_bytes());
        hasher.update(b"|");
        hasher.update(item.pending_ref.empresa.as_bytes());
        hasher.update(b"|");
        hasher.update(format!("{:?}", item.decision).as_bytes());
        hasher.update(b"|");
        if let Some(doc) = &item.matched_doc {
            hasher.update(doc.doc_id.as_bytes());
            hasher.update(b"@");
            hasher.update(doc.stored_path.to_string_lossy().as_bytes());
        }
        hasher.update(b"|");
        hasher.update(format!("{:.4}", item.confidence).as_bytes());
        hasher.update(b"|");
        hasher.update(item.primary_reason_code.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Content id of a decision pack: plan id plus canonical decisions.
/// `decided_by` and `decided_at` are deliberately excluded.
pub fn decision_pack_id(plan_id: &str, decisions: &[PackDecision]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plan_id.as_bytes());
    hasher.update(b"\n");
    for d in decisions {
        hasher.update(d.item_id.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(format!("{:?}", d.action).as_bytes());
        hasher.update(b"|");
        hasher.update(d.chosen_local_doc_id.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(
            d.chosen_file_path
                .as_deref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default()
                .as_bytes(),
        );
        hasher.update(b"|");
        hasher.update(d.reason.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Content id of a preset: scope, action and defaults.
pub fn preset_id(
    scope: &PresetScope,
    action: docket_types::PackAction,
    defaults: &std::collections::BTreeMap<String, serde_json::Value>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(scope.platform.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(scope.type_id.as_bytes());
    hasher.update(b"|");
    hasher.update(scope.subject_key.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(scope.period_key.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(format!("{action:?}").as_bytes());
    hasher.update(b"|");
    // BTreeMap iteration is key-sorted, so this is canonical by construction.
    for (key, value) in defaults {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.to_string().as_bytes());
        hasher.update(b";");
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("confirm token does not verify for this plan")]
    Invalid,
    #[error("confirm token expired {age_seconds}s after issue (ttl {ttl_seconds}s)")]
    Expired { age_seconds: i64, ttl_seconds: u64 },
}

/// Issues and verifies confirm tokens with a process-held secret.
#[derive(Clone)]
pub struct ConfirmSigner {
    secret: Vec<u8>,
    ttl_seconds: u64,
}

impl std::fmt::Debug for ConfirmSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never leak the secret through Debug output.
        f.debug_struct("ConfirmSigner")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl ConfirmSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            ttl_seconds: CONFIRM_TOKEN_TTL_SECONDS,
        }
    }

    pub fn with_ttl(secret: impl Into<Vec<u8>>, ttl_seconds: u64) -> Self {
        Self {
            secret: secret.into(),
            ttl_seconds,
        }
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    fn mac_hex(&self, plan_id: &str, checksum: &str, issued_at: DateTime<Utc>) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can take key of any size");
        mac.update(plan_id.as_bytes());
        mac.update(b"|");
        mac.update(checksum.as_bytes());
        mac.update(b"|");
        mac.update(issued_at.timestamp().to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Issue a confirm token binding `plan_id` and `checksum` at
    /// `issued_at`. Format: `v1.<unix_ts>.sha256=<hex mac>`.
    pub fn issue(&self, plan_id: &str, checksum: &str, issued_at: DateTime<Utc>) -> String {
        format!(
            "v1.{}.sha256={}",
            issued_at.timestamp(),
            self.mac_hex(plan_id, checksum, issued_at)
        )
    }

    /// Issue the full `plan_meta.json` payload for a plan.
    pub fn issue_meta(&self, plan: &SubmissionPlan, issued_at: DateTime<Utc>) -> PlanMeta {
        let checksum = plan_checksum(plan);
        let confirm_token = self.issue(&plan.plan_id, &checksum, issued_at);
        PlanMeta {
            plan_id: plan.plan_id.clone(),
            checksum,
            confirm_token,
            issued_at,
            ttl_seconds: self.ttl_seconds,
        }
    }

    /// Verify `token` against the plan identity and the clock.
    pub fn verify(
        &self,
        plan_id: &str,
        checksum: &str,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<(), TokenError> {
        let mut parts = token.splitn(3, '.');
        let (Some("v1"), Some(ts), Some(mac)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Invalid);
        };
        let issued_ts: i64 = ts.parse().map_err(|_| TokenError::Invalid)?;
        let issued_at =
            DateTime::<Utc>::from_timestamp(issued_ts, 0).ok_or(TokenError::Invalid)?;

        let expected = format!("sha256={}", self.mac_hex(plan_id, checksum, issued_at));
        if !constant_time_eq(mac.as_bytes(), expected.as_bytes()) {
            return Err(TokenError::Invalid);
        }

        let age_seconds = (now - issued_at).num_seconds();
        if age_seconds < 0 || age_seconds as u64 > self.ttl_seconds {
            return Err(TokenError::Expired {
                age_seconds,
                ttl_seconds: self.ttl_seconds,
            });
        }
        Ok(())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
