//! Decision-pack and preset overlay.
//!
//! A frozen plan is never edited. Human overrides are applied as a pure
//! transformation producing a transient *effective plan* for execution; the
//! underlying `plan_id` and checksum are untouched. Presets batch-generate
//! pack decisions on explicit user action only; the engine never
//! auto-applies one.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use docket_match::requirement_period;
use docket_repo::RepoStore;
use docket_rowkey::normalize;
use docket_token::decision_pack_id;
use docket_types::{
    DecisionPack, Decision, MatchedDoc, PackAction, PackDecision, PlanItem, Preset, SubmissionPlan,
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OverlayError {
    #[error("decision pack {pack_plan} does not belong to plan {plan}")]
    PlanMismatch { pack_plan: String, plan: String },
    #[error("decision references unknown item_id {item_id}")]
    UnknownItem { item_id: u32 },
    #[error("MARK_AS_MATCH for item {item_id} needs an existing document with a stored file")]
    MissingLocalDoc { item_id: u32 },
    #[error("FORCE_UPLOAD path for item {item_id} must lie under the repository root")]
    PathOutsideRepository { item_id: u32 },
    #[error("SKIP for item {item_id} requires a non-empty reason")]
    MissingSkipReason { item_id: u32 },
}

/// The plan as it will execute: frozen identity plus overridden items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectivePlan {
    /// Same as the frozen plan's id, always.
    pub plan_id: String,
    pub items: Vec<PlanItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_pack_id: Option<String>,
}

impl EffectivePlan {
    pub fn auto_upload_items(&self) -> Vec<&PlanItem> {
        self.items
            .iter()
            .filter(|i| i.decision == Decision::AutoUpload)
            .collect()
    }
}

/// Build a decision pack with its content-hash id.
pub fn build_decision_pack(
    plan_id: &str,
    decisions: Vec<PackDecision>,
    decided_by: Option<String>,
) -> DecisionPack {
    DecisionPack {
        decision_pack_id: decision_pack_id(plan_id, &decisions),
        plan_id: plan_id.to_string(),
        decisions,
        decided_by,
        decided_at: Some(chrono::Utc::now()),
    }
}

/// Apply `pack` over `plan`, validating every decision against the
/// repository. The frozen plan is read, never written.
pub fn apply_decision_pack(
    plan: &SubmissionPlan,
    pack: Option<&DecisionPack>,
    repo: &RepoStore,
) -> Result<EffectivePlan, OverlayError> {
    let mut items = plan.items.clone();

    let Some(pack) = pack else {
        return Ok(EffectivePlan {
            plan_id: plan.plan_id.clone(),
            items,
            applied_pack_id: None,
        });
    };

    if pack.plan_id != plan.plan_id {
        return Err(OverlayError::PlanMismatch {
            pack_plan: pack.plan_id.clone(),
            plan: plan.plan_id.clone(),
        });
    }

    let docs = repo.load_docs().unwrap_or_default();

    for decision in &pack.decisions {
        let item = items
            .iter_mut()
            .find(|i| i.item_id == decision.item_id)
            .ok_or(OverlayError::UnknownItem {
                item_id: decision.item_id,
            })?;

        match decision.action {
            PackAction::MarkAsMatch => {
                let doc_id = decision.chosen_local_doc_id.as_deref().ok_or(
                    OverlayError::MissingLocalDoc {
                        item_id: decision.item_id,
                    },
                )?;
                let doc = docs
                    .iter()
                    .find(|d| d.doc_id == doc_id)
                    .filter(|d| repo.has_stored_file(d))
                    .ok_or(OverlayError::MissingLocalDoc {
                        item_id: decision.item_id,
                    })?;

                item.matched_doc = Some(MatchedDoc {
                    doc_id: doc.doc_id.clone(),
                    type_id: doc.type_id.clone(),
                    stored_path: repo
                        .resolve_stored_path(doc)
                        .unwrap_or_default(),
                    status: doc.status,
                    period_key: doc.period_key.clone(),
                });
                item.decision = Decision::AutoUpload;
                item.matched_rule = Some("decision_pack:mark_as_match".to_string());
            }
            PackAction::ForceUpload => {
                let path = decision.chosen_file_path.as_deref().ok_or(
                    OverlayError::PathOutsideRepository {
                        item_id: decision.item_id,
                    },
                )?;
                if !repo.path_is_under_root(path) {
                    return Err(OverlayError::PathOutsideRepository {
                        item_id: decision.item_id,
                    });
                }

                let stored_path = if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    repo.root().join(path)
                };
                match &mut item.matched_doc {
                    Some(doc) => doc.stored_path = stored_path,
                    None => {
                        item.matched_doc = Some(MatchedDoc {
                            doc_id: format!("forced:{}", decision.item_id),
                            type_id: String::new(),
                            stored_path,
                            status: Default::default(),
                            period_key: None,
                        });
                    }
                }
                item.decision = Decision::AutoUpload;
                item.matched_rule = Some("decision_pack:force_upload".to_string());
            }
            PackAction::Skip => {
                let reason = decision
                    .reason
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .ok_or(OverlayError::MissingSkipReason {
                        item_id: decision.item_id,
                    })?;
                item.decision = Decision::DoNotUpload;
                item.primary_reason_code = "skipped_by_decision_pack".to_string();
                item.human_hint = reason.to_string();
            }
        }
    }

    Ok(EffectivePlan {
        plan_id: plan.plan_id.clone(),
        items,
        applied_pack_id: Some(pack.decision_pack_id.clone()),
    })
}

/// Does `preset` apply to `item` on `platform`? Strict: every non-null
/// scope field must equal the item's.
pub fn preset_matches(preset: &Preset, item: &PlanItem, platform: &str) -> bool {
    if !preset.enabled {
        return false;
    }
    if let Some(scope_platform) = &preset.scope.platform
        && normalize(scope_platform) != normalize(platform)
    {
        return false;
    }

    let item_type = item.matched_doc.as_ref().map(|d| d.type_id.as_str());
    if item_type != Some(preset.scope.type_id.as_str()) {
        return false;
    }

    if let Some(subject) = &preset.scope.subject_key {
        let wanted = normalize(subject);
        let elemento = normalize(&item.pending_ref.elemento);
        let empresa = normalize(&item.pending_ref.empresa);
        if wanted != elemento && wanted != empresa {
            return false;
        }
    }

    if let Some(period) = &preset.scope.period_key
        && requirement_period(&item.pending_ref).as_deref() != Some(period.as_str())
    {
        return false;
    }

    true
}

/// Pick the preset for an item when several match: most specific scope
/// wins, ties broken by most recently created.
pub fn select_preset<'a>(
    presets: &'a [Preset],
    item: &PlanItem,
    platform: &str,
) -> Option<&'a Preset> {
    presets
        .iter()
        .filter(|p| preset_matches(p, item, platform))
        .max_by(|a, b| {
            a.scope
                .specificity()
                .cmp(&b.scope.specificity())
                .then(a.created_at.cmp(&b.created_at))
        })
}

/// Expand a preset over user-selected items into pack decisions. Items the
/// preset does not match are left alone.
pub fn preset_to_decisions(
    preset: &Preset,
    items: &[PlanItem],
    platform: &str,
) -> Vec<PackDecision> {
    items
        .iter()
        .filter(|item| preset_matches(preset, item, platform))
        .map(|item| PackDecision {
            item_id: item.item_id,
            action: preset.action,
            chosen_local_doc_id: preset
                .defaults
                .get("chosen_local_doc_id")
                .and_then(|v| v.as_str())
                .map(String::from),
            chosen_file_path: preset
                .defaults
                .get("chosen_file_path")
                .and_then(|v| v.as_str())
                .map(std::path::PathBuf::from),
            reason: preset
                .defaults
                .get("reason")
                .and_then(|v| v.as_str())
                .map(String::from),
        })
        .collect()
}
