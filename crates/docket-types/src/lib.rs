//! # Types
//!
//! Core domain types for docket: the document repository model, scraped
//! pending requirements, frozen submission plans, human decision packs and
//! presets, run summaries, and schedules.
//!
//! ## Serialization
//!
//! Every type that reaches disk implements `Serialize`/`Deserialize` from
//! `serde`. Enums that appear in persisted payloads use explicit snake_case
//! (or the portal-facing SCREAMING_SNAKE_CASE for plan decisions) so the
//! JSON artifacts stay byte-stable across releases.
//!
//! ## Stability
//!
//! `plan.json`, `plan_meta.json` and `run_summary.json` are audit artifacts;
//! field order and naming here are part of the on-disk contract.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub mod codes;

/// Whether a document type attaches to the coordinated company itself or to
/// one of its workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectScope {
    /// Document belongs to the company (e.g. insurance certificate).
    Company,
    /// Document belongs to a worker (e.g. medical-aptitude report).
    Worker,
}

/// How the validity start date of a document is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityStartMode {
    /// Validity starts at the extracted issue date (default).
    #[default]
    IssueDate,
    /// Validity starts at a manually captured start date; without one the
    /// document's validity is unknown.
    Manual,
}

/// Validity policy mode for a document type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidityMode {
    /// One submission per month; valid through the end of the next month.
    #[default]
    Monthly,
    /// Valid for `annual.months` months from the base date.
    Annual,
    /// Valid until an explicit override date; unknown without one.
    FixedEndDate,
}

/// Where the month of a monthly-mode document is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonthSource {
    /// Month parsed from the document's file name.
    #[default]
    NameDate,
    /// Month of the extracted issue date.
    IssueDate,
    /// Month from the repository `period_key`.
    PeriodKey,
}

/// Renewal cadence in months. `n > 1` marks the type as a renewal type: it
/// is re-issued every n months and generates no monthly missing periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NMonths {
    pub n: u32,
}

/// Annual-mode settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnualPolicy {
    /// Validity span in months (default 12).
    #[serde(default = "default_annual_months")]
    pub months: u32,
}

fn default_annual_months() -> u32 {
    12
}

impl Default for AnnualPolicy {
    fn default() -> Self {
        Self { months: 12 }
    }
}

/// Monthly-mode settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MonthlyPolicy {
    #[serde(default)]
    pub month_source: MonthSource,
}

/// Rule set the validity calculator evaluates for a document type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidityPolicy {
    #[serde(default)]
    pub mode: ValidityMode,
    /// Renewal cadence override. When `n > 0` the end date is base + n
    /// months regardless of `mode`; when `n > 1` the type is a renewal type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_months: Option<NMonths>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annual: Option<AnnualPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly: Option<MonthlyPolicy>,
    #[serde(default)]
    pub grace_days: u32,
}

impl ValidityPolicy {
    /// True when the type submits one document per period (month or year)
    /// and therefore participates in missing-period planning. Renewal types
    /// (`n_months.n > 1`) never do.
    pub fn is_periodic_submission(&self) -> bool {
        let n = self.n_months.map(|m| m.n).unwrap_or(0);
        match self.mode {
            ValidityMode::Monthly => n <= 1,
            ValidityMode::Annual => self.n_months.is_none(),
            ValidityMode::FixedEndDate => false,
        }
    }

    /// True when the type is re-issued on an n-month cycle rather than
    /// submitted per period.
    pub fn is_renewal(&self) -> bool {
        self.n_months.map(|m| m.n > 1).unwrap_or(false)
    }
}

/// A document type known to the repository, with the portal vocabulary that
/// maps scraped requirement text onto it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentType {
    pub type_id: String,
    pub name: String,
    pub scope: SubjectScope,
    /// Raw portal strings that identify this type ("Recibo SS", ...).
    #[serde(default)]
    pub platform_aliases: Vec<String>,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub issue_date_required: bool,
    #[serde(default)]
    pub validity_start_mode: ValidityStartMode,
    #[serde(default)]
    pub validity_policy: ValidityPolicy,
}

/// Workflow status of a repository document. Ordering expresses matcher
/// preference: ready_to_submit beats reviewed beats draft beats submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocStatus {
    #[default]
    Draft,
    Reviewed,
    ReadyToSubmit,
    Submitted,
}

impl DocStatus {
    /// Matcher ranking weight; higher is preferred.
    pub fn rank(self) -> u8 {
        match self {
            DocStatus::ReadyToSubmit => 3,
            DocStatus::Reviewed => 2,
            DocStatus::Draft => 1,
            DocStatus::Submitted => 0,
        }
    }
}

/// Dates pulled out of the document file (filename/date heuristics only;
/// content extraction is out of scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExtractedFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity_start_date: Option<NaiveDate>,
}

/// Manual override of the computed validity end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityOverride {
    pub valid_to: NaiveDate,
}

/// A document in the local repository. Computed validity is never persisted
/// as authority; it is always derived from the calculator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub type_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_key: Option<String>,
    /// "YYYY-MM" or "YYYY".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_key: Option<String>,
    #[serde(default)]
    pub extracted: ExtractedFields,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_path: Option<PathBuf>,
    #[serde(default)]
    pub status: DocStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity_override: Option<ValidityOverride>,
}

/// One row scraped from the portal's pending-requirements grid. Field names
/// keep the portal's own vocabulary; `pending_item_key` is the stable
/// fingerprint used for dedupe and re-localization.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PendingRequirement {
    pub tipo_doc: String,
    pub elemento: String,
    pub empresa: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estado: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origen: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fecha_solicitud: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inicio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fin: Option<String>,
    pub pending_item_key: String,
    pub raw_row_signature: String,
}

/// Per-item verdict in a submission plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    AutoUpload,
    ReviewRequired,
    NoMatch,
    DoNotUpload,
}

/// Snapshot of the repository document a plan item matched. A snapshot, not
/// a reference: the plan stays meaningful even if the repository moves on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedDoc {
    pub doc_id: String,
    pub type_id: String,
    pub stored_path: PathBuf,
    pub status: DocStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_key: Option<String>,
}

/// One pending requirement plus the engine's decision about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    /// Stable index within the plan; items execute in `item_id` order.
    pub item_id: u32,
    pub pending_ref: PendingRequirement,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_doc: Option<MatchedDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    pub confidence: f64,
    pub decision: Decision,
    pub primary_reason_code: String,
    pub human_hint: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocking_issues: Vec<String>,
}

/// The coordination triplet every write-side operation runs under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CoordinationContext {
    pub own_company: String,
    pub platform: String,
    pub coordinated_company: String,
}

impl CoordinationContext {
    /// Stable tenant directory component: the triplet joined and sanitized.
    pub fn tenant_id(&self) -> String {
        let raw = format!(
            "{}__{}__{}",
            self.own_company, self.platform, self.coordinated_company
        );
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

/// A frozen submission plan. Immutable once persisted; the checksum in
/// `PlanMeta` covers `plan_id` plus the items sorted by `item_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionPlan {
    /// Equals the run id of the scrape that produced it.
    pub plan_id: String,
    pub created_at: DateTime<Utc>,
    pub context: CoordinationContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_key: Option<String>,
    pub items: Vec<PlanItem>,
}

impl SubmissionPlan {
    /// Counts by decision, in run-summary shape.
    pub fn counts(&self) -> PlanCounts {
        let mut counts = PlanCounts {
            pending_total: self.items.len() as u32,
            ..PlanCounts::default()
        };
        for item in &self.items {
            match item.decision {
                Decision::AutoUpload => counts.auto_upload += 1,
                Decision::ReviewRequired => counts.review_required += 1,
                Decision::NoMatch => counts.no_match += 1,
                Decision::DoNotUpload => {}
            }
        }
        counts
    }
}

/// Default confirm-token lifetime.
pub const CONFIRM_TOKEN_TTL_SECONDS: u64 = 1800;

/// Sidecar metadata persisted next to `plan.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanMeta {
    pub plan_id: String,
    pub checksum: String,
    pub confirm_token: String,
    pub issued_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

/// Human override applied to a single plan item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackAction {
    MarkAsMatch,
    ForceUpload,
    Skip,
}

/// One decision inside a decision pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackDecision {
    pub item_id: u32,
    pub action: PackAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen_local_doc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen_file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// An append-only set of human overrides for a frozen plan. The id is a
/// content hash over `plan_id` and the canonical decisions; `decided_by` and
/// `decided_at` are excluded so re-submitting the same pack is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionPack {
    pub decision_pack_id: String,
    pub plan_id: String,
    pub decisions: Vec<PackDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

/// Scope a preset applies to. A preset matches an item only when every
/// non-null scope field equals the item's; null fields are wildcards.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PresetScope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    pub type_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_key: Option<String>,
}

impl PresetScope {
    /// Number of non-wildcard fields; used to rank ambiguous presets.
    pub fn specificity(&self) -> u32 {
        1 + self.platform.is_some() as u32
            + self.subject_key.is_some() as u32
            + self.period_key.is_some() as u32
    }
}

/// A scoped decision template the user applies in batch from the UI. Never
/// auto-applied by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub preset_id: String,
    pub scope: PresetScope,
    pub action: PackAction,
    #[serde(default)]
    pub defaults: BTreeMap<String, serde_json::Value>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Executor phase, for error classification and retry caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecPhase {
    Relocate,
    Open,
    Upload,
    Verify,
    Scrape,
}

/// One classified error recorded into the run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub phase: ExecPhase,
    pub error_code: String,
    pub transient: bool,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details_path: Option<PathBuf>,
}

/// Plan-side counts reported in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanCounts {
    pub pending_total: u32,
    pub auto_upload: u32,
    pub review_required: u32,
    pub no_match: u32,
}

/// Execution-side counts reported in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecCounts {
    pub attempted: u32,
    pub success: u32,
    pub failed: u32,
}

/// Terminal artifact of an execution, written once at executor exit
/// regardless of outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub context: CoordinationContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_key: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts: PlanCounts,
    pub execution: ExecCounts,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<RunError>,
    #[serde(default)]
    pub cancelled: bool,
    pub evidence_root: PathBuf,
    /// Phase name → evidence directory.
    #[serde(default)]
    pub evidence_paths: BTreeMap<String, PathBuf>,
}

/// Schedule cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Daily,
    Weekly,
}

/// A recurring execute-plan trigger, evaluated by the scheduler tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub schedule_id: String,
    pub enabled: bool,
    pub plan_id: String,
    pub cadence: Cadence,
    /// Local wall-clock "HH:MM".
    pub at_time: String,
    /// 0 = Monday .. 6 = Sunday; weekly cadence only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekday: Option<u8>,
    pub context: CoordinationContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_status: Option<String>,
}
