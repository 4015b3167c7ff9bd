//! Submission-plan builder.
//!
//! Orchestrates scrape → match → decide into a frozen plan, in two modes:
//!
//! - **read-only**: returns an in-memory [`PlanOutcome`] and touches no run
//!   directory. This path never fails: every scrape error comes back as a
//!   structured `status = error` outcome with empty items and diagnostics
//!   intact (`readonly_compute_failed` is the catch-all).
//! - **persistent**: same pipeline, then freezes `plan.json`,
//!   `plan_meta.json` (checksum + confirm token), `match_results.json`,
//!   `storage_state.json` and the evidence artifacts under
//!   `data/runs/<run_id>/`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use docket_events::{EventKind, EventLog, instrumentation_path};
use docket_match::{DecisionConfig, MatchDebug, decide, match_requirement};
use docket_portal::modal::MAX_DISMISS_ITERATIONS;
use docket_portal::{
    PaginationCaps, PaginationDiagnostics, PortalError, PortalSession, SearchReport,
    collect_all_pages, dismiss_blockers, ensure_results, search::SEARCH_POPULATE_WAIT,
};
use docket_repo::RepoStore;
use docket_state::DataRoot;
use docket_token::{ConfirmSigner, plan_checksum};
use docket_types::{
    CoordinationContext, PlanCounts, PlanItem, SubmissionPlan, codes,
};

/// Knobs for one plan build.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub context: CoordinationContext,
    pub person_key: Option<String>,
    /// URL fragment that identifies the pending-list page.
    pub expected_page_marker: String,
    pub caps: PaginationCaps,
    pub decision: DecisionConfig,
    pub today: NaiveDate,
    /// Becomes the plan id; the persistent mode also uses it as the run
    /// directory name.
    pub run_id: String,
    pub search_wait: Duration,
}

impl BuilderConfig {
    pub fn new(context: CoordinationContext, run_id: &str, today: NaiveDate) -> Self {
        Self {
            context,
            person_key: None,
            expected_page_marker: "pendientes".to_string(),
            caps: PaginationCaps::default(),
            decision: DecisionConfig::default(),
            today,
            run_id: run_id.to_string(),
            search_wait: SEARCH_POPULATE_WAIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Ok,
    Error,
}

/// Scrape-side diagnostics, always present in the outcome.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScrapeDiagnostics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dismissed_overlays: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchReport>,
    pub pagination: PaginationDiagnostics,
}

/// What a plan build returns. The contract holds on every path: `items` is
/// always an array, `diagnostics` and `artifacts` always objects, `run_id`
/// nullable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOutcome {
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub items: Vec<PlanItem>,
    pub items_count: u32,
    pub diagnostics: ScrapeDiagnostics,
    pub artifacts: BTreeMap<String, PathBuf>,
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub summary: PlanCounts,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_results: Vec<MatchDebug>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<SubmissionPlan>,
}

impl PlanOutcome {
    fn error(code: &str, message: String, diagnostics: ScrapeDiagnostics) -> Self {
        Self {
            status: OutcomeStatus::Error,
            error_code: Some(code.to_string()),
            message: Some(message),
            items: Vec::new(),
            items_count: 0,
            diagnostics,
            artifacts: BTreeMap::new(),
            run_id: None,
            checksum: None,
            summary: PlanCounts::default(),
            match_results: Vec::new(),
            plan: None,
        }
    }
}

struct ScrapeProduct {
    plan: SubmissionPlan,
    checksum: String,
    diagnostics: ScrapeDiagnostics,
    match_results: Vec<MatchDebug>,
    screenshots: Vec<docket_portal::pagination::PageShot>,
}

struct BuildFailure {
    code: &'static str,
    message: String,
    diagnostics: ScrapeDiagnostics,
}

fn failure_code(error: &PortalError) -> &'static str {
    match error {
        PortalError::BlockerNotDismissed { .. } => codes::DHX_BLOCKER_NOT_DISMISSED,
        PortalError::GridParseMismatch { .. } => codes::GRID_PARSE_MISMATCH,
        PortalError::NoRowsAfterSearch { .. } => codes::NO_ROWS_AFTER_SEARCH,
        _ => codes::READONLY_COMPUTE_FAILED,
    }
}

fn scrape_and_match(
    session: &mut dyn PortalSession,
    repo: &RepoStore,
    config: &BuilderConfig,
    capture: bool,
    events: &mut EventLog,
) -> Result<ScrapeProduct, Box<BuildFailure>> {
    let mut diagnostics = ScrapeDiagnostics::default();

    if config.context.coordinated_company.trim().is_empty() {
        return Err(Box::new(BuildFailure {
            code: codes::MISSING_COMPANY_KEY,
            message: "el contexto no identifica a la empresa coordinada".to_string(),
            diagnostics,
        }));
    }

    events.record(EventKind::ScrapeStarted {
        url: session.current_url(),
    });
    diagnostics.frame_url = Some(session.current_url());

    let fail = |error: PortalError, diagnostics: &ScrapeDiagnostics| {
        Box::new(BuildFailure {
            code: failure_code(&error),
            message: error.to_string(),
            diagnostics: diagnostics.clone(),
        })
    };

    let dismissed = dismiss_blockers(session, MAX_DISMISS_ITERATIONS)
        .map_err(|e| fail(e, &diagnostics))?;
    for overlay in &dismissed.dismissed {
        events.record(EventKind::OverlayDismissed {
            overlay: overlay.clone(),
        });
    }
    diagnostics.dismissed_overlays = dismissed.dismissed;

    let search = ensure_results(session, &config.expected_page_marker, config.search_wait)
        .map_err(|e| fail(e, &diagnostics))?;
    events.record(EventKind::SearchEnsured {
        outcome: format!("{:?}", search.outcome),
        attempts: search.attempts,
    });
    diagnostics.search = Some(search);

    let collection = collect_all_pages(session, config.caps, capture)
        .map_err(|e| fail(e, &diagnostics))?;
    events.record(EventKind::PaginationFinished {
        pages_processed: collection.diagnostics.pages_processed,
        items_after_dedupe: collection.diagnostics.items_after_dedupe,
        truncated: collection.diagnostics.truncated,
    });
    diagnostics.pagination = collection.diagnostics.clone();

    let types = repo.load_types().map_err(|e| {
        Box::new(BuildFailure {
            code: codes::READONLY_COMPUTE_FAILED,
            message: format!("{e:#}"),
            diagnostics: diagnostics.clone(),
        })
    })?;
    let docs = repo.load_docs().map_err(|e| {
        Box::new(BuildFailure {
            code: codes::READONLY_COMPUTE_FAILED,
            message: format!("{e:#}"),
            diagnostics: diagnostics.clone(),
        })
    })?;

    let mut items = Vec::with_capacity(collection.items.len());
    let mut match_results = Vec::with_capacity(collection.items.len());
    for (index, pending) in collection.items.into_iter().enumerate() {
        let outcome = match_requirement(&pending, &types, &docs, config.today);
        let (decision, blocking_issues) = decide(&outcome, config.decision);

        events.record(EventKind::MatchEvaluated {
            pending_item_key: pending.pending_item_key.clone(),
            decision: format!("{decision:?}"),
            reason_code: outcome.primary_reason_code.clone(),
            confidence: outcome.confidence,
        });

        items.push(PlanItem {
            item_id: index as u32,
            pending_ref: pending,
            matched_doc: outcome.matched_doc.clone(),
            matched_rule: outcome.matched_rule.clone(),
            confidence: outcome.confidence,
            decision,
            primary_reason_code: outcome.primary_reason_code.clone(),
            human_hint: outcome.human_hint.clone(),
            blocking_issues,
        });
        match_results.push(outcome.debug);
    }

    let plan = SubmissionPlan {
        plan_id: config.run_id.clone(),
        created_at: chrono::Utc::now(),
        context: config.context.clone(),
        person_key: config.person_key.clone(),
        items,
    };
    let checksum = plan_checksum(&plan);
    events.record(EventKind::PlanFrozen {
        plan_id: plan.plan_id.clone(),
        checksum: checksum.clone(),
        items: plan.items.len() as u32,
    });

    Ok(ScrapeProduct {
        checksum,
        diagnostics,
        match_results,
        screenshots: collection.screenshots,
        plan,
    })
}

/// Read-only mode: scrape, match and decide entirely in memory.
///
/// Never panics and never returns an error: any failure becomes a
/// structured outcome with `status = error`, empty `items`, and whatever
/// diagnostics were gathered before the failure.
pub fn build_plan_readonly(
    session: &mut dyn PortalSession,
    repo: &RepoStore,
    config: &BuilderConfig,
) -> PlanOutcome {
    let mut events = EventLog::new();
    match scrape_and_match(session, repo, config, false, &mut events) {
        Ok(product) => PlanOutcome {
            status: OutcomeStatus::Ok,
            error_code: None,
            message: None,
            items_count: product.plan.items.len() as u32,
            summary: product.plan.counts(),
            items: product.plan.items.clone(),
            diagnostics: product.diagnostics,
            artifacts: BTreeMap::new(),
            run_id: None,
            checksum: Some(product.checksum),
            match_results: product.match_results,
            plan: Some(product.plan),
        },
        Err(failure) => PlanOutcome::error(failure.code, failure.message, failure.diagnostics),
    }
}

/// Persistent mode: read-only pipeline plus the frozen run directory.
///
/// Scrape failures still come back as structured outcomes; only filesystem
/// trouble is a hard error.
pub fn build_plan_persistent(
    session: &mut dyn PortalSession,
    repo: &RepoStore,
    data: &DataRoot,
    signer: &ConfirmSigner,
    storage_state: Option<&serde_json::Value>,
    config: &BuilderConfig,
) -> Result<PlanOutcome> {
    let mut events = EventLog::new();
    let product = match scrape_and_match(session, repo, config, true, &mut events) {
        Ok(product) => product,
        Err(failure) => {
            return Ok(PlanOutcome::error(
                failure.code,
                failure.message,
                failure.diagnostics,
            ));
        }
    };

    let run = data.run(&config.run_id);
    run.ensure_layout().context("failed to create run layout")?;

    run.save_plan(&product.plan).context("failed to persist plan")?;
    let meta = signer.issue_meta(&product.plan, chrono::Utc::now());
    run.save_plan_meta(&meta).context("failed to persist plan meta")?;

    if let Some(state) = storage_state {
        run.save_storage_state(state)
            .context("failed to persist storage state")?;
    }

    let evidence_dir = run.evidence_dir();
    let match_results_path = run.dir().join("match_results.json");
    let match_json = serde_json::to_string_pretty(&product.match_results)
        .context("failed to serialize match results")?;
    std::fs::write(&match_results_path, match_json)
        .context("failed to write match results")?;

    // Legacy artifact: full plan under its historical name.
    let submission_plan_path = run.dir().join("submission_plan.json");
    let plan_json = serde_json::to_string_pretty(&product.plan)
        .context("failed to serialize submission plan")?;
    std::fs::write(&submission_plan_path, plan_json)
        .context("failed to write submission plan")?;

    if let Some(search) = &product.diagnostics.search {
        let search_path = evidence_dir.join("search_result.json");
        let search_json =
            serde_json::to_string_pretty(search).context("failed to serialize search report")?;
        std::fs::write(&search_path, search_json).context("failed to write search report")?;
    }

    for shot in &product.screenshots {
        let path = evidence_dir.join(format!("{}.png", shot.label));
        std::fs::write(&path, &shot.bytes)
            .with_context(|| format!("failed to write screenshot {}", path.display()))?;
    }

    let instrumentation = instrumentation_path(&evidence_dir);
    events
        .write_json(&instrumentation)
        .context("failed to write instrumentation")?;

    let mut artifacts = BTreeMap::new();
    artifacts.insert("plan".to_string(), run.plan_path());
    artifacts.insert("plan_meta".to_string(), run.plan_meta_path());
    artifacts.insert("match_results".to_string(), match_results_path);
    artifacts.insert("submission_plan".to_string(), submission_plan_path);
    artifacts.insert("instrumentation".to_string(), instrumentation);
    artifacts.insert("evidence_dir".to_string(), evidence_dir);
    if storage_state.is_some() {
        artifacts.insert("storage_state".to_string(), run.storage_state_path());
    }

    Ok(PlanOutcome {
        status: OutcomeStatus::Ok,
        error_code: None,
        message: None,
        items_count: product.plan.items.len() as u32,
        summary: product.plan.counts(),
        items: product.plan.items.clone(),
        diagnostics: product.diagnostics,
        artifacts,
        run_id: Some(config.run_id.clone()),
        checksum: Some(meta.checksum),
        match_results: product.match_results,
        plan: Some(product.plan),
    })
}
