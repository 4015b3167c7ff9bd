//! Plan executor.
//!
//! Executes exactly one AUTO_UPLOAD item of a frozen plan against the
//! portal, under hard guardrails that all run before any navigation:
//! dev environment, explicit real-uploader header, a one-type allowlist
//! with `max_uploads == 1`, a valid unexpired confirm token over the exact
//! plan bytes, and an authenticated storage state.
//!
//! Per item the phases run Relocate → Open → Upload → Verify; every failure
//! is classified, bounded retries come from `docket-retry`, and the run
//! summary is written at exit on every path.

use std::fs;
use std::io::Write;
use std::thread;

use chrono::Utc;
use thiserror::Error;

use docket_events::{EventKind, EventLog, redact};
use docket_portal::grid::extract_from_snapshot;
use docket_portal::pagination::PAGE_TRANSITION_WAIT;
use docket_portal::{GridSnapshot, PortalError, PortalSession};
use docket_repo::RepoStore;
use docket_retry::{ClassifiedError, RetryPolicy, classify};
use docket_state::{DataRoot, RunPaths};
use docket_token::{ConfirmSigner, TokenError, plan_checksum};
use docket_types::{
    DecisionPack, ExecCounts, ExecPhase, PlanItem, RunError, RunSummary, codes,
};

use crate::overlay::apply_decision_pack;

/// Operator-facing progress sink.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Reporter that swallows everything; used by tests and the scheduler.
#[derive(Debug, Default)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn info(&mut self, _msg: &str) {}
    fn warn(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}

/// Contract violation: rejected before any portal work, no summary written.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{error_code}: {message}")]
pub struct ExecError {
    pub error_code: String,
    pub message: String,
}

impl ExecError {
    fn new(error_code: &str, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.to_string(),
            message: message.into(),
        }
    }
}

/// Executor configuration. The defaults are deliberately unusable: callers
/// must opt in to every guardrail explicitly.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub environment: String,
    /// Presence of `X-USE-REAL-UPLOADER: 1` on the request.
    pub real_uploader_header: bool,
    pub allowlist_type_ids: Vec<String>,
    pub max_uploads: u32,
    /// Token presented by the caller, verified against the plan.
    pub confirm_token: String,
    pub max_search_pages: u32,
    pub retry: RetryPolicy,
}

impl ExecutorConfig {
    pub fn guardrailed(confirm_token: &str, allow_type_id: &str) -> Self {
        Self {
            environment: "dev".to_string(),
            real_uploader_header: true,
            allowlist_type_ids: vec![allow_type_id.to_string()],
            max_uploads: 1,
            confirm_token: confirm_token.to_string(),
            max_search_pages: 10,
            retry: RetryPolicy::default(),
        }
    }
}

/// Execute the single allow-listed item of `run_id`'s frozen plan.
///
/// Returns the run summary (also persisted to `run_summary.json`) or a
/// guardrail error if the contract was violated before any work started.
pub fn execute_plan(
    session: &mut dyn PortalSession,
    data: &DataRoot,
    repo: &RepoStore,
    signer: &ConfirmSigner,
    run_id: &str,
    pack: Option<&DecisionPack>,
    config: &ExecutorConfig,
    reporter: &mut dyn Reporter,
) -> Result<RunSummary, ExecError> {
    // Guardrails. Any violation is a structured rejection, no work done.
    if config.environment != "dev" {
        return Err(ExecError::new(
            codes::REAL_UPLOAD_ENVIRONMENT_VIOLATION,
            format!(
                "real uploads require ENVIRONMENT=dev, got {:?}",
                config.environment
            ),
        ));
    }
    if !config.real_uploader_header {
        return Err(ExecError::new(
            codes::REAL_UPLOAD_GUARDRAIL_VIOLATION,
            "missing X-USE-REAL-UPLOADER: 1 header",
        ));
    }
    if config.max_uploads != 1 {
        return Err(ExecError::new(
            codes::REAL_UPLOAD_GUARDRAIL_VIOLATION,
            format!("max_uploads must be 1, got {}", config.max_uploads),
        ));
    }
    if config.allowlist_type_ids.len() != 1 {
        return Err(ExecError::new(
            codes::REAL_UPLOAD_GUARDRAIL_VIOLATION,
            format!(
                "allowlist must contain exactly one type, got {}",
                config.allowlist_type_ids.len()
            ),
        ));
    }

    let run = data.run(run_id);
    let plan = run.load_plan().map_err(|e| {
        ExecError::new(
            codes::REAL_UPLOAD_GUARDRAIL_VIOLATION,
            format!("plan not loadable: {e:#}"),
        )
    })?;

    // Recompute the checksum from the bytes on disk; a flipped plan byte
    // must invalidate the token.
    let checksum = plan_checksum(&plan);
    match signer.verify(&plan.plan_id, &checksum, &config.confirm_token, Utc::now()) {
        Ok(()) => {}
        Err(TokenError::Expired { .. }) => {
            return Err(ExecError::new(
                codes::CONFIRM_TOKEN_EXPIRED,
                "confirm token expired; rebuild the plan",
            ));
        }
        Err(TokenError::Invalid) => {
            return Err(ExecError::new(
                codes::INVALID_CONFIRM_TOKEN,
                "confirm token does not verify for this plan",
            ));
        }
    }

    if !run.storage_state_exists() {
        return Err(ExecError::new(
            codes::MISSING_STORAGE_STATE,
            "storage_state.json missing; rerun the read-only scrape",
        ));
    }
    match session.is_authenticated() {
        Ok(true) => {}
        Ok(false) | Err(_) => {
            return Err(ExecError::new(
                codes::STORAGE_STATE_NOT_AUTHENTICATED,
                "portal rejected the stored session; rerun the read-only scrape",
            ));
        }
    }

    let effective = apply_decision_pack(&plan, pack, repo).map_err(|e| {
        ExecError::new(codes::REAL_UPLOAD_GUARDRAIL_VIOLATION, e.to_string())
    })?;

    let auto_items = effective.auto_upload_items();
    if auto_items.len() != 1 {
        return Err(ExecError::new(
            codes::INVALID_ITEM_COUNT,
            format!(
                "exactly one AUTO_UPLOAD item required after overlay, got {}",
                auto_items.len()
            ),
        ));
    }
    let item = auto_items[0].clone();

    let Some(matched) = &item.matched_doc else {
        return Err(ExecError::new(
            codes::INVALID_ITEM_COUNT,
            "AUTO_UPLOAD item has no matched document",
        ));
    };
    if !matched.type_id.is_empty()
        && !config.allowlist_type_ids.contains(&matched.type_id)
    {
        return Err(ExecError::new(
            codes::REAL_UPLOAD_GUARDRAIL_VIOLATION,
            format!("type {} is not in the allowlist", matched.type_id),
        ));
    }

    reporter.info(&format!(
        "executing plan {} item {} ({})",
        plan.plan_id, item.item_id, item.pending_ref.tipo_doc
    ));

    // Guardrails passed; from here on a summary is always written.
    run.ensure_layout().map_err(io_error)?;
    let started_at = Utc::now();
    let mut events = EventLog::new();
    let mut errors: Vec<RunError> = Vec::new();

    let item_outcome = run_item(
        session,
        &run,
        &item,
        config,
        &mut events,
        &mut errors,
        reporter,
    );

    let (success, outcome_note) = match &item_outcome {
        ItemOutcome::Success { post_verification } => (true, post_verification.clone()),
        ItemOutcome::Failed { error_code } => (false, error_code.clone()),
    };

    events.record(EventKind::RunFinished {
        success,
        errors: errors.len() as u32,
    });

    let mut evidence_paths = std::collections::BTreeMap::new();
    evidence_paths.insert("execution_dir".to_string(), run.execution_dir());
    evidence_paths.insert("evidence".to_string(), run.evidence_dir());
    evidence_paths.insert(
        "upload_evidence".to_string(),
        run.item_dir(item.item_id),
    );

    let summary = RunSummary {
        run_id: run_id.to_string(),
        context: plan.context.clone(),
        person_key: plan.person_key.clone(),
        started_at,
        finished_at: Utc::now(),
        counts: effective_counts(&effective.items),
        execution: ExecCounts {
            attempted: 1,
            success: u32::from(success),
            failed: u32::from(!success),
        },
        errors,
        cancelled: false,
        evidence_root: run.evidence_dir(),
        evidence_paths,
    };

    run.save_run_summary(&summary).map_err(io_error)?;
    run.write_run_finished(if success { "ok" } else { "failed" })
        .map_err(io_error)?;
    events
        .write_json(&run.execution_dir().join("execution_meta.json"))
        .map_err(io_error)?;

    if success {
        reporter.info(&format!("upload verified: {outcome_note}"));
    } else {
        reporter.error(&format!("upload failed ({outcome_note}); see run summary"));
    }

    Ok(summary)
}

fn io_error(e: anyhow::Error) -> ExecError {
    ExecError::new("io_error", format!("{e:#}"))
}

fn effective_counts(items: &[PlanItem]) -> docket_types::PlanCounts {
    let mut counts = docket_types::PlanCounts {
        pending_total: items.len() as u32,
        ..Default::default()
    };
    for item in items {
        match item.decision {
            docket_types::Decision::AutoUpload => counts.auto_upload += 1,
            docket_types::Decision::ReviewRequired => counts.review_required += 1,
            docket_types::Decision::NoMatch => counts.no_match += 1,
            docket_types::Decision::DoNotUpload => {}
        }
    }
    counts
}

enum ItemOutcome {
    Success { post_verification: String },
    Failed { error_code: String },
}

/// Relocate → Open → Upload → Verify for the one allow-listed item. All
/// failures are recorded as classified [`RunError`]s; nothing escapes.
fn run_item(
    session: &mut dyn PortalSession,
    run: &RunPaths,
    item: &PlanItem,
    config: &ExecutorConfig,
    events: &mut EventLog,
    errors: &mut Vec<RunError>,
    reporter: &mut dyn Reporter,
) -> ItemOutcome {
    let key = item.pending_ref.pending_item_key.as_str();
    let stored_path = item
        .matched_doc
        .as_ref()
        .map(|d| d.stored_path.clone())
        .unwrap_or_default();

    let mut record = |events: &mut EventLog,
                      errors: &mut Vec<RunError>,
                      phase: ExecPhase,
                      classified: &ClassifiedError,
                      attempt: u32| {
        events.record(EventKind::PhaseFailed {
            phase,
            error_code: classified.error_code.clone(),
            transient: classified.transient,
            attempt,
        });
        errors.push(RunError {
            phase,
            error_code: classified.error_code.clone(),
            transient: classified.transient,
            attempt,
            details_path: None,
        });
    };

    // Phase 1: relocate by pending-item key across pages.
    let mut attempt = 1;
    let located = loop {
        events.record(EventKind::PhaseStarted {
            phase: ExecPhase::Relocate,
            attempt,
        });
        let scan = scan_for_key(session, key, config.max_search_pages);
        let classified = match scan {
            Ok(Some((page, index))) => {
                events.record(EventKind::ItemRelocated {
                    page,
                    row_index: index as u32,
                });
                break Some((page, index));
            }
            Ok(None) => classify(
                ExecPhase::Relocate,
                &PortalError::ItemNotOnPage {
                    key: key.to_string(),
                },
                false,
            ),
            Err(e) => classify(ExecPhase::Relocate, &e, false),
        };

        record(events, errors, ExecPhase::Relocate, &classified, attempt);
        let decision = config
            .retry
            .evaluate(ExecPhase::Relocate, &classified, attempt);
        if !decision.retry {
            break None;
        }
        reporter.warn(&format!(
            "item not found on scan #{attempt}; forcing refresh and returning to page 1"
        ));
        thread::sleep(decision.delay);
        if session.refresh().is_err() || session.goto_first_page().is_err() {
            break None;
        }
        attempt += 1;
    };

    let Some((_page, row_index)) = located else {
        return ItemOutcome::Failed {
            error_code: codes::ITEM_NOT_FOUND_BEFORE_UPLOAD.to_string(),
        };
    };

    capture(session, run, "before_upload");

    // Phase 2: open the detail form.
    let mut attempt = 1;
    let opened = loop {
        events.record(EventKind::PhaseStarted {
            phase: ExecPhase::Open,
            attempt,
        });
        match session.open_row(row_index) {
            Ok(()) => break true,
            Err(e) => {
                let classified = classify(ExecPhase::Open, &e, false);
                record(events, errors, ExecPhase::Open, &classified, attempt);
                let decision = config.retry.evaluate(ExecPhase::Open, &classified, attempt);
                if !decision.retry {
                    break false;
                }
                thread::sleep(decision.delay);
                attempt += 1;
            }
        }
    };
    if !opened {
        return ItemOutcome::Failed {
            error_code: codes::TIMEOUT_OPEN_DETAIL.to_string(),
        };
    }

    // Phase 3: upload. `upload_attempted` flips immediately before the
    // network interaction; a failure after that point is final.
    let mut attempt = 1;
    let mut upload_attempted = false;
    let uploaded = loop {
        events.record(EventKind::PhaseStarted {
            phase: ExecPhase::Upload,
            attempt,
        });
        let staged = session.upload_file(&stored_path);
        let result = match staged {
            Ok(()) => {
                upload_attempted = true;
                session.confirm_upload()
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                events.record(EventKind::UploadPerformed {
                    path: stored_path.display().to_string(),
                });
                break true;
            }
            Err(e) => {
                let classified = classify(ExecPhase::Upload, &e, upload_attempted);
                record(events, errors, ExecPhase::Upload, &classified, attempt);
                let decision = config
                    .retry
                    .evaluate(ExecPhase::Upload, &classified, attempt);
                if !decision.retry {
                    break false;
                }
                thread::sleep(decision.delay);
                attempt += 1;
            }
        }
    };

    append_upload_log(run, item, upload_attempted, uploaded);

    if !uploaded {
        return ItemOutcome::Failed {
            error_code: codes::TIMEOUT_UPLOAD.to_string(),
        };
    }

    capture(session, run, "after_upload");
    copy_item_evidence(run, item);

    // Phase 4: post-verification; the item must be gone from every page.
    let mut attempt = 1;
    loop {
        events.record(EventKind::PhaseStarted {
            phase: ExecPhase::Verify,
            attempt,
        });
        let check = session
            .close_detail()
            .and_then(|_| session.refresh())
            .and_then(|_| scan_for_key(session, key, config.max_search_pages));
        match check {
            Ok(None) => {
                events.record(EventKind::PostVerification { absent: true });
                return ItemOutcome::Success {
                    post_verification: "item_not_found_after_upload_ok".to_string(),
                };
            }
            Ok(Some(_)) => {
                events.record(EventKind::PostVerification { absent: false });
                errors.push(RunError {
                    phase: ExecPhase::Verify,
                    error_code: codes::ITEM_STILL_PRESENT_AFTER_UPLOAD.to_string(),
                    transient: false,
                    attempt,
                    details_path: None,
                });
                return ItemOutcome::Failed {
                    error_code: codes::ITEM_STILL_PRESENT_AFTER_UPLOAD.to_string(),
                };
            }
            Err(e) => {
                let classified = classify(ExecPhase::Verify, &e, true);
                record(events, errors, ExecPhase::Verify, &classified, attempt);
                let decision = config
                    .retry
                    .evaluate(ExecPhase::Verify, &classified, attempt);
                if !decision.retry {
                    return ItemOutcome::Failed {
                        error_code: classified.error_code,
                    };
                }
                thread::sleep(decision.delay);
                attempt += 1;
            }
        }
    }
}

/// Find the row carrying `key`, walking up to `max_pages` pages from the
/// first one. `Ok(None)` means a completed scan with no hit.
fn scan_for_key(
    session: &mut dyn PortalSession,
    key: &str,
    max_pages: u32,
) -> Result<Option<(u32, usize)>, PortalError> {
    let controls = session.pagination()?;
    if controls.has_first {
        session.goto_first_page()?;
    }

    let mut page = 1;
    loop {
        let snapshot = session.grid()?;
        if let Some(index) = page_index_of_key(&snapshot, key) {
            return Ok(Some((page, index)));
        }
        if page >= max_pages {
            return Ok(None);
        }
        let controls = session.pagination()?;
        if !controls.has_next || !controls.next_enabled {
            return Ok(None);
        }
        session.click_next_page()?;
        session.wait_loading_cleared(PAGE_TRANSITION_WAIT)?;
        page += 1;
    }
}

/// Index of the raw row whose canonical key equals `key`, preserving the
/// on-page row index (noise rows included) so it can be opened directly.
fn page_index_of_key(snapshot: &GridSnapshot, key: &str) -> Option<usize> {
    for (index, raw) in snapshot.rows.iter().enumerate() {
        let single = GridSnapshot {
            headers: snapshot.headers.clone(),
            rows: vec![raw.clone()],
            counter_text: None,
        };
        if let Ok(extract) = extract_from_snapshot(&single, String::new())
            && extract.rows.first().map(|r| r.pending_item_key.as_str()) == Some(key)
        {
            return Some(index);
        }
    }
    None
}

fn capture(session: &mut dyn PortalSession, run: &RunPaths, label: &str) {
    // Evidence capture is best-effort; a failed screenshot never fails the
    // run.
    if let Ok(bytes) = session.screenshot(label) {
        let path = run.execution_dir().join(format!("{label}.png"));
        let _ = fs::create_dir_all(run.execution_dir());
        let _ = fs::write(&path, &bytes);
    }
}

fn copy_item_evidence(run: &RunPaths, item: &PlanItem) {
    let item_dir = run.item_dir(item.item_id);
    if fs::create_dir_all(&item_dir).is_err() {
        return;
    }
    for label in ["before_upload", "after_upload"] {
        let src = run.execution_dir().join(format!("{label}.png"));
        if src.is_file() {
            let _ = fs::copy(&src, item_dir.join(format!("{label}.png")));
        }
    }
}

fn append_upload_log(run: &RunPaths, item: &PlanItem, attempted: bool, uploaded: bool) {
    let line = format!(
        "{} item={} key={} attempted={} uploaded={}",
        Utc::now().to_rfc3339(),
        item.item_id,
        redact(&item.pending_ref.pending_item_key),
        attempted,
        uploaded
    );
    let path = run.execution_dir().join("upload_log.txt");
    let _ = fs::create_dir_all(run.execution_dir());
    if let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(&path) {
        let _ = writeln!(file, "{line}");
    }
}
