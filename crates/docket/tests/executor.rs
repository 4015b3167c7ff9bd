//! End-to-end executor tests against the scripted portal.

use std::path::PathBuf;

use chrono::Utc;
use tempfile::tempdir;

use docket::engine::{ExecutorConfig, NullReporter, execute_plan};
use docket::overlay::build_decision_pack;
use docket_portal::PortalError;
use docket_portal::scripted::ScriptedPortal;
use docket_repo::RepoStore;
use docket_state::DataRoot;
use docket_token::ConfirmSigner;
use docket_types::{
    CoordinationContext, Decision, DocStatus, Document, ExecPhase, MatchedDoc, PackAction,
    PackDecision, PendingRequirement, PlanItem, PlanMeta, SubmissionPlan, codes,
};

const ALLOWED_TYPE: &str = "T-RECIBO";

fn ctx() -> CoordinationContext {
    CoordinationContext {
        own_company: "own".to_string(),
        platform: "e-coordina".to_string(),
        coordinated_company: "ACME".to_string(),
    }
}

fn pending(tipo: &str, elem: &str) -> PendingRequirement {
    let mut p = PendingRequirement {
        tipo_doc: tipo.to_string(),
        elemento: elem.to_string(),
        empresa: "ACME".to_string(),
        ..Default::default()
    };
    let cells = vec![tipo.to_string(), elem.to_string(), "ACME".to_string()];
    docket_rowkey::canonicalize(&mut p, None, &cells);
    p
}

fn row_cells(tipo: &str, elem: &str) -> Vec<String> {
    vec![tipo.to_string(), elem.to_string(), "ACME".to_string()]
}

fn auto_item(item_id: u32, tipo: &str, elem: &str) -> PlanItem {
    PlanItem {
        item_id,
        pending_ref: pending(tipo, elem),
        matched_doc: Some(MatchedDoc {
            doc_id: format!("D{item_id}"),
            type_id: ALLOWED_TYPE.to_string(),
            stored_path: PathBuf::from("docs/D0.pdf"),
            status: DocStatus::ReadyToSubmit,
            period_key: Some("2026-01".to_string()),
        }),
        matched_rule: Some("alias+subject+period".to_string()),
        confidence: 0.95,
        decision: Decision::AutoUpload,
        primary_reason_code: "matched".to_string(),
        human_hint: String::new(),
        blocking_issues: Vec::new(),
    }
}

fn no_match_item(item_id: u32, tipo: &str, elem: &str) -> PlanItem {
    PlanItem {
        item_id,
        pending_ref: pending(tipo, elem),
        matched_doc: None,
        matched_rule: None,
        confidence: 0.0,
        decision: Decision::NoMatch,
        primary_reason_code: "no_alias_match".to_string(),
        human_hint: String::new(),
        blocking_issues: Vec::new(),
    }
}

struct Fixture {
    _data_td: tempfile::TempDir,
    _repo_td: tempfile::TempDir,
    data: DataRoot,
    repo: RepoStore,
    signer: ConfirmSigner,
    meta: PlanMeta,
}

fn setup(run_id: &str, items: Vec<PlanItem>) -> Fixture {
    let data_td = tempdir().expect("tempdir");
    let repo_td = tempdir().expect("tempdir");
    let data = DataRoot::new(data_td.path());
    let repo = RepoStore::new(repo_td.path());
    let signer = ConfirmSigner::new("executor-secret");

    std::fs::create_dir_all(repo_td.path().join("docs")).expect("mkdir");
    std::fs::write(repo_td.path().join("docs/D0.pdf"), b"%PDF").expect("file");

    let plan = SubmissionPlan {
        plan_id: run_id.to_string(),
        created_at: Utc::now(),
        context: ctx(),
        person_key: None,
        items,
    };
    let run = data.run(run_id);
    run.save_plan(&plan).expect("plan");
    let meta = signer.issue_meta(&plan, Utc::now());
    run.save_plan_meta(&meta).expect("meta");
    run.save_storage_state(&serde_json::json!({"cookies": []}))
        .expect("storage state");

    Fixture {
        _data_td: data_td,
        _repo_td: repo_td,
        data,
        repo,
        signer,
        meta,
    }
}

fn config(fx: &Fixture) -> ExecutorConfig {
    ExecutorConfig::guardrailed(&fx.meta.confirm_token, ALLOWED_TYPE)
}

#[test]
fn happy_path_uploads_and_verifies_disappearance() {
    let fx = setup(
        "run-ok",
        vec![auto_item(0, "Recibo SS", "Emilio"), no_match_item(1, "Otro", "x")],
    );

    let mut portal = ScriptedPortal::authenticated();
    portal.add_page(vec![
        row_cells("Recibo SS", "Emilio"),
        row_cells("Otro", "x"),
    ]);

    let summary = execute_plan(
        &mut portal,
        &fx.data,
        &fx.repo,
        &fx.signer,
        "run-ok",
        None,
        &config(&fx),
        &mut NullReporter,
    )
    .expect("executes");

    assert_eq!(summary.execution.attempted, 1);
    assert_eq!(summary.execution.success, 1);
    assert_eq!(summary.execution.failed, 0);
    assert!(summary.errors.is_empty());
    assert_eq!(portal.uploaded_paths(), &[PathBuf::from("docs/D0.pdf")]);
    assert_eq!(portal.confirm_count(), 1);
    assert_eq!(summary.counts.pending_total, 2);
    assert_eq!(summary.counts.auto_upload, 1);

    // Summary and evidence are on disk.
    let run = fx.data.run("run-ok");
    let persisted = run.load_run_summary().expect("summary");
    assert_eq!(persisted.execution.success, 1);
    assert!(run.run_finished_path().is_file());
    assert!(run.execution_dir().join("before_upload.png").is_file());
    assert!(run.execution_dir().join("after_upload.png").is_file());
    assert!(run.execution_dir().join("upload_log.txt").is_file());
    assert!(run.execution_dir().join("execution_meta.json").is_file());
    assert!(run.item_dir(0).join("after_upload.png").is_file());
}

#[test]
fn environment_guardrail_rejects_without_work() {
    let fx = setup("run-env", vec![auto_item(0, "Recibo SS", "Emilio")]);
    let mut portal = ScriptedPortal::authenticated();

    let mut cfg = config(&fx);
    cfg.environment = "production".to_string();

    let err = execute_plan(
        &mut portal,
        &fx.data,
        &fx.repo,
        &fx.signer,
        "run-env",
        None,
        &cfg,
        &mut NullReporter,
    )
    .expect_err("must reject");
    assert_eq!(err.error_code, codes::REAL_UPLOAD_ENVIRONMENT_VIOLATION);
    assert_eq!(portal.open_count(), 0);
    assert!(portal.uploaded_paths().is_empty());
}

#[test]
fn header_and_allowlist_guardrails() {
    let fx = setup("run-guard", vec![auto_item(0, "Recibo SS", "Emilio")]);
    let mut portal = ScriptedPortal::authenticated();

    let mut no_header = config(&fx);
    no_header.real_uploader_header = false;
    let err = execute_plan(
        &mut portal, &fx.data, &fx.repo, &fx.signer, "run-guard", None, &no_header,
        &mut NullReporter,
    )
    .expect_err("rejects");
    assert_eq!(err.error_code, codes::REAL_UPLOAD_GUARDRAIL_VIOLATION);

    let mut two_types = config(&fx);
    two_types
        .allowlist_type_ids
        .push("T-OTRO".to_string());
    let err = execute_plan(
        &mut portal, &fx.data, &fx.repo, &fx.signer, "run-guard", None, &two_types,
        &mut NullReporter,
    )
    .expect_err("rejects");
    assert_eq!(err.error_code, codes::REAL_UPLOAD_GUARDRAIL_VIOLATION);

    let mut two_uploads = config(&fx);
    two_uploads.max_uploads = 2;
    let err = execute_plan(
        &mut portal, &fx.data, &fx.repo, &fx.signer, "run-guard", None, &two_uploads,
        &mut NullReporter,
    )
    .expect_err("rejects");
    assert_eq!(err.error_code, codes::REAL_UPLOAD_GUARDRAIL_VIOLATION);

    let mut wrong_type = config(&fx);
    wrong_type.allowlist_type_ids = vec!["T-OTRO".to_string()];
    let err = execute_plan(
        &mut portal, &fx.data, &fx.repo, &fx.signer, "run-guard", None, &wrong_type,
        &mut NullReporter,
    )
    .expect_err("rejects");
    assert_eq!(err.error_code, codes::REAL_UPLOAD_GUARDRAIL_VIOLATION);
}

#[test]
fn tampered_plan_invalidates_the_token() {
    let fx = setup("run-tamper", vec![auto_item(0, "Recibo SS", "Emilio")]);

    // Flip one byte of the frozen plan on disk.
    let plan_path = fx.data.run("run-tamper").plan_path();
    let content = std::fs::read_to_string(&plan_path).expect("read");
    let tampered = content.replace("Recibo SS", "Recibo XX");
    assert_ne!(content, tampered);
    std::fs::write(&plan_path, tampered).expect("write");

    let mut portal = ScriptedPortal::authenticated();
    let err = execute_plan(
        &mut portal,
        &fx.data,
        &fx.repo,
        &fx.signer,
        "run-tamper",
        None,
        &config(&fx),
        &mut NullReporter,
    )
    .expect_err("must reject");
    assert_eq!(err.error_code, codes::INVALID_CONFIRM_TOKEN);
}

#[test]
fn expired_token_is_rejected() {
    let data_td = tempdir().expect("tempdir");
    let repo_td = tempdir().expect("tempdir");
    let data = DataRoot::new(data_td.path());
    let repo = RepoStore::new(repo_td.path());
    let signer = ConfirmSigner::new("executor-secret");

    let plan = SubmissionPlan {
        plan_id: "run-exp".to_string(),
        created_at: Utc::now(),
        context: ctx(),
        person_key: None,
        items: vec![auto_item(0, "Recibo SS", "Emilio")],
    };
    let run = data.run("run-exp");
    run.save_plan(&plan).expect("plan");
    // Issued 31 minutes ago: outside the 30-minute TTL.
    let meta = signer.issue_meta(&plan, Utc::now() - chrono::Duration::minutes(31));
    run.save_plan_meta(&meta).expect("meta");
    run.save_storage_state(&serde_json::json!({})).expect("ss");

    let mut portal = ScriptedPortal::authenticated();
    let err = execute_plan(
        &mut portal,
        &data,
        &repo,
        &signer,
        "run-exp",
        None,
        &ExecutorConfig::guardrailed(&meta.confirm_token, ALLOWED_TYPE),
        &mut NullReporter,
    )
    .expect_err("must reject");
    assert_eq!(err.error_code, codes::CONFIRM_TOKEN_EXPIRED);
}

#[test]
fn missing_storage_state_is_rejected() {
    let fx = setup("run-ss", vec![auto_item(0, "Recibo SS", "Emilio")]);
    std::fs::remove_file(fx.data.run("run-ss").storage_state_path()).expect("remove");

    let mut portal = ScriptedPortal::authenticated();
    let err = execute_plan(
        &mut portal,
        &fx.data,
        &fx.repo,
        &fx.signer,
        "run-ss",
        None,
        &config(&fx),
        &mut NullReporter,
    )
    .expect_err("must reject");
    assert_eq!(err.error_code, codes::MISSING_STORAGE_STATE);
}

#[test]
fn unauthenticated_session_is_rejected() {
    let fx = setup("run-auth", vec![auto_item(0, "Recibo SS", "Emilio")]);
    let mut portal = ScriptedPortal::default();
    portal.set_authenticated(false);

    let err = execute_plan(
        &mut portal,
        &fx.data,
        &fx.repo,
        &fx.signer,
        "run-auth",
        None,
        &config(&fx),
        &mut NullReporter,
    )
    .expect_err("must reject");
    assert_eq!(err.error_code, codes::STORAGE_STATE_NOT_AUTHENTICATED);
}

#[test]
fn zero_or_many_auto_items_violate_item_count() {
    let fx = setup("run-zero", vec![no_match_item(0, "Otro", "x")]);
    let mut portal = ScriptedPortal::authenticated();
    let err = execute_plan(
        &mut portal,
        &fx.data,
        &fx.repo,
        &fx.signer,
        "run-zero",
        None,
        &config(&fx),
        &mut NullReporter,
    )
    .expect_err("rejects zero");
    assert_eq!(err.error_code, codes::INVALID_ITEM_COUNT);

    let fx = setup(
        "run-two",
        vec![
            auto_item(0, "Recibo SS", "Emilio"),
            auto_item(1, "Recibo SS", "Marta"),
        ],
    );
    let mut portal = ScriptedPortal::authenticated();
    let err = execute_plan(
        &mut portal,
        &fx.data,
        &fx.repo,
        &fx.signer,
        "run-two",
        None,
        &config(&fx),
        &mut NullReporter,
    )
    .expect_err("rejects two");
    assert_eq!(err.error_code, codes::INVALID_ITEM_COUNT);
}

#[test]
fn relocate_failure_then_success_after_refresh() {
    // The item is missing on the first sweep; the forced refresh reveals it
    // on page 2.
    let fx = setup("run-reloc", vec![auto_item(0, "Recibo SS", "Emilio")]);

    let mut portal = ScriptedPortal::authenticated();
    portal.add_page(vec![row_cells("Otro A", "a")]);
    portal.set_pages_after_refresh(vec![
        vec![row_cells("Otro A", "a")],
        vec![row_cells("Recibo SS", "Emilio")],
    ]);

    let summary = execute_plan(
        &mut portal,
        &fx.data,
        &fx.repo,
        &fx.signer,
        "run-reloc",
        None,
        &config(&fx),
        &mut NullReporter,
    )
    .expect("executes");

    assert_eq!(summary.execution.success, 1);
    // One relocation-retry refresh plus the post-upload verification one.
    assert_eq!(portal.refresh_count(), 2);

    // One transient relocation error in the summary.
    let reloc_errors: Vec<_> = summary
        .errors
        .iter()
        .filter(|e| e.error_code == codes::ITEM_NOT_FOUND_BEFORE_UPLOAD)
        .collect();
    assert_eq!(reloc_errors.len(), 1);
    assert!(reloc_errors[0].transient);
    assert_eq!(reloc_errors[0].phase, ExecPhase::Relocate);
}

#[test]
fn relocate_exhausts_after_single_retry() {
    let fx = setup("run-gone", vec![auto_item(0, "Recibo SS", "Emilio")]);

    let mut portal = ScriptedPortal::authenticated();
    portal.add_page(vec![row_cells("Otro A", "a")]);

    let summary = execute_plan(
        &mut portal,
        &fx.data,
        &fx.repo,
        &fx.signer,
        "run-gone",
        None,
        &config(&fx),
        &mut NullReporter,
    )
    .expect("summary still produced");

    assert_eq!(summary.execution.failed, 1);
    assert_eq!(portal.refresh_count(), 1);
    let reloc_errors: Vec<_> = summary
        .errors
        .iter()
        .filter(|e| e.error_code == codes::ITEM_NOT_FOUND_BEFORE_UPLOAD)
        .collect();
    // Initial scan plus exactly one retry.
    assert_eq!(reloc_errors.len(), 2);
    assert!(portal.uploaded_paths().is_empty());
}

#[test]
fn upload_timeout_after_bytes_sent_never_retries() {
    let fx = setup("run-s5", vec![auto_item(0, "Recibo SS", "Emilio")]);

    let mut portal = ScriptedPortal::authenticated();
    portal.add_page(vec![row_cells("Recibo SS", "Emilio")]);
    // Staging succeeds, the network send times out.
    portal.fail_next_confirm(PortalError::Timeout {
        what: "upload POST".to_string(),
    });

    let summary = execute_plan(
        &mut portal,
        &fx.data,
        &fx.repo,
        &fx.signer,
        "run-s5",
        None,
        &config(&fx),
        &mut NullReporter,
    )
    .expect("summary still produced");

    assert_eq!(summary.execution.failed, 1);
    let upload_errors: Vec<_> = summary
        .errors
        .iter()
        .filter(|e| e.error_code == codes::TIMEOUT_UPLOAD)
        .collect();
    assert_eq!(upload_errors.len(), 1);
    assert!(!upload_errors[0].transient);
    // No second attempt: the file was staged once, confirm tried once.
    assert_eq!(portal.uploaded_paths().len(), 1);
    assert_eq!(portal.confirm_count(), 0);
}

#[test]
fn upload_timeout_before_bytes_sent_retries_once() {
    let fx = setup("run-stage", vec![auto_item(0, "Recibo SS", "Emilio")]);

    let mut portal = ScriptedPortal::authenticated();
    portal.add_page(vec![row_cells("Recibo SS", "Emilio")]);
    // First staging attempt times out before any network interaction.
    portal.fail_next_upload(PortalError::Timeout {
        what: "file input".to_string(),
    });

    let summary = execute_plan(
        &mut portal,
        &fx.data,
        &fx.repo,
        &fx.signer,
        "run-stage",
        None,
        &config(&fx),
        &mut NullReporter,
    )
    .expect("executes");

    assert_eq!(summary.execution.success, 1);
    let upload_errors: Vec<_> = summary
        .errors
        .iter()
        .filter(|e| e.error_code == codes::TIMEOUT_UPLOAD)
        .collect();
    assert_eq!(upload_errors.len(), 1);
    assert!(upload_errors[0].transient);
    assert_eq!(portal.confirm_count(), 1);
}

#[test]
fn item_still_present_after_upload_fails_the_run() {
    let fx = setup("run-stuck", vec![auto_item(0, "Recibo SS", "Emilio")]);

    let mut portal = ScriptedPortal::authenticated();
    portal.add_page(vec![row_cells("Recibo SS", "Emilio")]);
    portal.keep_rows_after_upload();

    let summary = execute_plan(
        &mut portal,
        &fx.data,
        &fx.repo,
        &fx.signer,
        "run-stuck",
        None,
        &config(&fx),
        &mut NullReporter,
    )
    .expect("summary still produced");

    assert_eq!(summary.execution.failed, 1);
    assert!(summary
        .errors
        .iter()
        .any(|e| e.error_code == codes::ITEM_STILL_PRESENT_AFTER_UPLOAD));
}

#[test]
fn decision_pack_mark_as_match_enables_upload() {
    // Frozen plan has no AUTO_UPLOAD; the pack promotes the NO_MATCH item.
    let fx = setup("run-pack", vec![no_match_item(0, "Recibo SS", "Emilio")]);

    std::fs::create_dir_all(fx.repo.root().join("docs")).expect("mkdir");
    std::fs::write(fx.repo.root().join("docs/DP.pdf"), b"%PDF").expect("file");
    fx.repo
        .upsert_doc(Document {
            doc_id: "DP".to_string(),
            type_id: ALLOWED_TYPE.to_string(),
            company_key: Some("ACME".to_string()),
            person_key: Some("Emilio".to_string()),
            period_key: Some("2026-01".to_string()),
            extracted: Default::default(),
            issued_at: None,
            stored_path: Some("docs/DP.pdf".into()),
            status: DocStatus::ReadyToSubmit,
            validity_override: None,
        })
        .expect("doc");

    let pack = build_decision_pack(
        "run-pack",
        vec![PackDecision {
            item_id: 0,
            action: PackAction::MarkAsMatch,
            chosen_local_doc_id: Some("DP".to_string()),
            chosen_file_path: None,
            reason: None,
        }],
        Some("inspector".to_string()),
    );

    let mut portal = ScriptedPortal::authenticated();
    portal.add_page(vec![row_cells("Recibo SS", "Emilio")]);

    let summary = execute_plan(
        &mut portal,
        &fx.data,
        &fx.repo,
        &fx.signer,
        "run-pack",
        Some(&pack),
        &config(&fx),
        &mut NullReporter,
    )
    .expect("executes");

    assert_eq!(summary.execution.success, 1);
    assert_eq!(portal.uploaded_paths().len(), 1);
    assert!(portal.uploaded_paths()[0].ends_with("docs/DP.pdf"));
}
