use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};

use docket::builder::{BuilderConfig, OutcomeStatus, build_plan_persistent, build_plan_readonly};
use docket::engine::{ExecutorConfig, Reporter, execute_plan};
use docket::schedule::{TickRunResult, run_tick};
use docket_portal::scripted::ScriptedPortal;
use docket_repo::RepoStore;
use docket_state::DataRoot;
use docket_token::ConfirmSigner;
use docket_types::CoordinationContext;

#[derive(Parser, Debug)]
#[command(name = "docket", version)]
#[command(about = "Guardrailed submission of compliance documents to coordinator portals")]
struct Cli {
    /// Root of the data/ tree (runs, tenants, repository)
    #[arg(long, default_value = "data")]
    data_root: PathBuf,

    /// Document repository root (default: <data-root>/repository)
    #[arg(long)]
    repo_root: Option<PathBuf>,

    /// Coordination context: own company
    #[arg(long, default_value = "")]
    own_company: String,

    /// Coordination context: platform
    #[arg(long, default_value = "")]
    platform: String,

    /// Coordination context: coordinated company
    #[arg(long, default_value = "")]
    coordinated_company: String,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a submission plan in read-only mode (no run directory).
    Plan {
        /// Scripted portal fixture (JSON pages) to drive the scrape.
        #[arg(long)]
        fixture: PathBuf,
        /// Persist the plan into data/runs/<run-id>/ instead.
        #[arg(long)]
        persist: bool,
        /// Run id for persistent mode (default: timestamp-derived).
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Execute the single allow-listed item of a frozen plan.
    Execute {
        #[arg(long)]
        fixture: PathBuf,
        #[arg(long)]
        run_id: String,
        /// Confirm token from plan_meta.json.
        #[arg(long)]
        confirm_token: String,
        /// The one allow-listed document type id.
        #[arg(long)]
        allow_type: String,
        /// Equivalent of sending X-USE-REAL-UPLOADER: 1.
        #[arg(long)]
        use_real_uploader: bool,
    },
    /// List recent run summaries.
    Summaries {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        platform: Option<String>,
    },
    /// Evaluate and fire this tenant's schedules (dev/test gated).
    Tick {
        /// API key required outside dev/test (SCHEDULE_TICK_API_KEY).
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Print environment and guardrail diagnostics.
    Doctor,
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn environment() -> String {
    std::env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string())
}

fn confirm_secret() -> Result<String> {
    std::env::var("DOCKET_CONFIRM_SECRET")
        .context("DOCKET_CONFIRM_SECRET must be set (process-held HMAC secret)")
}

/// Pages of cell rows, as JSON: `[[["Recibo SS","Emilio","ACME"], ...], ...]`.
fn portal_from_fixture(path: &PathBuf) -> Result<ScriptedPortal> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let pages: Vec<Vec<Vec<String>>> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse fixture JSON from {}", path.display()))?;

    let mut portal = ScriptedPortal::authenticated();
    for page in pages {
        portal.add_page(page);
    }
    Ok(portal)
}

fn context_of(cli: &Cli) -> CoordinationContext {
    CoordinationContext {
        own_company: cli.own_company.clone(),
        platform: cli.platform.clone(),
        coordinated_company: cli.coordinated_company.clone(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let data = DataRoot::new(&cli.data_root);
    let repo_root = cli
        .repo_root
        .clone()
        .unwrap_or_else(|| data.repository_root());
    let repo = RepoStore::new(&repo_root);
    let mut reporter = CliReporter;

    match &cli.cmd {
        Commands::Plan {
            fixture,
            persist,
            run_id,
        } => {
            let mut portal = portal_from_fixture(fixture)?;
            let run_id = run_id.clone().unwrap_or_else(|| {
                format!("run-{}", Utc::now().format("%Y%m%dT%H%M%S%3f"))
            });
            let config = plan_config(&cli, &run_id)?;

            let outcome = if *persist {
                let signer = ConfirmSigner::new(confirm_secret()?);
                build_plan_persistent(&mut portal, &repo, &data, &signer, None, &config)?
            } else {
                build_plan_readonly(&mut portal, &repo, &config)
            };

            print_outcome_header(&outcome.status, outcome.error_code.as_deref());
            println!(
                "items: {} (auto {}, review {}, no-match {})",
                outcome.items_count,
                outcome.summary.auto_upload,
                outcome.summary.review_required,
                outcome.summary.no_match
            );
            println!(
                "pages: {} processed, {} before dedupe, {} after",
                outcome.diagnostics.pagination.pages_processed,
                outcome.diagnostics.pagination.items_before_dedupe,
                outcome.diagnostics.pagination.items_after_dedupe
            );
            if let Some(checksum) = &outcome.checksum {
                println!("checksum: {checksum}");
            }
            if let Some(run_id) = &outcome.run_id {
                println!("run_id: {run_id}");
                for (name, path) in &outcome.artifacts {
                    println!("  {name}: {}", path.display());
                }
            }
            for item in &outcome.items {
                println!(
                    "  [{}] {:?} {} ({})",
                    item.item_id, item.decision, item.pending_ref.tipo_doc,
                    item.primary_reason_code
                );
            }
        }
        Commands::Execute {
            fixture,
            run_id,
            confirm_token,
            allow_type,
            use_real_uploader,
        } => {
            let mut portal = portal_from_fixture(fixture)?;
            let signer = ConfirmSigner::new(confirm_secret()?);

            let mut config = ExecutorConfig::guardrailed(confirm_token, allow_type);
            config.environment = environment();
            config.real_uploader_header = *use_real_uploader;

            match execute_plan(
                &mut portal,
                &data,
                &repo,
                &signer,
                run_id,
                None,
                &config,
                &mut reporter,
            ) {
                Ok(summary) => {
                    println!(
                        "run {}: attempted {}, success {}, failed {}",
                        summary.run_id,
                        summary.execution.attempted,
                        summary.execution.success,
                        summary.execution.failed
                    );
                    for error in &summary.errors {
                        println!(
                            "  error: {:?}/{} (transient: {}, attempt {})",
                            error.phase, error.error_code, error.transient, error.attempt
                        );
                    }
                    println!("evidence: {}", summary.evidence_root.display());
                }
                Err(e) => {
                    eprintln!("[error] rejected: {e}");
                    std::process::exit(2);
                }
            }
        }
        Commands::Summaries { limit, platform } => {
            let summaries = data.recent_summaries(*limit, platform.as_deref())?;
            if summaries.is_empty() {
                println!("no run summaries found under {}", data.runs_dir().display());
            }
            for s in summaries {
                println!(
                    "{}  {}  success={} failed={} errors={}",
                    s.started_at.format("%Y-%m-%d %H:%M:%S"),
                    s.run_id,
                    s.execution.success,
                    s.execution.failed,
                    s.errors.len()
                );
            }
        }
        Commands::Tick { api_key } => {
            let env = environment();
            if !matches!(env.as_str(), "dev" | "test") {
                let expected = std::env::var("SCHEDULE_TICK_API_KEY").unwrap_or_default();
                if expected.is_empty() || api_key.as_deref() != Some(expected.as_str()) {
                    bail!("tick outside dev/test requires a matching SCHEDULE_TICK_API_KEY");
                }
            }

            let context = context_of(&cli);
            let report = run_tick(&data, &context, Utc::now(), &mut |schedule| {
                reporter.info(&format!(
                    "schedule {} due for plan {}",
                    schedule.schedule_id, schedule.plan_id
                ));
                // Kicking off the real execute-plan run is wired by the
                // HTTP surface; the CLI tick records the evaluation.
                TickRunResult {
                    run_id: None,
                    status: "evaluated".to_string(),
                }
            })?;
            println!(
                "evaluated {}: due [{}], executed [{}], locked out [{}]",
                report.evaluated,
                report.due.join(", "),
                report.executed.join(", "),
                report.locked_out.join(", ")
            );
        }
        Commands::Doctor => {
            run_doctor(&cli, &data, &repo);
        }
    }

    Ok(())
}

fn plan_config(cli: &Cli, run_id: &str) -> Result<BuilderConfig> {
    let context = context_of(cli);
    let mut config = BuilderConfig::new(context, run_id, Utc::now().date_naive());

    if let Ok(max_pages) = std::env::var("MAX_PAGES") {
        config.caps.max_pages = max_pages
            .parse()
            .context("MAX_PAGES must be a positive integer")?;
    }
    if let Ok(max_items) = std::env::var("MAX_ITEMS") {
        config.caps.max_items = max_items
            .parse()
            .context("MAX_ITEMS must be a positive integer")?;
    }
    Ok(config)
}

fn print_outcome_header(status: &OutcomeStatus, error_code: Option<&str>) {
    match status {
        OutcomeStatus::Ok => println!("status: ok"),
        OutcomeStatus::Error => println!(
            "status: error ({})",
            error_code.unwrap_or("unknown")
        ),
    }
}

fn run_doctor(cli: &Cli, data: &DataRoot, repo: &RepoStore) {
    let env = environment();
    println!("environment: {env}");
    println!(
        "real uploads: {}",
        if env == "dev" { "allowed (with header + token)" } else { "blocked" }
    );
    println!(
        "confirm secret: {}",
        if std::env::var("DOCKET_CONFIRM_SECRET").is_ok() {
            "present"
        } else {
            "MISSING (set DOCKET_CONFIRM_SECRET)"
        }
    );
    println!("data root: {}", data.root().display());
    println!(
        "runs dir: {} ({})",
        data.runs_dir().display(),
        if data.runs_dir().exists() { "exists" } else { "absent" }
    );
    println!("repository: {}", repo.root().display());
    match repo.load_types() {
        Ok(types) => println!("document types: {}", types.len()),
        Err(e) => println!("document types: unreadable ({e:#})"),
    }
    match repo.load_docs() {
        Ok(docs) => println!("documents: {}", docs.len()),
        Err(e) => println!("documents: unreadable ({e:#})"),
    }

    let context = context_of(cli);
    if context.coordinated_company.is_empty() {
        println!("coordination context: incomplete (pass --own-company/--platform/--coordinated-company)");
    } else {
        let tenant = data.tenant(&context);
        println!("tenant root: {}", tenant.root().display());
        match tenant.load_schedules() {
            Ok(schedules) => println!("schedules: {}", schedules.len()),
            Err(e) => println!("schedules: unreadable ({e:#})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn fixture_parses_pages() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = td.path().join("fixture.json");
        std::fs::write(
            &path,
            r#"[[["Recibo SS","Emilio","ACME"],["Otro","x","ACME"]],[["Tercero","y","ACME"]]]"#,
        )
        .expect("write");

        let mut portal = portal_from_fixture(&path).expect("parse");
        use docket_portal::PortalSession;
        let snapshot = portal.grid().expect("grid");
        assert_eq!(snapshot.rows.len(), 2);
        assert_eq!(snapshot.counter_text.as_deref(), Some("3 Registros"));
    }

    #[test]
    fn fixture_rejects_garbage() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = td.path().join("fixture.json");
        std::fs::write(&path, "not json").expect("write");
        assert!(portal_from_fixture(&path).is_err());
    }
}
