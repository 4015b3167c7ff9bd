//! On-disk layout and persistence for docket.
//!
//! ```text
//! data/
//!   tenants/<tenant_id>/
//!     learning/   presets/   exports/   schedules/schedules.json
//!   runs/<run_id>/
//!     plan.json  plan_meta.json  storage_state.json
//!     evidence/  execution/  run_finished.json  run_summary.json
//!   repository/
//! ```
//!
//! Every JSON artifact is written via temp-file + rename; plan.json is
//! byte-stable after creation and never rewritten.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use docket_types::{
    CoordinationContext, DecisionPack, PlanMeta, RunSummary, Schedule, SubmissionPlan,
};

pub const PLAN_FILE: &str = "plan.json";
pub const PLAN_META_FILE: &str = "plan_meta.json";
pub const STORAGE_STATE_FILE: &str = "storage_state.json";
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";
pub const RUN_FINISHED_FILE: &str = "run_finished.json";
pub const SCHEDULES_FILE: &str = "schedules.json";

/// Root of the `data/` tree.
#[derive(Debug, Clone)]
pub struct DataRoot {
    root: PathBuf,
}

impl DataRoot {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("runs")
    }

    pub fn repository_root(&self) -> PathBuf {
        self.root.join("repository")
    }

    pub fn run(&self, run_id: &str) -> RunPaths {
        RunPaths {
            dir: self.runs_dir().join(run_id),
        }
    }

    pub fn tenant(&self, context: &CoordinationContext) -> TenantPaths {
        TenantPaths {
            root: self.root.join("tenants").join(context.tenant_id()),
        }
    }

    /// Enumerate recent run summaries, newest first, optionally filtered by
    /// platform. Unreadable entries are skipped, not fatal.
    pub fn recent_summaries(
        &self,
        limit: usize,
        platform: Option<&str>,
    ) -> Result<Vec<RunSummary>> {
        let runs_dir = self.runs_dir();
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut summaries: Vec<RunSummary> = Vec::new();
        for entry in fs::read_dir(&runs_dir)
            .with_context(|| format!("failed to list runs dir {}", runs_dir.display()))?
        {
            let entry = entry.context("failed to read runs dir entry")?;
            let summary_path = entry.path().join(RUN_SUMMARY_FILE);
            if !summary_path.is_file() {
                continue;
            }
            let Ok(content) = fs::read_to_string(&summary_path) else {
                continue;
            };
            let Ok(summary) = serde_json::from_str::<RunSummary>(&content) else {
                continue;
            };
            if let Some(platform) = platform
                && summary.context.platform != platform
            {
                continue;
            }
            summaries.push(summary);
        }

        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        summaries.truncate(limit);
        Ok(summaries)
    }
}

/// Per-tenant read/write roots.
#[derive(Debug, Clone)]
pub struct TenantPaths {
    root: PathBuf,
}

impl TenantPaths {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn learning_dir(&self) -> PathBuf {
        self.root.join("learning")
    }

    pub fn presets_file(&self) -> PathBuf {
        self.root.join("presets").join("decision_presets.json")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }

    pub fn schedules_file(&self) -> PathBuf {
        self.root.join("schedules").join(SCHEDULES_FILE)
    }

    pub fn load_schedules(&self) -> Result<Vec<Schedule>> {
        let path = self.schedules_file();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read schedules file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse schedules JSON from {}", path.display()))
    }

    pub fn save_schedules(&self, schedules: &[Schedule]) -> Result<()> {
        write_json_atomic(&self.schedules_file(), schedules)
    }
}

/// Paths inside one run directory.
#[derive(Debug, Clone)]
pub struct RunPaths {
    dir: PathBuf,
}

impl RunPaths {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn plan_path(&self) -> PathBuf {
        self.dir.join(PLAN_FILE)
    }

    pub fn plan_meta_path(&self) -> PathBuf {
        self.dir.join(PLAN_META_FILE)
    }

    pub fn storage_state_path(&self) -> PathBuf {
        self.dir.join(STORAGE_STATE_FILE)
    }

    pub fn evidence_dir(&self) -> PathBuf {
        self.dir.join("evidence")
    }

    pub fn execution_dir(&self) -> PathBuf {
        self.dir.join("execution")
    }

    pub fn item_dir(&self, item_id: u32) -> PathBuf {
        self.execution_dir().join("items").join(item_id.to_string())
    }

    pub fn upload_attempt_dir(&self, attempt: u32) -> PathBuf {
        self.execution_dir()
            .join("upload")
            .join(format!("attempt_{attempt}"))
    }

    pub fn run_summary_path(&self) -> PathBuf {
        self.dir.join(RUN_SUMMARY_FILE)
    }

    pub fn run_finished_path(&self) -> PathBuf {
        self.dir.join(RUN_FINISHED_FILE)
    }

    /// Create the run directory skeleton (evidence/ and execution/).
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [self.evidence_dir(), self.execution_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create run dir {}", dir.display()))?;
        }
        Ok(())
    }

    /// Persist a freshly frozen plan. Refuses to overwrite: plans are
    /// immutable once written.
    pub fn save_plan(&self, plan: &SubmissionPlan) -> Result<()> {
        let path = self.plan_path();
        if path.exists() {
            bail!("plan already exists at {}; plans are immutable", path.display());
        }
        write_json_atomic(&path, plan)
    }

    pub fn load_plan(&self) -> Result<SubmissionPlan> {
        read_json(&self.plan_path(), "plan")
    }

    pub fn save_plan_meta(&self, meta: &PlanMeta) -> Result<()> {
        write_json_atomic(&self.plan_meta_path(), meta)
    }

    pub fn load_plan_meta(&self) -> Result<PlanMeta> {
        read_json(&self.plan_meta_path(), "plan meta")
    }

    pub fn save_storage_state(&self, state: &serde_json::Value) -> Result<()> {
        write_json_atomic(&self.storage_state_path(), state)
    }

    pub fn storage_state_exists(&self) -> bool {
        self.storage_state_path().is_file()
    }

    pub fn load_storage_state(&self) -> Result<serde_json::Value> {
        read_json(&self.storage_state_path(), "storage state")
    }

    pub fn decision_packs_dir(&self) -> PathBuf {
        self.dir.join("decision_packs")
    }

    /// Persist a decision pack under its content-hash id. Returns whether a
    /// file was created: resubmitting an identical pack is a no-op.
    pub fn save_decision_pack(&self, pack: &DecisionPack) -> Result<bool> {
        let path = self
            .decision_packs_dir()
            .join(format!("{}.json", pack.decision_pack_id));
        if path.exists() {
            return Ok(false);
        }
        write_json_atomic(&path, pack)?;
        Ok(true)
    }

    pub fn load_decision_pack(&self, decision_pack_id: &str) -> Result<DecisionPack> {
        read_json(
            &self
                .decision_packs_dir()
                .join(format!("{decision_pack_id}.json")),
            "decision pack",
        )
    }

    /// All packs recorded for this plan, in no particular order.
    pub fn load_decision_packs(&self) -> Result<Vec<DecisionPack>> {
        let dir = self.decision_packs_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut packs = Vec::new();
        for entry in fs::read_dir(&dir)
            .with_context(|| format!("failed to list decision packs in {}", dir.display()))?
        {
            let entry = entry.context("failed to read decision pack entry")?;
            if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            packs.push(read_json(&entry.path(), "decision pack")?);
        }
        Ok(packs)
    }

    pub fn save_run_summary(&self, summary: &RunSummary) -> Result<()> {
        write_json_atomic(&self.run_summary_path(), summary)
    }

    pub fn load_run_summary(&self) -> Result<RunSummary> {
        read_json(&self.run_summary_path(), "run summary")
    }

    /// Terminal marker, written after the summary.
    pub fn write_run_finished(&self, status: &str) -> Result<()> {
        let payload = serde_json::json!({
            "status": status,
            "finished_at": chrono::Utc::now(),
        });
        write_json_atomic(&self.run_finished_path(), &payload)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {} file {}", what, path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {} JSON from {}", what, path.display()))
}

fn write_json_atomic<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create dir {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("tmp");
    let json = serde_json::to_string_pretty(value).context("failed to serialize to JSON")?;
    fs::write(&tmp_path, json)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use docket_types::{Cadence, ExecCounts, PlanCounts};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn ctx() -> CoordinationContext {
        CoordinationContext {
            own_company: "own".to_string(),
            platform: "e-coordina".to_string(),
            coordinated_company: "acme".to_string(),
        }
    }

    fn plan(plan_id: &str) -> SubmissionPlan {
        SubmissionPlan {
            plan_id: plan_id.to_string(),
            created_at: Utc::now(),
            context: ctx(),
            person_key: None,
            items: Vec::new(),
        }
    }

    fn summary(run_id: &str, platform: &str, started_offset_mins: i64) -> RunSummary {
        let mut context = ctx();
        context.platform = platform.to_string();
        RunSummary {
            run_id: run_id.to_string(),
            context,
            person_key: None,
            started_at: Utc::now() - Duration::minutes(started_offset_mins),
            finished_at: Utc::now(),
            counts: PlanCounts::default(),
            execution: ExecCounts::default(),
            errors: Vec::new(),
            cancelled: false,
            evidence_root: PathBuf::from("evidence"),
            evidence_paths: BTreeMap::new(),
        }
    }

    #[test]
    fn run_layout_paths() {
        let td = tempdir().expect("tempdir");
        let data = DataRoot::new(td.path());
        let run = data.run("r1");

        run.ensure_layout().expect("layout");
        assert!(run.evidence_dir().is_dir());
        assert!(run.execution_dir().is_dir());
        assert!(run.item_dir(3).ends_with("runs/r1/execution/items/3"));
        assert!(
            run.upload_attempt_dir(2)
                .ends_with("runs/r1/execution/upload/attempt_2")
        );
    }

    #[test]
    fn plan_roundtrip_and_immutability() {
        let td = tempdir().expect("tempdir");
        let data = DataRoot::new(td.path());
        let run = data.run("r1");

        run.save_plan(&plan("r1")).expect("save");
        let loaded = run.load_plan().expect("load");
        assert_eq!(loaded.plan_id, "r1");

        let err = run.save_plan(&plan("r1")).expect_err("immutable");
        assert!(err.to_string().contains("immutable"));
    }

    #[test]
    fn storage_state_roundtrip() {
        let td = tempdir().expect("tempdir");
        let run = DataRoot::new(td.path()).run("r1");

        assert!(!run.storage_state_exists());
        run.save_storage_state(&serde_json::json!({"cookies": []}))
            .expect("save");
        assert!(run.storage_state_exists());
        let state = run.load_storage_state().expect("load");
        assert!(state.get("cookies").is_some());
    }

    #[test]
    fn run_summary_roundtrip_and_finished_marker() {
        let td = tempdir().expect("tempdir");
        let run = DataRoot::new(td.path()).run("r1");

        run.save_run_summary(&summary("r1", "e-coordina", 0))
            .expect("save");
        let loaded = run.load_run_summary().expect("load");
        assert_eq!(loaded.run_id, "r1");

        run.write_run_finished("ok").expect("marker");
        assert!(run.run_finished_path().is_file());
    }

    #[test]
    fn decision_packs_are_write_once_by_id() {
        let td = tempdir().expect("tempdir");
        let run = DataRoot::new(td.path()).run("r1");

        let pack = docket_types::DecisionPack {
            decision_pack_id: "abc123".to_string(),
            plan_id: "r1".to_string(),
            decisions: Vec::new(),
            decided_by: Some("ana".to_string()),
            decided_at: None,
        };

        assert!(run.save_decision_pack(&pack).expect("first save"));
        // Identical content: no-op on disk.
        assert!(!run.save_decision_pack(&pack).expect("second save"));

        let loaded = run.load_decision_pack("abc123").expect("load");
        assert_eq!(loaded.plan_id, "r1");
        assert_eq!(run.load_decision_packs().expect("list").len(), 1);
    }

    #[test]
    fn recent_summaries_sorts_and_filters() {
        let td = tempdir().expect("tempdir");
        let data = DataRoot::new(td.path());

        data.run("r-old")
            .save_run_summary(&summary("r-old", "e-coordina", 60))
            .expect("save");
        data.run("r-new")
            .save_run_summary(&summary("r-new", "e-coordina", 5))
            .expect("save");
        data.run("r-other")
            .save_run_summary(&summary("r-other", "otro-portal", 1))
            .expect("save");

        let all = data.recent_summaries(10, None).expect("list");
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].run_id, "r-other");

        let filtered = data
            .recent_summaries(10, Some("e-coordina"))
            .expect("list");
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].run_id, "r-new");

        let limited = data.recent_summaries(1, None).expect("list");
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn schedules_roundtrip_per_tenant() {
        let td = tempdir().expect("tempdir");
        let data = DataRoot::new(td.path());
        let tenant = data.tenant(&ctx());

        assert!(tenant.load_schedules().expect("load").is_empty());

        let schedule = Schedule {
            schedule_id: "s1".to_string(),
            enabled: true,
            plan_id: "r1".to_string(),
            cadence: Cadence::Daily,
            at_time: "08:30".to_string(),
            weekday: None,
            context: ctx(),
            last_run_id: None,
            last_run_at: None,
            last_status: None,
        };
        tenant.save_schedules(&[schedule]).expect("save");

        let loaded = tenant.load_schedules().expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].at_time, "08:30");
    }

    #[test]
    fn tenants_are_isolated_by_triplet() {
        let td = tempdir().expect("tempdir");
        let data = DataRoot::new(td.path());

        let mut other = ctx();
        other.coordinated_company = "otra".to_string();

        assert_ne!(
            data.tenant(&ctx()).root().to_path_buf(),
            data.tenant(&other).root().to_path_buf()
        );
    }
}
