//! Scheduler tick: "is it time" per schedule, guarded by the tenant lock.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use docket_state::DataRoot;
use docket_types::{Cadence, CoordinationContext, Schedule};

use crate::lock::TenantLock;

/// Locks older than this are treated as crashed runs and taken over.
pub const STALE_LOCK_AFTER: Duration = Duration::from_secs(2 * 60 * 60);

/// Parse a schedule's "HH:MM" wall-clock time.
pub fn parse_at_time(s: &str) -> Option<NaiveTime> {
    let (h, m) = s.trim().split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Whether `schedule` is due at `now`, given when it last ran.
///
/// Daily: due once per day, at or after `at_time`. Weekly: additionally
/// pinned to `weekday` (0 = Monday), due once per ISO week. An unparseable
/// `at_time` is never due.
pub fn should_execute_now(
    now: DateTime<Utc>,
    schedule: &Schedule,
    last_run_at: Option<DateTime<Utc>>,
) -> bool {
    let Some(at_time) = parse_at_time(&schedule.at_time) else {
        return false;
    };
    if now.time() < at_time {
        return false;
    }

    match schedule.cadence {
        Cadence::Daily => {
            let today_midnight = now
                .with_time(NaiveTime::MIN)
                .single()
                .unwrap_or(now);
            last_run_at.map(|l| l < today_midnight).unwrap_or(true)
        }
        Cadence::Weekly => {
            let Some(weekday) = schedule.weekday else {
                return false;
            };
            if now.weekday().num_days_from_monday() != u32::from(weekday) {
                return false;
            }
            let start_of_week = now
                .with_time(NaiveTime::MIN)
                .single()
                .unwrap_or(now)
                - chrono::Duration::days(i64::from(now.weekday().num_days_from_monday()));
            last_run_at.map(|l| l < start_of_week).unwrap_or(true)
        }
    }
}

/// What the runner did for one due schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickRunResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub status: String,
}

/// Outcome of one tick over a tenant's schedules.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TickReport {
    pub evaluated: u32,
    pub due: Vec<String>,
    pub executed: Vec<String>,
    /// Schedules skipped because another run held the tenant lock.
    pub locked_out: Vec<String>,
}

/// Evaluate and fire this tenant's schedules.
///
/// For each enabled, due schedule the tenant execution lock is acquired,
/// `runner` kicks off the execute-plan run, and `last_run_*` bookkeeping is
/// persisted, whatever the run's outcome was.
pub fn run_tick(
    data: &DataRoot,
    context: &CoordinationContext,
    now: DateTime<Utc>,
    runner: &mut dyn FnMut(&Schedule) -> TickRunResult,
) -> Result<TickReport> {
    let tenant = data.tenant(context);
    let mut schedules = tenant.load_schedules()?;
    let mut report = TickReport::default();

    for schedule in schedules.iter_mut() {
        if &schedule.context != context {
            continue;
        }
        report.evaluated += 1;

        if !schedule.enabled || !should_execute_now(now, schedule, schedule.last_run_at) {
            continue;
        }
        report.due.push(schedule.schedule_id.clone());

        let lock = match TenantLock::acquire_with_takeover(tenant.root(), STALE_LOCK_AFTER) {
            Ok(lock) => lock,
            Err(_) => {
                report.locked_out.push(schedule.schedule_id.clone());
                continue;
            }
        };
        let _ = lock.set_plan_id(&schedule.plan_id);

        let result = runner(schedule);
        schedule.last_run_id = result.run_id.clone();
        schedule.last_run_at = Some(now);
        schedule.last_status = Some(result.status.clone());
        report.executed.push(schedule.schedule_id.clone());

        drop(lock);
    }

    tenant.save_schedules(&schedules)?;
    Ok(report)
}

/// Seconds precision is irrelevant for schedules; normalize for display.
pub fn format_at_time(t: NaiveTime) -> String {
    format!("{:02}:{:02}", t.hour(), t.minute())
}
