//! # docket
//!
//! Guardrailed submission of compliance documents to coordinator portals:
//! scrape the pending-requirements docket, match each row against the local
//! document repository, freeze a checksummed plan with a short-lived
//! confirm token, overlay human decisions, and execute exactly one
//! allow-listed upload per run with evidence and a run summary.
//!
//! The portal itself is a capability trait ([`docket_portal::PortalSession`]);
//! this crate orchestrates everything above it:
//!
//! - [`builder`]: read-only and persistent plan building,
//! - [`overlay`]: decision packs and presets over a frozen plan,
//! - [`engine`]: the guardrailed executor,
//! - [`schedule`]: cron-ish "is it time" ticks under the tenant lock,
//! - [`guard`]: coordination-context validation for write requests,
//! - [`lock`]: the per-tenant execution lock.

pub mod builder;
pub mod engine;
pub mod guard;
pub mod lock;
pub mod overlay;
pub mod schedule;

pub use builder::{
    BuilderConfig, OutcomeStatus, PlanOutcome, ScrapeDiagnostics, build_plan_persistent,
    build_plan_readonly,
};
pub use engine::{ExecError, ExecutorConfig, NullReporter, Reporter, execute_plan};
pub use guard::{ContextError, has_real_uploader_header, require_write_context};
pub use lock::TenantLock;
pub use overlay::{
    EffectivePlan, OverlayError, apply_decision_pack, build_decision_pack, preset_matches,
    preset_to_decisions, select_preset,
};
pub use schedule::{TickReport, TickRunResult, run_tick, should_execute_now};
