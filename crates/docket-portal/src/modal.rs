//! Blocking-overlay dismissal.
//!
//! Coordinator portals stack priority-communication modals, news notices and
//! "do not show again" prompts over the pending list. They must be cleared
//! before the grid is readable. Iteration is bounded; a stuck overlay is a
//! hard error the plan builder maps to `dhx_blocker_not_dismissed`.

use serde::{Deserialize, Serialize};

use crate::driver::{PortalError, PortalSession};

/// Default bound on dismissal iterations.
pub const MAX_DISMISS_ITERATIONS: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DismissReport {
    /// Overlay descriptions dismissed, in order.
    pub dismissed: Vec<String>,
    pub iterations: u32,
}

/// Close blocking overlays until none remain, up to `max_iterations`.
///
/// Screenshot capture is the caller's concern: in read-only mode there is no
/// evidence directory, so this helper reports what it closed and nothing
/// else.
pub fn dismiss_blockers(
    session: &mut dyn PortalSession,
    max_iterations: u32,
) -> Result<DismissReport, PortalError> {
    let mut report = DismissReport::default();

    for _ in 0..max_iterations {
        let Some(overlay) = session.active_overlay()? else {
            return Ok(report);
        };
        report.iterations += 1;

        if session.dismiss_active_overlay()? {
            report.dismissed.push(overlay);
        }
    }

    match session.active_overlay()? {
        None => Ok(report),
        Some(overlay) => Err(PortalError::BlockerNotDismissed {
            overlay,
            attempts: report.iterations,
        }),
    }
}
