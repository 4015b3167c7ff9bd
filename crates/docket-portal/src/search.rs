//! Search-ensure: force an initial Search when the grid starts empty.
//!
//! Some portals render the pending list empty until a Search action runs.
//! This helper detects that state ("0 Registros" and no data rows), fires
//! the most plausible Search control through escalating click strategies,
//! falls back to the Results tab / filter Enter / grid refresh, and retries
//! the whole sequence once before giving up.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::driver::{CLICK_MODES, PortalError, PortalSession, parse_registros};

/// How long to wait for the grid to populate after a search action.
pub const SEARCH_POPULATE_WAIT: Duration = Duration::from_secs(60);

/// Candidates probed per attempt.
pub const MAX_SEARCH_CANDIDATES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOutcome {
    /// Grid already had rows (or a positive counter); nothing to do.
    NotNeeded,
    /// A search action populated the grid.
    Populated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchReport {
    pub outcome: SearchOutcome,
    /// "candidate 2 via forced"-style log of the actions that fired.
    pub actions: Vec<String>,
    pub attempts: u32,
    pub candidate_labels: Vec<String>,
    pub rows_after: usize,
}

/// Make sure the pending grid has results, searching if required.
///
/// `expected_marker` is the URL fragment identifying the pending-list page;
/// being anywhere else is an [`PortalError::UnexpectedPage`]. A grid that
/// stays empty after both attempts is [`PortalError::NoRowsAfterSearch`].
pub fn ensure_results(
    session: &mut dyn PortalSession,
    expected_marker: &str,
    wait: Duration,
) -> Result<SearchReport, PortalError> {
    let url = session.current_url();
    if !url.contains(expected_marker) {
        return Err(PortalError::UnexpectedPage {
            expected: expected_marker.to_string(),
            actual: url,
        });
    }

    let snapshot = session.grid()?;
    let announced = snapshot.counter_text.as_deref().and_then(parse_registros);
    if !snapshot.rows.is_empty() || announced.unwrap_or(0) > 0 {
        return Ok(SearchReport {
            outcome: SearchOutcome::NotNeeded,
            actions: Vec::new(),
            attempts: 0,
            candidate_labels: Vec::new(),
            rows_after: snapshot.rows.len(),
        });
    }

    let mut actions = Vec::new();
    let mut candidate_labels = Vec::new();

    // Whole-sequence single retry.
    for attempt in 1..=2u32 {
        if run_search_sequence(session, wait, &mut actions, &mut candidate_labels)? {
            let rows_after = session.grid()?.rows.len();
            return Ok(SearchReport {
                outcome: SearchOutcome::Populated,
                actions,
                attempts: attempt,
                candidate_labels,
                rows_after,
            });
        }
    }

    Err(PortalError::NoRowsAfterSearch {
        details: format!(
            "candidates tried: [{}]; actions: [{}]",
            candidate_labels.join(", "),
            actions.join(", ")
        ),
    })
}

fn run_search_sequence(
    session: &mut dyn PortalSession,
    wait: Duration,
    actions: &mut Vec<String>,
    candidate_labels: &mut Vec<String>,
) -> Result<bool, PortalError> {
    let candidates = session.list_search_candidates()?;

    for (index, candidate) in candidates.iter().enumerate().take(MAX_SEARCH_CANDIDATES) {
        if !candidate.visible || !candidate.enabled {
            continue;
        }
        if !candidate_labels.contains(&candidate.label) {
            candidate_labels.push(candidate.label.clone());
        }

        for mode in CLICK_MODES {
            if session.click_search_candidate(index, mode).is_err() {
                continue;
            }
            actions.push(format!("candidate {index} via {mode:?}"));
            session.wait_loading_cleared(wait)?;
            if session.wait_grid_populated(wait)? {
                return Ok(true);
            }
            break;
        }
    }

    // Fallbacks, in order of decreasing confidence.
    if session.results_tab_is_search() && session.activate_results_tab()? {
        actions.push("results_tab".to_string());
        if session.wait_grid_populated(wait)? {
            return Ok(true);
        }
    }
    if session.submit_filter_enter()? {
        actions.push("filter_enter".to_string());
        if session.wait_grid_populated(wait)? {
            return Ok(true);
        }
    }
    if session.click_grid_refresh()? {
        actions.push("grid_refresh".to_string());
        if session.wait_grid_populated(wait)? {
            return Ok(true);
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ScriptedPortal, SearchBehavior};

    fn page_with_rows(n: usize) -> Vec<Vec<String>> {
        (0..n)
            .map(|i| {
                vec![
                    format!("Tipo {i}"),
                    format!("Elem {i}"),
                    "ACME".to_string(),
                ]
            })
            .collect()
    }

    #[test]
    fn wrong_page_is_rejected() {
        let mut portal = ScriptedPortal::default();
        portal.set_url("https://portal/otra-cosa");

        let err = ensure_results(&mut portal, "pendientes", SEARCH_POPULATE_WAIT)
            .expect_err("must fail");
        assert!(matches!(err, PortalError::UnexpectedPage { .. }));
    }

    #[test]
    fn populated_grid_needs_no_search() {
        let mut portal = ScriptedPortal::default();
        portal.add_page(page_with_rows(2));

        let report =
            ensure_results(&mut portal, "pendientes", SEARCH_POPULATE_WAIT).expect("ensure");
        assert_eq!(report.outcome, SearchOutcome::NotNeeded);
        assert_eq!(report.rows_after, 2);
        assert_eq!(portal.search_clicks(), 0);
    }

    #[test]
    fn one_click_populates_the_grid() {
        let mut portal = ScriptedPortal::default();
        portal.set_search_behavior(SearchBehavior::PopulateOnClick(vec![page_with_rows(3)]));

        let report =
            ensure_results(&mut portal, "pendientes", SEARCH_POPULATE_WAIT).expect("ensure");
        assert_eq!(report.outcome, SearchOutcome::Populated);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.rows_after, 3);
        assert_eq!(portal.search_clicks(), 1);
    }

    #[test]
    fn falls_back_to_results_tab() {
        let mut portal = ScriptedPortal::default();
        portal.set_search_behavior(SearchBehavior::PopulateOnResultsTab(vec![page_with_rows(1)]));

        let report =
            ensure_results(&mut portal, "pendientes", SEARCH_POPULATE_WAIT).expect("ensure");
        assert_eq!(report.outcome, SearchOutcome::Populated);
        assert!(report.actions.iter().any(|a| a == "results_tab"));
    }

    #[test]
    fn stubborn_empty_grid_fails_after_one_retry() {
        let mut portal = ScriptedPortal::default();
        portal.set_search_behavior(SearchBehavior::NeverPopulate);

        let err = ensure_results(&mut portal, "pendientes", SEARCH_POPULATE_WAIT)
            .expect_err("must fail");
        assert!(matches!(err, PortalError::NoRowsAfterSearch { .. }));
        // One click per attempt, two attempts, no infinite loop.
        assert_eq!(portal.search_clicks(), 2);
    }
}
