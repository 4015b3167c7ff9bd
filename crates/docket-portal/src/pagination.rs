//! Pagination driver: walk every grid page, dedupe by pending-item key,
//! stop at the caps, report diagnostics.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use docket_types::PendingRequirement;

use crate::driver::{PageBaseline, PortalError, PortalSession};
use crate::grid::extract_grid;

/// Wait bound for a single page transition.
pub const PAGE_TRANSITION_WAIT: Duration = Duration::from_secs(15);

/// Hard caps on a collection sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationCaps {
    pub max_pages: u32,
    pub max_items: usize,
}

impl Default for PaginationCaps {
    fn default() -> Self {
        Self {
            max_pages: 10,
            max_items: 200,
        }
    }
}

/// What the sweep saw, for instrumentation and the plan's diagnostics block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaginationDiagnostics {
    pub has_pagination: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages_detected: Option<u32>,
    pub pages_processed: u32,
    pub items_before_dedupe: u32,
    pub items_after_dedupe: u32,
    pub next_clicks: u32,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_info: Option<String>,
}

/// Page screenshot captured during the sweep (pages 1..3 and the last).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageShot {
    pub page: u32,
    pub label: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageCollection {
    pub items: Vec<PendingRequirement>,
    pub diagnostics: PaginationDiagnostics,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub screenshots: Vec<PageShot>,
}

/// Parse "Página X de Y" (or the Catalan "Pàgina X de Y") into (x, y).
pub fn parse_page_info(text: &str) -> Option<(u32, u32)> {
    let numbers: Vec<u32> = text
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    match numbers.as_slice() {
        [x, y, ..] => Some((*x, *y)),
        _ => None,
    }
}

/// Collect every pending row across pages, first occurrence of each
/// pending-item key winning. `capture` turns on page screenshots (pages
/// 1..3 and the final page); read-only mode passes false.
pub fn collect_all_pages(
    session: &mut dyn PortalSession,
    caps: PaginationCaps,
    capture: bool,
) -> Result<PageCollection, PortalError> {
    let mut collected: Vec<PendingRequirement> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut diagnostics = PaginationDiagnostics::default();
    let mut screenshots = Vec::new();

    let controls = session.pagination()?;
    diagnostics.has_pagination = controls.any_controls();
    diagnostics.page_info = controls.page_info.clone();
    diagnostics.pages_detected = controls
        .page_info
        .as_deref()
        .and_then(parse_page_info)
        .map(|(_, total)| total);

    if controls.has_first {
        session.goto_first_page()?;
        session.wait_loading_cleared(PAGE_TRANSITION_WAIT)?;
    }

    loop {
        let extract = extract_grid(session)?;
        diagnostics.pages_processed += 1;

        if capture && (diagnostics.pages_processed <= 3) {
            let label = format!("page_{:02}", diagnostics.pages_processed);
            let bytes = session.screenshot(&label)?;
            screenshots.push(PageShot {
                page: diagnostics.pages_processed,
                label,
                bytes,
            });
        }

        for row in &extract.rows {
            diagnostics.items_before_dedupe += 1;
            if seen.insert(row.pending_item_key.clone()) {
                collected.push(row.clone());
            }
            if collected.len() == caps.max_items {
                diagnostics.truncated = true;
                break;
            }
        }

        if diagnostics.truncated || diagnostics.pages_processed >= caps.max_pages {
            break;
        }

        let controls = session.pagination()?;
        if !controls.has_next || !controls.next_enabled {
            break;
        }

        let baseline = PageBaseline {
            first_row_signature: extract
                .rows
                .first()
                .map(|r| r.raw_row_signature.clone()),
            counter_text: extract.counter_text.clone(),
        };
        session.click_next_page()?;
        diagnostics.next_clicks += 1;
        session.wait_page_transition(&baseline, PAGE_TRANSITION_WAIT)?;
        session.wait_loading_cleared(PAGE_TRANSITION_WAIT)?;
    }

    if capture && diagnostics.pages_processed > 3 {
        let label = format!("page_{:02}_final", diagnostics.pages_processed);
        let bytes = session.screenshot(&label)?;
        screenshots.push(PageShot {
            page: diagnostics.pages_processed,
            label,
            bytes,
        });
    }

    diagnostics.items_after_dedupe = collected.len() as u32;

    Ok(PageCollection {
        items: collected,
        diagnostics,
        screenshots,
    })
}
