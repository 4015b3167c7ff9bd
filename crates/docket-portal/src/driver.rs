//! The portal capability trait and its wire-level observations.
//!
//! Adapters for concrete coordinator portals implement [`PortalSession`];
//! every method that touches the portal is a suspension point with a bounded
//! wait. The trait is synchronous: a real adapter drives its browser from a
//! dedicated thread, the scripted adapter answers immediately.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures surfaced by a portal adapter. The executor's classifier maps
/// these (together with phase and upload context) onto stable error codes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortalError {
    #[error("timeout during {what}")]
    Timeout { what: String },
    #[error("network failure: {0}")]
    Network(String),
    #[error("portal session lost")]
    SessionLost,
    /// UI counter reports rows but none were parsed; never silently empty.
    #[error("grid parse mismatch: counter reports {expected} rows, parsed none")]
    GridParseMismatch { expected: u32 },
    #[error("blocking overlay not dismissed after {attempts} attempts: {overlay}")]
    BlockerNotDismissed { overlay: String, attempts: u32 },
    #[error("no rows after search: {details}")]
    NoRowsAfterSearch { details: String },
    #[error("unexpected page: marker {expected:?} not in {actual}")]
    UnexpectedPage { expected: String, actual: String },
    #[error("pending item not on current page: {key}")]
    ItemNotOnPage { key: String },
    #[error("{0}")]
    Other(String),
}

/// One data row as rendered: ordered cell texts plus the internal id the
/// portal exposes for it, when any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    pub cells: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_id: Option<String>,
}

/// What the results table looks like right now.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GridSnapshot {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    /// Raw "X Registros" text near the grid, when rendered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter_text: Option<String>,
}

/// Paging controls visible around the grid.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PaginationControls {
    pub has_first: bool,
    pub has_prev: bool,
    pub has_next: bool,
    pub next_enabled: bool,
    /// Raw "Página X de Y" text, when rendered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_info: Option<String>,
}

impl PaginationControls {
    pub fn any_controls(&self) -> bool {
        self.has_first || self.has_prev || self.has_next || self.page_info.is_some()
    }
}

/// Snapshot taken before a page transition; the wait compares against it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageBaseline {
    pub first_row_signature: Option<String>,
    pub counter_text: Option<String>,
}

impl PageBaseline {
    pub fn of(snapshot: &GridSnapshot) -> Self {
        Self {
            first_row_signature: snapshot
                .rows
                .first()
                .map(|r| docket_rowkey::raw_signature(&r.cells)),
            counter_text: snapshot.counter_text.clone(),
        }
    }
}

/// A clickable element that might be the Search trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub label: String,
    pub visible: bool,
    pub enabled: bool,
}

impl Default for SearchCandidate {
    fn default() -> Self {
        Self {
            label: "Buscar".to_string(),
            visible: true,
            enabled: true,
        }
    }
}

/// Escalating click strategies for stubborn controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickMode {
    Normal,
    BoundingBoxCenter,
    Forced,
}

pub const CLICK_MODES: [ClickMode; 3] = [
    ClickMode::Normal,
    ClickMode::BoundingBoxCenter,
    ClickMode::Forced,
];

/// Capability set a coordinator-portal adapter provides.
///
/// Observations are cheap and repeatable; actions mutate portal state;
/// `wait_*` methods block up to their timeout and report whether the
/// condition was met. No method panics on portal weirdness; everything is
/// a [`PortalError`].
pub trait PortalSession {
    // Observations.
    fn current_url(&self) -> String;
    fn grid(&mut self) -> Result<GridSnapshot, PortalError>;
    fn pagination(&mut self) -> Result<PaginationControls, PortalError>;
    /// Description of the topmost blocking overlay, if one is up.
    fn active_overlay(&mut self) -> Result<Option<String>, PortalError>;
    fn is_authenticated(&mut self) -> Result<bool, PortalError>;

    // Actions.
    fn dismiss_active_overlay(&mut self) -> Result<bool, PortalError>;
    fn list_search_candidates(&mut self) -> Result<Vec<SearchCandidate>, PortalError>;
    fn click_search_candidate(&mut self, index: usize, mode: ClickMode)
    -> Result<(), PortalError>;
    /// Fallbacks when no Search candidate works. Return whether the control
    /// existed at all.
    fn activate_results_tab(&mut self) -> Result<bool, PortalError>;
    fn submit_filter_enter(&mut self) -> Result<bool, PortalError>;
    fn click_grid_refresh(&mut self) -> Result<bool, PortalError>;
    fn goto_first_page(&mut self) -> Result<(), PortalError>;
    fn click_next_page(&mut self) -> Result<(), PortalError>;
    /// Full list refresh (used before a relocation retry).
    fn refresh(&mut self) -> Result<(), PortalError>;
    /// Open the detail form of the row at `index` on the current page.
    fn open_row(&mut self, index: usize) -> Result<(), PortalError>;
    fn upload_file(&mut self, path: &Path) -> Result<(), PortalError>;
    fn confirm_upload(&mut self) -> Result<(), PortalError>;
    /// Leave the detail form and return to the pending list.
    fn close_detail(&mut self) -> Result<(), PortalError>;
    /// Capture a screenshot; the caller decides where the bytes land.
    fn screenshot(&mut self, label: &str) -> Result<Vec<u8>, PortalError>;

    // Waits (suspension points).
    fn wait_grid_populated(&mut self, timeout: Duration) -> Result<bool, PortalError>;
    fn wait_page_transition(
        &mut self,
        baseline: &PageBaseline,
        timeout: Duration,
    ) -> Result<bool, PortalError>;
    fn wait_loading_cleared(&mut self, timeout: Duration) -> Result<bool, PortalError>;

    /// Whether this portal's "Resultados" tab behaves as a Search trigger.
    /// Varies by portal; defaults to yes.
    fn results_tab_is_search(&self) -> bool {
        true
    }
}

/// Parse the numeric prefix out of an "X Registros" counter.
pub fn parse_registros(counter_text: &str) -> Option<u32> {
    let trimmed = counter_text.trim();
    let lowered = trimmed.to_lowercase();
    if !lowered.contains("registro") {
        return None;
    }
    trimmed
        .split_whitespace()
        .next()
        .and_then(|first| first.parse::<u32>().ok())
}
