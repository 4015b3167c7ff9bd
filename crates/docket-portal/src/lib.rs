//! Portal access layer.
//!
//! The external coordinator portal is modeled as a capability trait
//! ([`PortalSession`]): a small set of observations and actions a concrete
//! adapter (real browser, scripted fake) implements. Everything above the
//! trait is portal-agnostic:
//!
//! - [`grid`] parses the pending-requirements table into canonical rows,
//! - [`modal`] clears priority-communication blockers before reading it,
//! - [`search`] forces an initial Search when the grid starts empty,
//! - [`pagination`] walks all pages with dedupe, caps and diagnostics.
//!
//! The [`scripted`] module provides the in-memory adapter the test suites
//! and dry-runs drive.

pub mod driver;
pub mod grid;
pub mod modal;
pub mod pagination;
pub mod scripted;
pub mod search;

pub use driver::{
    ClickMode, GridSnapshot, PageBaseline, PaginationControls, PortalError, PortalSession, RawRow,
    SearchCandidate,
};
pub use grid::{GridExtract, extract_grid};
pub use modal::{DismissReport, dismiss_blockers};
pub use pagination::{PageCollection, PaginationCaps, PaginationDiagnostics, collect_all_pages};
pub use search::{SearchOutcome, SearchReport, ensure_results};
