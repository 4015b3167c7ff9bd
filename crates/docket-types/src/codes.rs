//! Error-code and reason-code vocabulary.
//!
//! Codes cross component boundaries as plain strings inside structured
//! `{status, error_code}` payloads, so they live here as constants rather
//! than enums; the few the executor matches on are compared by value.

// Contract errors (client-side misuse; rejected before any work).
pub const MISSING_COORDINATION_CONTEXT: &str = "missing_coordination_context";
pub const MISSING_STORAGE_STATE: &str = "missing_storage_state";
pub const STORAGE_STATE_NOT_AUTHENTICATED: &str = "storage_state_not_authenticated";
pub const INVALID_CONFIRM_TOKEN: &str = "invalid_confirm_token";
pub const CONFIRM_TOKEN_EXPIRED: &str = "confirm_token_expired";
pub const REAL_UPLOAD_GUARDRAIL_VIOLATION: &str = "REAL_UPLOAD_GUARDRAIL_VIOLATION";
pub const REAL_UPLOAD_ENVIRONMENT_VIOLATION: &str = "real_upload_environment_violation";
pub const MISSING_COMPANY_KEY: &str = "missing_company_key";
pub const INVALID_ITEM_COUNT: &str = "invalid_item_count";

// Scrape errors.
pub const DHX_BLOCKER_NOT_DISMISSED: &str = "dhx_blocker_not_dismissed";
pub const GRID_PARSE_MISMATCH: &str = "grid_parse_mismatch";
pub const NO_ROWS_AFTER_SEARCH: &str = "no_rows_after_search";
/// Informational, not fatal: caps stopped pagination early.
pub const PAGINATION_TRUNCATED: &str = "pagination_truncated";

// Matching outcomes (not errors).
pub const NO_ALIAS_MATCH: &str = "no_alias_match";
pub const NO_DOCS_OF_TYPE: &str = "no_docs_of_type";
pub const SUBJECT_MISMATCH: &str = "subject_mismatch";
pub const PERIOD_MISMATCH: &str = "period_mismatch";
pub const ALL_CANDIDATES_EXPIRED: &str = "all_candidates_expired";
pub const MATCHED: &str = "matched";

// Execution errors.
pub const ITEM_NOT_FOUND_BEFORE_UPLOAD: &str = "item_not_found_before_upload";
pub const TIMEOUT_OPEN_DETAIL: &str = "timeout_open_detail";
pub const TIMEOUT_UPLOAD: &str = "timeout_upload";
pub const VERIFY_LIST_REFRESH_FAILED: &str = "verify_list_refresh_failed";
pub const ITEM_STILL_PRESENT_AFTER_UPLOAD: &str = "item_still_present_after_upload";
pub const SESSION_LOST: &str = "session_lost";

// Read-only compute catch-all; guarantees the read-only plan builder never
// surfaces an unhandled failure.
pub const READONLY_COMPUTE_FAILED: &str = "readonly_compute_failed";

// Validity calculator failure.
pub const INVALID_POLICY: &str = "INVALID_POLICY";

/// Error codes that get exactly one retry regardless of per-phase defaults.
pub const SINGLE_RETRY_ERROR_CODES: &[&str] = &[ITEM_NOT_FOUND_BEFORE_UPLOAD];
