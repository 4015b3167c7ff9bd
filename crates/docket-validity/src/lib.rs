//! Rule-driven validity calculator.
//!
//! A pure function from (document-type policy, document, today) to a
//! validity assessment: status, base date with the rule that selected it,
//! end date, and days until expiry. Missing inputs never error; they
//! degrade to `Unknown`. Only unparseable period keys and month-arithmetic
//! overflow produce [`ValidityError`].
//!
//! The same crate hosts the missing-periods planner: periodic-submission
//! types enumerate the months (or years) with no covering document, renewal
//! types never do.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use docket_types::{Document, DocumentType, ValidityMode, ValidityStartMode, codes};

/// Default window for `ExpiringSoon`.
pub const DEFAULT_EXPIRING_SOON_THRESHOLD_DAYS: i64 = 30;

/// Computed lifecycle status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidityStatus {
    Valid,
    ExpiringSoon,
    Expired,
    Unknown,
}

/// Which rule selected the base date.
pub mod base_reason {
    pub const VALIDITY_START_DATE: &str = "validity_start_date";
    pub const ISSUE_DATE: &str = "issue_date";
    pub const PERIOD_KEY: &str = "period_key";
    pub const MISSING_VALIDITY_START_DATE_FOR_MANUAL_MODE: &str =
        "missing_validity_start_date_for_manual_mode";
    pub const NO_BASE_DATE: &str = "no_base_date";
}

/// Output of the calculator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityAssessment {
    pub status: ValidityStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_date: Option<NaiveDate>,
    pub base_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity_end_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_until_expiry: Option<i64>,
}

impl ValidityAssessment {
    fn unknown(reason: &str) -> Self {
        Self {
            status: ValidityStatus::Unknown,
            base_date: None,
            base_reason: reason.to_string(),
            validity_end_date: None,
            days_until_expiry: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidityError {
    /// Unparseable period key or month arithmetic out of range. Carries the
    /// canonical `INVALID_POLICY` code for structured payloads.
    #[error("{code}: {message}", code = codes::INVALID_POLICY)]
    InvalidPolicy { message: String },
}

impl ValidityError {
    pub fn error_code(&self) -> &'static str {
        codes::INVALID_POLICY
    }
}

/// Evaluate the validity of `doc` under `doc_type`'s policy as of `today`.
pub fn assess(
    doc_type: &DocumentType,
    doc: &Document,
    today: NaiveDate,
    expiring_soon_threshold_days: i64,
) -> Result<ValidityAssessment, ValidityError> {
    let policy = &doc_type.validity_policy;

    // Base date, first match wins.
    let (base_date, base_reason) = if let Some(start) = doc.extracted.validity_start_date {
        (start, base_reason::VALIDITY_START_DATE)
    } else if doc_type.validity_start_mode == ValidityStartMode::Manual {
        return Ok(ValidityAssessment::unknown(
            base_reason::MISSING_VALIDITY_START_DATE_FOR_MANUAL_MODE,
        ));
    } else if let Some(issue) = doc.extracted.issue_date {
        (issue, base_reason::ISSUE_DATE)
    } else if let Some(period) = doc
        .period_key
        .as_deref()
        .filter(|_| policy.is_periodic_submission())
    {
        (parse_period_start(period)?, base_reason::PERIOD_KEY)
    } else {
        return Ok(ValidityAssessment::unknown(base_reason::NO_BASE_DATE));
    };

    // End date, first match wins.
    let n = policy.n_months.map(|m| m.n).unwrap_or(0);
    let end = if let Some(overridden) = doc.validity_override {
        Some(overridden.valid_to)
    } else if n > 0 {
        Some(add_months_clamped(base_date, n)?)
    } else {
        match policy.mode {
            ValidityMode::Annual => {
                let months = policy.annual.unwrap_or_default().months;
                Some(add_months_clamped(base_date, months)?)
            }
            ValidityMode::Monthly => Some(last_day_of_next_month(base_date)?),
            ValidityMode::FixedEndDate => None,
        }
    };

    let Some(end) = end else {
        return Ok(ValidityAssessment {
            status: ValidityStatus::Unknown,
            base_date: Some(base_date),
            base_reason: base_reason.to_string(),
            validity_end_date: None,
            days_until_expiry: None,
        });
    };

    let days_until_expiry = (end - today).num_days();
    let status = if end < today {
        ValidityStatus::Expired
    } else if (0..=expiring_soon_threshold_days).contains(&days_until_expiry) {
        ValidityStatus::ExpiringSoon
    } else {
        // Covers both in-force documents and ones whose validity has not
        // started yet (base date in the future).
        ValidityStatus::Valid
    };

    Ok(ValidityAssessment {
        status,
        base_date: Some(base_date),
        base_reason: base_reason.to_string(),
        validity_end_date: Some(end),
        days_until_expiry: Some(days_until_expiry),
    })
}

/// `assess` with the default expiring-soon window.
pub fn assess_with_defaults(
    doc_type: &DocumentType,
    doc: &Document,
    today: NaiveDate,
) -> Result<ValidityAssessment, ValidityError> {
    assess(doc_type, doc, today, DEFAULT_EXPIRING_SOON_THRESHOLD_DAYS)
}

/// First day of the period named by a "YYYY-MM" or "YYYY" key.
pub fn parse_period_start(period_key: &str) -> Result<NaiveDate, ValidityError> {
    let trimmed = period_key.trim();
    let (year, month) = match trimmed.split_once('-') {
        Some((y, m)) => (
            parse_component(y, trimmed)?,
            parse_component(m, trimmed)? as u32,
        ),
        None => (parse_component(trimmed, trimmed)?, 1),
    };

    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| ValidityError::InvalidPolicy {
        message: format!("period key out of range: {trimmed}"),
    })
}

fn parse_component(s: &str, whole: &str) -> Result<i32, ValidityError> {
    s.parse::<i32>().map_err(|_| ValidityError::InvalidPolicy {
        message: format!("unparseable period key: {whole}"),
    })
}

/// Add `months` to `date`, clamping the day to the target month's last day.
pub fn add_months_clamped(date: NaiveDate, months: u32) -> Result<NaiveDate, ValidityError> {
    date.checked_add_months(Months::new(months))
        .ok_or_else(|| ValidityError::InvalidPolicy {
            message: format!("month arithmetic overflow: {date} + {months} months"),
        })
}

/// Last day of the month after `date`'s month.
pub fn last_day_of_next_month(date: NaiveDate) -> Result<NaiveDate, ValidityError> {
    let first_of_month = date
        .with_day(1)
        .expect("day 1 is valid for every month");
    let first_of_after_next = add_months_clamped(first_of_month, 2)?;
    first_of_after_next
        .pred_opt()
        .ok_or_else(|| ValidityError::InvalidPolicy {
            message: format!("month arithmetic overflow near {date}"),
        })
}

/// Enumerate period keys a periodic-submission type is missing between
/// `from` and `to` (inclusive), given the period keys already covered by
/// repository documents. Renewal types yield nothing.
pub fn missing_periods(
    doc_type: &DocumentType,
    covered: &[String],
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<String>, ValidityError> {
    let policy = &doc_type.validity_policy;
    if !policy.is_periodic_submission() || from > to {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    match policy.mode {
        ValidityMode::Monthly => {
            let mut cursor = from.with_day(1).expect("day 1 is valid for every month");
            while cursor <= to {
                let key = format!("{:04}-{:02}", cursor.year(), cursor.month());
                if !covered.iter().any(|c| c == &key) {
                    out.push(key);
                }
                cursor = add_months_clamped(cursor, 1)?;
            }
        }
        ValidityMode::Annual => {
            for year in from.year()..=to.year() {
                let key = format!("{year:04}");
                if !covered.iter().any(|c| c == &key) {
                    out.push(key);
                }
            }
        }
        ValidityMode::FixedEndDate => {}
    }
    Ok(out)
}
