//! Requirement-to-document matching.
//!
//! A staged pipeline per pending requirement, short-circuiting with a
//! reason code as soon as a stage drains the candidate pool:
//!
//! 1. alias resolve: portal text to candidate type ids,
//! 2. type filter: repository documents of those types,
//! 3. subject filter: worker/company key equality (one relaxation: a
//!    worker-scope document missing its person key may fall back to the
//!    company key, at reduced confidence),
//! 4. period filter: requirement period vs document period,
//! 5. validity filter: expired candidates drop out,
//! 6. ranking: workflow status, then recency.
//!
//! Every evaluation emits a [`MatchDebug`] with stage-wise counts; the
//! decision engine turns outcome + confidence into the plan decision.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use docket_rowkey::normalize;
use docket_types::{
    Decision, DocStatus, Document, DocumentType, MatchedDoc, MonthSource, PendingRequirement,
    SubjectScope, codes,
};
use docket_validity::{DEFAULT_EXPIRING_SOON_THRESHOLD_DAYS, ValidityStatus, assess};

/// Confidence ladder. Values are part of the plan contract.
pub const CONFIDENCE_FULL: f64 = 0.95;
pub const CONFIDENCE_NO_PERIOD: f64 = 0.8;
pub const CONFIDENCE_RELAXED_SUBJECT: f64 = 0.6;
pub const CONFIDENCE_NONE: f64 = 0.0;

/// One pipeline stage as it ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub input_count: u32,
    pub output_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Shortlisted candidate, for the debug record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateBrief {
    pub doc_id: String,
    pub status: DocStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_key: Option<String>,
}

/// Observable trace of one match evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDebug {
    pub pending_item_key: String,
    pub tipo_doc: String,
    pub pipeline: Vec<StageReport>,
    pub top_candidates: Vec<CandidateBrief>,
    pub outcome_reason: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_doc_id: Option<String>,
}

/// Result of matching one pending requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_doc: Option<MatchedDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
    pub confidence: f64,
    pub primary_reason_code: String,
    pub human_hint: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relaxations: Vec<String>,
    pub debug: MatchDebug,
}

/// Period of the requirement itself, normalized to "YYYY-MM".
///
/// Portals render the period either as a date in the `inicio` column
/// ("01/08/2025", "2025-08-01") or directly as a period key ("2025-08").
pub fn requirement_period(pending: &PendingRequirement) -> Option<String> {
    let raw = pending.inicio.as_deref()?.trim();
    if raw.is_empty() {
        return None;
    }

    for format in ["%d/%m/%Y", "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(format!("{:04}-{:02}", date.year(), date.month()));
        }
    }

    // Already a period key?
    let mut parts = raw.splitn(2, '-');
    if let (Some(year), Some(month)) = (parts.next(), parts.next())
        && year.len() == 4
        && year.chars().all(|c| c.is_ascii_digit())
        && month.len() == 2
        && month.chars().all(|c| c.is_ascii_digit())
    {
        return Some(raw.to_string());
    }
    None
}

/// Period a document covers, under its type's month source.
fn document_period(doc: &Document, doc_type: &DocumentType) -> Option<String> {
    let source = doc_type
        .validity_policy
        .monthly
        .map(|m| m.month_source)
        .unwrap_or_default();
    match source {
        MonthSource::PeriodKey => doc.period_key.clone(),
        MonthSource::IssueDate | MonthSource::NameDate => doc
            .extracted
            .issue_date
            .map(|d| format!("{:04}-{:02}", d.year(), d.month()))
            .or_else(|| doc.period_key.clone()),
    }
}

struct Candidate<'a> {
    doc: &'a Document,
    doc_type: &'a DocumentType,
}

/// Run the full pipeline for one pending requirement.
pub fn match_requirement(
    pending: &PendingRequirement,
    types: &[DocumentType],
    docs: &[Document],
    today: NaiveDate,
) -> MatchOutcome {
    let mut pipeline: Vec<StageReport> = Vec::new();
    let mut relaxations: Vec<String> = Vec::new();

    // Stage 1: alias resolve.
    let wanted = normalize(&pending.tipo_doc);
    let candidate_types: Vec<&DocumentType> = types
        .iter()
        .filter(|t| t.platform_aliases.iter().any(|a| normalize(a) == wanted))
        .collect();
    pipeline.push(StageReport {
        stage: "alias_resolve".to_string(),
        input_count: types.len() as u32,
        output_count: candidate_types.len() as u32,
        note: Some(format!("tipo_doc={wanted}")),
    });
    if candidate_types.is_empty() {
        return empty_outcome(pending, pipeline, codes::NO_ALIAS_MATCH, relaxations);
    }

    // Stage 2: type filter.
    let of_type: Vec<Candidate> = docs
        .iter()
        .filter_map(|doc| {
            candidate_types
                .iter()
                .find(|t| t.type_id == doc.type_id)
                .map(|doc_type| Candidate { doc, doc_type })
        })
        .collect();
    pipeline.push(StageReport {
        stage: "type_filter".to_string(),
        input_count: docs.len() as u32,
        output_count: of_type.len() as u32,
        note: None,
    });
    if of_type.is_empty() {
        return empty_outcome(pending, pipeline, codes::NO_DOCS_OF_TYPE, relaxations);
    }

    // Stage 3: subject filter (strict first, then the one allowed
    // relaxation).
    let subject_input = of_type.len() as u32;
    let strict: Vec<&Candidate> = of_type
        .iter()
        .filter(|c| subject_matches_strict(c, pending))
        .collect();
    let (subject_filtered, subject_note): (Vec<&Candidate>, Option<String>) = if strict.is_empty()
    {
        let relaxed: Vec<&Candidate> = of_type
            .iter()
            .filter(|c| subject_matches_relaxed(c, pending))
            .collect();
        if !relaxed.is_empty() {
            relaxations.push("subject_filter".to_string());
        }
        (relaxed, Some("relaxed to company key".to_string()))
    } else {
        (strict, None)
    };
    pipeline.push(StageReport {
        stage: "subject_filter".to_string(),
        input_count: subject_input,
        output_count: subject_filtered.len() as u32,
        note: subject_note,
    });
    if subject_filtered.is_empty() {
        return empty_outcome(pending, pipeline, codes::SUBJECT_MISMATCH, relaxations);
    }

    // Stage 4: period filter.
    let wanted_period = requirement_period(pending);
    let period_input = subject_filtered.len() as u32;
    let mut period_applied = false;
    let period_filtered: Vec<&Candidate> = match &wanted_period {
        Some(period) => {
            period_applied = true;
            subject_filtered
                .iter()
                .filter(|c| {
                    if !c.doc_type.validity_policy.is_periodic_submission() {
                        return true;
                    }
                    document_period(c.doc, c.doc_type).as_deref() == Some(period.as_str())
                })
                .copied()
                .collect()
        }
        None => subject_filtered.clone(),
    };
    pipeline.push(StageReport {
        stage: "period_filter".to_string(),
        input_count: period_input,
        output_count: period_filtered.len() as u32,
        note: wanted_period
            .as_ref()
            .map(|p| format!("requirement period {p}")),
    });
    if period_filtered.is_empty() {
        return empty_outcome(pending, pipeline, codes::PERIOD_MISMATCH, relaxations);
    }

    // Stage 5: validity filter.
    let validity_input = period_filtered.len() as u32;
    let alive: Vec<&Candidate> = period_filtered
        .iter()
        .filter(|c| {
            match assess(c.doc_type, c.doc, today, DEFAULT_EXPIRING_SOON_THRESHOLD_DAYS) {
                Ok(a) => a.status != ValidityStatus::Expired,
                // An unassessable policy never promotes a candidate.
                Err(_) => false,
            }
        })
        .copied()
        .collect();
    pipeline.push(StageReport {
        stage: "validity_filter".to_string(),
        input_count: validity_input,
        output_count: alive.len() as u32,
        note: None,
    });
    if alive.is_empty() {
        return empty_outcome(pending, pipeline, codes::ALL_CANDIDATES_EXPIRED, relaxations);
    }

    // Stage 6: ranking.
    let mut ranked = alive;
    ranked.sort_by(|a, b| {
        b.doc
            .status
            .rank()
            .cmp(&a.doc.status.rank())
            .then(b.doc.extracted.issue_date.cmp(&a.doc.extracted.issue_date))
            .then(
                b.doc
                    .extracted
                    .validity_start_date
                    .cmp(&a.doc.extracted.validity_start_date),
            )
    });
    let top = ranked[0];

    let top_candidates: Vec<CandidateBrief> = ranked
        .iter()
        .take(3)
        .map(|c| CandidateBrief {
            doc_id: c.doc.doc_id.clone(),
            status: c.doc.status,
            issue_date: c.doc.extracted.issue_date,
            period_key: c.doc.period_key.clone(),
        })
        .collect();

    let confidence = if !relaxations.is_empty() {
        CONFIDENCE_RELAXED_SUBJECT
    } else if period_applied {
        CONFIDENCE_FULL
    } else {
        CONFIDENCE_NO_PERIOD
    };

    let matched_rule = if !relaxations.is_empty() {
        "alias+company_fallback"
    } else if period_applied {
        "alias+subject+period"
    } else {
        "alias+subject"
    };

    let matched_doc = MatchedDoc {
        doc_id: top.doc.doc_id.clone(),
        type_id: top.doc.type_id.clone(),
        stored_path: top.doc.stored_path.clone().unwrap_or_default(),
        status: top.doc.status,
        period_key: top.doc.period_key.clone(),
    };

    MatchOutcome {
        matched_doc: Some(matched_doc.clone()),
        matched_rule: Some(matched_rule.to_string()),
        confidence,
        primary_reason_code: codes::MATCHED.to_string(),
        human_hint: hint_for(codes::MATCHED),
        relaxations,
        debug: MatchDebug {
            pending_item_key: pending.pending_item_key.clone(),
            tipo_doc: pending.tipo_doc.clone(),
            pipeline,
            top_candidates,
            outcome_reason: codes::MATCHED.to_string(),
            confidence,
            matched_doc_id: Some(matched_doc.doc_id),
        },
    }
}

fn subject_matches_strict(candidate: &Candidate, pending: &PendingRequirement) -> bool {
    match candidate.doc_type.scope {
        SubjectScope::Worker => candidate
            .doc
            .person_key
            .as_deref()
            .map(|k| normalize(k) == normalize(&pending.elemento))
            .unwrap_or(false),
        SubjectScope::Company => candidate
            .doc
            .company_key
            .as_deref()
            .map(|k| normalize(k) == normalize(&pending.empresa))
            .unwrap_or(false),
    }
}

/// Worker-scope documents missing a person key may still belong to the
/// right company. Kept only when the strict pass found nothing, and always
/// at reduced confidence.
fn subject_matches_relaxed(candidate: &Candidate, pending: &PendingRequirement) -> bool {
    candidate.doc_type.scope == SubjectScope::Worker
        && candidate.doc.person_key.is_none()
        && candidate
            .doc
            .company_key
            .as_deref()
            .map(|k| normalize(k) == normalize(&pending.empresa))
            .unwrap_or(false)
}

fn empty_outcome(
    pending: &PendingRequirement,
    pipeline: Vec<StageReport>,
    reason: &str,
    relaxations: Vec<String>,
) -> MatchOutcome {
    MatchOutcome {
        matched_doc: None,
        matched_rule: None,
        confidence: CONFIDENCE_NONE,
        primary_reason_code: reason.to_string(),
        human_hint: hint_for(reason),
        relaxations,
        debug: MatchDebug {
            pending_item_key: pending.pending_item_key.clone(),
            tipo_doc: pending.tipo_doc.clone(),
            pipeline,
            top_candidates: Vec::new(),
            outcome_reason: reason.to_string(),
            confidence: CONFIDENCE_NONE,
            matched_doc_id: None,
        },
    }
}

/// Operator-facing hint for a reason code.
pub fn hint_for(reason: &str) -> String {
    match reason {
        codes::MATCHED => "Documento localizado en el repositorio, listo para subir.",
        codes::NO_ALIAS_MATCH => {
            "El tipo de documento del portal no está mapeado a ningún tipo local."
        }
        codes::NO_DOCS_OF_TYPE => "No hay documentos de este tipo en el repositorio.",
        codes::SUBJECT_MISMATCH => "Ningún documento coincide con el trabajador o la empresa.",
        codes::PERIOD_MISMATCH => "Ningún documento cubre el periodo solicitado.",
        codes::ALL_CANDIDATES_EXPIRED => "Todos los documentos candidatos están caducados.",
        _ => "Revisión manual necesaria.",
    }
    .to_string()
}

/// Decision thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionConfig {
    pub min_confidence: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.80,
        }
    }
}

/// Turn a match outcome into a plan decision plus blocking issues.
pub fn decide(outcome: &MatchOutcome, config: DecisionConfig) -> (Decision, Vec<String>) {
    match &outcome.matched_doc {
        Some(_) if outcome.confidence >= config.min_confidence => {
            (Decision::AutoUpload, Vec::new())
        }
        Some(_) => (Decision::ReviewRequired, outcome.relaxations.clone()),
        None => (Decision::NoMatch, Vec::new()),
    }
}
