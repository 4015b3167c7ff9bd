//! Instrumentation events for scrape and execution runs.
//!
//! An append-only log of everything a run did: overlays dismissed, pages
//! processed, matches evaluated, phases attempted, uploads performed. The
//! log is buffered in memory and flushed either as a JSON array
//! (`instrumentation.json`, the run-directory artifact) or appended as
//! JSONL (durable cross-run logs).
//!
//! All portal-derived text is passed through [`redact`] before it is
//! recorded; captured toolbars and URLs have a habit of embedding session
//! tokens.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use docket_types::ExecPhase;

/// Instrumentation artifact name inside a run's `evidence/` directory.
pub const INSTRUMENTATION_FILE: &str = "instrumentation.json";

pub fn instrumentation_path(evidence_dir: &Path) -> PathBuf {
    evidence_dir.join(INSTRUMENTATION_FILE)
}

/// One recorded step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    ScrapeStarted {
        url: String,
    },
    OverlayDismissed {
        overlay: String,
    },
    SearchEnsured {
        outcome: String,
        attempts: u32,
    },
    PageProcessed {
        page: u32,
        rows: u32,
    },
    PaginationFinished {
        pages_processed: u32,
        items_after_dedupe: u32,
        truncated: bool,
    },
    MatchEvaluated {
        pending_item_key: String,
        decision: String,
        reason_code: String,
        confidence: f64,
    },
    PlanFrozen {
        plan_id: String,
        checksum: String,
        items: u32,
    },
    GuardrailRejected {
        error_code: String,
    },
    PhaseStarted {
        phase: ExecPhase,
        attempt: u32,
    },
    PhaseFailed {
        phase: ExecPhase,
        error_code: String,
        transient: bool,
        attempt: u32,
    },
    ItemRelocated {
        page: u32,
        row_index: u32,
    },
    UploadPerformed {
        path: String,
    },
    PostVerification {
        absent: bool,
    },
    RunFinished {
        success: bool,
        errors: u32,
    },
}

impl RunEvent {
    pub fn now(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Buffered event log for one run.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<RunEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, kind: EventKind) {
        self.events.push(RunEvent::now(kind));
    }

    pub fn all_events(&self) -> &[RunEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Write the whole log as a pretty JSON array (the
    /// `instrumentation.json` artifact).
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(&self.events)
            .context("failed to serialize events to JSON")?;
        fs::write(path, json)
            .with_context(|| format!("failed to write events file {}", path.display()))?;
        Ok(())
    }

    /// Read a JSON-array log back.
    pub fn read_json(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read events file {}", path.display()))?;
        let events: Vec<RunEvent> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse events JSON from {}", path.display()))?;
        Ok(Self { events })
    }

    /// Append events to a durable JSONL file.
    pub fn append_jsonl(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let mut writer = std::io::BufWriter::new(file);
        for event in &self.events {
            let line =
                serde_json::to_string(event).context("failed to serialize event to JSON")?;
            writeln!(writer, "{}", line).context("failed to write event line")?;
        }
        writer.flush().context("failed to flush events file")?;
        Ok(())
    }

    /// Read a JSONL log back.
    pub fn read_jsonl(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let file = File::open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line
                .with_context(|| format!("failed to read line from {}", path.display()))?;
            let event: RunEvent = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse event JSON from line: {}", line))?;
            events.push(event);
        }
        Ok(Self { events })
    }
}

/// Strip credential-shaped substrings from portal-derived text before it is
/// persisted into evidence.
pub fn redact(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, line) in s.lines().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&redact_line(line));
    }
    if s.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn redact_line(line: &str) -> String {
    let mut out = line.to_string();

    if let Some(pos) = out.to_ascii_lowercase().find("authorization:") {
        let after = &out[pos..];
        if let Some(bearer_pos) = after.to_ascii_lowercase().find("bearer ") {
            let redact_start = pos + bearer_pos + "bearer ".len();
            out = format!("{}[REDACTED]", &out[..redact_start]);
        }
    }

    for marker in ["jsessionid=", "sessionid=", "token=", "auth="] {
        if let Some(pos) = out.to_ascii_lowercase().find(marker) {
            let value_start = pos + marker.len();
            let value_end = out[value_start..]
                .find(|c: char| matches!(c, '&' | ';' | '?' | '"') || c.is_whitespace())
                .map(|off| value_start + off)
                .unwrap_or(out.len());
            if value_end > value_start {
                out.replace_range(value_start..value_end, "[REDACTED]");
            }
        }
    }

    out
}
