//! Append-only audit trail of every transformation decision.
//!
//! One [`AuditLog`] per sheet. Entries are built first and then appended;
//! the log hands out only shared references afterwards, so an entry is never
//! changed once recorded. Every stage appends a [`AuditAction::StageCompleted`]
//! marker even when it changed nothing, which lets readers tell "nothing to
//! do" apart from "stage never ran". Markers carry the stage's wall time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Pipeline stage that produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    TypeInference,
    Layout,
    Cleaning,
    Profiling,
    Fallback,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingest => "ingest",
            Stage::TypeInference => "type_inference",
            Stage::Layout => "layout",
            Stage::Cleaning => "cleaning",
            Stage::Profiling => "profiling",
            Stage::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What was done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    StageCompleted,
    TypeAssigned,
    TypeAmbiguous,
    LayoutNormalized,
    BlankRowRemoved,
    SectionHeaderRemoved,
    RepeatedHeaderRemoved,
    ValuesConverted,
    ValueMarkedMissing,
    ColumnDegraded,
    ProfilingPartial,
    FallbackEscalated,
    FallbackSucceeded,
    SheetFailed,
}

/// One recorded decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the sheet's log, starting at 0.
    pub sequence: usize,
    pub timestamp: DateTime<Utc>,
    pub stage: Stage,
    pub action: AuditAction,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    /// Row indices in the table the stage was working on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    /// Wall time of the stage, on stage markers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl AuditEntry {
    pub fn new(stage: Stage, action: AuditAction, detail: impl Into<String>) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            stage,
            action,
            detail: detail.into(),
            columns: Vec::new(),
            rows: Vec::new(),
            before: None,
            after: None,
            duration_ms: None,
        }
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(column.into());
        self
    }

    pub fn row(mut self, row: usize) -> Self {
        self.rows.push(row);
        self
    }

    pub fn rows(mut self, rows: Vec<usize>) -> Self {
        self.rows = rows;
        self
    }

    pub fn change(mut self, before: impl Into<String>, after: impl Into<String>) -> Self {
        self.before = Some(before.into());
        self.after = Some(after.into());
        self
    }

    /// Stamp the time elapsed since `started`.
    pub fn took(mut self, started: Instant) -> Self {
        self.duration_ms = Some(elapsed_ms(started));
        self
    }

    pub fn is_marker(&self) -> bool {
        self.action == AuditAction::StageCompleted
    }
}

/// Per-sheet audit log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, stamping its sequence number.
    pub fn record(&mut self, mut entry: AuditEntry) {
        entry.sequence = self.entries.len();
        self.entries.push(entry);
    }

    /// Append the "stage completed" marker for a stage begun at `started`.
    pub fn stage_completed(&mut self, stage: Stage, summary: impl Into<String>, started: Instant) {
        self.record(AuditEntry::new(stage, AuditAction::StageCompleted, summary).took(started));
    }

    /// Append every entry of another log, keeping their timestamps.
    pub fn append(&mut self, other: AuditLog) {
        for entry in other.entries {
            self.record(entry);
        }
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries that record an actual change or problem (not stage markers).
    pub fn changes(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter().filter(|e| !e.is_marker())
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    /// Whether a stage left its completion marker.
    pub fn completed(&self, stage: Stage) -> bool {
        self.entries.iter().any(|e| e.stage == stage && e.is_marker())
    }

    /// Wall time of a stage, summed over its markers.
    pub fn stage_duration_ms(&self, stage: Stage) -> Option<u64> {
        self.entries
            .iter()
            .filter(|e| e.stage == stage && e.is_marker())
            .filter_map(|e| e.duration_ms)
            .reduce(|a, b| a + b)
    }
}

/// Milliseconds since `started`, saturating.
pub fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
