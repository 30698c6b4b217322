//! Data models for the data quality pipeline.
//!
//! This module contains the core data structures used throughout the
//! application: ingested file entries, discovered sources, detector
//! findings, and the per-source and executive reports.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Processing status of an ingested file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Successfully processed.
    Processed,
    /// Processed but contained no data.
    Empty,
    /// Processing failed with errors.
    Failed,
    /// Processing stopped/blocked.
    Stopped,
    /// Waiting to be processed.
    Pending,
    /// File was removed from the system.
    Deleted,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Processed => "processed",
            FileStatus::Empty => "empty",
            FileStatus::Failed => "failed",
            FileStatus::Stopped => "stopped",
            FileStatus::Pending => "pending",
            FileStatus::Deleted => "deleted",
        };
        write!(f, "{}", s)
    }
}

/// A single file entry from the daily files listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Name of the uploaded file.
    pub filename: String,
    /// Number of rows processed in the file.
    pub rows: u64,
    /// Processing status of the file.
    pub status: FileStatus,
    /// Whether the file is a duplicate.
    pub is_duplicated: bool,
    /// Size of the file in MB. None for empty files.
    #[serde(default)]
    pub file_size: Option<f64>,
    /// Timestamp when the file was uploaded.
    pub uploaded_at: DateTime<Utc>,
    /// Additional status information or error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
}

impl FileEntry {
    /// A file counts as blocked when it failed, stopped, or is a duplicate.
    pub fn is_blocked(&self) -> bool {
        self.is_duplicated || matches!(self.status, FileStatus::Failed | FileStatus::Stopped)
    }

    /// A file counts as empty when it carries no data rows.
    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.status == FileStatus::Empty
    }
}

/// One monitored data-ingestion feed. Immutable once discovered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Source identifier (e.g. "195385").
    pub id: String,
    /// Human-readable name, extracted from the source CV header when
    /// available.
    pub display_name: Option<String>,
    /// The source CV document (markdown) describing expected schedules
    /// and volume patterns. Passed to the reasoning calls as context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cv: Option<String>,
}

impl Source {
    /// Display name with fallback to a generic id-derived name.
    pub fn name(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| format!("Source_{}", self.id))
    }
}

/// The six detector kinds, in their fixed execution/reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Missing,
    DuplicateFailed,
    Empty,
    VolumeVariation,
    LateUpload,
    PreviousPeriod,
}

impl DetectorKind {
    /// All detector kinds in fixed order.
    pub const ALL: [DetectorKind; 6] = [
        DetectorKind::Missing,
        DetectorKind::DuplicateFailed,
        DetectorKind::Empty,
        DetectorKind::VolumeVariation,
        DetectorKind::LateUpload,
        DetectorKind::PreviousPeriod,
    ];
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DetectorKind::Missing => "missing files",
            DetectorKind::DuplicateFailed => "duplicated/failed files",
            DetectorKind::Empty => "unexpected empty files",
            DetectorKind::VolumeVariation => "volume variation",
            DetectorKind::LateUpload => "late uploads",
            DetectorKind::PreviousPeriod => "previous period files",
        };
        write!(f, "{}", s)
    }
}

/// Per-file volume change against the last-weekday baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeDelta {
    pub filename: String,
    pub today_rows: u64,
    pub baseline_rows: u64,
    /// Percentage change relative to the baseline (signed).
    pub pct_change: f64,
}

/// Per-file upload delay against the last-weekday baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadDelay {
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    /// Hours past the expected delivery window (positive = late).
    pub delay_hours: f64,
}

/// Structured evidence gathered locally for one (source, detector) pair.
///
/// This snapshot is owned by the detection task, serialized into the
/// reasoning prompt, and carried into the finding so classification never
/// depends on the model's narrative.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorEvidence {
    /// File names this detector flagged.
    pub flagged_files: Vec<String>,
    /// Number of flagged files.
    pub flagged_count: usize,
    /// Total files observed today for the source.
    pub total_files: usize,
    /// Fraction of today's files affected, as a percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_pct: Option<f64>,
    /// Volume deltas (volume-variation detector only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_deltas: Vec<VolumeDelta>,
    /// Upload delays (late-upload detector only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upload_delays: Vec<UploadDelay>,
}

impl DetectorEvidence {
    /// Largest absolute volume change in the evidence, if any.
    pub fn max_abs_pct_change(&self) -> Option<f64> {
        self.volume_deltas
            .iter()
            .map(|d| d.pct_change.abs())
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }
}

/// Outcome of one detector run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FindingOutcome {
    /// The detector surfaced an anomaly backed by evidence.
    Flagged {
        evidence: DetectorEvidence,
        detail: String,
    },
    /// The detector ran and found nothing abnormal.
    Clear { detail: String },
    /// The detector could not complete (reasoning call failed after
    /// retry); downstream synthesis proceeds and notes the gap.
    Undetermined { reason: String },
}

/// The structured output of one detector run for one source. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub kind: DetectorKind,
    pub outcome: FindingOutcome,
}

impl Finding {
    pub fn undetermined(kind: DetectorKind, reason: impl Into<String>) -> Self {
        Finding {
            kind,
            outcome: FindingOutcome::Undetermined {
                reason: reason.into(),
            },
        }
    }

    pub fn is_undetermined(&self) -> bool {
        matches!(self.outcome, FindingOutcome::Undetermined { .. })
    }
}

/// Classification of a surfaced issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueClass {
    Informational,
    Warning,
    Critical,
}

impl fmt::Display for IssueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueClass::Informational => write!(f, "Informational"),
            IssueClass::Warning => write!(f, "Warning"),
            IssueClass::Critical => write!(f, "Critical"),
        }
    }
}

/// One classified issue inside a source report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedIssue {
    pub kind: DetectorKind,
    pub class: IssueClass,
    pub description: String,
}

/// Per-source report produced once all six findings exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: Source,
    /// The date the report line refers to (latest observed upload day,
    /// falling back to the run date).
    pub date: NaiveDate,
    /// Issues in detector order.
    pub issues: Vec<ClassifiedIssue>,
    /// One-line evidence-bearing summary for the executive report.
    pub summary_line: String,
    /// Recommended action (urgent/attention sources only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_action: Option<String>,
    /// Total records processed today across the source's files.
    pub total_records: u64,
    /// False when the synthesis reasoning call failed and the report was
    /// assembled from raw evidence instead.
    pub synthesis_complete: bool,
    /// False when one or more detectors could not complete and the issue
    /// list carries an undetermined gap.
    pub detection_complete: bool,
}

impl SourceReport {
    /// Worst issue class present in the report.
    pub fn worst_class(&self) -> IssueClass {
        self.issues
            .iter()
            .map(|i| i.class)
            .max()
            .unwrap_or(IssueClass::Informational)
    }

    pub fn has_class(&self, class: IssueClass) -> bool {
        self.issues.iter().any(|i| i.class == class)
    }
}

/// Priority tier in the executive report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Urgent,
    NeedsAttention,
    NoAction,
}

impl Bucket {
    /// Section heading as rendered in the executive report.
    pub fn heading(&self) -> &'static str {
        match self {
            Bucket::Urgent => "Urgent Action Required",
            Bucket::NeedsAttention => "Needs Attention",
            Bucket::NoAction => "No Action Needed",
        }
    }
}

/// Terminal artifact: per-source summaries in three priority buckets,
/// discovery order preserved within each bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutiveReport {
    pub generated_at: DateTime<Utc>,
    pub urgent: Vec<SourceReport>,
    pub needs_attention: Vec<SourceReport>,
    pub no_action: Vec<SourceReport>,
}

impl ExecutiveReport {
    pub fn total_sources(&self) -> usize {
        self.urgent.len() + self.needs_attention.len() + self.no_action.len()
    }

    /// Which bucket a source id landed in, if any.
    pub fn bucket_of(&self, source_id: &str) -> Option<Bucket> {
        if self.urgent.iter().any(|r| r.source.id == source_id) {
            Some(Bucket::Urgent)
        } else if self.needs_attention.iter().any(|r| r.source.id == source_id) {
            Some(Bucket::NeedsAttention)
        } else if self.no_action.iter().any(|r| r.source.id == source_id) {
            Some(Bucket::NoAction)
        } else {
            None
        }
    }
}
