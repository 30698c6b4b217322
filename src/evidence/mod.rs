//! File-listing snapshots and per-detector evidence gathering.
//!
//! The primary input folder carries two listings: `files.json` (today's
//! uploads) and `files_last_weekday.json` (the same weekday one week
//! earlier), each a JSON map of source id to file entries. Every detector
//! computes its structured evidence from a per-source snapshot of those
//! listings before any reasoning call is made.

use crate::error::Result;
use crate::models::{
    DetectorEvidence, DetectorKind, FileEntry, UploadDelay, VolumeDelta,
};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Uploads later than this many hours past the expected window are flagged.
pub const LATE_THRESHOLD_HOURS: f64 = 4.0;

/// Volume changes beyond this absolute percentage are flagged.
pub const VOLUME_FLAG_PCT: f64 = 50.0;

/// Today's and baseline file listings for every source in the folder.
#[derive(Debug, Clone)]
pub struct FolderListing {
    today: HashMap<String, Vec<FileEntry>>,
    baseline: HashMap<String, Vec<FileEntry>>,
}

impl FolderListing {
    /// Load both listings from the primary folder.
    pub fn load(primary_folder: &Path) -> Result<Self> {
        let today = load_listing(&primary_folder.join("files.json"))?;
        let baseline = load_listing(&primary_folder.join("files_last_weekday.json"))?;
        debug!(
            "Loaded listings: {} sources today, {} sources baseline",
            today.len(),
            baseline.len()
        );
        Ok(Self { today, baseline })
    }

    /// Build the immutable evidence snapshot for one source.
    pub fn snapshot(&self, source_id: &str) -> SourceSnapshot {
        SourceSnapshot {
            today: self.today.get(source_id).cloned().unwrap_or_default(),
            baseline: self.baseline.get(source_id).cloned().unwrap_or_default(),
        }
    }
}

fn load_listing(path: &Path) -> Result<HashMap<String, Vec<FileEntry>>> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Immutable per-source view of today's and the baseline file entries.
/// Each detection task owns its own clone; tasks share nothing mutable.
#[derive(Debug, Clone)]
pub struct SourceSnapshot {
    pub today: Vec<FileEntry>,
    pub baseline: Vec<FileEntry>,
}

impl SourceSnapshot {
    /// Total records processed today across the source's files.
    pub fn total_records(&self) -> u64 {
        self.today.iter().map(|f| f.rows).sum()
    }

    /// The day the snapshot refers to: latest upload date observed today,
    /// falling back to the current date when no files arrived.
    pub fn report_date(&self) -> NaiveDate {
        self.today
            .iter()
            .map(|f| f.uploaded_at.date_naive())
            .max()
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Gather the structured evidence for one detector kind.
    pub fn gather(&self, kind: DetectorKind) -> DetectorEvidence {
        match kind {
            DetectorKind::Missing => self.gather_missing(),
            DetectorKind::DuplicateFailed => self.gather_duplicate_failed(),
            DetectorKind::Empty => self.gather_empty(),
            DetectorKind::VolumeVariation => self.gather_volume_variation(),
            DetectorKind::LateUpload => self.gather_late_upload(),
            DetectorKind::PreviousPeriod => self.gather_previous_period(),
        }
    }

    /// Files expected from the baseline pattern but absent today.
    fn gather_missing(&self) -> DetectorEvidence {
        let today_keys: Vec<String> = self.today.iter().map(|f| pattern_key(&f.filename)).collect();

        let flagged: Vec<String> = self
            .baseline
            .iter()
            .filter(|f| !today_keys.contains(&pattern_key(&f.filename)))
            .map(|f| f.filename.clone())
            .collect();

        self.evidence_from_files(flagged)
    }

    /// Files marked duplicate or with a failed/stopped status.
    fn gather_duplicate_failed(&self) -> DetectorEvidence {
        let flagged: Vec<String> = self
            .today
            .iter()
            .filter(|f| f.is_blocked())
            .map(|f| f.filename.clone())
            .collect();

        self.evidence_from_files(flagged)
    }

    /// Files with zero rows whose baseline counterpart carried data.
    fn gather_empty(&self) -> DetectorEvidence {
        let flagged: Vec<String> = self
            .today
            .iter()
            .filter(|f| f.is_empty())
            .filter(|f| {
                let key = pattern_key(&f.filename);
                self.baseline
                    .iter()
                    .any(|b| pattern_key(&b.filename) == key && b.rows > 0)
            })
            .map(|f| f.filename.clone())
            .collect();

        self.evidence_from_files(flagged)
    }

    /// Row-count deltas against the baseline, flagged outside the normal band.
    fn gather_volume_variation(&self) -> DetectorEvidence {
        let mut deltas = Vec::new();

        for today in &self.today {
            let key = pattern_key(&today.filename);
            let Some(baseline) = self
                .baseline
                .iter()
                .find(|b| pattern_key(&b.filename) == key && b.rows > 0)
            else {
                continue;
            };

            let pct_change =
                (today.rows as f64 - baseline.rows as f64) * 100.0 / baseline.rows as f64;
            if pct_change.abs() > VOLUME_FLAG_PCT {
                deltas.push(VolumeDelta {
                    filename: today.filename.clone(),
                    today_rows: today.rows,
                    baseline_rows: baseline.rows,
                    pct_change,
                });
            }
        }

        let flagged: Vec<String> = deltas.iter().map(|d| d.filename.clone()).collect();
        let mut evidence = self.evidence_from_files(flagged);
        evidence.volume_deltas = deltas;
        evidence
    }

    /// Uploads drifting past the expected arrival window. The expected
    /// arrival is the baseline upload shifted forward one week, so both
    /// same-day drift and multi-day lateness surface in hours.
    fn gather_late_upload(&self) -> DetectorEvidence {
        let mut delays = Vec::new();

        for today in &self.today {
            let key = pattern_key(&today.filename);
            let Some(baseline) = self
                .baseline
                .iter()
                .find(|b| pattern_key(&b.filename) == key)
            else {
                continue;
            };

            let expected = baseline.uploaded_at + ChronoDuration::days(7);
            let delay_hours = (today.uploaded_at - expected).num_minutes() as f64 / 60.0;
            if delay_hours > LATE_THRESHOLD_HOURS {
                delays.push(UploadDelay {
                    filename: today.filename.clone(),
                    uploaded_at: today.uploaded_at,
                    delay_hours,
                });
            }
        }

        let flagged: Vec<String> = delays.iter().map(|d| d.filename.clone()).collect();
        let mut evidence = self.evidence_from_files(flagged);
        evidence.upload_delays = delays;
        evidence
    }

    /// Files present today with no counterpart in the baseline period.
    fn gather_previous_period(&self) -> DetectorEvidence {
        let baseline_keys: Vec<String> = self
            .baseline
            .iter()
            .map(|f| pattern_key(&f.filename))
            .collect();

        let flagged: Vec<String> = self
            .today
            .iter()
            .filter(|f| !baseline_keys.contains(&pattern_key(&f.filename)))
            .map(|f| f.filename.clone())
            .collect();

        self.evidence_from_files(flagged)
    }

    fn evidence_from_files(&self, flagged_files: Vec<String>) -> DetectorEvidence {
        let total_files = self.today.len();
        let flagged_count = flagged_files.len();
        let affected_pct = if total_files > 0 && flagged_count > 0 {
            Some(flagged_count as f64 * 100.0 / total_files as f64)
        } else {
            None
        };

        DetectorEvidence {
            flagged_files,
            flagged_count,
            total_files,
            affected_pct,
            volume_deltas: Vec::new(),
            upload_delays: Vec::new(),
        }
    }
}

/// Mask digit runs so files from different days join on their naming
/// pattern ("report_2025_09_07.csv" and "report_2025_09_08.csv" match).
fn pattern_key(filename: &str) -> String {
    let mut key = String::with_capacity(filename.len());
    let mut in_digits = false;
    for c in filename.chars() {
        if c.is_ascii_digit() {
            if !in_digits {
                key.push('#');
                in_digits = true;
            }
        } else {
            in_digits = false;
            key.push(c);
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileStatus;
    use chrono::{DateTime, Utc};

    fn entry(filename: &str, rows: u64, status: FileStatus, uploaded_at: &str) -> FileEntry {
        FileEntry {
            filename: filename.to_string(),
            rows,
            status,
            is_duplicated: false,
            file_size: if rows > 0 { Some(1.0) } else { None },
            uploaded_at: uploaded_at.parse::<DateTime<Utc>>().unwrap(),
            status_message: None,
        }
    }

    fn snapshot(today: Vec<FileEntry>, baseline: Vec<FileEntry>) -> SourceSnapshot {
        SourceSnapshot { today, baseline }
    }

    #[test]
    fn test_pattern_key_masks_dates() {
        assert_eq!(
            pattern_key("shop_report_2025_09_07.csv"),
            pattern_key("shop_report_2025_09_08.csv")
        );
        assert_ne!(
            pattern_key("shop_report_2025_09_08.csv"),
            pattern_key("market_report_2025_09_08.csv")
        );
    }

    #[test]
    fn test_missing_detects_absent_baseline_file() {
        let snap = snapshot(
            vec![entry("a_2025_09_08.csv", 10, FileStatus::Processed, "2025-09-08T08:00:00Z")],
            vec![
                entry("a_2025_09_01.csv", 10, FileStatus::Processed, "2025-09-01T08:00:00Z"),
                entry("b_2025_09_01.csv", 20, FileStatus::Processed, "2025-09-01T09:00:00Z"),
            ],
        );

        let evidence = snap.gather(DetectorKind::Missing);
        assert_eq!(evidence.flagged_count, 1);
        assert_eq!(evidence.flagged_files, vec!["b_2025_09_01.csv"]);
    }

    #[test]
    fn test_duplicate_failed_counts_blocked_files() {
        let mut dup = entry("d.csv", 10, FileStatus::Processed, "2025-09-08T08:00:00Z");
        dup.is_duplicated = true;
        let snap = snapshot(
            vec![
                dup,
                entry("f.csv", 10, FileStatus::Failed, "2025-09-08T08:00:00Z"),
                entry("ok.csv", 10, FileStatus::Processed, "2025-09-08T08:00:00Z"),
                entry("ok2.csv", 10, FileStatus::Processed, "2025-09-08T08:00:00Z"),
            ],
            vec![],
        );

        let evidence = snap.gather(DetectorKind::DuplicateFailed);
        assert_eq!(evidence.flagged_count, 2);
        assert_eq!(evidence.affected_pct, Some(50.0));
    }

    #[test]
    fn test_empty_requires_historical_data() {
        let snap = snapshot(
            vec![
                entry("a_0908.csv", 0, FileStatus::Empty, "2025-09-08T08:00:00Z"),
                entry("b_0908.csv", 0, FileStatus::Empty, "2025-09-08T08:00:00Z"),
            ],
            vec![
                entry("a_0901.csv", 500, FileStatus::Processed, "2025-09-01T08:00:00Z"),
                // b was empty last week too: not unexpected
                entry("b_0901.csv", 0, FileStatus::Empty, "2025-09-01T08:00:00Z"),
            ],
        );

        let evidence = snap.gather(DetectorKind::Empty);
        assert_eq!(evidence.flagged_files, vec!["a_0908.csv"]);
    }

    #[test]
    fn test_volume_variation_flags_beyond_band() {
        let snap = snapshot(
            vec![
                entry("big_0908.csv", 203, FileStatus::Processed, "2025-09-08T08:00:00Z"),
                entry("flat_0908.csv", 110, FileStatus::Processed, "2025-09-08T08:00:00Z"),
            ],
            vec![
                entry("big_0901.csv", 100, FileStatus::Processed, "2025-09-01T08:00:00Z"),
                entry("flat_0901.csv", 100, FileStatus::Processed, "2025-09-01T08:00:00Z"),
            ],
        );

        let evidence = snap.gather(DetectorKind::VolumeVariation);
        assert_eq!(evidence.flagged_files, vec!["big_0908.csv"]);
        assert_eq!(evidence.volume_deltas.len(), 1);
        assert!((evidence.volume_deltas[0].pct_change - 103.0).abs() < 1e-9);
    }

    #[test]
    fn test_late_upload_flags_past_threshold() {
        let snap = snapshot(
            vec![
                entry("a_0908.csv", 10, FileStatus::Processed, "2025-09-08T14:30:00Z"),
                entry("b_0908.csv", 10, FileStatus::Processed, "2025-09-08T08:30:00Z"),
            ],
            vec![
                entry("a_0901.csv", 10, FileStatus::Processed, "2025-09-01T08:00:00Z"),
                entry("b_0901.csv", 10, FileStatus::Processed, "2025-09-01T08:00:00Z"),
            ],
        );

        let evidence = snap.gather(DetectorKind::LateUpload);
        assert_eq!(evidence.flagged_files, vec!["a_0908.csv"]);
        assert!((evidence.upload_delays[0].delay_hours - 6.5).abs() < 1e-9);
    }

    #[test]
    fn test_late_upload_measures_multi_day_delays() {
        // Expected on the 8th at 08:00, arrived on the 10th: 48h late.
        let snap = snapshot(
            vec![entry("w_0910.csv", 10, FileStatus::Processed, "2025-09-10T08:00:00Z")],
            vec![entry("w_0901.csv", 10, FileStatus::Processed, "2025-09-01T08:00:00Z")],
        );

        let evidence = snap.gather(DetectorKind::LateUpload);
        assert_eq!(evidence.flagged_count, 1);
        assert!((evidence.upload_delays[0].delay_hours - 48.0).abs() < 1e-9);
    }

    #[test]
    fn test_previous_period_flags_new_files() {
        let snap = snapshot(
            vec![
                entry("known_0908.csv", 10, FileStatus::Processed, "2025-09-08T08:00:00Z"),
                entry("surprise_0908.csv", 10, FileStatus::Processed, "2025-09-08T08:00:00Z"),
            ],
            vec![entry("known_0901.csv", 10, FileStatus::Processed, "2025-09-01T08:00:00Z")],
        );

        let evidence = snap.gather(DetectorKind::PreviousPeriod);
        assert_eq!(evidence.flagged_files, vec!["surprise_0908.csv"]);
    }

    #[test]
    fn test_total_records_and_report_date() {
        let snap = snapshot(
            vec![
                entry("a.csv", 150, FileStatus::Processed, "2025-09-08T08:00:00Z"),
                entry("b.csv", 50, FileStatus::Processed, "2025-09-07T23:00:00Z"),
            ],
            vec![],
        );
        assert_eq!(snap.total_records(), 200);
        assert_eq!(
            snap.report_date(),
            NaiveDate::from_ymd_opt(2025, 9, 8).unwrap()
        );
    }

    #[test]
    fn test_folder_listing_load() {
        let dir = tempfile::tempdir().unwrap();
        let listing = r#"{
            "195385": [{
                "filename": "a.csv",
                "rows": 100,
                "status": "processed",
                "is_duplicated": false,
                "file_size": 1.5,
                "uploaded_at": "2025-09-08T08:10:00Z"
            }]
        }"#;
        fs::write(dir.path().join("files.json"), listing).unwrap();
        fs::write(dir.path().join("files_last_weekday.json"), "{}").unwrap();

        let folder = FolderListing::load(dir.path()).unwrap();
        let snap = folder.snapshot("195385");
        assert_eq!(snap.today.len(), 1);
        assert!(snap.baseline.is_empty());

        // unknown source yields an empty snapshot, not an error
        assert!(folder.snapshot("999").today.is_empty());
    }
}
