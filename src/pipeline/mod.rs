//! Fan-out/fan-in orchestration of the detection and synthesis stages.
//!
//! Every reasoning call across all sources shares one semaphore, so the
//! concurrency limit holds globally rather than per source. Failures are
//! contained at the narrowest barrier that can absorb them: a failed
//! detector becomes an undetermined finding, a failed source synthesis
//! becomes a degraded report, and only executive synthesis failures
//! abort the run.

use crate::agent::{prompts, reason_json, Reasoner, ReasoningRequest};
use crate::analysis::{bucket_for, classify_findings};
use crate::error::{DetectionError, Result, SynthesisError};
use crate::evidence::{FolderListing, SourceSnapshot};
use crate::models::{
    Bucket, ClassifiedIssue, DetectorEvidence, DetectorKind, ExecutiveReport, Finding,
    FindingOutcome, Source, SourceReport,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Identity of one pipeline run, carried into the saved report name.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(session_id: Option<String>) -> Self {
        let started_at = Utc::now();
        let session_id = session_id.unwrap_or_else(|| {
            format!(
                "{:08x}",
                started_at.timestamp_subsec_nanos() ^ std::process::id()
            )
        });
        Self {
            session_id,
            started_at,
        }
    }
}

/// The analysis pipeline: detection fan-out, per-source synthesis, and
/// executive synthesis over a shared reasoning client.
pub struct Pipeline {
    reasoner: Arc<dyn Reasoner>,
    semaphore: Arc<Semaphore>,
    retry_backoff: Duration,
}

#[derive(Debug, Deserialize)]
struct DetectorResponse {
    detail: String,
}

#[derive(Debug, Deserialize)]
struct SourceSynthesisResponse {
    summary_line: String,
    #[serde(default)]
    recommended_action: String,
}

#[derive(Debug, Deserialize)]
struct ExecutiveSynthesisResponse {
    lines: HashMap<String, String>,
}

impl Pipeline {
    pub fn new(reasoner: Arc<dyn Reasoner>, concurrency: usize, retry_backoff: Duration) -> Self {
        Self {
            reasoner,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            retry_backoff,
        }
    }

    /// Run the full pipeline over the discovered sources.
    ///
    /// Source order is preserved from discovery through every barrier, so
    /// the bucket contents of the final report are deterministic given
    /// the same inputs.
    pub async fn run(
        &self,
        sources: Vec<Source>,
        listing: &FolderListing,
    ) -> Result<ExecutiveReport> {
        info!("Analyzing {} sources", sources.len());

        let handles: Vec<_> = sources
            .iter()
            .map(|source| {
                let snapshot = listing.snapshot(&source.id);
                let source = source.clone();
                let reasoner = Arc::clone(&self.reasoner);
                let semaphore = Arc::clone(&self.semaphore);
                let backoff = self.retry_backoff;
                tokio::spawn(async move {
                    analyze_source(source, snapshot, reasoner, semaphore, backoff).await
                })
            })
            .collect();

        let mut reports = Vec::with_capacity(sources.len());
        for (handle, source) in join_all(handles).await.into_iter().zip(sources) {
            match handle {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!("Analysis task for source {} panicked: {}", source.id, e);
                    reports.push(degraded_report(
                        source,
                        &listing_date_fallback(),
                        0,
                        vec![],
                        false,
                    ));
                }
            }
        }

        self.synthesize_executive(reports).await
    }

    /// Bucket the source reports and polish their lines in one executive
    /// reasoning call. Fails the run when the call cannot complete.
    async fn synthesize_executive(
        &self,
        reports: Vec<SourceReport>,
    ) -> Result<ExecutiveReport> {
        if reports.is_empty() {
            return Err(SynthesisError::EmptyInput.into());
        }

        let payload = json!({
            "sources": reports
                .iter()
                .map(|r| {
                    json!({
                        "id": r.source.id,
                        "name": r.source.name(),
                        "date": r.date,
                        "bucket": bucket_for(r).heading(),
                        "summary_line": r.summary_line,
                        "recommended_action": r.recommended_action,
                        "total_records": r.total_records,
                    })
                })
                .collect::<Vec<_>>(),
        });

        let request = ReasoningRequest {
            instruction: prompts::EXECUTIVE_SYNTHESIS_INSTRUCTION.to_string(),
            evidence: payload,
        };

        let _permit = self.semaphore.acquire().await.map_err(|e| {
            SynthesisError::Executive {
                reason: e.to_string(),
            }
        })?;
        // A persistently unparseable executive response is fatal, the
        // same as a transport failure after the bounded retry.
        let parsed: ExecutiveSynthesisResponse =
            reason_json(self.reasoner.as_ref(), request, self.retry_backoff)
                .await
                .map_err(|e| SynthesisError::Executive {
                    reason: e.to_string(),
                })?;
        let lines: HashMap<String, String> = parsed.lines;

        let mut urgent = Vec::new();
        let mut needs_attention = Vec::new();
        let mut no_action = Vec::new();
        for mut report in reports {
            if let Some(line) = lines.get(&report.source.id) {
                if !line.trim().is_empty() {
                    report.summary_line = line.trim().to_string();
                }
            }
            match bucket_for(&report) {
                Bucket::Urgent => urgent.push(report),
                Bucket::NeedsAttention => needs_attention.push(report),
                Bucket::NoAction => no_action.push(report),
            }
        }

        Ok(ExecutiveReport {
            generated_at: Utc::now(),
            urgent,
            needs_attention,
            no_action,
        })
    }
}

/// Detect and synthesize one source. Never fails: synthesis errors
/// degrade into a mechanically assembled report.
async fn analyze_source(
    source: Source,
    snapshot: SourceSnapshot,
    reasoner: Arc<dyn Reasoner>,
    semaphore: Arc<Semaphore>,
    backoff: Duration,
) -> SourceReport {
    let date = snapshot.report_date();
    let total_records = snapshot.total_records();

    let detector_handles: Vec<_> = DetectorKind::ALL
        .into_iter()
        .map(|kind| {
            let evidence = snapshot.gather(kind);
            let source = source.clone();
            let reasoner = Arc::clone(&reasoner);
            let semaphore = Arc::clone(&semaphore);
            tokio::spawn(async move {
                run_detector(kind, source, evidence, reasoner, semaphore, backoff).await
            })
        })
        .collect();

    let findings: Vec<Finding> = join_all(detector_handles)
        .await
        .into_iter()
        .zip(DetectorKind::ALL)
        .map(|(handle, kind)| match handle {
            Ok(finding) => finding,
            Err(e) => Finding::undetermined(kind, format!("detector task panicked: {}", e)),
        })
        .collect();

    let issues = classify_findings(&findings);
    let detection_complete = findings.iter().all(|f| !f.is_undetermined());
    debug!(
        "Source {}: {} issues, detection complete: {}",
        source.id,
        issues.len(),
        detection_complete
    );

    let payload = json!({
        "source": {"id": source.id, "name": source.name()},
        "date": date,
        "total_records": total_records,
        "findings": findings,
        "issues": issues,
    });
    let request = ReasoningRequest {
        instruction: prompts::SOURCE_SYNTHESIS_INSTRUCTION.to_string(),
        evidence: payload,
    };

    let response = {
        let _permit = match semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return degraded_report(source, &date, total_records, issues, detection_complete);
            }
        };
        reason_json::<SourceSynthesisResponse>(reasoner.as_ref(), request, backoff).await
    };

    match response {
        Ok(parsed) => {
            let recommended_action = Some(parsed.recommended_action)
                .filter(|a| !a.trim().is_empty());
            SourceReport {
                source,
                date,
                issues,
                summary_line: parsed.summary_line,
                recommended_action,
                total_records,
                synthesis_complete: true,
                detection_complete,
            }
        }
        Err(e) => {
            let err = SynthesisError::Source {
                source_id: source.id.clone(),
                reason: e.to_string(),
            };
            warn!("{}", err);
            degraded_report(source, &date, total_records, issues, detection_complete)
        }
    }
}

/// Run one detector: evidence is already gathered; the reasoning call
/// only narrates flagged evidence. Clean evidence never reaches the
/// reasoning service.
async fn run_detector(
    kind: DetectorKind,
    source: Source,
    evidence: DetectorEvidence,
    reasoner: Arc<dyn Reasoner>,
    semaphore: Arc<Semaphore>,
    backoff: Duration,
) -> Finding {
    if evidence.flagged_count == 0 {
        return Finding {
            kind,
            outcome: FindingOutcome::Clear {
                detail: format!("no {} detected", kind),
            },
        };
    }

    let payload = json!({
        "source": {"id": source.id, "name": source.name()},
        "cv": source.cv,
        "evidence": evidence,
    });
    let request = ReasoningRequest {
        instruction: prompts::detector_instruction(kind),
        evidence: payload,
    };

    let response = {
        let _permit = match semaphore.acquire().await {
            Ok(permit) => permit,
            Err(e) => return Finding::undetermined(kind, e.to_string()),
        };
        reason_json::<DetectorResponse>(reasoner.as_ref(), request, backoff).await
    };

    match response {
        Ok(parsed) => Finding {
            kind,
            outcome: FindingOutcome::Flagged {
                evidence,
                detail: parsed.detail,
            },
        },
        Err(e) => {
            let err = DetectionError {
                source_id: source.id.clone(),
                detector: kind.to_string(),
                reason: e.to_string(),
            };
            warn!("{}", err);
            Finding::undetermined(kind, err.reason)
        }
    }
}

/// Assemble a report without the synthesis narrative.
fn degraded_report(
    source: Source,
    date: &chrono::NaiveDate,
    total_records: u64,
    issues: Vec<ClassifiedIssue>,
    detection_complete: bool,
) -> SourceReport {
    let summary_line = if issues.is_empty() {
        format!("{} records processed, no anomalies detected", total_records)
    } else {
        issues
            .iter()
            .map(|i| i.description.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    };
    SourceReport {
        source,
        date: *date,
        issues,
        summary_line,
        recommended_action: None,
        total_records,
        synthesis_complete: false,
        detection_complete,
    }
}

fn listing_date_fallback() -> chrono::NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExternalServiceError, PipelineError};
    use crate::models::IssueClass;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted reasoner: answers detector calls with a canned detail,
    /// synthesis calls with a canned summary, and can fail selected
    /// detector kinds or synthesis stages permanently.
    struct ScriptedReasoner {
        fail_detectors: Vec<&'static str>,
        fail_executive: bool,
        malformed_executive: bool,
        malformed_source_synthesis: bool,
        calls: AtomicUsize,
    }

    impl ScriptedReasoner {
        fn new() -> Self {
            Self {
                fail_detectors: vec![],
                fail_executive: false,
                malformed_executive: false,
                malformed_source_synthesis: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Reasoner for ScriptedReasoner {
        async fn complete(
            &self,
            request: ReasoningRequest,
        ) -> std::result::Result<String, ExternalServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if request.instruction.contains("MISSION:") {
                for marker in &self.fail_detectors {
                    if request.instruction.contains(marker) {
                        return Err(ExternalServiceError::Timeout(1));
                    }
                }
                return Ok(r#"{"detail": "files deviated from the weekday pattern"}"#.to_string());
            }
            if request.instruction.contains("consolidating detector findings") {
                if self.malformed_source_synthesis {
                    return Ok("I could not produce structured output.".to_string());
                }
                return Ok(
                    r#"{"summary_line": "volume up 103% vs last Monday", "recommended_action": "Confirm coverage/window; monitor next run"}"#
                        .to_string(),
                );
            }
            if self.fail_executive {
                return Err(ExternalServiceError::Connect("localhost".to_string()));
            }
            if self.malformed_executive {
                return Ok("Here is my summary, in plain prose.".to_string());
            }
            Ok(r#"{"lines": {}}"#.to_string())
        }
    }

    fn entry_json(filename: &str, rows: u64, uploaded_at: &str) -> serde_json::Value {
        json!({
            "filename": filename,
            "rows": rows,
            "status": if rows == 0 { "empty" } else { "processed" },
            "is_duplicated": false,
            "file_size": if rows == 0 { serde_json::Value::Null } else { json!(1.0) },
            "uploaded_at": uploaded_at,
        })
    }

    fn write_listings(
        dir: &std::path::Path,
        today: serde_json::Value,
        baseline: serde_json::Value,
    ) {
        fs::write(dir.join("files.json"), today.to_string()).unwrap();
        fs::write(dir.join("files_last_weekday.json"), baseline.to_string()).unwrap();
    }

    fn source(id: &str, name: &str) -> Source {
        Source {
            id: id.to_string(),
            display_name: Some(name.to_string()),
            cv: Some(format!("# {}\nDaily files around 08:00 UTC.", name)),
        }
    }

    fn pipeline(reasoner: ScriptedReasoner) -> Pipeline {
        Pipeline::new(Arc::new(reasoner), 4, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_clean_source_lands_in_no_action() {
        let dir = tempfile::tempdir().unwrap();
        write_listings(
            dir.path(),
            json!({"1": [entry_json("daily_2025_09_08.csv", 200, "2025-09-08T08:00:00Z")]}),
            json!({"1": [entry_json("daily_2025_09_01.csv", 210, "2025-09-01T08:05:00Z")]}),
        );
        let listing = FolderListing::load(dir.path()).unwrap();

        let report = pipeline(ScriptedReasoner::new())
            .run(vec![source("1", "Clean_Feed")], &listing)
            .await
            .unwrap();

        assert_eq!(report.bucket_of("1"), Some(Bucket::NoAction));
        assert_eq!(report.no_action[0].total_records, 200);
        assert!(report.urgent.is_empty());
        assert!(report.needs_attention.is_empty());

        let markdown = crate::report::render_markdown(&report);
        assert!(markdown.contains("• *Clean_Feed (id: 1)* – 2025-09-08: `[200] records`"));
    }

    #[tokio::test]
    async fn test_volume_spikes_land_in_urgent() {
        let dir = tempfile::tempdir().unwrap();
        // Three entities with +103%, +250%, and +469% against the baseline.
        write_listings(
            dir.path(),
            json!({"2": [
                entry_json("pay_north_2025_09_08.csv", 203, "2025-09-08T08:00:00Z"),
                entry_json("pay_south_2025_09_08.csv", 350, "2025-09-08T08:05:00Z"),
                entry_json("pay_west_2025_09_08.csv", 569, "2025-09-08T08:10:00Z"),
            ]}),
            json!({"2": [
                entry_json("pay_north_2025_09_01.csv", 100, "2025-09-01T08:00:00Z"),
                entry_json("pay_south_2025_09_01.csv", 100, "2025-09-01T08:05:00Z"),
                entry_json("pay_west_2025_09_01.csv", 100, "2025-09-01T08:10:00Z"),
            ]}),
        );
        let listing = FolderListing::load(dir.path()).unwrap();

        let report = pipeline(ScriptedReasoner::new())
            .run(vec![source("2", "Payments")], &listing)
            .await
            .unwrap();

        assert_eq!(report.bucket_of("2"), Some(Bucket::Urgent));
        let urgent = &report.urgent[0];
        assert!(urgent.has_class(IssueClass::Critical));
        assert!(urgent.synthesis_complete);
        assert_eq!(
            urgent.recommended_action.as_deref(),
            Some("Confirm coverage/window; monitor next run")
        );
    }

    #[tokio::test]
    async fn test_late_uploads_land_in_needs_attention() {
        let dir = tempfile::tempdir().unwrap();
        // Eight entities uploaded 24h to 168h past their expected window
        // (baseline 2025-09-01T08:00 puts the window at 2025-09-08T08:00).
        let late_uploads = [
            "2025-09-09T08:00:00Z",
            "2025-09-10T04:00:00Z",
            "2025-09-11T00:00:00Z",
            "2025-09-11T20:00:00Z",
            "2025-09-12T16:00:00Z",
            "2025-09-13T12:00:00Z",
            "2025-09-14T08:00:00Z",
            "2025-09-15T08:00:00Z",
        ];
        let today: Vec<_> = late_uploads
            .iter()
            .enumerate()
            .map(|(i, uploaded_at)| {
                entry_json(&format!("rep_e{}_2025_09.csv", i + 1), 100, uploaded_at)
            })
            .collect();
        let baseline: Vec<_> = (1..=8)
            .map(|d| {
                entry_json(&format!("rep_e{}_2025_08.csv", d), 100, "2025-09-01T08:00:00Z")
            })
            .collect();
        write_listings(dir.path(), json!({"3": today}), json!({"3": baseline}));
        let listing = FolderListing::load(dir.path()).unwrap();

        let report = pipeline(ScriptedReasoner::new())
            .run(vec![source("3", "Reports")], &listing)
            .await
            .unwrap();

        assert_eq!(report.bucket_of("3"), Some(Bucket::NeedsAttention));
        assert!(report.urgent.is_empty());
    }

    #[tokio::test]
    async fn test_detector_failure_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        // Source 1 has a missing file (triggers the failing detector),
        // source 2 is clean.
        write_listings(
            dir.path(),
            json!({
                "1": [entry_json("a_2025_09_08.csv", 100, "2025-09-08T08:00:00Z")],
                "2": [entry_json("c_2025_09_08.csv", 100, "2025-09-08T08:00:00Z")],
            }),
            json!({
                "1": [
                    entry_json("a_2025_09_01.csv", 100, "2025-09-01T08:00:00Z"),
                    entry_json("b_2025_09_01.csv", 100, "2025-09-01T08:00:00Z"),
                ],
                "2": [entry_json("c_2025_09_01.csv", 100, "2025-09-01T08:00:00Z")],
            }),
        );
        let listing = FolderListing::load(dir.path()).unwrap();

        let mut reasoner = ScriptedReasoner::new();
        reasoner.fail_detectors = vec!["absent from today's data"];

        let report = pipeline(reasoner)
            .run(vec![source("1", "Flaky"), source("2", "Steady")], &listing)
            .await
            .unwrap();

        assert_eq!(report.total_sources(), 2);
        // Source 2 is unaffected by source 1's detector failure.
        assert_eq!(report.bucket_of("2"), Some(Bucket::NoAction));
        // Source 1's missing-files check degraded to an informational gap.
        let flaky = report
            .no_action
            .iter()
            .find(|r| r.source.id == "1")
            .unwrap();
        assert!(!flaky.detection_complete);
        assert!(flaky
            .issues
            .iter()
            .any(|i| i.kind == DetectorKind::Missing
                && i.class == IssueClass::Informational
                && i.description.contains("could not complete")));

        // The gap must reach the reader even though the source rendered
        // in the compact No Action form.
        let markdown = crate::report::render_markdown(&report);
        assert!(markdown
            .contains("• *Flaky (id: 1)* – 2025-09-08: `[100] records` (detection incomplete)"));
        assert!(!markdown.contains("• *Steady (id: 2)* – 2025-09-08: `[100] records` ("));
    }

    #[tokio::test]
    async fn test_malformed_source_synthesis_degrades() {
        let dir = tempfile::tempdir().unwrap();
        write_listings(
            dir.path(),
            json!({"1": [entry_json("a_2025_09_08.csv", 100, "2025-09-08T08:00:00Z")]}),
            json!({"1": [entry_json("a_2025_09_01.csv", 100, "2025-09-01T08:00:00Z")]}),
        );
        let listing = FolderListing::load(dir.path()).unwrap();

        let mut reasoner = ScriptedReasoner::new();
        reasoner.malformed_source_synthesis = true;

        let report = pipeline(reasoner)
            .run(vec![source("1", "Prose_Feed")], &listing)
            .await
            .unwrap();

        let degraded = &report.no_action[0];
        assert!(!degraded.synthesis_complete);
        assert!(degraded.detection_complete);

        let markdown = crate::report::render_markdown(&report);
        assert!(markdown.contains("(synthesis incomplete)"));
    }

    #[tokio::test]
    async fn test_malformed_executive_response_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_listings(
            dir.path(),
            json!({"1": [entry_json("a_2025_09_08.csv", 100, "2025-09-08T08:00:00Z")]}),
            json!({"1": [entry_json("a_2025_09_01.csv", 100, "2025-09-01T08:00:00Z")]}),
        );
        let listing = FolderListing::load(dir.path()).unwrap();

        let mut reasoner = ScriptedReasoner::new();
        reasoner.malformed_executive = true;

        let err = pipeline(reasoner)
            .run(vec![source("1", "Only")], &listing)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Synthesis(SynthesisError::Executive { .. })
        ));
    }

    #[tokio::test]
    async fn test_executive_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_listings(
            dir.path(),
            json!({"1": [entry_json("a_2025_09_08.csv", 100, "2025-09-08T08:00:00Z")]}),
            json!({"1": [entry_json("a_2025_09_01.csv", 100, "2025-09-01T08:00:00Z")]}),
        );
        let listing = FolderListing::load(dir.path()).unwrap();

        let mut reasoner = ScriptedReasoner::new();
        reasoner.fail_executive = true;

        let err = pipeline(reasoner)
            .run(vec![source("1", "Only")], &listing)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Synthesis(SynthesisError::Executive { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_report_list_is_rejected() {
        let pipeline = pipeline(ScriptedReasoner::new());
        let err = pipeline.synthesize_executive(vec![]).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Synthesis(SynthesisError::EmptyInput)
        ));
    }

    #[test]
    fn test_run_context_session_id() {
        let explicit = RunContext::new(Some("abc123".to_string()));
        assert_eq!(explicit.session_id, "abc123");

        let generated = RunContext::new(None);
        assert!(!generated.session_id.is_empty());
    }
}
