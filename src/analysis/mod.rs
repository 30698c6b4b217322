//! Deterministic issue classification and priority bucketing.
//!
//! Classification works from the structured evidence carried inside each
//! finding, never from the model narrative, so the same findings always
//! classify the same way. The thresholds mirror the detector flagging
//! rules in the evidence module.

use crate::models::{
    Bucket, ClassifiedIssue, DetectorKind, Finding, FindingOutcome, IssueClass, SourceReport,
};

/// Volume change above which an increase is critical rather than a warning.
const CRITICAL_INCREASE_PCT: f64 = 100.0;
/// Volume drop beyond which a decrease is critical rather than a warning.
const CRITICAL_DECREASE_PCT: f64 = 80.0;

/// Classify the findings of one source into issues, detector order
/// preserved. Clear findings produce no issue; undetermined findings
/// surface as informational gaps so the report never hides them.
pub fn classify_findings(findings: &[Finding]) -> Vec<ClassifiedIssue> {
    findings.iter().filter_map(classify_finding).collect()
}

fn classify_finding(finding: &Finding) -> Option<ClassifiedIssue> {
    match &finding.outcome {
        FindingOutcome::Clear { .. } => None,
        FindingOutcome::Undetermined { reason } => Some(ClassifiedIssue {
            kind: finding.kind,
            class: IssueClass::Informational,
            description: format!("check for {} could not complete: {}", finding.kind, reason),
        }),
        FindingOutcome::Flagged { evidence, detail } => {
            let class = match finding.kind {
                DetectorKind::Missing => {
                    if evidence.flagged_count >= 2 {
                        IssueClass::Critical
                    } else {
                        IssueClass::Warning
                    }
                }
                DetectorKind::DuplicateFailed => IssueClass::Critical,
                DetectorKind::Empty => IssueClass::Warning,
                DetectorKind::VolumeVariation => {
                    let critical = evidence.volume_deltas.iter().any(|d| {
                        d.pct_change > CRITICAL_INCREASE_PCT
                            || d.pct_change < -CRITICAL_DECREASE_PCT
                    });
                    if critical {
                        IssueClass::Critical
                    } else {
                        IssueClass::Warning
                    }
                }
                DetectorKind::LateUpload => IssueClass::Warning,
                DetectorKind::PreviousPeriod => IssueClass::Informational,
            };
            Some(ClassifiedIssue {
                kind: finding.kind,
                class,
                description: detail.clone(),
            })
        }
    }
}

/// Assign a source report to its priority bucket: any critical issue
/// makes it urgent, otherwise any warning asks for attention, otherwise
/// no action is needed.
pub fn bucket_for(report: &SourceReport) -> Bucket {
    match report.worst_class() {
        IssueClass::Critical => Bucket::Urgent,
        IssueClass::Warning => Bucket::NeedsAttention,
        IssueClass::Informational => Bucket::NoAction,
    }
}
