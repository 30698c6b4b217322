//! Instruction templates for the reasoning calls.
//!
//! Each detector kind carries its own mission statement; all detector
//! prompts share the common analysis preamble. The synthesis prompts
//! pin the exact JSON shape expected back so responses stay parseable.

use crate::models::DetectorKind;

/// Shared preamble for every detector instruction.
const COMMON_INSTRUCTIONS: &str = r#"You are a data quality analyst for file-based data ingestion.
You receive a JSON payload with:
- "source": the source id and name
- "cv": a markdown document describing the source's expected file patterns,
  schedules, and volume ranges (may be absent)
- "evidence": structured statistics already computed from today's file
  listing and the same weekday last week

Apply critical thinking: account for day-of-week patterns and exceptions
documented in the CV, and focus on significant deviations.

Respond with a single JSON object:
{"detail": "<one concise paragraph describing the finding, naming specific files, counts, times, and volumes>"}
Only output JSON, no other text."#;

/// Detector-specific mission appended to the common preamble.
pub fn detector_instruction(kind: DetectorKind) -> String {
    let mission = match kind {
        DetectorKind::Missing => {
            "MISSION: Assess files that were expected (per the CV and the \
             last-weekday baseline) but are absent from today's data. \
             Note expected arrival windows and affected entities from the \
             flagged file names."
        }
        DetectorKind::DuplicateFailed => {
            "MISSION: Assess files marked duplicated or with a failed or \
             stopped status. Call out processing-blocking patterns and the \
             affected fraction of today's files."
        }
        DetectorKind::Empty => {
            "MISSION: Assess files that arrived with zero data rows today \
             although their historical counterpart carried data. Judge \
             abnormality against the CV's documented patterns."
        }
        DetectorKind::VolumeVariation => {
            "MISSION: Assess row-count variations against the same weekday \
             last week. The evidence lists per-file percentage changes \
             already outside the normal band; put them in context of the \
             CV's documented volume ranges."
        }
        DetectorKind::LateUpload => {
            "MISSION: Assess files uploaded significantly later than their \
             expected delivery window. The evidence lists per-file delays \
             in hours; distinguish schedule changes from one-off lateness."
        }
        DetectorKind::PreviousPeriod => {
            "MISSION: Assess files present today with no counterpart in \
             the baseline period (unexpected presence changes). These are \
             usually informational unless they block processing."
        }
    };

    format!("{}\n\n{}", COMMON_INSTRUCTIONS, mission)
}

/// Instruction for the per-source synthesis call.
pub const SOURCE_SYNTHESIS_INSTRUCTION: &str = r#"You are a data quality analyst consolidating detector findings for ONE data source.
You receive a JSON payload with:
- "source": the source id and name
- "date": the day under analysis
- "total_records": records processed today
- "findings": the outcomes of all six detectors (missing files,
  duplicates/failures, empty files, volume variation, late uploads,
  previous period files), including any undetermined gaps
- "issues": the already-classified issue list (Critical/Warning/Informational)

Produce the one-line summary that will become this source's bullet point
in the executive report. The line must carry the concrete evidence
(counts, percentages, hours, time windows, entity names from file names)
verbatim; never round numbers away. Do not include the source name or id,
the final report adds those. If any detector was undetermined, mention
the gap briefly.

For sources with Critical or Warning issues also produce a recommended
action, using these templates where they fit:
- missing files: "Notify provider to generate/re-send; re-run ingestion and verify completeness"
- volume anomalies: "Confirm coverage/window; monitor next run"
- late/early uploads: "Validate downstream completed; track if persists"
- schedule changes: "Confirm schedule change; adjust downstream triggers if needed"

Respond with a single JSON object:
{"summary_line": "<one line>", "recommended_action": "<action or empty string>"}
Only output JSON, no other text."#;

/// Instruction for the executive synthesis call.
pub const EXECUTIVE_SYNTHESIS_INSTRUCTION: &str = r#"You are producing the per-source lines of an executive data quality report.
You receive a JSON payload with "sources": a list of source reports, each
carrying id, name, date, priority bucket, summary line, recommended
action, and total records.

For each source, polish its summary line into a single clear sentence
fragment. Preserve every number, percentage, file name, and time window
exactly as given; never drop or round numeric evidence. Keep lines
concise. Do not add sources, and do not move a source between buckets.

Respond with a single JSON object mapping source id to polished line:
{"lines": {"<source_id>": "<line>", ...}}
Only output JSON, no other text."#;
