//! Rendering and persistence of the executive report.
//!
//! The output format is fixed: a generated-at header followed by the
//! three priority sections, one bullet per source. Numeric evidence in
//! the summary lines is rendered verbatim.

use crate::error::Result;
use crate::models::{Bucket, ExecutiveReport, SourceReport};
use crate::pipeline::RunContext;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Render the executive report as markdown.
pub fn render_markdown(report: &ExecutiveReport) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "*Report generated at UTC HOUR*: {} UTC\n",
        report.generated_at.format("%H:%M")
    ));

    output.push_str(&render_section(
        Bucket::Urgent,
        &report.urgent,
        "• No urgent issues detected\n",
    ));
    output.push_str(&render_section(
        Bucket::NeedsAttention,
        &report.needs_attention,
        "• No sources need attention\n",
    ));
    output.push_str(&render_section(
        Bucket::NoAction,
        &report.no_action,
        "• No sources to report\n",
    ));

    output
}

fn render_section(bucket: Bucket, reports: &[SourceReport], placeholder: &str) -> String {
    let mut section = format!("\n* {}*\n", bucket.heading());

    if reports.is_empty() {
        section.push_str(placeholder);
        return section;
    }

    for report in reports {
        section.push_str(&render_bullet(bucket, report));
    }
    if bucket == Bucket::NoAction {
        section.push_str("• All other recent files appear normal\n");
    }

    section
}

fn render_bullet(bucket: Bucket, report: &SourceReport) -> String {
    let mut line = format!(
        "• *{} (id: {})* – {}: ",
        report.source.name(),
        report.source.id,
        report.date.format("%Y-%m-%d")
    );

    match bucket {
        Bucket::NoAction => {
            line.push_str(&format!("`[{}] records`", group_thousands(report.total_records)));
        }
        Bucket::Urgent | Bucket::NeedsAttention => {
            line.push_str(&report.summary_line);
            if let Some(action) = &report.recommended_action {
                line.push_str(&format!(" → *Action:* {}", action));
            }
        }
    }

    // Degradation markers render in every bucket, the compact form included.
    if !report.detection_complete {
        line.push_str(" (detection incomplete)");
    }
    if !report.synthesis_complete {
        line.push_str(" (synthesis incomplete)");
    }
    line.push('\n');
    line
}

/// Format a record count with comma thousands separators.
fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped
}

/// Filename for a persisted report: timestamped and tagged with the
/// session id so repeated runs never collide.
pub fn report_filename(report: &ExecutiveReport, ctx: &RunContext) -> String {
    format!(
        "dq_report_{}_{}.md",
        report.generated_at.format("%Y%m%dT%H%M%SZ"),
        ctx.session_id
    )
}

/// Render and save the report into the output directory.
pub fn save_report(
    report: &ExecutiveReport,
    output_dir: &Path,
    ctx: &RunContext,
) -> Result<PathBuf> {
    let markdown = render_markdown(report);
    let path = output_dir.join(report_filename(report, ctx));
    fs::write(&path, markdown)?;
    info!("Report saved to {}", path.display());
    Ok(path)
}
