use crate::config::OutputFormat;
use crate::dispatch::DispatchReport;
use crate::worker::DispatchStatus;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::info;

const ELAPSED_TIME_PRECISION: usize = 2;

/// Everything a run did, as written to `--output`
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub path: String,
    /// Violations resolved by the autofix pass
    pub auto_fixed: usize,
    /// Violations left after the autofix pass
    pub remaining: usize,
    /// Work units planned from the remaining violations
    pub planned: usize,
    pub dry_run: bool,
    /// User declined the confirmation prompt
    pub declined: bool,
    pub dispatch: DispatchReport,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        !self.declined && self.dispatch.is_success()
    }
}

/// One-line-per-fact summary logged at the end of a run
pub fn summary_lines(report: &RunReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Auto-fixed: {}, remaining after autofix: {}",
        report.auto_fixed, report.remaining
    )];
    if report.dry_run || report.declined || report.planned == 0 {
        return lines;
    }

    let dispatch = &report.dispatch;
    lines.push(format!(
        "Droids: {} remediated, {} failed, {} cancelled",
        dispatch.succeeded(),
        dispatch.failed(),
        dispatch.cancelled.len()
    ));
    lines.push(format!(
        "Violations: {} remediated by droids, {} failed, {} cancelled",
        dispatch.violations_remediated(),
        dispatch.violations_failed(),
        dispatch.violations_cancelled()
    ));
    for record in dispatch.failures() {
        lines.push(format!(
            "  - {}: {}",
            record.unit.description(),
            record.error.as_deref().unwrap_or("unknown error")
        ));
    }
    for unit in &dispatch.cancelled {
        lines.push(format!("  - {} (cancelled)", unit.description()));
    }
    lines
}

pub fn print_summary(report: &RunReport) {
    for line in summary_lines(report) {
        info!("{}", line);
    }
}

pub fn write_output(path: &Path, format: OutputFormat, report: &RunReport) -> anyhow::Result<()> {
    let content = match format {
        OutputFormat::Json => serde_json::to_string_pretty(report)?,
        OutputFormat::Markdown => format_markdown(report),
    };
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write output file {}", path.display()))?;
    info!("Report written to {}", path.display());
    Ok(())
}

pub fn format_markdown(report: &RunReport) -> String {
    let mut output = String::from("# ruff-droids report\n\n");
    output.push_str(&format!("- **Path:** {}\n", report.path));
    output.push_str(&format!(
        "- **Generated:** {}\n",
        report.generated_at.to_rfc3339()
    ));
    output.push_str(&format!("- **Auto-fixed:** {}\n", report.auto_fixed));
    output.push_str(&format!("- **Remaining:** {}\n", report.remaining));
    output.push_str(&format!("- **Droids planned:** {}\n", report.planned));

    if report.dry_run {
        output.push_str("\nDry run: no droids were dispatched.\n");
        return output;
    }
    if report.declined {
        output.push_str("\nAborted at confirmation: no droids were dispatched.\n");
        return output;
    }

    let dispatch = &report.dispatch;
    output.push_str(&format!(
        "- **Remediated:** {} droid(s), {} violation(s)\n\
         - **Failed:** {} droid(s), {} violation(s)\n\
         - **Cancelled:** {} droid(s), {} violation(s)\n",
        dispatch.succeeded(),
        dispatch.violations_remediated(),
        dispatch.failed(),
        dispatch.violations_failed(),
        dispatch.cancelled.len(),
        dispatch.violations_cancelled()
    ));

    let mut records: Vec<_> = dispatch.records.iter().collect();
    records.sort_by_key(|r| r.unit.id);
    for record in records {
        let status = match record.status {
            DispatchStatus::Remediated => "remediated",
            DispatchStatus::Failed => "failed",
        };
        output.push_str(&format!(
            "\n## {} ({})\n\n",
            record.unit.description(),
            status
        ));
        for v in &record.unit.violations {
            output.push_str(&format!(
                "- Line {}: {} {}\n",
                v.location.row,
                v.code_or_unknown(),
                v.message
            ));
        }
        output.push_str(&format!(
            "\n**Attempts:** {}, **Elapsed:** {:.prec$}s\n",
            record.attempts,
            record.elapsed_secs,
            prec = ELAPSED_TIME_PRECISION
        ));
        if let Some(session) = &record.session_id {
            output.push_str(&format!("\n**Session:** {}\n", session));
        }
        if let Some(text) = record.error.as_ref().or(record.summary.as_ref()) {
            let backticks = get_fence_backticks(text);
            output.push_str(&format!("\n{}\n{}\n{}\n", backticks, text.trim(), backticks));
        }
    }

    if !dispatch.cancelled.is_empty() {
        output.push_str("\n## Cancelled\n\n");
        for unit in &dispatch.cancelled {
            output.push_str(&format!("- {}\n", unit.description()));
        }
    }
    output
}

/// Get appropriate number of backticks for Markdown code fence
/// Returns at least 3 backticks, or more if content contains backtick sequences
fn get_fence_backticks(content: &str) -> String {
    const MIN_BACKTICKS: usize = 3;
    let max_backticks = content
        .as_bytes()
        .split(|&b| b != b'`')
        .filter(|s| !s.is_empty())
        .map(|s| s.len())
        .max()
        .unwrap_or(0);
    "`".repeat((max_backticks + 1).max(MIN_BACKTICKS))
}
