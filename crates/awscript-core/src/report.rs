//! Human-readable and JSON renderings of batch results.

use crate::batch::BatchReport;
use crate::result::Outcome;
use crate::script::ScenarioScript;
use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;

/// Render the end-of-run table printed on stdout.
pub fn render_summary(report: &BatchReport) -> String {
    let width = report
        .results
        .iter()
        .map(|r| r.name().len())
        .max()
        .unwrap_or(0)
        .max("SCENARIO".len());

    let mut out = String::new();
    let _ = writeln!(out, "{:<width$}  {:<10}  {:>8}  DETAIL", "SCENARIO", "OUTCOME", "SENT");
    for result in &report.results {
        let detail = match &result.outcome {
            Outcome::Completed => format!("{} ms", result.duration_ms),
            Outcome::Failed { kind, message } => format!("{kind}: {message}"),
            Outcome::TimedOut { waited_ms } => format!("goal not reached after {waited_ms} ms"),
            Outcome::Skipped { reason } => reason.to_string(),
        };
        let _ = writeln!(
            out,
            "{:<width$}  {:<10}  {:>8}  {detail}",
            result.name(),
            result.outcome.label(),
            result.commands_sent,
        );
        for warning in &result.warnings {
            let _ = writeln!(out, "{:<width$}    warning: {warning}", "");
        }
    }

    let _ = writeln!(
        out,
        "\n{} scenario(s): {} completed, {} failed, {} skipped{}",
        report.total(),
        report.completed_count(),
        report.failed_count(),
        report.skipped_count(),
        if report.aborted { " (batch aborted)" } else { "" },
    );
    out
}

/// Render a parsed script's plan, one command per line.
pub fn render_plan(script: &ScenarioScript) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} ({} commands, ego '{}', sha256 {})",
        script.name(),
        script.len(),
        script.ego(),
        &script.digest()[..12.min(script.digest().len())],
    );
    for command in script.commands() {
        let target = command
            .entity()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "-".to_string());
        let params = serde_json::to_string(&command.params()).unwrap_or_default();
        let _ = write!(
            out,
            "  {:>3}  line {:<4} {:<8} {:<12} {params}",
            command.index,
            command.line,
            command.kind().keyword(),
            target,
        );
        if let Some(gate) = &command.gate {
            let _ = write!(out, "  when {gate}");
        }
        out.push('\n');
    }
    out
}

/// Write the batch report as pretty JSON.
pub fn write_json_report(path: &Path, report: &BatchReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize batch report")?;
    std::fs::write(path, content).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
