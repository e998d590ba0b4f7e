//! Report → human/json string formatting.
//!
//! Two modes:
//! - **Human** (default): one line per scenario, mismatch tables for failures
//! - **JSON** (`--json`): `serde_json::to_string_pretty`

use isolab_scenario::{Scenario, ScenarioReport, Verdict};

/// Output formatting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

/// Format the scenario catalog.
pub fn format_list(scenarios: &[Box<dyn Scenario>], mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => {
            let entries: Vec<_> = scenarios
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "name": s.name(),
                        "summary": s.summary(),
                        "discipline": s.discipline(),
                        "isolation": s.isolation(),
                    })
                })
                .collect();
            to_pretty(&entries)
        }
        OutputMode::Human => {
            let width = scenarios.iter().map(|s| s.name().len()).max().unwrap_or(0);
            scenarios
                .iter()
                .map(|s| {
                    format!(
                        "{:<width$}  {:<11}  {:<16}  {}",
                        s.name(),
                        s.discipline().to_string(),
                        s.isolation().to_string(),
                        s.summary(),
                        width = width
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        }
    }
}

/// Format scenario reports.
pub fn format_reports(reports: &[ScenarioReport], mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => to_pretty(reports),
        OutputMode::Human => {
            let mut lines: Vec<String> = reports.iter().map(format_report_human).collect();
            lines.push(format_summary(reports));
            lines.join("\n")
        }
    }
}

/// Format a fatal error.
pub fn format_error(err: &anyhow::Error, mode: OutputMode) -> String {
    match mode {
        OutputMode::Json => to_pretty(&serde_json::json!({ "error": format!("{:#}", err) })),
        OutputMode::Human => format!("(error) {:#}", err),
    }
}

fn to_pretty<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize output: {}\"}}", e))
}

fn format_report_human(report: &ScenarioReport) -> String {
    let tag = match report.verdict {
        Verdict::Passed => "PASS ",
        Verdict::Failed { .. } => "FAIL ",
        Verdict::Aborted { .. } => "ABORT",
    };
    let mut out = format!(
        "{}  {}  ({} ms)",
        tag, report.scenario, report.elapsed_ms
    );
    match &report.verdict {
        Verdict::Passed => {}
        Verdict::Failed { diff } => {
            for t in &report.transactions {
                out.push_str(&format!("\n    {:<12} {}", t.label, t.kind.name()));
            }
            for line in diff.to_string().lines() {
                out.push_str("\n    ");
                out.push_str(line);
            }
        }
        Verdict::Aborted { error } => {
            out.push_str(&format!("\n    {}", error));
        }
    }
    out
}

fn format_summary(reports: &[ScenarioReport]) -> String {
    let passed = reports.iter().filter(|r| r.passed()).count();
    let aborted = reports
        .iter()
        .filter(|r| matches!(r.verdict, Verdict::Aborted { .. }))
        .count();
    let failed = reports.len() - passed - aborted;
    format!(
        "{} scenario(s): {} passed, {} failed, {} aborted",
        reports.len(),
        passed,
        failed,
        aborted
    )
}
