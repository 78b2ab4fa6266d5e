//! Renders a [`RunReport`] for the terminal or as JSON.

use colored::Colorize;
use stackcheck_core::{LogLevel, RunOutcome, RunReport};

/// Renders the full report as colored, human-readable text.
pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();

    for entry in &report.entries {
        let label = match entry.level {
            LogLevel::Pass => "PASS".green().bold().to_string(),
            LogLevel::Fail => "FAIL".red().bold().to_string(),
            LogLevel::Info => "....".dimmed().to_string(),
        };
        out.push_str(&format!("{label} {}\n", entry.message));
    }

    if !report.verifications.is_empty() {
        out.push('\n');
        out.push_str(&"Verifications".bold().to_string());
        out.push('\n');
        for v in &report.verifications {
            let label = if v.passed {
                "PASS".green().bold().to_string()
            } else {
                "FAIL".red().bold().to_string()
            };
            out.push_str(&format!(
                "  {label} {} {} expects {:?}\n",
                v.service, v.url, v.expected_text
            ));
        }
    }

    out.push('\n');
    let summary = match &report.outcome {
        RunOutcome::Passed => format!(
            "{} {} verification(s) in {:.1}s",
            "PASSED".green().bold(),
            report.passed_count(),
            report.duration.as_secs_f64()
        ),
        RunOutcome::VerificationFailed => format!(
            "{} {}/{} verification(s) failed in {:.1}s",
            "FAILED".red().bold(),
            report.failed_count(),
            report.verifications.len(),
            report.duration.as_secs_f64()
        ),
        RunOutcome::Failed { stage, reason } => format!(
            "{} during {stage}: {reason} ({:.1}s)",
            "FAILED".red().bold(),
            report.duration.as_secs_f64()
        ),
        RunOutcome::Cancelled { stage } => format!(
            "{} during {stage} ({:.1}s)",
            "CANCELLED".yellow().bold(),
            report.duration.as_secs_f64()
        ),
    };
    out.push_str(&summary);
    out.push('\n');
    out
}

/// Renders the report as pretty-printed JSON.
pub fn render_json(report: &RunReport) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackcheck_core::{LogEntry, VerificationResult};
    use std::time::Duration;

    fn sample_report() -> RunReport {
        RunReport {
            entries: vec![LogEntry {
                level: LogLevel::Pass,
                message: "node is up on port 3000".to_string(),
                timestamp: chrono::Utc::now(),
            }],
            verifications: vec![VerificationResult::from_observed(
                "node",
                "http://127.0.0.1:3000/",
                "Hello World",
                "Hello World",
            )],
            outcome: RunOutcome::Passed,
            duration: Duration::from_secs(9),
        }
    }

    #[test]
    fn test_render_text_includes_log_and_summary() {
        let text = render_text(&sample_report());
        assert!(text.contains("node is up on port 3000"));
        assert!(text.contains("PASS"));
        assert!(text.contains("PASSED"));
        assert!(text.contains("9.0s"));
    }

    #[test]
    fn test_render_text_names_failed_stage() {
        let mut report = sample_report();
        report.outcome = RunOutcome::Failed {
            stage: "launching-django".to_string(),
            reason: "pre-start command for django failed".to_string(),
        };
        let text = render_text(&report);
        assert!(text.contains("launching-django"));
        assert!(text.contains("pre-start"));
    }

    #[test]
    fn test_render_json_round_trips() {
        let json = render_json(&sample_report()).expect("render");
        let parsed: RunReport = serde_json::from_str(&json).expect("parse");
        assert!(parsed.passed());
        assert_eq!(parsed.verifications.len(), 1);
    }
}
