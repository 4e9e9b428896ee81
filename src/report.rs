//! Text and JSON rendering of a fleet report

use crate::ui;
use anyhow::Result;
use colored::{ColoredString, Colorize};
use deploykit::{DeviceOutcome, FleetReport, Severity, Step};
use std::fmt::Write;

pub fn render_json(report: &FleetReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

pub fn render_text(report: &FleetReport) -> String {
    let mut out = String::new();
    for outcome in &report.outcomes {
        write_outcome(&mut out, outcome);
        out.push('\n');
    }
    write_summary(&mut out, report);
    out
}

fn severity_glyph(severity: Severity) -> ColoredString {
    match severity {
        Severity::Success => "✓".green(),
        Severity::Warning => "⚠".yellow(),
        Severity::Failure => "✗".red(),
    }
}

fn write_outcome(out: &mut String, outcome: &DeviceOutcome) {
    let severity = outcome.severity();
    let description = outcome.classification.description();
    let status = match severity {
        Severity::Success => description.green(),
        Severity::Warning => description.yellow().bold(),
        Severity::Failure => description.red(),
    };

    let _ = writeln!(
        out,
        "{} {}",
        outcome.device.name.bold(),
        format!("({})", outcome.device.address).dimmed()
    );
    let _ = writeln!(out, "  {} {}", severity_glyph(severity), status);
    if let Some(reason) = &outcome.reason {
        let _ = writeln!(out, "    {}", reason.dimmed());
    }

    // Nothing below the status line when the transaction never started
    if outcome.steps.is_empty() {
        return;
    }

    for step in Step::ALL {
        match outcome.step(step) {
            Some(result) => {
                let glyph = if result.success { "✓".green() } else { "✗".red() };
                let _ = writeln!(
                    out,
                    "  {} {:<7} {}",
                    glyph,
                    step.as_str(),
                    ui::format_ms(result.elapsed_ms).dimmed()
                );
                let body = if result.success {
                    result.raw.trim().to_string()
                } else {
                    result.detail()
                };
                for line in body.lines().filter(|l| !l.trim().is_empty()) {
                    let _ = writeln!(out, "      {}", line.dimmed());
                }
            }
            None => {
                let _ = writeln!(
                    out,
                    "  {} {:<7} {}",
                    "-".dimmed(),
                    step.as_str(),
                    "not attempted".dimmed()
                );
            }
        }
    }

    if severity != Severity::Success {
        let _ = writeln!(out, "  {} {}", "→".cyan(), outcome.classification.advice());
    }
}

fn write_summary(out: &mut String, report: &FleetReport) {
    let summary = report.summary();
    let _ = writeln!(out, "{}", "Summary".bold());
    let _ = writeln!(
        out,
        "  {} committed, {} with warnings, {} failed ({} devices, {})",
        summary.succeeded.to_string().green(),
        summary.warnings.to_string().yellow(),
        summary.failed.to_string().red(),
        summary.total,
        ui::format_ms(report.elapsed_ms)
    );

    if summary.left_locked > 0 {
        let names: Vec<_> = report
            .left_locked()
            .map(|o| o.device.name.as_str())
            .collect();
        let _ = writeln!(
            out,
            "  {} left locked: {}",
            "⚠".yellow(),
            names.join(", ").yellow().bold()
        );
    }

    if report.cancelled {
        let _ = writeln!(
            out,
            "  {} run cancelled before every device finished",
            "⚠".yellow()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use deploykit::{
        Classification, DeviceTarget, ProtocolError, RpcError, RpcReply, StepResult,
    };
    use std::time::Duration;

    fn ok(step: Step) -> StepResult {
        StepResult::from_reply(step, RpcReply::ok("<rpc-reply><ok/></rpc-reply>"), Duration::from_millis(12))
    }

    fn report() -> FleetReport {
        let committed = DeviceOutcome::from_steps(
            DeviceTarget::new("r1", "10.0.0.1"),
            Step::ALL.iter().map(|s| ok(*s)).collect(),
        );

        let rejected_push = StepResult::from_reply(
            Step::Push,
            RpcReply::rejected(
                "<rpc-reply><rpc-error/></rpc-reply>",
                vec![RpcError {
                    tag: "invalid-value".into(),
                    severity: "error".into(),
                    message: Some("bad mtu".into()),
                }],
            ),
            Duration::from_millis(30),
        );
        let not_applied = DeviceOutcome::from_steps(
            DeviceTarget::new("r2", "10.0.0.2"),
            vec![ok(Step::Lock), rejected_push, ok(Step::Unlock)],
        );

        let stuck_unlock = StepResult::from_error(
            Step::Unlock,
            &ProtocolError::Timeout { secs: 60 },
            Duration::from_secs(60),
        );
        let lock_held = DeviceOutcome::from_steps(
            DeviceTarget::new("r3", "10.0.0.3"),
            vec![ok(Step::Lock), ok(Step::Push), ok(Step::Commit), stuck_unlock],
        );

        let unreachable = DeviceOutcome::short_circuit(
            DeviceTarget::new("r4", "10.0.0.4"),
            Classification::ConnectFailed,
            "cannot reach 10.0.0.4: connection refused",
        );

        FleetReport::new(
            vec![committed, not_applied, lock_held, unreachable],
            false,
            Utc::now(),
            Duration::from_secs(61),
        )
    }

    #[test]
    fn test_text_report_lists_devices_in_order() {
        colored::control::set_override(false);
        let text = render_text(&report());

        let positions: Vec<_> = ["r1 (10.0.0.1)", "r2 (10.0.0.2)", "r3 (10.0.0.3)", "r4 (10.0.0.4)"]
            .iter()
            .map(|h| text.find(h).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_text_report_steps_and_markers() {
        colored::control::set_override(false);
        let text = render_text(&report());

        assert!(text.contains("✓ configuration committed"));
        assert!(text.contains("invalid-value: bad mtu"));
        assert!(text.contains("- commit  not attempted"));
        assert!(text.contains("configuration committed but lock could not be released"));
        assert!(text.contains("<rpc-reply><ok/></rpc-reply>"));
        assert!(text.contains("session could not be established"));
    }

    #[test]
    fn test_text_summary() {
        colored::control::set_override(false);
        let text = render_text(&report());

        assert!(text.contains("1 committed, 1 with warnings, 2 failed (4 devices, 1m01s)"));
        assert!(text.contains("left locked: r3"));
        assert!(!text.contains("run cancelled"));

        let mut cancelled = report();
        cancelled.cancelled = true;
        assert!(render_text(&cancelled).contains("run cancelled"));
    }

    #[test]
    fn test_json_report() {
        let json = render_json(&report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        let outcomes = value["outcomes"].as_array().unwrap();
        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[0]["device"]["name"], "r1");
        assert_eq!(outcomes[1]["classification"], "not_applied");
        assert_eq!(outcomes[2]["classification"], "committed_lock_held");
        assert_eq!(outcomes[3]["steps"].as_array().unwrap().len(), 0);
        assert_eq!(value["cancelled"], false);
    }
}
