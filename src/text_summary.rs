//! Text summary builder for CLI output.
//!
//! This module formats human-readable lines for text mode.

use crate::model::TaskReport;
use std::time::Duration;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from a finished run's report.
pub(crate) fn build_text_summary(report: &TaskReport) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!("Action: {} ({})", report.title, report.action.slug()));
    lines.push(format!("Target: {}", report.target));
    if report.steps.is_empty() {
        lines.push("Steps: single step".to_string());
    } else {
        lines.push(format!("Steps: {}", report.steps.join(", ")));
    }
    if !report.params.is_empty() {
        let params: Vec<String> = report
            .params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        lines.push(format!("Params: {}", params.join(" ")));
    }

    match (report.ok, report.summary.as_deref(), report.error_reason.as_deref()) {
        (true, Some(summary), _) => lines.push(format!("Outcome: {} ({summary})", report.phase)),
        (_, _, Some(reason)) => lines.push(format!("Outcome: {} ({reason})", report.phase)),
        _ => lines.push(format!("Outcome: {}", report.phase)),
    }

    let step = match (report.step_index, report.steps.len()) {
        (Some(i), n) if n > 0 => format!(", step {}/{} ({})", i + 1, n, report.steps[i.min(n - 1)]),
        _ => String::new(),
    };
    lines.push(format!(
        "Progress: {}%{step} after {} update(s)",
        report.progress_percent, report.progress_updates
    ));

    if let Some(ms) = report.elapsed_ms {
        lines.push(format!(
            "Elapsed: {}",
            humantime::format_duration(Duration::from_millis(ms))
        ));
    }
    if let (Some(start), Some(end)) = (report.started_at.as_deref(), report.ended_at.as_deref()) {
        lines.push(format!("Window: {start} .. {end}"));
    }
    lines.push(format!("Run: {}", report.run_id));

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionKind;
    use crate::model::TaskPhase;

    fn report() -> TaskReport {
        let request = ActionKind::CalibrateMachine.sample_request();
        TaskReport {
            run_id: "00000000000000ab".into(),
            action: request.action,
            title: request.action.title().into(),
            target: request.target.clone(),
            steps: request.steps.clone(),
            params: request.params.clone(),
            phase: TaskPhase::Cancelled,
            ok: false,
            progress_percent: 40,
            step_index: Some(1),
            summary: None,
            error_reason: None,
            started_at: None,
            ended_at: None,
            elapsed_ms: Some(1_250),
            progress_updates: 6,
        }
    }

    #[test]
    fn cancelled_run_summary() {
        let lines = build_text_summary(&report()).lines;
        assert_eq!(lines[0], "Action: Calibrate machine (calibrate-machine)");
        assert_eq!(lines[1], "Target: CNC-Mill-04");
        assert_eq!(lines[2], "Steps: sensors, axes, spindle, verification");
        assert!(lines.contains(&"Outcome: cancelled".to_string()));
        assert!(lines.contains(&"Progress: 40%, step 2/4 (axes) after 6 update(s)".to_string()));
        assert!(lines.contains(&"Elapsed: 1s 250ms".to_string()));
    }

    #[test]
    fn failed_run_shows_reason_and_params() {
        let mut r = report();
        r.action = ActionKind::ScaleService;
        r.title = "Scale service".into();
        r.steps.clear();
        r.step_index = None;
        r.params = ActionKind::ScaleService.sample_request().params;
        r.phase = TaskPhase::Failed;
        r.error_reason = Some("replicas must be between 1 and 50".into());

        let lines = build_text_summary(&r).lines;
        assert!(lines.contains(&"Steps: single step".to_string()));
        assert!(lines.contains(&"Params: replicas=6".to_string()));
        assert!(lines.contains(&"Outcome: failed (replicas must be between 1 and 50)".to_string()));
        assert!(lines.contains(&"Progress: 40% after 6 update(s)".to_string()));
    }
}
