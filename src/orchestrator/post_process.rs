//! Post-run processing utilities.
//!
//! Turns a completed run into a [`TaskReport`] and handles exports.

use crate::model::{TaskOutcome, TaskReport, TaskRequest, TaskState};
use anyhow::{Context, Result};
use rand::RngCore;
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Result of post-run processing, ready for presentation layers.
pub(crate) struct ProcessedRun {
    pub report: TaskReport,
    pub export_messages: Vec<String>,
}

/// Generate a random run id.
fn gen_run_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{:016x}", u64::from_le_bytes(b))
}

fn rfc3339(t: Option<OffsetDateTime>) -> Option<String> {
    t.and_then(|t| t.format(&Rfc3339).ok())
}

/// Build the serializable report for one finished invocation.
pub(crate) fn build_report(
    request: &TaskRequest,
    state: &TaskState,
    outcome: &TaskOutcome,
    progress_updates: usize,
) -> TaskReport {
    let summary = match outcome {
        TaskOutcome::Succeeded { summary } => Some(summary.to_string()),
        _ => None,
    };
    TaskReport {
        run_id: gen_run_id(),
        action: request.action,
        title: request.action.title().to_string(),
        target: request.target.clone(),
        steps: request.steps.clone(),
        params: request.params.clone(),
        phase: state.phase,
        ok: outcome.is_ok(),
        progress_percent: state.progress_percent,
        step_index: state.current_step_index,
        summary,
        error_reason: state.error_reason.clone(),
        started_at: rfc3339(state.started_at),
        ended_at: rfc3339(state.ended_at),
        elapsed_ms: state
            .elapsed()
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        progress_updates,
    }
}

/// Write a report as pretty JSON.
pub(crate) fn export_json(path: &Path, report: &TaskReport) -> Result<()> {
    let out = serde_json::to_string_pretty(report).context("serialize report")?;
    std::fs::write(path, out).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// Process a completed run: build the report and export it when requested.
pub(crate) fn process_run_completion(
    export_path: Option<&Path>,
    request: &TaskRequest,
    state: &TaskState,
    outcome: &TaskOutcome,
    progress_updates: usize,
) -> ProcessedRun {
    let report = build_report(request, state, outcome, progress_updates);

    let mut export_messages = Vec::new();
    if let Some(path) = export_path {
        match export_json(path, &report) {
            Ok(()) => export_messages.push(format!("Exported JSON: {}", path.display())),
            Err(e) => {
                tracing::warn!("report export failed: {e:#}");
                export_messages.push(format!("Export JSON failed: {e:#}"));
            }
        }
    }

    ProcessedRun {
        report,
        export_messages,
    }
}
