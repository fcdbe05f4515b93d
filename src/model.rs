use crate::actions::ActionKind;
use crate::error::{ControllerError, FailureReason};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;

/// Cadence of the progress driver for one kind of action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Percentage points added per tick.
    pub increment: u8,
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
}

/// Free-form request parameter gathered from form controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ParamValue {
    /// Interpret a raw form/CLI value: booleans and numbers are recognised, anything else is text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed {
            "true" => return ParamValue::Bool(true),
            "false" => return ParamValue::Bool(false),
            _ => {}
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => ParamValue::Number(n),
            _ => ParamValue::Text(raw.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Blank text counts as missing for required fields.
    pub fn is_blank(&self) -> bool {
        matches!(self, ParamValue::Text(s) if s.trim().is_empty())
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Number(n) => write!(f, "{n}"),
            ParamValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One invocation of an action. Immutable once handed to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub action: ActionKind,
    /// Machine name, service name or model id the action targets.
    pub target: String,
    /// Selected sub-steps in execution order; empty means one atomic step.
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl TaskRequest {
    pub fn new(action: ActionKind, target: impl Into<String>) -> Self {
        Self {
            action,
            target: target.into(),
            steps: Vec::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps = steps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Number of progress partitions: `max(1, steps)`.
    pub fn step_count(&self) -> usize {
        self.steps.len().max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPhase {
    Idle,
    Validating,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskPhase {
    /// Terminal phases only leave via `reset()`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskPhase::Succeeded | TaskPhase::Failed | TaskPhase::Cancelled
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, TaskPhase::Validating | TaskPhase::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskPhase::Idle => "idle",
            TaskPhase::Validating => "validating",
            TaskPhase::Running => "running",
            TaskPhase::Succeeded => "succeeded",
            TaskPhase::Failed => "failed",
            TaskPhase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle record owned by the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskState {
    pub phase: TaskPhase,
    pub progress_percent: u8,
    pub current_step_index: Option<usize>,
    /// Set only while `phase == Failed`.
    pub error_reason: Option<String>,
    pub started_at: Option<OffsetDateTime>,
    pub ended_at: Option<OffsetDateTime>,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            phase: TaskPhase::Idle,
            progress_percent: 0,
            current_step_index: None,
            error_reason: None,
            started_at: None,
            ended_at: None,
        }
    }
}

impl TaskState {
    /// Wall-clock time between start and end, if both are known.
    pub fn elapsed(&self) -> Option<Duration> {
        let (start, end) = (self.started_at?, self.ended_at?);
        Duration::try_from(end - start).ok()
    }
}

/// Payload of every progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub phase: TaskPhase,
    pub percent: u8,
    pub step_index: Option<usize>,
}

/// Human-readable description of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub action: ActionKind,
    pub target: String,
    pub step_count: usize,
    pub elapsed: Duration,
}

impl fmt::Display for TaskSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Millisecond resolution keeps the rendered duration short.
        let millis = u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX);
        let elapsed = Duration::from_millis(millis);
        let noun = if self.step_count == 1 { "step" } else { "steps" };
        write!(
            f,
            "{} on {} completed {} {} in {}",
            self.action.title(),
            self.target,
            self.step_count,
            noun,
            humantime::format_duration(elapsed)
        )
    }
}

/// Terminal result delivered once per invocation to completion listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded { summary: TaskSummary },
    Failed { reason: FailureReason },
    Cancelled { progress_percent: u8 },
}

impl TaskOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded { .. })
    }

    pub fn phase(&self) -> TaskPhase {
        match self {
            TaskOutcome::Succeeded { .. } => TaskPhase::Succeeded,
            TaskOutcome::Failed { .. } => TaskPhase::Failed,
            TaskOutcome::Cancelled { .. } => TaskPhase::Cancelled,
        }
    }

    /// Notification text for the invoking surface.
    pub fn to_message(&self) -> String {
        match self {
            TaskOutcome::Succeeded { summary } => summary.to_string(),
            TaskOutcome::Failed { reason } => format!("Failed: {reason}"),
            TaskOutcome::Cancelled { progress_percent } => {
                format!("Cancelled at {progress_percent}%")
            }
        }
    }
}

/// Events forwarded from the run loop to presentation layers.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Progress(ProgressUpdate),
    Completed {
        outcome: TaskOutcome,
        // Box to keep TaskEvent small; the state snapshot is only needed once per run.
        state: Box<TaskState>,
    },
    Info(InfoEvent),
}

/// Structured info events emitted by the run loop and consumed by UI/CLI layers.
#[derive(Debug, Clone)]
pub enum InfoEvent {
    Rejected(ControllerError),
    StillCancelling,
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Rejected(err) => format!("Ignored: {err}"),
            InfoEvent::StillCancelling => "Still cancelling…".to_string(),
        }
    }
}

/// Serializable record of one finished run, used for JSON output and exports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub run_id: String,
    pub action: ActionKind,
    pub title: String,
    pub target: String,
    pub steps: Vec<String>,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    pub phase: TaskPhase,
    pub ok: bool,
    pub progress_percent: u8,
    pub step_index: Option<usize>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub error_reason: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub ended_at: Option<String>,
    #[serde(default)]
    pub elapsed_ms: Option<u64>,
    pub progress_updates: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(elapsed: Duration) -> TaskSummary {
        TaskSummary {
            action: ActionKind::RestartPipeline,
            target: "telemetry-ingest".into(),
            step_count: 3,
            elapsed,
        }
    }

    #[test]
    fn summary_renders_millisecond_elapsed() {
        let text = summary(Duration::from_micros(2_345_678)).to_string();
        assert_eq!(
            text,
            "Restart pipeline on telemetry-ingest completed 3 steps in 2s 345ms"
        );
    }

    #[test]
    fn summary_saturates_huge_elapsed() {
        let text = summary(Duration::MAX).to_string();
        let expected = humantime::format_duration(Duration::from_millis(u64::MAX)).to_string();
        assert!(text.ends_with(&expected), "{text}");
    }
}
