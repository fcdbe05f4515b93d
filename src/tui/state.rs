use crate::actions::ActionKind;
use crate::model::{ProgressUpdate, TaskOutcome, TaskPhase, TaskRequest, TaskState};
use crate::orchestrator::{ModalRegistry, UiCommand};
use crossterm::event::KeyCode;
use std::collections::VecDeque;
use time::macros::format_description;
use time::OffsetDateTime;

const RECENT_MAX: usize = 8;

/// Editable request behind an open action modal.
#[derive(Debug, Clone)]
pub struct ModalDraft {
    pub request: TaskRequest,
}

impl ModalDraft {
    pub fn new(action: ActionKind) -> Self {
        Self {
            request: action.sample_request(),
        }
    }

    /// Toggle the `index`-th catalog step, keeping catalog order. Returns false if there is
    /// no such step.
    pub fn toggle_step(&mut self, index: usize) -> bool {
        let defaults = self.request.action.default_steps();
        let Some(step) = defaults.get(index) else {
            return false;
        };
        let steps = &mut self.request.steps;
        if let Some(pos) = steps.iter().position(|s| s == step) {
            steps.remove(pos);
        } else {
            steps.push(step.to_string());
            steps.sort_by_key(|s| {
                defaults
                    .iter()
                    .position(|d| d == s)
                    .unwrap_or(usize::MAX)
            });
        }
        true
    }
}

/// Last known progress of the task started from the open modal.
#[derive(Debug, Clone)]
pub struct TaskView {
    pub action: ActionKind,
    pub steps: Vec<String>,
    pub phase: TaskPhase,
    pub percent: u8,
    pub step_index: Option<usize>,
    pub error: Option<String>,
}

impl TaskView {
    /// View for a request just sent to the run loop. It counts as in flight until the
    /// run loop reports otherwise.
    fn new(request: &TaskRequest) -> Self {
        Self {
            action: request.action,
            steps: request.steps.clone(),
            phase: TaskPhase::Validating,
            percent: 0,
            step_index: None,
            error: None,
        }
    }

    fn apply(&mut self, update: &ProgressUpdate) {
        self.phase = update.phase;
        self.percent = update.percent;
        self.step_index = update.step_index;
        if !update.phase.is_terminal() {
            self.error = None;
        }
    }
}

pub struct UiState {
    pub tab: usize,
    /// Index into `ActionKind::ALL`.
    pub selected: usize,
    pub modals: ModalRegistry<ActionKind, ModalDraft>,
    pub task: Option<TaskView>,
    pub last_request: Option<TaskRequest>,
    pub progress_updates: usize,
    pub info: String,
    pub recent: VecDeque<String>,
    pub timeout_label: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: 0,
            selected: 0,
            modals: ModalRegistry::new(),
            task: None,
            last_request: None,
            progress_updates: 0,
            info: "Select an action and press Enter".to_string(),
            recent: VecDeque::new(),
            timeout_label: None,
        }
    }
}

impl UiState {
    pub fn selected_action(&self) -> ActionKind {
        ActionKind::ALL[self.selected.min(ActionKind::ALL.len() - 1)]
    }

    /// The open modal, if any. The board keeps at most one open at a time.
    pub fn focused(&self) -> Option<ActionKind> {
        self.modals.open_ids().first().copied()
    }

    pub fn task_phase(&self) -> TaskPhase {
        self.task.as_ref().map(|t| t.phase).unwrap_or(TaskPhase::Idle)
    }

    /// Apply a key press and return the commands to send to the run loop.
    pub fn handle_key(&mut self, code: KeyCode) -> Vec<UiCommand> {
        match code {
            KeyCode::Char('q') => return vec![UiCommand::Quit],
            KeyCode::Tab => {
                self.tab = (self.tab + 1) % 2;
                return Vec::new();
            }
            KeyCode::Char('?') => {
                self.tab = 1;
                return Vec::new();
            }
            _ => {}
        }
        if self.tab == 1 {
            if code == KeyCode::Esc {
                self.tab = 0;
            }
            return Vec::new();
        }
        if self.modals.is_empty() {
            return self.board_key(code);
        }
        match self.focused() {
            Some(action) => self.modal_key(action, code),
            None => Vec::new(),
        }
    }

    fn board_key(&mut self, code: KeyCode) -> Vec<UiCommand> {
        match code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.selected = (self.selected + 1).min(ActionKind::ALL.len() - 1);
            }
            KeyCode::Enter => self.open_modal(self.selected_action()),
            _ => {}
        }
        Vec::new()
    }

    fn open_modal(&mut self, action: ActionKind) {
        self.modals.close_all();
        self.modals.open(action, ModalDraft::new(action));
        self.task = None;
        self.info = format!("{}: Enter to start, Esc to close", action.title());
    }

    fn modal_key(&mut self, action: ActionKind, code: KeyCode) -> Vec<UiCommand> {
        let phase = self.task_phase();
        match code {
            KeyCode::Enter => {
                let Some(draft) = self.modals.payload(action) else {
                    return Vec::new();
                };
                let request = draft.request.clone();
                // A second start while active is left to the controller to reject.
                if !phase.is_active() {
                    self.task = Some(TaskView::new(&request));
                    self.last_request = Some(request.clone());
                    self.progress_updates = 0;
                    self.info = format!("Starting {}…", action.title());
                }
                vec![UiCommand::Start(request)]
            }
            KeyCode::Char(c @ '1'..='9') => {
                if phase.is_active() {
                    self.info = "Steps are locked while the task runs".into();
                    return Vec::new();
                }
                let index = (c as u8 - b'1') as usize;
                if let Some(draft) = self.modals.payload_mut(action) {
                    if draft.toggle_step(index) {
                        self.info = if draft.request.steps.is_empty() {
                            "No steps selected".to_string()
                        } else {
                            format!("Steps: {}", draft.request.steps.join(", "))
                        };
                    }
                }
                Vec::new()
            }
            KeyCode::Char('c') => vec![UiCommand::Cancel],
            KeyCode::Char('r') => vec![UiCommand::Reset],
            KeyCode::Esc => {
                self.modals.close(action);
                self.task = None;
                self.info = format!("Closed {}", action.title());
                match phase {
                    // Includes a start still in flight; a rejected cancel is harmless.
                    p if p.is_active() => vec![UiCommand::Cancel, UiCommand::Reset],
                    p if p.is_terminal() => vec![UiCommand::Reset],
                    _ => Vec::new(),
                }
            }
            _ => Vec::new(),
        }
    }

    pub fn apply_progress(&mut self, update: &ProgressUpdate) {
        self.progress_updates += 1;
        if let Some(task) = self.task.as_mut() {
            task.apply(update);
        }
    }

    /// Record a finished run. A successful run closes its modal.
    pub fn record_completion(&mut self, outcome: &TaskOutcome, state: &TaskState) {
        let message = outcome.to_message();
        let action = self.last_request.as_ref().map(|r| r.action);

        if let Some(task) = self.task.as_mut() {
            task.phase = state.phase;
            task.percent = state.progress_percent;
            task.step_index = state.current_step_index;
            task.error = state.error_reason.clone();
        }

        let title = action.map(|a| a.title()).unwrap_or("Task");
        self.push_recent(format!("{} {title}: {message}", clock()));
        self.info = message;

        if outcome.is_ok() {
            if let Some(action) = action {
                if self.modals.is_open(action) {
                    self.modals.close(action);
                    self.task = None;
                }
            }
        }
    }

    fn push_recent(&mut self, line: String) {
        self.recent.push_front(line);
        self.recent.truncate(RECENT_MAX);
    }
}

fn clock() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureReason, ValidationError};
    use crate::model::TaskSummary;
    use std::time::Duration;

    fn opened(action: ActionKind) -> UiState {
        let mut state = UiState::default();
        state.selected = ActionKind::ALL.iter().position(|a| *a == action).unwrap();
        assert!(state.handle_key(KeyCode::Enter).is_empty());
        assert_eq!(state.focused(), Some(action));
        state
    }

    fn running(state: &mut UiState) {
        state.apply_progress(&ProgressUpdate {
            phase: TaskPhase::Running,
            percent: 0,
            step_index: Some(0),
        });
    }

    #[test]
    fn board_navigation_is_clamped() {
        let mut state = UiState::default();
        state.handle_key(KeyCode::Up);
        assert_eq!(state.selected, 0);
        for _ in 0..20 {
            state.handle_key(KeyCode::Char('j'));
        }
        assert_eq!(state.selected, ActionKind::ALL.len() - 1);
    }

    #[test]
    fn enter_in_modal_starts_the_draft() {
        let mut state = opened(ActionKind::CalibrateMachine);
        state.handle_key(KeyCode::Char('2'));
        let cmds = state.handle_key(KeyCode::Enter);

        let [UiCommand::Start(request)] = cmds.as_slice() else {
            panic!("expected a single start, got {cmds:?}");
        };
        assert_eq!(request.steps, vec!["sensors", "spindle", "verification"]);
        assert_eq!(state.task_phase(), TaskPhase::Validating);
        assert_eq!(state.last_request.as_ref(), Some(request));
    }

    #[test]
    fn toggling_keeps_catalog_order() {
        let mut draft = ModalDraft::new(ActionKind::CalibrateMachine);
        assert!(draft.toggle_step(0));
        assert!(draft.toggle_step(0));
        assert_eq!(
            draft.request.steps,
            vec!["sensors", "axes", "spindle", "verification"]
        );
        assert!(!draft.toggle_step(7));
    }

    #[test]
    fn steps_are_locked_while_running() {
        let mut state = opened(ActionKind::CalibrateMachine);
        state.handle_key(KeyCode::Enter);
        running(&mut state);
        state.handle_key(KeyCode::Char('1'));
        let draft = state.modals.payload(ActionKind::CalibrateMachine).unwrap();
        assert_eq!(draft.request.steps.len(), 4);
    }

    #[test]
    fn escape_while_running_cancels_and_resets() {
        let mut state = opened(ActionKind::RetrainModel);
        state.handle_key(KeyCode::Enter);
        running(&mut state);

        let cmds = state.handle_key(KeyCode::Esc);
        assert!(matches!(
            cmds.as_slice(),
            [UiCommand::Cancel, UiCommand::Reset]
        ));
        assert!(state.modals.is_empty());
        assert!(state.task.is_none());
    }

    #[test]
    fn escape_right_after_enter_still_cancels() {
        let mut state = opened(ActionKind::DeployModel);
        assert!(matches!(
            state.handle_key(KeyCode::Enter).as_slice(),
            [UiCommand::Start(_)]
        ));
        // No progress event has been drained yet.
        let cmds = state.handle_key(KeyCode::Esc);
        assert!(matches!(
            cmds.as_slice(),
            [UiCommand::Cancel, UiCommand::Reset]
        ));
        assert!(state.focused().is_none());
    }

    #[test]
    fn escape_on_idle_modal_sends_nothing() {
        let mut state = opened(ActionKind::DeployModel);
        assert!(state.handle_key(KeyCode::Esc).is_empty());
        assert!(state.modals.is_empty());
    }

    #[test]
    fn success_closes_the_modal_and_logs() {
        let mut state = opened(ActionKind::ScaleService);
        state.handle_key(KeyCode::Enter);
        let outcome = TaskOutcome::Succeeded {
            summary: TaskSummary {
                action: ActionKind::ScaleService,
                target: "checkout-api".into(),
                step_count: 1,
                elapsed: Duration::from_secs(1),
            },
        };
        let snapshot = TaskState {
            phase: TaskPhase::Succeeded,
            progress_percent: 100,
            ..Default::default()
        };
        state.record_completion(&outcome, &snapshot);

        assert!(state.focused().is_none());
        assert!(state.recent[0].contains("Scale service: Scale service on checkout-api"));
    }

    #[test]
    fn failure_keeps_the_modal_open_with_reason() {
        let mut state = opened(ActionKind::ExportReport);
        state.handle_key(KeyCode::Enter);
        let outcome = TaskOutcome::Failed {
            reason: FailureReason::Validation(ValidationError::new("target is required")),
        };
        let snapshot = TaskState {
            phase: TaskPhase::Failed,
            error_reason: Some("target is required".into()),
            ..Default::default()
        };
        state.record_completion(&outcome, &snapshot);

        assert_eq!(state.focused(), Some(ActionKind::ExportReport));
        let task = state.task.as_ref().unwrap();
        assert_eq!(task.phase, TaskPhase::Failed);
        assert_eq!(task.error.as_deref(), Some("target is required"));
        assert_eq!(state.info, "Failed: target is required");
    }

    #[test]
    fn help_tab_swallows_action_keys() {
        let mut state = UiState::default();
        state.handle_key(KeyCode::Char('?'));
        assert!(state.handle_key(KeyCode::Enter).is_empty());
        assert!(state.modals.is_empty());
        state.handle_key(KeyCode::Esc);
        assert_eq!(state.tab, 0);
        assert!(matches!(
            state.handle_key(KeyCode::Char('q')).as_slice(),
            [UiCommand::Quit]
        ));
    }
}
