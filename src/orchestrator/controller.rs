//! Task progress controller.
//!
//! Owns the lifecycle of one user-initiated action and enforces the state machine:
//!
//! ```text
//! Idle -> Validating -> Running -> Succeeded
//! Validating -> Failed
//! Running -> Cancelled | Failed
//! Succeeded | Failed | Cancelled -> Idle   (reset)
//! ```
//!
//! The controller never waits on anything itself. Progress arrives through
//! [`TaskController::apply_tick`], fed by the run loop from a progress driver, and every
//! transition is reported synchronously to the registered listeners.

use crate::error::{ControllerError, FailureReason, ValidationError};
use crate::model::{ProgressUpdate, TaskOutcome, TaskPhase, TaskRequest, TaskState, TaskSummary};
use crate::validate::{validate_request, ValidatedRequest};
use time::OffsetDateTime;

pub type ProgressCallback = Box<dyn FnMut(&ProgressUpdate) + Send>;
pub type CompleteCallback = Box<dyn FnMut(&TaskOutcome) + Send>;

#[derive(Default)]
pub struct TaskController {
    state: TaskState,
    active: Option<ValidatedRequest>,
    progress_listeners: Vec<ProgressCallback>,
    complete_listeners: Vec<CompleteCallback>,
}

impl TaskController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn phase(&self) -> TaskPhase {
        self.state.phase
    }

    /// The request being driven, once it has passed validation.
    pub fn request(&self) -> Option<&TaskRequest> {
        self.active.as_ref().map(ValidatedRequest::request)
    }

    pub fn on_progress(&mut self, callback: impl FnMut(&ProgressUpdate) + Send + 'static) {
        self.progress_listeners.push(Box::new(callback));
    }

    pub fn on_complete(&mut self, callback: impl FnMut(&TaskOutcome) + Send + 'static) {
        self.complete_listeners.push(Box::new(callback));
    }

    /// Check a request against its action's rules without touching controller state.
    pub fn validate(&self, request: &TaskRequest) -> Result<ValidatedRequest, ValidationError> {
        validate_request(request, &request.action.rules())
    }

    /// Begin a new invocation.
    ///
    /// A validation failure is not returned here: it ends the invocation in `Failed` and is
    /// delivered once through the completion listeners.
    pub fn start(&mut self, request: TaskRequest) -> Result<(), ControllerError> {
        if self.state.phase.is_active() {
            tracing::warn!(
                action = request.action.slug(),
                target = %request.target,
                "start rejected: a task is already running"
            );
            return Err(ControllerError::AlreadyRunning);
        }
        if self.state.phase.is_terminal() {
            self.clear();
        }

        self.state.phase = TaskPhase::Validating;
        self.notify_progress();

        match self.validate(&request) {
            Err(e) => {
                tracing::info!(
                    action = request.action.slug(),
                    reason = %e,
                    "request failed validation"
                );
                self.finish_failed(FailureReason::Validation(e));
            }
            Ok(validated) => {
                self.state.phase = TaskPhase::Running;
                self.state.started_at = Some(OffsetDateTime::now_utc());
                self.state.current_step_index = validated.has_steps().then_some(0);
                tracing::info!(
                    action = request.action.slug(),
                    target = %request.target,
                    steps = validated.step_count(),
                    "task running"
                );
                self.active = Some(validated);
                self.notify_progress();
            }
        }
        Ok(())
    }

    /// Apply one progress report from the driver.
    ///
    /// Ignored unless `Running`. Reports are clamped to `[current, 100]` so the rendered bar
    /// never regresses. Returns whether the state changed.
    pub fn apply_tick(&mut self, percent: u8) -> bool {
        if self.state.phase != TaskPhase::Running {
            tracing::trace!(percent, phase = %self.state.phase, "tick ignored");
            return false;
        }

        let percent = percent.clamp(self.state.progress_percent, 100);
        let (steps, has_steps) = match self.active.as_ref() {
            Some(v) => (v.step_count(), v.has_steps()),
            None => (1, false),
        };
        // The last step is entered before completion, even when one tick jumps to 100.
        let reached = if percent == 100 {
            steps - 1
        } else {
            (usize::from(percent) * steps / 100).min(steps - 1)
        };
        let previous = self.state.progress_percent;
        let changed = percent != previous;

        let mut advanced = false;
        if has_steps {
            // One Running notification per boundary so every step is observed, each carrying
            // the percent at which that step begins.
            while self.state.current_step_index.unwrap_or(0) < reached {
                let next = self.state.current_step_index.map_or(0, |i| i + 1);
                let boundary = u8::try_from((100 * next).div_ceil(steps)).unwrap_or(100);
                self.state.progress_percent = if next == reached && percent < 100 {
                    percent
                } else {
                    boundary.clamp(previous, percent)
                };
                self.state.current_step_index = Some(next);
                tracing::debug!(step = next, percent = self.state.progress_percent, "step advanced");
                self.notify_progress();
                advanced = true;
            }
        }
        self.state.progress_percent = percent;

        if percent == 100 {
            self.finish_succeeded();
            return true;
        }

        if changed && !advanced {
            self.notify_progress();
        }
        changed || advanced
    }

    /// Abort the running task. Takes effect immediately for the controller; the driver stops
    /// at its next tick boundary.
    pub fn cancel(&mut self) -> Result<(), ControllerError> {
        if self.state.phase != TaskPhase::Running {
            return Err(ControllerError::NotRunning {
                phase: self.state.phase,
            });
        }
        self.state.phase = TaskPhase::Cancelled;
        self.state.ended_at = Some(OffsetDateTime::now_utc());
        tracing::info!(percent = self.state.progress_percent, "task cancelled");
        self.notify_progress();
        self.notify_complete(TaskOutcome::Cancelled {
            progress_percent: self.state.progress_percent,
        });
        Ok(())
    }

    /// End the running task as failed (deadline exceeded or driver error).
    pub fn fail(&mut self, reason: FailureReason) -> Result<(), ControllerError> {
        if self.state.phase != TaskPhase::Running {
            return Err(ControllerError::NotRunning {
                phase: self.state.phase,
            });
        }
        tracing::warn!(%reason, percent = self.state.progress_percent, "task failed");
        self.finish_failed(reason);
        Ok(())
    }

    /// Return to `Idle` from a terminal phase. A no-op when already idle.
    pub fn reset(&mut self) -> Result<(), ControllerError> {
        match self.state.phase {
            TaskPhase::Idle => Ok(()),
            phase if phase.is_terminal() => {
                self.clear();
                self.notify_progress();
                Ok(())
            }
            phase => Err(ControllerError::NotTerminal { phase }),
        }
    }

    fn clear(&mut self) {
        self.state = TaskState::default();
        self.active = None;
    }

    fn finish_succeeded(&mut self) {
        let now = OffsetDateTime::now_utc();
        self.state.phase = TaskPhase::Succeeded;
        self.state.ended_at = Some(now);

        let summary = match self.active.as_ref() {
            Some(v) => TaskSummary {
                action: v.request().action,
                target: v.request().target.clone(),
                step_count: v.step_count(),
                elapsed: self.state.elapsed().unwrap_or_default(),
            },
            // Running is only entered with a validated request.
            None => return,
        };
        tracing::info!(%summary, "task succeeded");
        self.notify_progress();
        self.notify_complete(TaskOutcome::Succeeded { summary });
    }

    fn finish_failed(&mut self, reason: FailureReason) {
        self.state.phase = TaskPhase::Failed;
        self.state.error_reason = Some(reason.to_string());
        self.state.ended_at = Some(OffsetDateTime::now_utc());
        self.notify_progress();
        self.notify_complete(TaskOutcome::Failed { reason });
    }

    fn notify_progress(&mut self) {
        let update = ProgressUpdate {
            phase: self.state.phase,
            percent: self.state.progress_percent,
            step_index: self.state.current_step_index,
        };
        for cb in self.progress_listeners.iter_mut() {
            cb(&update);
        }
    }

    fn notify_complete(&mut self, outcome: TaskOutcome) {
        for cb in self.complete_listeners.iter_mut() {
            cb(&outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionKind;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        updates: Arc<Mutex<Vec<ProgressUpdate>>>,
        outcomes: Arc<Mutex<Vec<TaskOutcome>>>,
    }

    impl Recorder {
        fn attach(controller: &mut TaskController) -> Self {
            let updates = Arc::new(Mutex::new(Vec::new()));
            let outcomes = Arc::new(Mutex::new(Vec::new()));
            let u = updates.clone();
            controller.on_progress(move |p| u.lock().unwrap().push(*p));
            let o = outcomes.clone();
            controller.on_complete(move |out| o.lock().unwrap().push(out.clone()));
            Self { updates, outcomes }
        }

        fn updates(&self) -> Vec<ProgressUpdate> {
            self.updates.lock().unwrap().clone()
        }

        fn outcomes(&self) -> Vec<TaskOutcome> {
            self.outcomes.lock().unwrap().clone()
        }
    }

    fn deploy(steps: usize) -> TaskRequest {
        let all = ActionKind::DeployModel.default_steps();
        ActionKind::DeployModel
            .sample_request()
            .with_steps(all.iter().take(steps).copied())
    }

    fn drive_to_completion(controller: &mut TaskController, increment: u8) {
        let mut p = 0u8;
        while controller.phase() == TaskPhase::Running {
            p = p.saturating_add(increment).min(100);
            controller.apply_tick(p);
        }
    }

    #[test]
    fn happy_path_ends_at_exactly_100() {
        let mut c = TaskController::new();
        let rec = Recorder::attach(&mut c);

        c.start(deploy(4)).unwrap();
        assert_eq!(c.phase(), TaskPhase::Running);
        assert!(c.state().started_at.is_some());
        drive_to_completion(&mut c, 10);

        assert_eq!(c.phase(), TaskPhase::Succeeded);
        assert_eq!(c.state().progress_percent, 100);
        assert!(c.state().ended_at.is_some());

        let percents: Vec<u8> = rec.updates().iter().map(|u| u.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
        assert_eq!(percents.last(), Some(&100));

        let outcomes = rec.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_ok());
        let msg = outcomes[0].to_message();
        assert!(msg.contains("defect-detector-v3"), "{msg}");
        assert!(msg.contains("4 steps"), "{msg}");
    }

    #[test]
    fn four_steps_produce_four_distinct_indices() {
        let mut c = TaskController::new();
        let rec = Recorder::attach(&mut c);

        c.start(deploy(4)).unwrap();
        drive_to_completion(&mut c, 10);

        let mut indices: Vec<usize> = rec
            .updates()
            .iter()
            .filter(|u| u.phase == TaskPhase::Running)
            .filter_map(|u| u.step_index)
            .collect();
        indices.dedup();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn coarse_ticks_still_visit_every_step() {
        let mut c = TaskController::new();
        let rec = Recorder::attach(&mut c);

        c.start(deploy(4)).unwrap();
        c.apply_tick(60);

        let indices: Vec<usize> = rec.updates().iter().filter_map(|u| u.step_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(c.state().progress_percent, 60);
    }

    #[test]
    fn ticks_reaching_100_still_enter_every_step_first() {
        for ticks in [vec![100u8], vec![50, 100]] {
            let mut c = TaskController::new();
            let rec = Recorder::attach(&mut c);

            c.start(deploy(4)).unwrap();
            for p in &ticks {
                c.apply_tick(*p);
            }
            assert_eq!(c.phase(), TaskPhase::Succeeded);

            let running: Vec<ProgressUpdate> = rec
                .updates()
                .into_iter()
                .filter(|u| u.phase == TaskPhase::Running)
                .collect();
            let indices: Vec<usize> = running.iter().filter_map(|u| u.step_index).collect();
            assert_eq!(indices, vec![0, 1, 2, 3], "ticks {ticks:?}");
            assert!(running.iter().all(|u| u.percent < 100), "ticks {ticks:?}");

            let percents: Vec<u8> = rec.updates().iter().map(|u| u.percent).collect();
            assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
            assert_eq!(rec.updates().last().map(|u| u.percent), Some(100));
        }
    }

    #[test]
    fn single_tick_to_100_reports_step_start_percents() {
        let mut c = TaskController::new();
        let rec = Recorder::attach(&mut c);
        c.start(deploy(4)).unwrap();
        c.apply_tick(100);

        let seen: Vec<(TaskPhase, u8, Option<usize>)> = rec
            .updates()
            .iter()
            .map(|u| (u.phase, u.percent, u.step_index))
            .collect();
        assert_eq!(
            seen,
            vec![
                (TaskPhase::Validating, 0, None),
                (TaskPhase::Running, 0, Some(0)),
                (TaskPhase::Running, 25, Some(1)),
                (TaskPhase::Running, 50, Some(2)),
                (TaskPhase::Running, 75, Some(3)),
                (TaskPhase::Succeeded, 100, Some(3)),
            ]
        );
    }

    #[test]
    fn empty_selection_fails_without_running() {
        let mut c = TaskController::new();
        let rec = Recorder::attach(&mut c);

        let err = c.validate(&deploy(0)).unwrap_err();
        assert_eq!(err.reason, "at least one step required");

        c.start(deploy(0)).unwrap();
        assert_eq!(c.phase(), TaskPhase::Failed);
        assert_eq!(
            c.state().error_reason.as_deref(),
            Some("at least one step required")
        );
        assert!(rec
            .updates()
            .iter()
            .all(|u| u.phase != TaskPhase::Running));
        let outcomes = rec.outcomes();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].is_ok());
        assert!(matches!(
            outcomes[0],
            TaskOutcome::Failed {
                reason: FailureReason::Validation(_)
            }
        ));
    }

    #[test]
    fn cancel_at_40_percent_freezes_progress() {
        let mut c = TaskController::new();
        let rec = Recorder::attach(&mut c);

        c.start(deploy(2)).unwrap();
        for p in [10, 20, 30, 40] {
            c.apply_tick(p);
        }
        c.cancel().unwrap();
        let seen = rec.updates().len();

        assert!(!c.apply_tick(50));
        assert!(!c.apply_tick(100));

        assert_eq!(c.phase(), TaskPhase::Cancelled);
        assert_eq!(c.state().progress_percent, 40);
        assert_eq!(rec.updates().len(), seen);
        assert_eq!(
            rec.outcomes(),
            vec![TaskOutcome::Cancelled {
                progress_percent: 40
            }]
        );
    }

    #[test]
    fn second_start_while_running_is_rejected() {
        let mut c = TaskController::new();
        c.start(deploy(2)).unwrap();
        c.apply_tick(30);

        let other = ActionKind::RestartService.sample_request();
        assert_eq!(c.start(other), Err(ControllerError::AlreadyRunning));
        assert_eq!(c.phase(), TaskPhase::Running);
        assert_eq!(c.state().progress_percent, 30);
        assert_eq!(
            c.request().map(|r| r.action),
            Some(ActionKind::DeployModel)
        );
    }

    #[test]
    fn reset_from_each_terminal_phase_returns_to_idle() {
        let terminal: [fn(&mut TaskController); 3] = [
            |c| drive_to_completion(c, 25),
            |c| {
                c.apply_tick(50);
                c.cancel().unwrap();
            },
            |c| {
                c.fail(FailureReason::Driver("lost connection".into()))
                    .unwrap();
            },
        ];
        for finish in terminal {
            let mut c = TaskController::new();
            c.start(deploy(3)).unwrap();
            finish(&mut c);
            assert!(c.phase().is_terminal());

            c.reset().unwrap();
            assert_eq!(c.state(), &TaskState::default());
            assert!(c.request().is_none());
        }
    }

    #[test]
    fn reset_while_running_is_a_caller_error() {
        let mut c = TaskController::new();
        assert!(c.reset().is_ok());
        c.start(deploy(1)).unwrap();
        assert_eq!(
            c.reset(),
            Err(ControllerError::NotTerminal {
                phase: TaskPhase::Running
            })
        );
    }

    #[test]
    fn terminal_phases_are_sticky_until_reset() {
        let mut c = TaskController::new();
        c.start(deploy(1)).unwrap();
        drive_to_completion(&mut c, 50);
        assert_eq!(
            c.cancel(),
            Err(ControllerError::NotRunning {
                phase: TaskPhase::Succeeded
            })
        );
        assert!(c.fail(FailureReason::Driver("late".into())).is_err());
        assert_eq!(c.phase(), TaskPhase::Succeeded);
    }

    #[test]
    fn start_from_terminal_resets_implicitly() {
        let mut c = TaskController::new();
        let rec = Recorder::attach(&mut c);
        c.start(deploy(0)).unwrap();
        assert_eq!(c.phase(), TaskPhase::Failed);

        c.start(deploy(2)).unwrap();
        assert_eq!(c.phase(), TaskPhase::Running);
        assert_eq!(c.state().error_reason, None);
        assert_eq!(c.state().progress_percent, 0);
        assert_eq!(rec.outcomes().len(), 1);
    }

    #[test]
    fn progress_never_regresses() {
        let mut c = TaskController::new();
        let rec = Recorder::attach(&mut c);
        c.start(ActionKind::RestartService.sample_request()).unwrap();
        c.apply_tick(60);
        assert!(!c.apply_tick(20));
        assert_eq!(c.state().progress_percent, 60);
        assert_eq!(c.state().current_step_index, None);
        let percents: Vec<u8> = rec.updates().iter().map(|u| u.percent).collect();
        assert_eq!(percents, vec![0, 0, 60]);
    }

    #[test]
    fn percent_is_zero_until_running() {
        let mut c = TaskController::new();
        let rec = Recorder::attach(&mut c);
        c.start(deploy(2)).unwrap();
        let first = rec.updates()[0];
        assert_eq!(first.phase, TaskPhase::Validating);
        assert_eq!(first.percent, 0);
        assert_eq!(first.step_index, None);
    }
}
