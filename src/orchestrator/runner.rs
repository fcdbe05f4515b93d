//! Run loop.
//!
//! Owns the task controller, reacts to UI commands, spawns at most one engine per started
//! task, feeds engine ticks back into the controller and forwards every controller
//! notification to presentation layers as [`TaskEvent`]s.

use crate::config::Settings;
use crate::engine::{EngineControl, EngineEvent, ProgressDriver, SimulatedDriver, TaskEngine};
use crate::error::FailureReason;
use crate::model::{DriverSettings, InfoEvent, TaskEvent, TaskPhase, TaskRequest};
use crate::orchestrator::controller::TaskController;
use anyhow::Result;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{Duration, Instant};

/// Commands emitted by UI layers to control the task.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Start(TaskRequest),
    Cancel,
    Reset,
    Quit,
}

/// Internal handle for a running engine.
struct RunCtx {
    ctrl_tx: UnboundedSender<EngineControl>,
    tick_rx: UnboundedReceiver<EngineEvent>,
    handle: Option<tokio::task::JoinHandle<Result<()>>>,
}

enum EngineUpdate {
    Tick(u8),
    Finished(Result<Result<()>, tokio::task::JoinError>),
}

/// Default driver factory: the timer-based simulation.
pub(crate) fn simulated_driver(_: &TaskRequest, settings: DriverSettings) -> Box<dyn ProgressDriver> {
    Box::new(SimulatedDriver::new(settings))
}

/// Spawn an engine for the request that just entered `Running`.
fn start_engine<F>(request: &TaskRequest, settings: &Settings, make_driver: &F) -> RunCtx
where
    F: Fn(&TaskRequest, DriverSettings) -> Box<dyn ProgressDriver>,
{
    let driver = make_driver(request, settings.driver_for(request.action));
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();
    let (tick_tx, tick_rx) = mpsc::unbounded_channel::<EngineEvent>();
    let engine = TaskEngine::new(driver);
    let handle = tokio::spawn(async move { engine.run(tick_tx, ctrl_rx).await });
    RunCtx {
        ctrl_tx,
        tick_rx,
        handle: Some(handle),
    }
}

/// Next tick from the engine, or its completion once the tick stream is drained.
///
/// Both awaits are cancel safe, so losing a `select!` race drops nothing.
async fn next_engine_update(run_ctx: &mut Option<RunCtx>) -> EngineUpdate {
    let Some(ctx) = run_ctx.as_mut() else {
        return futures::future::pending().await;
    };
    if let Some(EngineEvent::Tick { percent }) = ctx.tick_rx.recv().await {
        return EngineUpdate::Tick(percent);
    }
    match ctx.handle.as_mut() {
        Some(h) => EngineUpdate::Finished(h.await),
        None => futures::future::pending().await,
    }
}

/// Bridge controller listeners onto the event channel.
fn wire_listeners(controller: &mut TaskController, event_tx: &UnboundedSender<TaskEvent>) {
    let progress_tx = event_tx.clone();
    controller.on_progress(move |update| {
        let _ = progress_tx.send(TaskEvent::Progress(*update));
    });
}

/// Orchestrate task runs based on UI commands and emit events back to presentation layers.
pub(crate) async fn run_controller(
    settings: &Settings,
    event_tx: UnboundedSender<TaskEvent>,
    cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    run_controller_with(settings, simulated_driver, event_tx, cmd_rx).await
}

/// [`run_controller`] with an injectable progress driver factory.
pub(crate) async fn run_controller_with<F>(
    settings: &Settings,
    make_driver: F,
    event_tx: UnboundedSender<TaskEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()>
where
    F: Fn(&TaskRequest, DriverSettings) -> Box<dyn ProgressDriver>,
{
    let mut controller = TaskController::new();
    wire_listeners(&mut controller, &event_tx);

    // Completion needs the state snapshot, which the callback cannot borrow from the
    // controller; stash the outcome and forward it once the transition returns.
    let completed = Arc::new(Mutex::new(None));
    let completed2 = completed.clone();
    controller.on_complete(move |outcome| {
        if let Ok(mut slot) = completed2.lock() {
            *slot = Some(outcome.clone());
        }
    });
    let flush_completed = |controller: &TaskController| {
        let outcome = completed.lock().ok().and_then(|mut slot| slot.take());
        if let Some(outcome) = outcome {
            let _ = event_tx.send(TaskEvent::Completed {
                outcome,
                state: Box::new(controller.state().clone()),
            });
        }
    };

    let mut run_ctx: Option<RunCtx> = None;
    let mut deadline: Option<Instant> = None;
    let mut quit_pending = false;
    // Cancel watchdog: if the engine ignores a cancel for too long, keep the UI informed.
    let mut cancel_deadline: Option<Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    let res = loop {
        tokio::select! {
            // Once quitting, stop polling commands: a closed channel would resolve immediately.
            cmd = cmd_rx.recv(), if !quit_pending => {
                match cmd {
                    Some(UiCommand::Start(request)) => {
                        match controller.start(request) {
                            Ok(()) => {
                                flush_completed(&controller);
                                if controller.phase() == TaskPhase::Running {
                                    // A cancelled engine may still be winding down; never run two.
                                    if let Some(old) = run_ctx.take() {
                                        if let Some(h) = old.handle {
                                            h.abort();
                                        }
                                    }
                                    cancel_deadline = None;
                                    if let Some(validated) = controller.request() {
                                        run_ctx =
                                            Some(start_engine(validated, settings, &make_driver));
                                    }
                                    deadline = settings.timeout.map(|t| Instant::now() + t);
                                }
                            }
                            Err(e) => {
                                let _ = event_tx.send(TaskEvent::Info(InfoEvent::Rejected(e)));
                            }
                        }
                    }
                    Some(UiCommand::Cancel) => {
                        match controller.cancel() {
                            Ok(()) => {
                                flush_completed(&controller);
                                deadline = None;
                                if let Some(ctx) = &run_ctx {
                                    let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                                    cancel_deadline = Some(Instant::now() + Duration::from_secs(3));
                                }
                            }
                            Err(e) => {
                                let _ = event_tx.send(TaskEvent::Info(InfoEvent::Rejected(e)));
                            }
                        }
                    }
                    Some(UiCommand::Reset) => {
                        if let Err(e) = controller.reset() {
                            let _ = event_tx.send(TaskEvent::Info(InfoEvent::Rejected(e)));
                        }
                    }
                    Some(UiCommand::Quit) | None => {
                        // Quit waits for the engine to stop so the final state is settled.
                        quit_pending = true;
                        if controller.phase() == TaskPhase::Running {
                            let _ = controller.cancel();
                            flush_completed(&controller);
                        }
                        if let Some(ctx) = &run_ctx {
                            let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                            cancel_deadline = Some(Instant::now() + Duration::from_secs(3));
                        } else {
                            break Ok(());
                        }
                    }
                }
            }
            update = next_engine_update(&mut run_ctx) => {
                match update {
                    EngineUpdate::Tick(percent) => {
                        controller.apply_tick(percent);
                        flush_completed(&controller);
                        if controller.phase().is_terminal() {
                            deadline = None;
                        }
                    }
                    EngineUpdate::Finished(join_res) => {
                        let failure = match join_res {
                            Ok(Ok(())) => None,
                            Ok(Err(e)) => Some(format!("{e:#}")),
                            Err(e) => Some(format!("engine task failed: {e}")),
                        };
                        if controller.phase() == TaskPhase::Running {
                            let reason = failure.unwrap_or_else(|| {
                                format!(
                                    "driver stopped at {}%",
                                    controller.state().progress_percent
                                )
                            });
                            let _ = controller.fail(FailureReason::Driver(reason));
                            flush_completed(&controller);
                        }
                        run_ctx = None;
                        deadline = None;
                        cancel_deadline = None;
                        if quit_pending {
                            break Ok(());
                        }
                    }
                }
            }
            _ = async {
                match deadline {
                    Some(d) => tokio::time::sleep_until(d).await,
                    None => futures::future::pending().await,
                }
            } => {
                deadline = None;
                if controller.phase() == TaskPhase::Running {
                    let after = settings.timeout.unwrap_or_default();
                    let _ = controller.fail(FailureReason::Timeout { after });
                    flush_completed(&controller);
                    if let Some(ctx) = &run_ctx {
                        let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
                        cancel_deadline = Some(Instant::now() + Duration::from_secs(3));
                    }
                }
            }
            // If cancel stalls (e.g., a slow status poll in flight), keep the user informed.
            _ = watchdog.tick() => {
                if let Some(d) = cancel_deadline {
                    if Instant::now() >= d && run_ctx.is_some() {
                        let _ = event_tx.send(TaskEvent::Info(InfoEvent::StillCancelling));
                        cancel_deadline = None;
                    }
                }
            }
        }
    };

    res
}
