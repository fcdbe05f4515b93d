use crate::actions::ActionKind;
use crate::config::{ConfigFile, Settings};
use crate::model::{ParamValue, TaskEvent, TaskPhase, TaskRequest};
use crate::orchestrator::{self, UiCommand};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

/// Parse a `key=value` request parameter.
fn parse_param(raw: &str) -> Result<(String, ParamValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in {raw:?}"));
    }
    Ok((key.to_string(), ParamValue::parse(value)))
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "taskdeck",
    version,
    about = "Operations dashboard actions with tracked progress, as a TUI or scripted"
)]
pub struct Cli {
    /// Action to run (required with --json/--text)
    #[arg(long, value_enum)]
    pub action: Option<ActionKind>,

    /// Machine, service or model the action targets (defaults to the action's sample target)
    #[arg(long)]
    pub target: Option<String>,

    /// Select a step; repeat to select several (defaults to all of the action's steps)
    #[arg(long = "step", value_name = "STEP")]
    pub steps: Vec<String>,

    /// Run with an empty step selection
    #[arg(long, conflicts_with = "steps")]
    pub no_steps: bool,

    /// Request parameter as key=value; repeat for several (overrides the action's samples)
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, ParamValue)>,

    /// Percentage points per progress tick (overrides config)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub increment: Option<u8>,

    /// Interval between progress ticks (overrides config)
    #[arg(long)]
    pub tick_interval: Option<humantime::Duration>,

    /// Fail the task if it is still running after this long
    #[arg(long)]
    pub timeout: Option<humantime::Duration>,

    /// Cancel the task once progress reaches this percentage
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=99))]
    pub cancel_at: Option<u8>,

    /// Configuration file (default: <config dir>/taskdeck/config.json)
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,

    /// Print JSON report and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print text summary and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Export the run report as JSON
    #[arg(long)]
    pub export_json: Option<std::path::PathBuf>,

    /// List available actions and exit
    #[arg(long)]
    pub list_actions: bool,
}

impl Cli {
    /// Whether the interactive UI owns the terminal for this invocation.
    pub fn is_interactive(&self) -> bool {
        cfg!(feature = "tui") && !self.json && !self.text && !self.silent && !self.list_actions
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if args.list_actions {
        for line in action_listing() {
            println!("{line}");
        }
        return Ok(());
    }

    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }

    let settings = build_settings(&args)?;

    // Silent mode takes precedence over other output modes
    if args.silent {
        return run_headless(args, settings, OutputMode::Silent).await;
    }

    if !args.json && !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args, settings).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_headless(args, settings, OutputMode::Text).await;
        }
    }

    if args.json {
        return run_headless(args, settings, OutputMode::Json).await;
    }

    run_headless(args, settings, OutputMode::Text).await
}

fn action_listing() -> Vec<String> {
    ActionKind::ALL
        .iter()
        .map(|kind| {
            let steps = kind.default_steps();
            let steps = if steps.is_empty() {
                "single step".to_string()
            } else {
                steps.join(", ")
            };
            format!(
                "{:<18} {:<18} [{}] {}",
                kind.slug(),
                kind.title(),
                kind.persona().label(),
                steps
            )
        })
        .collect()
}

/// Resolve configuration file, environment and flags into effective settings.
pub fn build_settings(args: &Cli) -> Result<Settings> {
    let file = ConfigFile::load(args.config.as_deref()).context("load configuration")?;
    let mut settings = Settings::from_config(&file)?;
    settings.apply_env_overrides()?;

    if let Some(t) = args.timeout {
        settings.timeout = Some(Duration::from(t));
    }

    if args.increment.is_some() || args.tick_interval.is_some() {
        // Cadence flags apply to the selected action, or to every action in the TUI.
        let kinds = match args.action {
            Some(kind) => vec![kind],
            None => ActionKind::ALL.to_vec(),
        };
        for kind in kinds {
            let mut driver = settings.driver_for(kind);
            if let Some(increment) = args.increment {
                driver.increment = increment;
            }
            if let Some(interval) = args.tick_interval {
                driver.tick_interval = Duration::from(interval);
            }
            settings.set_driver(kind, driver)?;
        }
    }

    Ok(settings)
}

/// Build a `TaskRequest` from CLI arguments, starting from the action's sample request.
pub fn build_request(args: &Cli, action: ActionKind) -> TaskRequest {
    let mut request = action.sample_request();
    if let Some(target) = args.target.as_ref() {
        request.target = target.clone();
    }
    if args.no_steps {
        request.steps.clear();
    } else if !args.steps.is_empty() {
        request.steps = args.steps.clone();
    }
    for (key, value) in &args.params {
        request.params.insert(key.clone(), value.clone());
    }
    request
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Text,
    Json,
    Silent,
}

/// Run one action to completion without the TUI and report the outcome.
async fn run_headless(args: Cli, settings: Settings, mode: OutputMode) -> Result<()> {
    let action = args
        .action
        .context("--action is required with --json, --text or --silent (see --list-actions)")?;
    let request = build_request(&args, action);

    let (out_tx, out_handle) = if mode == OutputMode::Silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TaskEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let controller_settings = settings.clone();
    let controller = tokio::spawn(async move {
        orchestrator::run_controller(&controller_settings, event_tx, cmd_rx).await
    });

    cmd_tx
        .send(UiCommand::Start(request.clone()))
        .context("task controller stopped before start")?;

    // Ctrl-C cancels the task so the report still gets written.
    let signal_tx = cmd_tx.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling task");
            let _ = signal_tx.send(UiCommand::Cancel);
        }
    });

    let mut progress_updates = 0usize;
    let mut cancel_sent = false;
    let mut completion = None;
    while let Some(ev) = event_rx.recv().await {
        match ev {
            TaskEvent::Progress(update) => {
                progress_updates += 1;
                if mode == OutputMode::Text {
                    if let Some(tx) = out_tx.as_ref() {
                        let step = update
                            .step_index
                            .and_then(|i| request.steps.get(i))
                            .map(|s| format!(" [{s}]"))
                            .unwrap_or_default();
                        let _ = tx.send(OutputLine::Stderr(format!(
                            "{:>3}% {}{step}",
                            update.percent, update.phase
                        )));
                    }
                }
                if let Some(at) = args.cancel_at {
                    if !cancel_sent && update.phase == TaskPhase::Running && update.percent >= at {
                        tracing::info!(percent = update.percent, "scripted cancel");
                        let _ = cmd_tx.send(UiCommand::Cancel);
                        cancel_sent = true;
                    }
                }
            }
            TaskEvent::Info(info) => {
                if let Some(tx) = out_tx.as_ref() {
                    if mode == OutputMode::Text {
                        let _ = tx.send(OutputLine::Stderr(info.to_message()));
                    }
                }
            }
            TaskEvent::Completed { outcome, state } => {
                completion = Some((outcome, state));
                let _ = cmd_tx.send(UiCommand::Quit);
            }
        }
    }

    interrupt.abort();
    controller
        .await
        .context("task controller failed")?
        .context("task run failed")?;

    let (outcome, state) =
        completion.context("task controller exited without reporting an outcome")?;
    let processed = orchestrator::process_run_completion(
        args.export_json.as_deref(),
        &request,
        &state,
        &outcome,
        progress_updates,
    );

    if let Some(tx) = out_tx.as_ref() {
        match mode {
            OutputMode::Json => {
                let out = serde_json::to_string_pretty(&processed.report)?;
                let _ = tx.send(OutputLine::Stdout(out));
            }
            OutputMode::Text => {
                let summary = crate::text_summary::build_text_summary(&processed.report);
                for line in summary.lines {
                    let _ = tx.send(OutputLine::Stdout(line));
                }
            }
            OutputMode::Silent => {}
        }
        for msg in &processed.export_messages {
            let _ = tx.send(OutputLine::Stderr(msg.clone()));
        }
    }

    if let Some(tx) = out_tx {
        drop(tx);
    }
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    if outcome.is_ok() {
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{} {}: {}",
            request.action.title(),
            outcome.phase(),
            outcome.to_message()
        ))
    }
}
