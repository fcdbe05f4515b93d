mod actions;
mod cli;
mod config;
mod engine;
mod error;
mod logging;
mod model;
mod orchestrator;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;
mod validate;

use anyhow::Result;
use clap::Parser;
use logging::LogTarget;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_silent = args.silent;
    let is_non_tui = args.silent || args.json || args.text;

    let log_target = if args.is_interactive() {
        LogTarget::File
    } else if args.json || args.silent {
        LogTarget::Quiet
    } else {
        LogTarget::Stderr
    };
    if let Err(e) = logging::init(log_target) {
        // Logging is best effort; the run itself can still proceed.
        eprintln!("taskdeck: logging disabled: {e:#}");
    }

    match cli::run(args).await {
        Ok(()) => {
            // Explicitly exit with code 0 on success, especially for non-TUI modes
            if is_non_tui {
                std::process::exit(0);
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("{e:#}");
            if is_silent {
                println!("{}", e);
                std::process::exit(1);
            } else {
                Err(e)
            }
        }
    }
}
