//! Application-level orchestration.
//!
//! This module owns the task lifecycle: the controller state machine, the run loop that
//! drives it from UI commands and engine ticks, the modal registry, and post-run
//! processing such as reports and exports. UI/CLI layers call into this module to keep
//! responsibilities separated.

mod controller;
mod post_process;
#[cfg(any(feature = "tui", test))]
mod registry;
mod runner;

pub(crate) use post_process::process_run_completion;
#[cfg(feature = "tui")]
pub(crate) use registry::ModalRegistry;
pub(crate) use runner::{run_controller, UiCommand};
