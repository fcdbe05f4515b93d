mod driver;

pub use driver::{ProgressDriver, SimulatedDriver};

use anyhow::Result;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum EngineControl {
    /// Stop at the next tick boundary
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    Tick { percent: u8 },
}

/// Drives one task's progress source until it reports 100%, is cancelled, or fails.
pub struct TaskEngine {
    driver: Box<dyn ProgressDriver>,
}

impl TaskEngine {
    pub fn new(driver: Box<dyn ProgressDriver>) -> Self {
        Self { driver }
    }

    pub async fn run(
        mut self,
        event_tx: mpsc::UnboundedSender<EngineEvent>,
        mut control_rx: mpsc::UnboundedReceiver<EngineControl>,
    ) -> Result<()> {
        let cancel = Arc::new(AtomicBool::new(false));

        // Control listener.
        let cancel2 = cancel.clone();
        let control_handle = tokio::spawn(async move {
            while let Some(msg) = control_rx.recv().await {
                match msg {
                    EngineControl::Cancel => {
                        cancel2.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }
        });

        let mut ticks = 0u32;
        let res = loop {
            if cancel.load(Ordering::Relaxed) {
                tracing::debug!(ticks, "engine cancelled before tick");
                break Ok(());
            }

            let percent = match self.driver.tick().await {
                Ok(p) => p.min(100),
                Err(e) => break Err(e.context("progress driver failed")),
            };
            ticks += 1;

            // Cancellation takes effect at the tick boundary: a tick finished after cancel is dropped.
            if cancel.load(Ordering::Relaxed) {
                tracing::debug!(ticks, percent, "engine cancelled at tick boundary");
                break Ok(());
            }

            if event_tx.send(EngineEvent::Tick { percent }).is_err() {
                // Run loop went away; nobody is listening for progress anymore.
                break Ok(());
            }

            if percent >= 100 {
                tracing::debug!(ticks, "engine reached 100%");
                break Ok(());
            }
        };

        // Dropping a JoinHandle does not cancel the task; abort the listener explicitly.
        control_handle.abort();

        res
    }
}
