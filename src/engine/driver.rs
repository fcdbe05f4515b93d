use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::model::DriverSettings;

/// Source of progress for a running task.
///
/// Each call performs one unit of waiting or work and reports the job's completion
/// percentage. The simulated driver sleeps on a timer; a backend integration would poll
/// the job-status endpoint here instead.
#[async_trait]
pub trait ProgressDriver: Send {
    async fn tick(&mut self) -> Result<u8>;
}

/// Timer-based stand-in for real work: `increment` points every `interval`.
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    increment: u8,
    interval: Duration,
    percent: u8,
}

impl SimulatedDriver {
    pub fn new(settings: DriverSettings) -> Self {
        Self {
            // A zero increment would never finish.
            increment: settings.increment.clamp(1, 100),
            interval: settings.tick_interval,
            percent: 0,
        }
    }
}

#[async_trait]
impl ProgressDriver for SimulatedDriver {
    async fn tick(&mut self) -> Result<u8> {
        tokio::time::sleep(self.interval).await;
        self.percent = self.percent.saturating_add(self.increment).min(100);
        Ok(self.percent)
    }
}
