use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_stream::{wrappers::IntervalStream, StreamExt};
use tracing::{debug, info};

use crate::engine::ReliefEngine;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// Fixed-period driver that kicks off a refresh on every tick, starting
/// immediately. Ticks that land while a refresh is still running are
/// skipped by the engine itself, and camp lists that come back after a newer
/// one are dropped.
pub struct PollLoop {
    engine: Arc<ReliefEngine>,
    period: Duration,
    poll_camps: bool,
}

impl PollLoop {
    pub fn new(engine: Arc<ReliefEngine>) -> Self {
        Self {
            engine,
            period: DEFAULT_POLL_INTERVAL,
            poll_camps: false,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period.max(Duration::from_millis(1));
        self
    }

    /// Also re-fetch relief camps on every tick.
    pub fn with_camps(mut self, poll_camps: bool) -> Self {
        self.poll_camps = poll_camps;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn run(self) {
        let mut timer = interval(self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(timer);
        info!(
            period_ms = self.period.as_millis() as u64,
            camps = self.poll_camps,
            "poll loop started"
        );

        while ticks.next().await.is_some() {
            let engine = self.engine.clone();
            let poll_camps = self.poll_camps;
            tokio::spawn(async move {
                if let Err(err) = engine.refresh().await {
                    debug!(%err, "scheduled refresh failed");
                }
                if poll_camps {
                    if let Err(err) = engine.refresh_camps().await {
                        debug!(%err, "scheduled camp refresh failed");
                    }
                }
            });
        }
    }

    /// Runs until the returned handle is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
#[path = "tests/poll_tests.rs"]
mod tests;
