//! Recurring background jobs on the tokio runtime.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{Error, Result};

/// Longest a daily job sleeps before looking at the clock again.
const DAILY_RECHECK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Run immediately, then every period. Ticks missed while a run is in
    /// progress are skipped, not queued.
    Every(Duration),
    /// Run once a day at this local wall-clock time, as read from the
    /// scheduler's clock.
    DailyAt(NaiveTime),
}

/// First occurrence of `at` strictly after `after`.
pub fn next_daily_run(at: NaiveTime, after: NaiveDateTime) -> NaiveDateTime {
    let today = after.date().and_time(at);
    if today > after {
        today
    } else {
        let tomorrow = after.date().succ_opt().unwrap_or(after.date());
        tomorrow.and_time(at)
    }
}

fn local_now(clock: &dyn Clock) -> NaiveDateTime {
    clock.now().with_timezone(&Local).naive_local()
}

/// Owns at most one running job.
pub struct Scheduler {
    name: String,
    clock: Arc<dyn Clock>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// `clock` decides when daily jobs are due.
    pub fn new(name: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.to_string(),
            clock,
            handle: Mutex::new(None),
        }
    }

    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&self, cadence: Cadence, job: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if let Cadence::Every(period) = cadence {
            if period.is_zero() {
                return Err(Error::Invalid(format!("{} interval must be greater than 0", self.name)));
            }
        }

        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return Err(Error::InvalidState(format!("{} is already scheduled", self.name)));
        }

        let name = self.name.clone();
        let clock = Arc::clone(&self.clock);
        *handle = Some(tokio::spawn(async move {
            match cadence {
                Cadence::Every(period) => {
                    let mut ticker = tokio::time::interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        ticker.tick().await;
                        debug!("Running scheduled {}", name);
                        job().await;
                    }
                }
                Cadence::DailyAt(at) => {
                    let mut next = next_daily_run(at, local_now(clock.as_ref()));
                    debug!("Next {} run at {}", name, next);
                    loop {
                        let now = local_now(clock.as_ref());
                        if now >= next {
                            debug!("Running scheduled {}", name);
                            job().await;
                            next = next_daily_run(at, local_now(clock.as_ref()));
                            debug!("Next {} run at {}", name, next);
                            continue;
                        }
                        // Short naps so a clock jump is noticed.
                        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                        tokio::time::sleep(wait.min(DAILY_RECHECK)).await;
                    }
                }
            }
        }));

        info!("Started {} ({:?})", self.name, cadence);
        Ok(())
    }

    /// Returns false when nothing was running.
    pub fn stop(&self) -> bool {
        match self.handle.lock().take() {
            Some(handle) => {
                handle.abort();
                info!("Stopped {}", self.name);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}
