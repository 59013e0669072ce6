//! TaskContext: everything a running task body may touch.

use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::sync::watch;
use tracing::info;

use crate::domain::decision::Control;
use crate::domain::errors::Result;
use crate::domain::task::TaskName;
use crate::ports::Clock;
use crate::registry::{DelayTarget, TaskRegistry};

/// Longest single sleep while waiting for a target time.
pub const WAIT_SLICE_SECS: u64 = 60;

/// Created by the scheduler for one run of one task.
///
/// Design:
/// - The registry is borrowed mutably for the duration of the run, so bodies
///   can read and write any task's settings without globals.
/// - Waits go through the clock and observe the shutdown signal between
///   slices.
pub struct TaskContext<'a> {
    pub registry: &'a mut TaskRegistry,
    clock: &'a dyn Clock,
    current: TaskName,
    shutdown: watch::Receiver<bool>,
    switch_disabled: bool,
}

impl<'a> TaskContext<'a> {
    pub fn new(
        registry: &'a mut TaskRegistry,
        clock: &'a dyn Clock,
        current: TaskName,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            clock,
            current,
            shutdown,
            switch_disabled: false,
        }
    }

    pub fn task(&self) -> &TaskName {
        &self.current
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock
    }

    /// Reschedule the running task.
    pub fn delay_self(&mut self, target: DelayTarget) -> Result<NaiveDateTime> {
        let now = self.now();
        let name = self.current.clone();
        self.registry.delay(name.as_str(), target, now)
    }

    /// Enable another task and make it due now.
    pub fn invoke(&mut self, task: &str) -> Result<()> {
        self.registry.invoke(task)
    }

    /// While disabled, checkpoints ignore other due tasks (e.g. during a
    /// boss fight that must not be interrupted).
    pub fn set_switch_disabled(&mut self, disabled: bool) {
        self.switch_disabled = disabled;
    }

    /// True once shutdown was signalled or the sender was dropped.
    pub fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    /// Between units of work: `Some(Stop)` if the body should yield.
    pub fn checkpoint(&self) -> Option<Control> {
        if self.shutdown_requested() {
            info!(task = %self.current, "shutdown requested, stopping at checkpoint");
            return Some(Control::Stop);
        }
        if self.switch_disabled {
            return None;
        }
        let now = self.now();
        let next = self.registry.preempting(self.current.as_str(), now)?;
        info!(task = %self.current, next = %next, "yielding to earlier task");
        Some(Control::Stop)
    }

    /// Sleep until `target` in slices of at most 60 s.
    ///
    /// Returns false if shutdown was requested before reaching it.
    pub async fn sleep_until(&mut self, target: NaiveDateTime) -> bool {
        loop {
            if self.shutdown_requested() {
                return false;
            }
            let remain = (target - self.now()).num_seconds();
            if remain <= 0 {
                return true;
            }
            let slice = Duration::from_secs((remain as u64).min(WAIT_SLICE_SECS));
            self.pause(slice).await;
        }
    }

    async fn pause(&mut self, slice: Duration) {
        let clock = self.clock;
        tokio::select! {
            _ = clock.sleep(slice) => {}
            _ = self.shutdown.changed() => {}
        }
    }
}
