//! Scheduler loop: one task at a time, picked from the pending list.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::context::TaskContext;
use super::runtime::BodyRegistry;
use crate::domain::decision::{Control, FailureDecider, FailureDecision};
use crate::domain::errors::{Result, RotaError};
use crate::domain::task::TaskName;
use crate::domain::time::format_timestamp;
use crate::ports::Clock;
use crate::registry::{DelayTarget, TaskRegistry};

/// What happened to the task dispatched by `run_once`.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Returned `Proceed`; runs again at `next_run`.
    Finished { next_run: Option<NaiveDateTime> },
    /// Returned `Stop` or `Switch`; `next_run` is whatever the body chose.
    Yielded(Control),
    /// Failed; runs again after the backoff delay.
    Retrying { delay: Duration },
    /// Disabled until an operator re-enables it.
    Disabled { reason: String },
}

pub struct Scheduler {
    registry: TaskRegistry,
    bodies: BodyRegistry,
    clock: Arc<dyn Clock>,
    decider: Arc<dyn FailureDecider>,
    idle_poll: Duration,
}

impl Scheduler {
    pub(crate) fn new(
        registry: TaskRegistry,
        bodies: BodyRegistry,
        clock: Arc<dyn Clock>,
        decider: Arc<dyn FailureDecider>,
        idle_poll: Duration,
    ) -> Self {
        Self {
            registry,
            bodies,
            clock,
            decider,
            idle_poll,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TaskRegistry {
        &mut self.registry
    }

    pub fn into_registry(self) -> TaskRegistry {
        self.registry
    }

    /// Dispatch the head of the pending list, if any, and apply its result.
    pub async fn run_once(
        &mut self,
        shutdown: watch::Receiver<bool>,
    ) -> Option<(TaskName, RunOutcome)> {
        let now = self.clock.now();
        self.registry.refresh_buckets(now);
        let task = self.registry.next_due()?;

        info!(task = %task, "task started");
        let result = {
            let mut ctx = TaskContext::new(
                &mut self.registry,
                self.clock.as_ref(),
                task.clone(),
                shutdown,
            );
            self.bodies.execute(&mut ctx).await
        };

        let outcome = match self.apply(&task, result) {
            Ok(outcome) => outcome,
            Err(e) => {
                // only reachable if the task vanished from the registry
                error!(task = %task, error = %e, "result not applied");
                return None;
            }
        };
        info!(task = %task, outcome = ?outcome, "task ended");
        Some((task, outcome))
    }

    fn apply(&mut self, task: &TaskName, result: Result<Control>) -> Result<RunOutcome> {
        let name = task.as_str();
        let now = self.clock.now();

        match result {
            Ok(Control::Proceed) => {
                self.registry.record_success(name)?;
                let moved = self
                    .registry
                    .get(name)
                    .and_then(|t| t.next_run)
                    .is_some_and(|t| t > now);
                if !moved {
                    self.registry.delay(name, DelayTarget::UntilBoundary, now)?;
                }
                let next_run = self.registry.get(name).and_then(|t| t.next_run);
                Ok(RunOutcome::Finished { next_run })
            }
            Ok(control @ (Control::Stop | Control::Switch { .. })) => {
                self.registry.record_success(name)?;
                Ok(RunOutcome::Yielded(control))
            }
            Ok(Control::Fatal(reason)) => {
                error!(task = name, reason = %reason, "task failed fatally");
                self.registry.mark_failed(name, reason.clone())?;
                Ok(RunOutcome::Disabled { reason })
            }
            Err(e) => self.apply_failure(name, e, now),
        }
    }

    fn apply_failure(&mut self, name: &str, err: RotaError, now: NaiveDateTime) -> Result<RunOutcome> {
        let failures = self.registry.record_failure(name, err.to_string())?;
        let record = self
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| RotaError::UnknownTask(name.to_string()))?;

        match self.decider.decide(&record, &err) {
            FailureDecision::Retry { delay, reason } => {
                warn!(task = name, failures, reason = %reason, "task failed, retrying");
                let at = TimeDelta::from_std(delay)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d))
                    .unwrap_or(now);
                self.registry.delay(name, DelayTarget::At(at), now)?;
                Ok(RunOutcome::Retrying { delay })
            }
            FailureDecision::MarkFailed { reason } => {
                error!(task = name, failures, reason = %reason, "task failed, disabling");
                self.registry.mark_failed(name, reason.clone())?;
                Ok(RunOutcome::Disabled { reason })
            }
        }
    }

    /// How long to sleep when nothing is due.
    fn idle_wait(&self) -> Duration {
        let now = self.clock.now();
        match self.registry.earliest_waiting() {
            Some(next) => {
                let secs = (next - now).num_seconds().max(1) as u64;
                Duration::from_secs(secs).min(self.idle_poll)
            }
            None => self.idle_poll,
        }
    }

    /// Run until shutdown is signalled (or the sender is dropped).
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(tasks = self.registry.tasks().len(), "scheduler started");
        loop {
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                break;
            }

            if self.run_once(shutdown.clone()).await.is_some() {
                continue;
            }

            let wait = self.idle_wait();
            debug!(
                wait_secs = wait.as_secs(),
                next = ?self.registry.earliest_waiting().map(format_timestamp),
                "nothing due"
            );
            let clock = Arc::clone(&self.clock);
            tokio::select! {
                _ = clock.sleep(wait) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!("scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::builder::SchedulerBuilder;
    use crate::app::retry::RetryPolicy;
    use crate::app::runtime::TaskBody;
    use crate::coordination::{MaintenanceConfig, MaintenanceWindowCoordinator};
    use crate::ports::ManualClock;
    use crate::store::DelayStateStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    /// Returns a fixed result and records the order of dispatch.
    struct Scripted {
        log: Arc<Mutex<Vec<String>>>,
        result: fn() -> Result<Control>,
    }

    #[async_trait]
    impl TaskBody for Scripted {
        async fn run(&self, ctx: &mut TaskContext<'_>) -> Result<Control> {
            self.log.lock().unwrap().push(ctx.task().to_string());
            (self.result)()
        }
    }

    fn body(log: &Arc<Mutex<Vec<String>>>, result: fn() -> Result<Control>) -> Arc<Scripted> {
        Arc::new(Scripted {
            log: Arc::clone(log),
            result,
        })
    }

    fn proceed() -> Result<Control> {
        Ok(Control::Proceed)
    }

    fn broken() -> Result<Control> {
        Err(RotaError::StorageFormat("screen not recognized".into()))
    }

    fn fatal() -> Result<Control> {
        Ok(Control::Fatal("fleet wiped".into()))
    }

    #[tokio::test]
    async fn dispatches_in_next_run_order_and_finishes_for_the_cycle() {
        let clock = Arc::new(ManualClock::new(at(1, 12, 0)));
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = TaskRegistry::default();
        registry.register("B", true, Some(at(1, 11, 0))).unwrap();
        registry.register("A", true, Some(at(1, 10, 0))).unwrap();
        registry.register("C", true, Some(at(1, 11, 0))).unwrap();
        registry.register("Later", true, Some(at(1, 15, 0))).unwrap();

        let mut scheduler = SchedulerBuilder::new(registry)
            .clock(clock.clone())
            .register("A", body(&log, proceed))
            .unwrap()
            .register("B", body(&log, proceed))
            .unwrap()
            .register("C", body(&log, proceed))
            .unwrap()
            .register("Later", body(&log, proceed))
            .unwrap()
            .build()
            .unwrap();

        let (_tx, rx) = watch::channel(false);
        while scheduler.run_once(rx.clone()).await.is_some() {}

        assert_eq!(*log.lock().unwrap(), vec!["A", "B", "C"]);
        let next = scheduler.registry().get("A").unwrap().next_run;
        assert_eq!(next, Some(at(2, 0, 0)));
    }

    #[tokio::test]
    async fn failures_back_off_then_disable() {
        let clock = Arc::new(ManualClock::new(at(1, 12, 0)));
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = TaskRegistry::default();
        registry.register("Flaky", true, None).unwrap();

        let mut scheduler = SchedulerBuilder::new(registry)
            .clock(clock.clone())
            .retry_policy(RetryPolicy {
                base_delay: Duration::from_secs(60),
                multiplier: 2.0,
                max_attempts: 2,
            })
            .register("Flaky", body(&log, broken))
            .unwrap()
            .build()
            .unwrap();
        let (_tx, rx) = watch::channel(false);

        let (_, outcome) = scheduler.run_once(rx.clone()).await.unwrap();
        assert_eq!(outcome, RunOutcome::Retrying { delay: Duration::from_secs(60) });
        assert_eq!(scheduler.registry().get("Flaky").unwrap().next_run, Some(at(1, 12, 1)));

        assert!(scheduler.run_once(rx.clone()).await.is_none());
        clock.advance(TimeDelta::minutes(1));

        let (_, outcome) = scheduler.run_once(rx.clone()).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Disabled { .. }));
        let record = scheduler.registry().get("Flaky").unwrap();
        assert!(!record.enabled);
        assert_eq!(record.failures, 2);
    }

    #[tokio::test]
    async fn fatal_control_disables_only_that_task() {
        let clock = Arc::new(ManualClock::new(at(1, 12, 0)));
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = TaskRegistry::default();
        registry.register("Doomed", true, Some(at(1, 9, 0))).unwrap();
        registry.register("Fine", true, Some(at(1, 10, 0))).unwrap();

        let mut scheduler = SchedulerBuilder::new(registry)
            .clock(clock.clone())
            .register("Doomed", body(&log, fatal))
            .unwrap()
            .register("Fine", body(&log, proceed))
            .unwrap()
            .build()
            .unwrap();
        let (_tx, rx) = watch::channel(false);

        let (task, outcome) = scheduler.run_once(rx.clone()).await.unwrap();
        assert_eq!(task.as_str(), "Doomed");
        assert_eq!(outcome, RunOutcome::Disabled { reason: "fleet wiped".into() });

        let (task, _) = scheduler.run_once(rx.clone()).await.unwrap();
        assert_eq!(task.as_str(), "Fine");
        assert!(scheduler.run_once(rx).await.is_none());
    }

    /// Holds the worker for 90 seconds.
    struct Slow;

    #[async_trait]
    impl TaskBody for Slow {
        async fn run(&self, ctx: &mut TaskContext<'_>) -> Result<Control> {
            let until = ctx.now() + TimeDelta::seconds(90);
            if !ctx.sleep_until(until).await {
                return Ok(Control::Stop);
            }
            Ok(Control::Proceed)
        }
    }

    #[tokio::test]
    async fn busy_worker_at_arm_time_still_gets_the_blackout() {
        let dir = tempfile::TempDir::new().unwrap();
        let state_path = dir.path().join("daily_delay_status.json");
        let coordinator =
            MaintenanceWindowCoordinator::new(MaintenanceConfig::default(), DelayStateStore::new(&state_path));
        let clock = Arc::new(ManualClock::new(at(1, 12, 0)));
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut registry = TaskRegistry::default();
        registry.register("OpsiDailyDelay", true, None).unwrap();
        registry
            .register("OpsiMeowfficerFarming", true, Some(at(1, 23, 44) + TimeDelta::seconds(30)))
            .unwrap();
        registry.register("OpsiExplore", true, Some(at(1, 23, 56))).unwrap();
        coordinator.declare_fields(&mut registry).unwrap();

        let mut scheduler = SchedulerBuilder::new(registry)
            .clock(clock.clone())
            .register("OpsiDailyDelay", Arc::new(coordinator))
            .unwrap()
            .register("OpsiMeowfficerFarming", Arc::new(Slow))
            .unwrap()
            .register("OpsiExplore", body(&log, proceed))
            .unwrap()
            .build()
            .unwrap();
        let (_tx, rx) = watch::channel(false);

        // midday: parks itself ahead of the 23:55 trigger
        let (task, _) = scheduler.run_once(rx.clone()).await.unwrap();
        assert_eq!(task.as_str(), "OpsiDailyDelay");
        assert_eq!(
            scheduler.registry().get("OpsiDailyDelay").unwrap().next_run,
            Some(at(1, 23, 45))
        );

        // a 90 s task starting at 23:44:30 runs past the coordinator's time
        clock.set(at(1, 23, 44) + TimeDelta::seconds(30));
        let (task, _) = scheduler.run_once(rx.clone()).await.unwrap();
        assert_eq!(task.as_str(), "OpsiMeowfficerFarming");
        assert_eq!(clock.now(), at(1, 23, 46));

        // dispatched late, still ahead of the trigger: the full window runs
        let (task, outcome) = scheduler.run_once(rx.clone()).await.unwrap();
        assert_eq!(task.as_str(), "OpsiDailyDelay");
        assert_eq!(outcome, RunOutcome::Yielded(Control::Stop));
        assert_eq!(clock.now(), at(2, 0, 5));
        assert!(DelayStateStore::new(&state_path).is_empty().await);
        assert!(log.lock().unwrap().is_empty());

        let registry = scheduler.registry();
        assert_eq!(registry.get("OpsiExplore").unwrap().next_run, Some(at(1, 23, 56)));
        assert_eq!(
            registry.get("OpsiMeowfficerFarming").unwrap().next_run,
            Some(at(2, 0, 0))
        );
        assert_eq!(
            registry.get("OpsiDailyDelay").unwrap().next_run,
            Some(at(2, 23, 45))
        );
    }

    /// Signals shutdown the first time it runs.
    struct StopAll {
        tx: Arc<watch::Sender<bool>>,
    }

    #[async_trait]
    impl TaskBody for StopAll {
        async fn run(&self, _ctx: &mut TaskContext<'_>) -> Result<Control> {
            let _ = self.tx.send(true);
            Ok(Control::Proceed)
        }
    }

    #[tokio::test]
    async fn run_sleeps_until_next_task_then_stops_on_shutdown() {
        let clock = Arc::new(ManualClock::new(at(1, 12, 0)));
        let (tx, rx) = watch::channel(false);
        let mut registry = TaskRegistry::default();
        registry.register("Evening", true, Some(at(1, 12, 2) + TimeDelta::seconds(30))).unwrap();

        let mut scheduler = SchedulerBuilder::new(registry)
            .clock(clock.clone())
            .idle_poll(Duration::from_secs(60))
            .register("Evening", Arc::new(StopAll { tx: Arc::new(tx) }))
            .unwrap()
            .build()
            .unwrap();

        scheduler.run(rx).await;

        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_secs(60),
                Duration::from_secs(60),
                Duration::from_secs(30)
            ]
        );
        assert_eq!(
            scheduler.registry().get("Evening").unwrap().next_run,
            Some(at(2, 0, 0))
        );
    }
}
