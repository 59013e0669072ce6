//! SchedulerBuilder: wiring and startup validation.
//!
//! Every task the scheduler can dispatch must have a body. Checking that at
//! build time turns a typo in a task name into a startup error instead of a
//! failure hours later when the task first comes due.

use std::sync::Arc;
use std::time::Duration;

use super::retry::RetryPolicy;
use super::runtime::{BodyRegistry, TaskBody};
use super::scheduler::Scheduler;
use crate::domain::decision::{DefaultFailureDecider, FailureDecider};
use crate::domain::errors::{Result, RotaError};
use crate::domain::task::TaskName;
use crate::ports::{Clock, SystemClock};
use crate::registry::TaskRegistry;

pub const DEFAULT_IDLE_POLL: Duration = Duration::from_secs(60);

/// # Example
/// ```ignore
/// let scheduler = SchedulerBuilder::new(registry)
///     .register("OpsiDailyDelay", Arc::new(coordinator))?
///     .expect_tasks(&["OpsiDailyDelay"])
///     .build()?;
/// ```
pub struct SchedulerBuilder {
    registry: TaskRegistry,
    bodies: BodyRegistry,
    expected_tasks: Option<Vec<String>>,
    clock: Arc<dyn Clock>,
    decider: Option<Arc<dyn FailureDecider>>,
    retry_policy: RetryPolicy,
    idle_poll: Duration,
}

impl SchedulerBuilder {
    pub fn new(registry: TaskRegistry) -> Self {
        Self {
            registry,
            bodies: BodyRegistry::new(),
            expected_tasks: None,
            clock: Arc::new(SystemClock),
            decider: None,
            retry_policy: RetryPolicy::default(),
            idle_poll: DEFAULT_IDLE_POLL,
        }
    }

    pub fn register(mut self, task: impl Into<TaskName>, body: Arc<dyn TaskBody>) -> Result<Self> {
        self.bodies.register(task.into(), body)?;
        Ok(self)
    }

    /// Tasks that must have a body even if the registry does not list them yet.
    pub fn expect_tasks(mut self, tasks: &[&str]) -> Self {
        self.expected_tasks = Some(tasks.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Backoff for the default decider; ignored when `decider` is set.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn decider(mut self, decider: Arc<dyn FailureDecider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub fn idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    /// # Errors
    /// `MissingTaskBodies` (sorted) if an expected or registered task has no body.
    pub fn build(self) -> Result<Scheduler> {
        let mut missing: Vec<String> = self
            .registry
            .names()
            .into_iter()
            .map(|n| n.to_string())
            .chain(self.expected_tasks.into_iter().flatten())
            .filter(|n| !self.bodies.contains(n))
            .collect();
        missing.sort();
        missing.dedup();
        if !missing.is_empty() {
            return Err(RotaError::MissingTaskBodies(missing));
        }

        let decider = self
            .decider
            .unwrap_or_else(|| Arc::new(DefaultFailureDecider::new(self.retry_policy)));
        Ok(Scheduler::new(
            self.registry,
            self.bodies,
            self.clock,
            decider,
            self.idle_poll,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::LogOnlyBody;

    fn registry(names: &[&str]) -> TaskRegistry {
        let mut registry = TaskRegistry::default();
        for name in names {
            registry.register(*name, true, None).unwrap();
        }
        registry
    }

    #[test]
    fn build_success() {
        let scheduler = SchedulerBuilder::new(registry(&["Commission"]))
            .register("Commission", Arc::new(LogOnlyBody))
            .unwrap()
            .expect_tasks(&["Commission"])
            .build();
        assert!(scheduler.is_ok());
    }

    #[test]
    fn build_reports_missing_bodies_sorted() {
        let result = SchedulerBuilder::new(registry(&["Tactical", "Commission"]))
            .register("Commission", Arc::new(LogOnlyBody))
            .unwrap()
            .expect_tasks(&["Dorm", "Tactical"])
            .build();
        assert!(matches!(
            result,
            Err(RotaError::MissingTaskBodies(missing))
                if missing == vec!["Dorm".to_string(), "Tactical".to_string()]
        ));
    }

    #[test]
    fn duplicate_body_is_rejected() {
        let result = SchedulerBuilder::new(registry(&["Commission"]))
            .register("Commission", Arc::new(LogOnlyBody))
            .unwrap()
            .register("Commission", Arc::new(LogOnlyBody));
        assert!(matches!(result, Err(RotaError::DuplicateTask(_))));
    }
}
