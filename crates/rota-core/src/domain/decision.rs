//! Decision model: control signals returned by task bodies and the failure decider.
//!
//! Task bodies never unwind to change control flow. They return a `Control`
//! value and the scheduler applies it. When a body fails with an error, a
//! `FailureDecider` decides what happens to the task next.

use std::time::Duration;

use super::errors::RotaError;
use super::task::{TaskName, TaskRecord};
use crate::app::retry::RetryPolicy;

/// Outcome of a threshold check on an exhaustible counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    /// The counter hit its threshold; hand over to the alternate task.
    Switch,
}

/// What a task body asks the scheduler to do after it returns.
///
/// `Stop` and `Switch` are only produced at checkpoints between units of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Finished normally.
    Proceed,

    /// Yielded to another task (already invoked by the body).
    Switch { to: TaskName },

    /// Cooperative stop: the body has scheduled its own continuation, or a
    /// shutdown was requested.
    Stop,

    /// The task cannot make progress; disable it.
    Fatal(String),
}

/// What to do with a task whose body returned an error.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureDecision {
    /// Run again after a delay.
    Retry { delay: Duration, reason: String },

    /// Disable the task (operator attention).
    MarkFailed { reason: String },
}

/// Decides the next action for a failed task.
///
/// Deciders are pure: the scheduler applies the returned decision to the
/// registry.
pub trait FailureDecider: Send + Sync {
    /// `task.failures` already counts the failure being decided.
    fn decide(&self, task: &TaskRecord, error: &RotaError) -> FailureDecision;
}

/// Fatal errors disable immediately; everything else retries with
/// exponential backoff until `max_attempts` consecutive failures.
#[derive(Debug, Clone)]
pub struct DefaultFailureDecider {
    retry_policy: RetryPolicy,
}

impl DefaultFailureDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }
}

impl Default for DefaultFailureDecider {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl FailureDecider for DefaultFailureDecider {
    fn decide(&self, task: &TaskRecord, error: &RotaError) -> FailureDecision {
        if error.is_fatal() {
            return FailureDecision::MarkFailed {
                reason: error.to_string(),
            };
        }

        let max = self.retry_policy.max_attempts;
        if task.failures >= max {
            FailureDecision::MarkFailed {
                reason: format!("max attempts reached: {}/{max}: {error}", task.failures),
            }
        } else {
            let delay = self.retry_policy.next_delay(task.failures);
            FailureDecision::Retry {
                delay,
                reason: format!(
                    "retry {}/{max} after {delay:?}: {error}",
                    task.failures + 1
                ),
            }
        }
    }
}
