use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskName(String);

impl TaskName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TaskName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Borrow<str> for TaskName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for TaskName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Which list an enabled task currently belongs to.
///
/// Recomputed once per scheduler iteration; suspension primitives change
/// `next_run` only and leave the bucket alone until the next refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bucket {
    /// Due: `next_run` is unset or not after now.
    Pending,
    /// Scheduled for later.
    Waiting,
}

/// Scheduling state of one task.
///
/// The registry is the single owner of these records; other components read
/// them by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub name: TaskName,
    pub enabled: bool,

    /// `None` means "due now".
    pub next_run: Option<NaiveDateTime>,

    pub bucket: Bucket,

    /// Static registration order, used to break `next_run` ties.
    pub order: usize,

    /// Consecutive failed runs.
    pub failures: u32,

    /// Reason of the last failure (if any).
    pub last_failure: Option<String>,
}

impl TaskRecord {
    pub fn new(name: TaskName, enabled: bool, next_run: Option<NaiveDateTime>, order: usize) -> Self {
        Self {
            name,
            enabled,
            next_run,
            bucket: Bucket::Waiting,
            order,
            failures: 0,
            last_failure: None,
        }
    }

    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        self.next_run.is_none_or(|t| t <= now)
    }

    pub fn refresh_bucket(&mut self, now: NaiveDateTime) {
        self.bucket = if self.is_due(now) {
            Bucket::Pending
        } else {
            Bucket::Waiting
        };
    }

    /// Sort key for dispatch: ascending `next_run` (unset first), then order.
    pub fn dispatch_key(&self) -> (Option<NaiveDateTime>, usize) {
        (self.next_run, self.order)
    }

    pub fn mark_succeeded(&mut self) {
        self.failures = 0;
    }

    pub fn record_failure(&mut self, reason: String) {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(reason);
    }

    /// Disable until an operator re-enables the task.
    pub fn mark_failed(&mut self, reason: String) {
        self.enabled = false;
        self.last_failure = Some(reason);
    }
}
