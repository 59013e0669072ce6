//! Scripted collaborators: in-memory stand-ins for the environment.
//!
//! Used by tests and by the demo binary. Counters and queues are shared
//! behind `Arc<Mutex<..>>` so a test can adjust them while a body runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::errors::{Result, RotaError};
use crate::ports::{ContentSource, ResourceCounters, WorkItem, WorkPerformer};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

type Hook = Box<dyn Fn(&WorkItem) + Send + Sync>;
type FailureHook = Box<dyn Fn(&WorkItem) -> RotaError + Send + Sync>;

/// Counter values set up front. Unknown counters read as zero.
#[derive(Debug, Default, Clone)]
pub struct ScriptedCounters {
    values: Arc<Mutex<HashMap<String, i64>>>,
}

impl ScriptedCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, kind: &str, value: i64) -> Self {
        self.set(kind, value);
        self
    }

    pub fn set(&self, kind: &str, value: i64) {
        lock(&self.values).insert(kind.to_string(), value);
    }

    pub fn get(&self, kind: &str) -> i64 {
        lock(&self.values).get(kind).copied().unwrap_or(0)
    }

    /// A hook that adds `delta` to `kind` each time it is called.
    pub fn adjuster(&self, kind: &str, delta: i64) -> impl Fn(&WorkItem) + Send + Sync + 'static {
        let values = Arc::clone(&self.values);
        let kind = kind.to_string();
        move |_item| {
            *lock(&values).entry(kind.clone()).or_insert(0) += delta;
        }
    }
}

#[async_trait]
impl ResourceCounters for ScriptedCounters {
    async fn read_resource_counter(&self, kind: &str) -> Result<i64> {
        Ok(self.get(kind))
    }
}

/// Work items queued per kind, handed out in FIFO order.
#[derive(Debug, Default)]
pub struct QueuedContent {
    queues: Mutex<HashMap<String, VecDeque<WorkItem>>>,
}

impl QueuedContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: WorkItem) {
        lock(&self.queues)
            .entry(item.kind.clone())
            .or_default()
            .push_back(item);
    }

    pub fn push_all(&self, items: impl IntoIterator<Item = WorkItem>) {
        for item in items {
            self.push(item);
        }
    }

    pub fn remaining(&self, kind: &str) -> usize {
        lock(&self.queues).get(kind).map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl ContentSource for QueuedContent {
    async fn acquire_work_item(&self, kind: &str) -> Result<Option<WorkItem>> {
        Ok(lock(&self.queues).get_mut(kind).and_then(VecDeque::pop_front))
    }
}

/// Records every item it performs; can run a hook or fail on demand.
#[derive(Default)]
pub struct RecordingPerformer {
    performed: Mutex<Vec<WorkItem>>,
    hook: Mutex<Option<Hook>>,
    failure: Mutex<Option<FailureHook>>,
}

impl RecordingPerformer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` after each successful item.
    pub fn on_perform(&self, hook: impl Fn(&WorkItem) + Send + Sync + 'static) {
        *lock(&self.hook) = Some(Box::new(hook));
    }

    /// Fail every item with the error built by `failure`.
    pub fn fail_with(&self, failure: impl Fn(&WorkItem) -> RotaError + Send + Sync + 'static) {
        *lock(&self.failure) = Some(Box::new(failure));
    }

    pub fn performed(&self) -> Vec<WorkItem> {
        lock(&self.performed).clone()
    }
}

#[async_trait]
impl WorkPerformer for RecordingPerformer {
    async fn perform(&self, item: &WorkItem) -> Result<()> {
        if let Some(failure) = lock(&self.failure).as_ref() {
            return Err(failure(item));
        }
        lock(&self.performed).push(item.clone());
        if let Some(hook) = lock(&self.hook).as_ref() {
            hook(item);
        }
        Ok(())
    }
}
