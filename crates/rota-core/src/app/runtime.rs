use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::context::TaskContext;
use crate::domain::decision::Control;
use crate::domain::errors::{Result, RotaError};
use crate::domain::task::TaskName;

/// The code that runs when a task is dispatched.
///
/// Bodies return a `Control` instead of unwinding; errors are handed to the
/// failure decider.
#[async_trait]
pub trait TaskBody: Send + Sync {
    async fn run(&self, ctx: &mut TaskContext<'_>) -> Result<Control>;
}

/// Registry of bodies (task name -> body).
///
/// Design:
/// - Built during initialization (mutable).
/// - Used during runtime (immutable).
#[derive(Default, Clone)]
pub struct BodyRegistry {
    bodies: HashMap<TaskName, Arc<dyn TaskBody>>,
}

impl BodyRegistry {
    pub fn new() -> Self {
        Self {
            bodies: HashMap::new(),
        }
    }

    pub fn register(&mut self, task: TaskName, body: Arc<dyn TaskBody>) -> Result<()> {
        if self.bodies.contains_key(&task) {
            return Err(RotaError::DuplicateTask(task.to_string()));
        }
        self.bodies.insert(task, body);
        Ok(())
    }

    pub fn get(&self, task: &str) -> Option<&Arc<dyn TaskBody>> {
        self.bodies.get(task)
    }

    pub fn contains(&self, task: &str) -> bool {
        self.bodies.contains_key(task)
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Run the body registered for the context's task.
    pub async fn execute(&self, ctx: &mut TaskContext<'_>) -> Result<Control> {
        let body = self
            .get(ctx.task().as_str())
            .cloned()
            .ok_or_else(|| RotaError::UnknownTask(ctx.task().to_string()))?;
        body.run(ctx).await
    }
}
