//! Generic execution loop for content-consuming tasks.
//!
//! ```text
//! gate            Switch -> invoke alternate, delay self, Switch
//! loop:
//!   requirement   below minimum -> delay self, invoke alternate, Switch/Stop
//!   cooldown      busy -> delay self until the reserved time, Stop
//!   acquire       none -> invoke alternates, delay self to boundary, Switch/Stop
//!   perform       fatal -> Fatal
//!   gate          Switch -> as above
//!   checkpoint    shutdown or earlier task due -> Stop
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};

use super::context::TaskContext;
use super::runtime::TaskBody;
use crate::coordination::cooldown::CooldownMonitor;
use crate::coordination::gate::{GatePolicy, ResourceRequirement};
use crate::domain::decision::{Control, GateDecision};
use crate::domain::errors::{Result, RotaError};
use crate::domain::task::TaskName;
use crate::domain::time::{format_timestamp, minutes_until};
use crate::ports::{ContentSource, ResourceCounters, WorkPerformer};
use crate::registry::{DelayTarget, FieldKind, TaskRegistry};

/// Static description of one content-consuming task.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunnerSpec {
    pub name: String,
    pub content_kind: String,
    #[serde(default)]
    pub gate: Option<GatePolicy>,
    #[serde(default)]
    pub requirement: Option<ResourceRequirement>,
    #[serde(default)]
    pub cooldown_resource: Option<String>,
    /// Invoked when the task runs out of content for the cycle.
    #[serde(default)]
    pub alternates: Vec<String>,
    /// Ignore other due tasks at checkpoints.
    #[serde(default)]
    pub disable_switch: bool,
}

impl RunnerSpec {
    pub fn new(name: impl Into<String>, content_kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_kind: content_kind.into(),
            gate: None,
            requirement: None,
            cooldown_resource: None,
            alternates: Vec::new(),
            disable_switch: false,
        }
    }

    /// Declare the threshold and minimum fields this task reads.
    pub fn declare_fields(&self, registry: &mut TaskRegistry) -> Result<()> {
        if let Some(gate) = &self.gate {
            registry.declare(&gate.threshold_path, FieldKind::Integer, Value::from(0))?;
        }
        if let Some(req) = &self.requirement {
            registry.declare(&req.minimum_path, FieldKind::Integer, Value::from(0))?;
        }
        Ok(())
    }
}

pub struct TaskRunner {
    spec: RunnerSpec,
    monitor: CooldownMonitor,
    content: Arc<dyn ContentSource>,
    performer: Arc<dyn WorkPerformer>,
    counters: Arc<dyn ResourceCounters>,
}

impl TaskRunner {
    pub fn new(
        spec: RunnerSpec,
        monitor: CooldownMonitor,
        content: Arc<dyn ContentSource>,
        performer: Arc<dyn WorkPerformer>,
        counters: Arc<dyn ResourceCounters>,
    ) -> Self {
        Self {
            spec,
            monitor,
            content,
            performer,
            counters,
        }
    }

    pub fn spec(&self) -> &RunnerSpec {
        &self.spec
    }

    async fn gate(&self, ctx: &mut TaskContext<'_>) -> Result<Option<Control>> {
        let Some(policy) = &self.spec.gate else {
            return Ok(None);
        };
        let eval = policy
            .evaluate(ctx.registry, self.counters.as_ref(), ctx.now())
            .await?;
        if eval.decision == GateDecision::Proceed {
            return Ok(None);
        }

        let target = policy
            .resume_after_minutes
            .map(DelayTarget::Minutes)
            .unwrap_or(DelayTarget::UntilBoundary);
        ctx.delay_self(target)?;
        match &policy.alternate {
            Some(alternate) => {
                ctx.invoke(alternate)?;
                Ok(Some(Control::Switch {
                    to: TaskName::new(alternate.as_str()),
                }))
            }
            None => Ok(Some(Control::Stop)),
        }
    }

    async fn requirement(&self, ctx: &mut TaskContext<'_>) -> Result<Option<Control>> {
        let Some(req) = &self.spec.requirement else {
            return Ok(None);
        };
        match req.check(ctx.registry, self.counters.as_ref()).await {
            Ok(_) => Ok(None),
            Err(RotaError::ResourceExhausted {
                resource,
                current,
                required,
            }) => {
                info!(
                    task = %ctx.task(),
                    resource = %resource,
                    current,
                    required,
                    retry_after = req.retry_after_minutes,
                    "resource below minimum"
                );
                ctx.delay_self(DelayTarget::Minutes(req.retry_after_minutes))?;
                match &req.alternate {
                    Some(alternate) => {
                        ctx.invoke(alternate)?;
                        Ok(Some(Control::Switch {
                            to: TaskName::new(alternate.as_str()),
                        }))
                    }
                    None => Ok(Some(Control::Stop)),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn cooldown(&self, ctx: &mut TaskContext<'_>) -> Result<Option<Control>> {
        let Some(resource) = &self.spec.cooldown_resource else {
            return Ok(None);
        };
        let now = ctx.now();
        let status = self.monitor.check(ctx.registry, resource, now);
        let Some(window) = CooldownMonitor::window(resource, status) else {
            return Ok(None);
        };
        let minutes = minutes_until(now, window.busy_until);
        info!(
            task = %ctx.task(),
            resource = %window.resource,
            busy_until = %format_timestamp(window.busy_until),
            minutes,
            "shared resource reserved, deferring"
        );
        ctx.delay_self(DelayTarget::Minutes(minutes))?;
        Ok(Some(Control::Stop))
    }

    /// No content left this cycle.
    fn exhausted(&self, ctx: &mut TaskContext<'_>) -> Result<Control> {
        let mut invoked: Option<TaskName> = None;
        for alternate in &self.spec.alternates {
            let enabled = ctx
                .registry
                .get(alternate)
                .is_some_and(|t| t.enabled);
            if !enabled {
                continue;
            }
            ctx.invoke(alternate)?;
            invoked.get_or_insert_with(|| TaskName::new(alternate.as_str()));
        }
        ctx.delay_self(DelayTarget::UntilBoundary)?;
        info!(task = %ctx.task(), "content exhausted for this cycle");
        Ok(match invoked {
            Some(to) => Control::Switch { to },
            None => Control::Stop,
        })
    }
}

#[async_trait]
impl TaskBody for TaskRunner {
    async fn run(&self, ctx: &mut TaskContext<'_>) -> Result<Control> {
        ctx.set_switch_disabled(self.spec.disable_switch);

        if let Some(control) = self.gate(ctx).await? {
            return Ok(control);
        }

        let mut performed = 0usize;
        loop {
            if let Some(control) = self.requirement(ctx).await? {
                return Ok(control);
            }
            if let Some(control) = self.cooldown(ctx)? {
                return Ok(control);
            }

            let Some(item) = self
                .content
                .acquire_work_item(&self.spec.content_kind)
                .await?
            else {
                info!(task = %ctx.task(), performed, "no more work items");
                return self.exhausted(ctx);
            };

            match self.performer.perform(&item).await {
                Ok(()) => performed += 1,
                Err(e) if e.is_fatal() => {
                    error!(task = %ctx.task(), item = %item.id, error = %e, "work item failed fatally");
                    return Ok(Control::Fatal(e.to_string()));
                }
                Err(e) => return Err(e),
            }

            if let Some(control) = self.gate(ctx).await? {
                return Ok(control);
            }
            if let Some(control) = ctx.checkpoint() {
                info!(task = %ctx.task(), performed, "stopping at checkpoint");
                return Ok(control);
            }
        }
    }
}
