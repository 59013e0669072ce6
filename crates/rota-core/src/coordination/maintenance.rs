//! Daily maintenance window coordination.
//!
//! Ahead of the daily reset boundary the coordinator moves every eligible
//! task past the boundary, recording each original `next_run` in the delay
//! state store. After the boundary plus a grace period it puts every task
//! back and removes the records. Records left behind by a crash are picked
//! up on the next run.
//!
//! Phases: `Idle -> Armed -> Blackout -> RecoveryWait -> Restoring -> Idle`.

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeDelta};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::app::context::TaskContext;
use crate::app::runtime::TaskBody;
use crate::domain::decision::Control;
use crate::domain::errors::{Result, RotaError};
use crate::domain::time::format_timestamp;
use crate::registry::{DelayTarget, FieldKind, TaskRegistry};
use crate::store::DelayStateStore;

pub const DEFAULT_LEAD_MINUTES: i64 = 5;
pub const MIN_LEAD_MINUTES: i64 = 1;
pub const MAX_LEAD_MINUTES: i64 = 60;
pub const MAX_ARM_AHEAD_MINUTES: i64 = 12 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Name of the coordinator task itself.
    pub task: String,
    /// Only tasks whose name starts with this are delayed.
    pub namespace_prefix: String,
    /// Task that must run across the boundary.
    pub cross_boundary_task: String,
    /// Tasks that are never delayed.
    pub emergency_tasks: Vec<String>,
    pub grace_minutes: i64,
    /// Delayed tasks are moved to `boundary + recovery_offset_minutes`.
    pub recovery_offset_minutes: i64,
    /// When the trigger is further away than this, the coordinator
    /// reschedules itself to the trigger instead of waiting in place.
    pub arm_ahead_minutes: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            task: "OpsiDailyDelay".to_string(),
            namespace_prefix: "Opsi".to_string(),
            cross_boundary_task: "OpsiCrossMonth".to_string(),
            emergency_tasks: vec!["OpsiAshBeacon".to_string()],
            grace_minutes: 5,
            recovery_offset_minutes: 5,
            arm_ahead_minutes: 10,
        }
    }
}

/// Which tasks the coordinator is allowed to move.
#[derive(Debug, Clone)]
pub struct DelayFilter {
    prefix: String,
    cross_boundary: String,
    emergency: Vec<String>,
    coordinator: String,
}

impl DelayFilter {
    pub fn from_config(config: &MaintenanceConfig) -> Self {
        Self {
            prefix: config.namespace_prefix.clone(),
            cross_boundary: config.cross_boundary_task.clone(),
            emergency: config.emergency_tasks.clone(),
            coordinator: config.task.clone(),
        }
    }

    pub fn should_delay(&self, name: &str) -> bool {
        let excluded = if !name.starts_with(&self.prefix) {
            Some("outside managed namespace")
        } else if name == self.cross_boundary {
            Some("cross-boundary task")
        } else if self.emergency.iter().any(|e| e == name) {
            Some("emergency task")
        } else if name == self.coordinator {
            Some("coordinator")
        } else {
            None
        };
        match excluded {
            Some(reason) => {
                debug!(task = name, reason, "not delayed");
                false
            }
            None => {
                debug!(task = name, "eligible for delay");
                true
            }
        }
    }
}

/// The lead time must be an integer in `[1, 60]`; anything else falls back
/// to 5 with a warning.
pub fn validate_lead_minutes(value: Option<&Value>) -> i64 {
    let valid = value
        .and_then(Value::as_i64)
        .filter(|m| (MIN_LEAD_MINUTES..=MAX_LEAD_MINUTES).contains(m));
    match valid {
        Some(m) => m,
        None => {
            warn!(
                value = ?value,
                default = DEFAULT_LEAD_MINUTES,
                "trigger lead must be an integer between 1 and 60, using default"
            );
            DEFAULT_LEAD_MINUTES
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Waiting for the trigger.
    Armed {
        trigger: NaiveDateTime,
        boundary: NaiveDateTime,
    },
    /// Tasks delayed, waiting for the boundary.
    Blackout { boundary: NaiveDateTime },
    /// Past the boundary, waiting out the grace period.
    RecoveryWait { until: NaiveDateTime },
    Restoring,
}

pub struct MaintenanceWindowCoordinator {
    config: MaintenanceConfig,
    filter: DelayFilter,
    store: DelayStateStore,
}

impl MaintenanceWindowCoordinator {
    pub fn new(config: MaintenanceConfig, store: DelayStateStore) -> Self {
        let filter = DelayFilter::from_config(&config);
        Self {
            config,
            filter,
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.task
    }

    pub fn filter(&self) -> &DelayFilter {
        &self.filter
    }

    pub fn store(&self) -> &DelayStateStore {
        &self.store
    }

    pub fn enable_path(&self) -> String {
        format!("{0}.{0}.Enable", self.config.task)
    }

    pub fn lead_path(&self) -> String {
        format!("{0}.{0}.TriggerMinutesBeforeReset", self.config.task)
    }

    /// Declare the feature switch and the lead time. The lead is declared
    /// untyped; it is validated on every read.
    pub fn declare_fields(&self, registry: &mut TaskRegistry) -> Result<()> {
        registry.declare(&self.enable_path(), FieldKind::Bool, Value::Bool(true))?;
        registry.declare(
            &self.lead_path(),
            FieldKind::Any,
            Value::from(DEFAULT_LEAD_MINUTES),
        )
    }

    fn enabled(&self, registry: &TaskRegistry) -> bool {
        match registry.get_as::<bool>(&self.enable_path()) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "maintenance switch unreadable, assuming enabled");
                true
            }
        }
    }

    pub fn lead_minutes(&self, registry: &TaskRegistry) -> i64 {
        validate_lead_minutes(registry.lookup(&self.lead_path()).as_ref())
    }

    /// Trigger of the next cycle that has not started yet.
    pub fn next_cycle_trigger(&self, registry: &TaskRegistry, now: NaiveDateTime) -> NaiveDateTime {
        let reset = registry.reset_schedule();
        let lead = TimeDelta::minutes(self.lead_minutes(registry));
        let boundary = reset.next_boundary(now);
        let trigger = boundary - lead;
        if trigger < now {
            reset.next_boundary(boundary) - lead
        } else {
            trigger
        }
    }

    /// When the coordinator should next be dispatched: `arm_ahead_minutes`
    /// before the next trigger, so a task still running at the trigger does
    /// not make it miss the cycle. Inside that window this run did not arm,
    /// so the following cycle is used.
    pub fn next_dispatch(&self, registry: &TaskRegistry, now: NaiveDateTime) -> NaiveDateTime {
        let ahead = TimeDelta::minutes(self.config.arm_ahead_minutes.clamp(0, MAX_ARM_AHEAD_MINUTES));
        let trigger = self.next_cycle_trigger(registry, now);
        if trigger - ahead > now {
            return trigger - ahead;
        }
        self.next_cycle_trigger(registry, trigger + TimeDelta::seconds(1)) - ahead
    }

    /// Move every eligible enabled task to `recovery`. Returns the number of
    /// tasks delayed.
    ///
    /// A due task (`next_run = None`) is recorded with `now` as its original
    /// time, which is still due after restore.
    pub async fn delay_all(
        &self,
        registry: &mut TaskRegistry,
        recovery: NaiveDateTime,
        now: NaiveDateTime,
    ) -> usize {
        let candidates: Vec<_> = registry
            .pending()
            .into_iter()
            .chain(registry.waiting())
            .filter(|t| self.filter.should_delay(t.name.as_str()))
            .collect();

        let mut delayed = 0;
        for task in candidates {
            let name = task.name.as_str();
            let has_record = matches!(self.store.load(name).await, Ok(Some(_)));
            if !has_record {
                let original = task.next_run.unwrap_or(now);
                if let Err(e) = self.store.save(name, original, recovery, now).await {
                    error!(task = name, error = %e, "delay record not saved, task left in place");
                    continue;
                }
            }
            match registry.set_next_run(name, Some(recovery)) {
                Ok(()) => {
                    info!(
                        task = name,
                        from = %task.next_run.map(format_timestamp).unwrap_or_else(|| "now".to_string()),
                        to = %format_timestamp(recovery),
                        "task delayed past maintenance"
                    );
                    delayed += 1;
                }
                Err(e) => error!(task = name, error = %e, "delay not applied"),
            }
        }
        info!(delayed, "maintenance delay applied");
        delayed
    }

    /// Put `task` back to its recorded time and delete the record.
    ///
    /// `Ok(false)` when there is nothing to restore.
    pub async fn restore(&self, registry: &mut TaskRegistry, task: &str) -> Result<bool> {
        let Some(record) = self.store.load(task).await? else {
            debug!(task, "no delay record, nothing to restore");
            return Ok(false);
        };
        let original = record.original()?;
        if !registry.contains(task) {
            return Err(RotaError::UnknownTask(task.to_string()));
        }
        registry.set_next_run(task, Some(original))?;
        self.store.clear(task).await?;
        info!(task, next_run = %record.original_next_run, "task restored");
        Ok(true)
    }

    /// Restore every stored record. Records that cannot be restored stay in
    /// the store. Returns the number restored.
    pub async fn restore_all(&self, registry: &mut TaskRegistry) -> usize {
        let entries = self.store.entries().await;
        if entries.is_empty() {
            info!("no delayed tasks to restore");
            return 0;
        }

        let mut restored = 0;
        for (task, record) in entries {
            if let Err(e) = record {
                warn!(task = %task, error = %e, "malformed delay record left in store");
                continue;
            }
            match self.restore(registry, &task).await {
                Ok(true) => restored += 1,
                Ok(false) => {}
                Err(e) => warn!(task = %task, error = %e, "delay record left in store"),
            }
        }
        info!(restored, "maintenance delay restored");
        restored
    }

    /// Handle records left by an interrupted cycle.
    ///
    /// Records whose delay is still in the future are re-applied; the rest
    /// are restored now. Returns the latest re-applied time, if any.
    pub async fn recover_orphans(
        &self,
        registry: &mut TaskRegistry,
        now: NaiveDateTime,
    ) -> Option<NaiveDateTime> {
        let mut latest: Option<NaiveDateTime> = None;
        let mut reapplied = 0;
        let mut restored = 0;

        for (task, record) in self.store.entries().await {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!(task = %task, error = %e, "malformed delay record left in store");
                    continue;
                }
            };
            match record.delayed() {
                Ok(delayed) if delayed > now => {
                    if let Err(e) = registry.set_next_run(&task, Some(delayed)) {
                        warn!(task = %task, error = %e, "orphaned delay not re-applied");
                        continue;
                    }
                    latest = latest.max(Some(delayed));
                    reapplied += 1;
                }
                _ => match self.restore(registry, &task).await {
                    Ok(true) => restored += 1,
                    Ok(false) => {}
                    Err(e) => warn!(task = %task, error = %e, "orphaned delay not restored"),
                },
            }
        }

        if reapplied + restored > 0 {
            info!(reapplied, restored, "recovered delay records from an interrupted cycle");
        }
        latest
    }

    /// Reschedule to the next cycle and stop.
    fn finish(&self, ctx: &mut TaskContext<'_>) -> Result<Control> {
        let next = self.next_dispatch(ctx.registry, ctx.now());
        match ctx.delay_self(DelayTarget::At(next)) {
            Ok(_) => info!(next_dispatch = %format_timestamp(next), "maintenance coordinator idle"),
            Err(e) => error!(error = %e, "maintenance coordinator not rescheduled"),
        }
        Ok(Control::Stop)
    }

    /// Decide the first phase of this run.
    async fn start(&self, ctx: &mut TaskContext<'_>) -> Option<Phase> {
        let now = ctx.now();
        if let Some(until) = self.recover_orphans(ctx.registry, now).await {
            return Some(Phase::RecoveryWait { until });
        }

        let lead = self.lead_minutes(ctx.registry);
        let boundary = ctx.registry.reset_schedule().next_boundary(now);
        let trigger = boundary - TimeDelta::minutes(lead);

        if trigger < now {
            info!(trigger = %format_timestamp(trigger), "trigger already passed, skipping this cycle");
            return None;
        }
        if trigger - now > TimeDelta::hours(24) {
            warn!(trigger = %format_timestamp(trigger), "trigger more than 24h away, skipping this cycle");
            return None;
        }
        if trigger - now > TimeDelta::minutes(self.config.arm_ahead_minutes) {
            debug!(trigger = %format_timestamp(trigger), "trigger not near yet");
            return None;
        }

        info!(
            trigger = %format_timestamp(trigger),
            boundary = %format_timestamp(boundary),
            lead,
            "maintenance window armed"
        );
        Some(Phase::Armed { trigger, boundary })
    }
}

#[async_trait]
impl TaskBody for MaintenanceWindowCoordinator {
    async fn run(&self, ctx: &mut TaskContext<'_>) -> Result<Control> {
        if !self.enabled(ctx.registry) {
            info!("maintenance coordination disabled");
            return self.finish(ctx);
        }

        let Some(mut phase) = self.start(ctx).await else {
            return self.finish(ctx);
        };

        loop {
            debug!(phase = ?phase, "maintenance phase");
            phase = match phase {
                Phase::Idle => return self.finish(ctx),
                Phase::Armed { trigger, boundary } => {
                    if !ctx.sleep_until(trigger).await {
                        return Ok(Control::Stop);
                    }
                    let recovery = boundary + TimeDelta::minutes(self.config.recovery_offset_minutes);
                    let now = ctx.now();
                    self.delay_all(ctx.registry, recovery, now).await;
                    Phase::Blackout { boundary }
                }
                Phase::Blackout { boundary } => {
                    if !ctx.sleep_until(boundary).await {
                        return Ok(Control::Stop);
                    }
                    Phase::RecoveryWait {
                        until: boundary + TimeDelta::minutes(self.config.grace_minutes),
                    }
                }
                Phase::RecoveryWait { until } => {
                    if !ctx.sleep_until(until).await {
                        return Ok(Control::Stop);
                    }
                    Phase::Restoring
                }
                Phase::Restoring => {
                    self.restore_all(ctx.registry).await;
                    Phase::Idle
                }
            };
        }
    }
}
