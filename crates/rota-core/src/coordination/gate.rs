//! Threshold gating on exhaustible counters.

use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::decision::GateDecision;
use crate::domain::errors::{Result, RotaError};
use crate::ports::ResourceCounters;
use crate::registry::TaskRegistry;

pub struct ResourceGate;

impl ResourceGate {
    /// `threshold == 0` disables gating. Otherwise `current >= threshold`
    /// hands control to the alternate task.
    pub fn decide(current: i64, threshold: i64) -> GateDecision {
        if threshold < 0 {
            warn!(threshold, "negative gate threshold, gating disabled");
            return GateDecision::Proceed;
        }
        if threshold == 0 || current < threshold {
            GateDecision::Proceed
        } else {
            GateDecision::Switch
        }
    }
}

/// Point-in-time counter value. Never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub kind: String,
    pub value: i64,
    pub read_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateEvaluation {
    pub snapshot: ResourceSnapshot,
    pub threshold: i64,
    pub decision: GateDecision,
}

/// Gate whose threshold lives in the shared namespace.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatePolicy {
    /// Counter kind passed to `read_resource_counter`.
    pub counter: String,
    /// Namespace path of the threshold (0 disables).
    pub threshold_path: String,
    /// Task invoked when the gate switches.
    pub alternate: Option<String>,
    /// How long the gated task waits before running again; `None` defers to
    /// the next maintenance boundary.
    #[serde(default)]
    pub resume_after_minutes: Option<i64>,
}

impl GatePolicy {
    fn threshold(&self, registry: &TaskRegistry) -> i64 {
        match registry.get_as::<i64>(&self.threshold_path) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %self.threshold_path, error = %e, "gate threshold unreadable, gating disabled");
                0
            }
        }
    }

    pub async fn evaluate(
        &self,
        registry: &TaskRegistry,
        counters: &dyn ResourceCounters,
        now: NaiveDateTime,
    ) -> Result<GateEvaluation> {
        let threshold = self.threshold(registry);
        let value = counters.read_resource_counter(&self.counter).await?;
        let decision = ResourceGate::decide(value, threshold);
        if decision == GateDecision::Switch {
            info!(counter = %self.counter, value, threshold, "gate threshold reached");
        }
        Ok(GateEvaluation {
            snapshot: ResourceSnapshot {
                kind: self.counter.clone(),
                value,
                read_at: now,
            },
            threshold,
            decision,
        })
    }
}

/// Minimum a counter must hold before the task can do any work.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceRequirement {
    pub counter: String,
    /// Namespace path of the minimum.
    pub minimum_path: String,
    pub retry_after_minutes: i64,
    /// Task invoked while this one waits for the counter to refill.
    #[serde(default)]
    pub alternate: Option<String>,
}

impl ResourceRequirement {
    /// `Err(ResourceExhausted)` when the counter is below the minimum.
    pub async fn check(&self, registry: &TaskRegistry, counters: &dyn ResourceCounters) -> Result<i64> {
        let minimum = match registry.get_as::<i64>(&self.minimum_path) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %self.minimum_path, error = %e, "resource minimum unreadable, requirement skipped");
                return counters.read_resource_counter(&self.counter).await;
            }
        };
        let current = counters.read_resource_counter(&self.counter).await?;
        if current < minimum {
            return Err(RotaError::ResourceExhausted {
                resource: self.counter.clone(),
                current,
                required: minimum,
            });
        }
        Ok(current)
    }
}
