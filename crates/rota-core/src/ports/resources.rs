//! Resource counter port.

use async_trait::async_trait;

use crate::domain::errors::Result;

/// Reads exhaustible counters (coins, action points, ...) from the environment.
///
/// Values are point-in-time snapshots; the core never caches them.
#[async_trait]
pub trait ResourceCounters: Send + Sync {
    async fn read_resource_counter(&self, kind: &str) -> Result<i64>;
}
