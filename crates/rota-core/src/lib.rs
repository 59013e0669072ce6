//! rota-core
//!
//! Scheduling and resource coordination for a long-running automation bot.
//!
//! # Modules
//! - **domain**: task records, control signals, errors, reset boundary math
//! - **ports**: clock, resource counters, work-item source/performer
//! - **registry**: task catalog, shared dotted-path namespace, scoped overrides
//! - **store**: durable delay state for the maintenance window
//! - **coordination**: maintenance window, cooldown monitor, resource gates
//! - **app**: task bodies, the generic runner, the scheduler and its builder
//! - **impls**: in-memory port implementations for tests and the demo binary
//! - **config**: JSON configuration

pub mod app;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod registry;
pub mod store;
