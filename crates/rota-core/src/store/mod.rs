//! Durable scheduling state.

pub mod delay_state;

pub use self::delay_state::{DelayRecord, DelayStateStore};
