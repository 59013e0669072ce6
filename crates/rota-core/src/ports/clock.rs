//! Clock port: current time and sleeping.
//!
//! Every wait in the core goes through `Clock::sleep`, so tests can run a
//! whole maintenance cycle instantly with `ManualClock`.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, TimeDelta};

use crate::domain::time::truncate_to_second;

#[async_trait]
pub trait Clock: Send + Sync {
    /// Local wall-clock time, second precision.
    fn now(&self) -> NaiveDateTime;

    async fn sleep(&self, duration: Duration);
}

/// Production clock: local time and `tokio::time::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        truncate_to_second(Local::now().naive_local())
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Test clock. `sleep` returns immediately after advancing `now` by the
/// requested duration, and records the slice.
#[derive(Debug)]
pub struct ManualClock {
    inner: Mutex<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    now: NaiveDateTime,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            inner: Mutex::new(ManualState {
                now,
                sleeps: Vec::new(),
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut ManualState) -> R) -> R {
        // a poisoned lock still holds a usable time value
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn set(&self, now: NaiveDateTime) {
        self.with(|s| s.now = now);
    }

    pub fn advance(&self, by: TimeDelta) {
        self.with(|s| s.now += by);
    }

    /// Every slice passed to `sleep`, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.with(|s| s.sleeps.clone())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        self.with(|s| s.now)
    }

    async fn sleep(&self, duration: Duration) {
        self.with(|s| {
            s.sleeps.push(duration);
            if let Some(next) = TimeDelta::from_std(duration)
                .ok()
                .and_then(|d| s.now.checked_add_signed(d))
            {
                s.now = next;
            }
        });
    }
}
