//! Kernel Ticks
//!
//! Timeouts and timer periods are expressed in ticks. With the default
//! [`TICK_RATE_HZ`] one tick is one millisecond.
//!
//! Two timeouts are special:
//! - [`MAX_DELAY`]: wait forever
//! - [`NO_WAIT`]: poll once and return

use core::time::Duration;
use std::time::Instant;

use crate::config::TICK_RATE_HZ;

/// Tick count / timeout type
pub type TickType = u32;

/// Block indefinitely
pub const MAX_DELAY: TickType = TickType::MAX;

/// Do not block at all
pub const NO_WAIT: TickType = 0;

/// Boot instant, latched on first use
static TICK_ORIGIN: spin::Once<Instant> = spin::Once::new();

/// Convert ticks to a host duration
#[inline]
pub fn ticks_to_duration(ticks: TickType) -> Duration {
    Duration::from_micros(ticks as u64 * 1_000_000 / TICK_RATE_HZ as u64)
}

/// Convert milliseconds to ticks (rounding down, saturating)
#[inline]
pub fn ms_to_ticks(ms: u32) -> TickType {
    let ticks = ms as u64 * TICK_RATE_HZ as u64 / 1000;
    ticks.min(MAX_DELAY as u64 - 1) as TickType
}

/// Ticks elapsed since the tick origin (wraps like a hardware counter)
pub fn tick_count() -> TickType {
    let origin = TICK_ORIGIN.call_once(Instant::now);
    let elapsed = origin.elapsed();
    (elapsed.as_micros() * TICK_RATE_HZ as u128 / 1_000_000) as TickType
}

/// Absolute point in time a bounded wait gives up at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// None means wait forever
    at: Option<Instant>,
}

impl Deadline {
    /// Deadline `timeout` ticks from now
    pub fn after(timeout: TickType) -> Self {
        if timeout == MAX_DELAY {
            return Self::never();
        }
        Self {
            at: Some(Instant::now() + ticks_to_duration(timeout)),
        }
    }

    /// A deadline that never expires
    pub const fn never() -> Self {
        Self { at: None }
    }

    /// Time left before expiry; None for an infinite wait
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Check if the deadline has passed
    pub fn expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }
}
