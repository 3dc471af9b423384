//! # Timeout & Retry Policy
//!
//! Two independent budgets bound every blocking transport operation:
//!
//! ```text
//!  per wait:       arm_timeout() ──► timeout_expired()?  ──► Continue | TimedOut
//!  per operation:  reset_attempts() ──► attempt_allowed()? ──► Continue | Exhausted
//! ```
//!
//! A slow peer that keeps making progress re-arms the timer and never
//! spends the attempt budget, while a broken link is bounded by
//! `timeout × max_retries` of wall-clock time.
//!
//! A zero timeout never expires and zero retries never exhaust. Both at
//! zero is a valid configuration for a foreground call that must block
//! until the peer answers.

use serde::{Deserialize, Serialize};

use crate::traits::Clock;

/// Default per-wait timeout, in microseconds.
pub const DEFAULT_TIMEOUT_US: u64 = 5_000_000;

/// Default number of attempts per operation.
pub const DEFAULT_MAX_RETRIES: u8 = 4;

/// Unit of a timeout value handed to [`RetryPolicy::set_timeout`].
///
/// The discriminants match the resolution byte the host tool sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TimeResolution {
    Seconds = 0,
    Milliseconds = 1,
    Microseconds = 2,
    Nanoseconds = 3,
    Picoseconds = 4,
    Minutes = 5,
    Hours = 6,
}

impl TimeResolution {
    /// Convert `value` in this unit to microseconds, saturating on overflow.
    ///
    /// Sub-microsecond units round down.
    pub fn to_micros(self, value: u64) -> u64 {
        match self {
            TimeResolution::Seconds => value.saturating_mul(1_000_000),
            TimeResolution::Milliseconds => value.saturating_mul(1_000),
            TimeResolution::Microseconds => value,
            TimeResolution::Nanoseconds => value / 1_000,
            TimeResolution::Picoseconds => value / 1_000_000,
            TimeResolution::Minutes => value.saturating_mul(60_000_000),
            TimeResolution::Hours => value.saturating_mul(3_600_000_000),
        }
    }
}

impl TryFrom<u8> for TimeResolution {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Seconds),
            1 => Ok(Self::Milliseconds),
            2 => Ok(Self::Microseconds),
            3 => Ok(Self::Nanoseconds),
            4 => Ok(Self::Picoseconds),
            5 => Ok(Self::Minutes),
            6 => Ok(Self::Hours),
            _ => Err(()),
        }
    }
}

/// Transport timing configuration.
///
/// With both fields at zero a transport call never gives up: it blocks
/// through any number of resend requests until the peer answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransportConfig {
    /// Longest wait without progress, in microseconds. Zero never times out.
    pub timeout_us: u64,
    /// Attempts per operation. Zero retries forever.
    pub max_retries: u8,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_us: DEFAULT_TIMEOUT_US,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Timer and attempt counter for the one in-flight transport operation.
pub struct RetryPolicy<C: Clock> {
    clock: C,
    config: TransportConfig,
    armed_at: u64,
    attempts: u8,
}

impl<C: Clock> RetryPolicy<C> {
    pub fn new(clock: C, config: TransportConfig) -> Self {
        let armed_at = clock.now_us();
        Self {
            clock,
            config,
            armed_at,
            attempts: 0,
        }
    }

    pub fn config(&self) -> TransportConfig {
        self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Replace the timeout, converting from `resolution` to microseconds.
    pub fn set_timeout(&mut self, value: u64, resolution: TimeResolution) {
        self.config.timeout_us = resolution.to_micros(value);
    }

    pub fn set_max_retries(&mut self, max_retries: u8) {
        self.config.max_retries = max_retries;
    }

    /// Start timing a wait from now.
    pub fn arm_timeout(&mut self) {
        self.armed_at = self.clock.now_us();
    }

    /// Whether the current wait has run longer than the timeout.
    pub fn timeout_expired(&self) -> bool {
        if self.config.timeout_us == 0 {
            return false;
        }
        self.clock.now_us().wrapping_sub(self.armed_at) > self.config.timeout_us
    }

    /// Start a new logical operation.
    pub fn reset_attempts(&mut self) {
        self.attempts = 0;
    }

    /// Claim one attempt of the current operation.
    ///
    /// With `max_retries = N` this returns `true` exactly `N` times after
    /// [`reset_attempts`](Self::reset_attempts).
    pub fn attempt_allowed(&mut self) -> bool {
        if self.config.max_retries == 0 {
            return true;
        }
        if self.attempts >= self.config.max_retries {
            return false;
        }
        self.attempts += 1;
        true
    }

    /// Attempts claimed since the last reset.
    pub fn attempts_used(&self) -> u8 {
        self.attempts
    }
}
