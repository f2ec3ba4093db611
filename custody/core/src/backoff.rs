// Copyright (c) 2024 The Botho Foundation

//! Exponential backoff schedule for notification retries.

use std::time::Duration;

/// What to do after a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// `delay(n) = base * factor^n`, with at most `max_retries` retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub factor: f64,
    pub max_retries: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            factor: 1.7,
            max_retries: 10,
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, factor: f64, max_retries: u32) -> Self {
        Self {
            base,
            factor,
            max_retries,
        }
    }

    /// Delay before the retry that follows `retries` earlier failures.
    pub fn delay(&self, retries: u32) -> Duration {
        let exp = i32::try_from(retries).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * self.factor.powi(exp);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Decide the next step for an entity that has already been retried
    /// `retries` times.
    pub fn next(&self, retries: u32) -> RetryDecision {
        if retries < self.max_retries {
            RetryDecision::RetryAfter(self.delay(retries))
        } else {
            RetryDecision::GiveUp
        }
    }
}
