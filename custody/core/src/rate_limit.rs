// Copyright (c) 2024 The Botho Foundation

//! Strict request-rate limiter for backends that enforce a quota.

use governor::{DefaultDirectRateLimiter, Quota};
use std::{future::Future, num::NonZeroU32, time::Duration};

/// Spaces calls evenly so that no more than `per_second` start in any
/// one-second window. Bursts are not allowed.
pub struct RateLimiter {
    inner: DefaultDirectRateLimiter,
}

impl RateLimiter {
    pub fn per_second(per_second: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let period = Duration::from_secs(1) / per_second.get();
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(per_second))
            .allow_burst(NonZeroU32::MIN);
        Self {
            inner: DefaultDirectRateLimiter::direct(quota),
        }
    }

    /// Wait for the next free slot.
    pub async fn until_ready(&self) {
        self.inner.until_ready().await;
    }

    /// Wait for a slot, then run `task`.
    pub async fn run<T>(&self, task: impl Future<Output = T>) -> T {
        self.until_ready().await;
        task.await
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}
