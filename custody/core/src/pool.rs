// Copyright (c) 2024 The Botho Foundation

//! Bounded-concurrency worker pool for bulk downloads.

use futures::future::try_join_all;
use std::{future::Future, sync::Arc};
use tokio::sync::Semaphore;

/// Caps the number of in-flight tasks. Work beyond the cap waits in FIFO
/// order for a free slot.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run one task once a slot is free.
    pub async fn run<T>(&self, task: impl Future<Output = T>) -> T {
        // The semaphore is never closed.
        let _permit = self.permits.acquire().await.ok();
        task.await
    }

    /// Run `f` over every item through the pool, preserving input order.
    ///
    /// The first failure cancels the tasks that have not finished yet.
    pub async fn try_map<I, F, Fut, T, E>(&self, items: I, f: F) -> Result<Vec<T>, E>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        try_join_all(items.into_iter().map(|item| self.run(f(item)))).await
    }
}
