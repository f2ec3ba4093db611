// Copyright (c) 2024 The Botho Foundation

//! Single-flight state for periodic jobs.
//!
//! Each periodic job owns a [`JobState`]. A cycle starts only when the state
//! is idle; a cycle that finds it busy is skipped, not queued. The returned
//! [`JobGuard`] puts the state back to idle when dropped, whatever way the
//! cycle ends.

use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

/// A job's set of phases. Code `0` is always idle.
pub trait JobPhase: Copy + Eq + std::fmt::Debug {
    fn code(self) -> u8;
    fn from_code(code: u8) -> Self;
}

/// Phases of the chain scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Idle,
    Syncing,
}

impl JobPhase for ScanPhase {
    fn code(self) -> u8 {
        match self {
            ScanPhase::Idle => 0,
            ScanPhase::Syncing => 1,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            0 => ScanPhase::Idle,
            _ => ScanPhase::Syncing,
        }
    }
}

/// Phases shared by balance refresh and sweeping, which touch the same
/// balance rows and must never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    Idle,
    Updating,
    Sweeping,
}

impl JobPhase for SweepPhase {
    fn code(self) -> u8 {
        match self {
            SweepPhase::Idle => 0,
            SweepPhase::Updating => 1,
            SweepPhase::Sweeping => 2,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            0 => SweepPhase::Idle,
            1 => SweepPhase::Updating,
            _ => SweepPhase::Sweeping,
        }
    }
}

/// Two-phase state for jobs that are simply running or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Running,
}

impl JobPhase for RunPhase {
    fn code(self) -> u8 {
        match self {
            RunPhase::Idle => 0,
            RunPhase::Running => 1,
        }
    }

    fn from_code(code: u8) -> Self {
        match code {
            0 => RunPhase::Idle,
            _ => RunPhase::Running,
        }
    }
}

/// Shared, cloneable state flag of one job.
#[derive(Debug)]
pub struct JobState<P> {
    code: Arc<AtomicU8>,
    _phase: PhantomData<P>,
}

impl<P> Clone for JobState<P> {
    fn clone(&self) -> Self {
        Self {
            code: self.code.clone(),
            _phase: PhantomData,
        }
    }
}

impl<P: JobPhase> Default for JobState<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: JobPhase> JobState<P> {
    pub fn new() -> Self {
        Self {
            code: Arc::new(AtomicU8::new(0)),
            _phase: PhantomData,
        }
    }

    pub fn current(&self) -> P {
        P::from_code(self.code.load(Ordering::Acquire))
    }

    pub fn is_idle(&self) -> bool {
        self.code.load(Ordering::Acquire) == 0
    }

    /// Move from idle to `phase`. Returns `None` if the job is busy.
    pub fn try_begin(&self, phase: P) -> Option<JobGuard<P>> {
        self.code
            .compare_exchange(0, phase.code(), Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| JobGuard {
                code: self.code.clone(),
                _phase: PhantomData,
            })
    }
}

/// Releases the job back to idle on drop.
#[derive(Debug)]
pub struct JobGuard<P> {
    code: Arc<AtomicU8>,
    _phase: PhantomData<P>,
}

impl<P> Drop for JobGuard<P> {
    fn drop(&mut self) {
        self.code.store(0, Ordering::Release);
    }
}
