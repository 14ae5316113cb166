//! Per-query resource accounting.
//!
//! A [`ResourceGuard`] is owned by exactly one query execution. It never
//! fails: a breached limit is reported as a [`StopReason`], which the engine
//! turns into a normal, partial result.

use crate::config::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Completed,
    MaxSeconds,
    MaxMemoryBytes,
    MaxDocs,
    MaxQueryTerms,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Completed => "completed",
            StopReason::MaxSeconds => "max_seconds",
            StopReason::MaxMemoryBytes => "max_memory_bytes",
            StopReason::MaxDocs => "max_docs",
            StopReason::MaxQueryTerms => "max_query_terms",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StopReason::Completed)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monotonic time source. Only differences between readings matter.
pub trait Clock {
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for &ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Work done so far, reported at each checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub docs_scored: usize,
    pub terms_scored: usize,
    /// Bytes currently held by the query's own working set.
    pub working_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Continue,
    Stop(StopReason),
}

pub struct ResourceGuard<C: Clock = MonotonicClock> {
    limits: ResourceLimits,
    clock: C,
    started_at: Duration,
    peak_bytes: u64,
    checkpoints: usize,
    first_breach: Option<StopReason>,
}

impl ResourceGuard<MonotonicClock> {
    pub fn start(limits: &ResourceLimits) -> Self {
        Self::start_with_clock(limits, MonotonicClock::default())
    }
}

impl<C: Clock> ResourceGuard<C> {
    pub fn start_with_clock(limits: &ResourceLimits, clock: C) -> Self {
        let started_at = clock.now();
        Self { limits: limits.clone(), clock, started_at, peak_bytes: 0, checkpoints: 0, first_breach: None }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_sub(self.started_at)
    }

    pub fn peak_bytes(&self) -> u64 {
        self.peak_bytes
    }

    pub fn checkpoints(&self) -> usize {
        self.checkpoints
    }

    /// The planner dropped terms because of `max_query_terms`.
    pub fn note_term_truncation(&mut self) {
        self.record(StopReason::MaxQueryTerms);
    }

    /// The candidate set was capped by `max_docs`.
    pub fn note_candidate_cap(&mut self) {
        self.record(StopReason::MaxDocs);
    }

    /// Evaluate time and memory budgets between two units of work.
    pub fn checkpoint(&mut self, progress: &Progress) -> Checkpoint {
        self.checkpoints += 1;
        self.peak_bytes = self.peak_bytes.max(progress.working_bytes);

        let breach = self.time_breach().or_else(|| self.memory_breach());
        tracing::debug!(
            checkpoint = self.checkpoints,
            docs_scored = progress.docs_scored,
            terms_scored = progress.terms_scored,
            peak_bytes = self.peak_bytes,
            breach = breach.map(|r| r.as_str()),
            "checkpoint"
        );
        match breach {
            Some(reason) => {
                self.record(reason);
                Checkpoint::Stop(reason)
            }
            None => Checkpoint::Continue,
        }
    }

    /// Close out the query: the first breach recorded wins, otherwise `Completed`.
    pub fn finish(self) -> StopReason {
        self.first_breach.unwrap_or(StopReason::Completed)
    }

    fn time_breach(&self) -> Option<StopReason> {
        let max = self.limits.max_seconds?;
        (self.elapsed().as_secs_f64() >= max).then_some(StopReason::MaxSeconds)
    }

    fn memory_breach(&self) -> Option<StopReason> {
        let max = self.limits.max_memory_bytes?;
        (self.peak_bytes >= max).then_some(StopReason::MaxMemoryBytes)
    }

    fn record(&mut self, reason: StopReason) {
        if self.first_breach.is_none() {
            self.first_breach = Some(reason);
        }
    }
}
