//! Checkpoint records and window planning.
//!
//! A [`Checkpoint`] is the persisted unit of progress for one job. A
//! [`Window`] is the half-open `[start, end)` range a single invocation of
//! that job may process. [`WindowPlan`] combines the job's own checkpoint,
//! the heights of the jobs it depends on, and an optional batch size into
//! the next safe window.
//!
//! ## Invariants
//!
//! - `end` never exceeds the minimum height among declared dependencies.
//! - A missing dependency contributes `0` and therefore blocks, unless the
//!   bootstrap fallback applies (see [`WindowPlan::needs_bootstrap`]).
//! - Checkpoint heights never move backwards ([`Checkpoint::advance_to`]).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Persisted progress marker for a single job.
///
/// `height` is a block height for block-following jobs and the last copied
/// primary-key value for migration jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique job name (primary key of the checkpoint table).
    pub job_name: String,
    /// Last processed height (exclusive upper bound of the last window).
    pub height: i64,
    /// Timestamp of the last persisted update.
    pub updated_at: Option<DateTime<Utc>>,
    /// Whether this record exists in the checkpoint table.
    #[serde(skip)]
    persisted: bool,
}

impl Checkpoint {
    /// Creates a new, not yet persisted checkpoint starting at `height`.
    #[must_use]
    pub fn pending(job_name: impl Into<String>, height: i64) -> Self {
        Self {
            job_name: job_name.into(),
            height,
            updated_at: None,
            persisted: false,
        }
    }

    /// Creates a checkpoint loaded from the checkpoint table.
    #[must_use]
    pub fn loaded(
        job_name: impl Into<String>,
        height: i64,
        updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            height,
            updated_at,
            persisted: true,
        }
    }

    /// Returns `true` if the record was read from the checkpoint table.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Moves the checkpoint forward to `height`.
    ///
    /// Advancing to the current height is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CheckpointRegression`] if `height` is below the
    /// current height.
    pub fn advance_to(&mut self, height: i64) -> Result<(), CoreError> {
        if height < self.height {
            return Err(CoreError::CheckpointRegression {
                job: self.job_name.clone(),
                from: self.height,
                to: height,
            });
        }
        self.height = height;
        Ok(())
    }

    /// Marks the record as written at `now`.
    pub fn mark_persisted(&mut self, now: DateTime<Utc>) {
        self.updated_at = Some(now);
        self.persisted = true;
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.job_name, self.height)
    }
}

/// Height reported by one dependency of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyHeight {
    /// The dependency has no checkpoint row yet.
    Missing,
    /// The dependency's persisted height.
    At(i64),
}

impl DependencyHeight {
    /// Height this dependency contributes to the floor when no fallback applies.
    #[must_use]
    pub fn contribution(self) -> i64 {
        match self {
            Self::Missing => 0,
            Self::At(h) => h,
        }
    }
}

impl From<Option<i64>> for DependencyHeight {
    fn from(value: Option<i64>) -> Self {
        value.map_or(Self::Missing, Self::At)
    }
}

/// Half-open range `[start, end)` a job invocation may process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// First height to process.
    pub start: i64,
    /// Exclusive upper bound.
    pub end: i64,
}

impl Window {
    /// Creates a window.
    #[must_use]
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Returns `true` if there is nothing to process (`start >= end`).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Number of heights covered; zero for empty windows.
    #[must_use]
    pub fn len(&self) -> i64 {
        (self.end - self.start).max(0)
    }

    /// Returns `true` if `height` lies inside the window.
    #[must_use]
    pub fn contains(&self, height: i64) -> bool {
        height >= self.start && height < self.end
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Inputs for computing the next window of a job.
#[derive(Debug, Clone, Default)]
pub struct WindowPlan {
    /// The job's current checkpoint height (or its genesis value).
    pub start: i64,
    /// Maximum window length, if the job is batch-limited.
    pub batch_size: Option<i64>,
    /// Heights of the jobs this job depends on, in declaration order.
    pub dependencies: Vec<DependencyHeight>,
    /// Floor substituted for missing dependencies when bootstrapping.
    ///
    /// Only consulted when [`needs_bootstrap`](Self::needs_bootstrap) holds.
    pub bootstrap_floor: Option<i64>,
}

impl WindowPlan {
    /// Creates a plan starting at `start` with no dependencies.
    #[must_use]
    pub fn starting_at(start: i64) -> Self {
        Self {
            start,
            ..Self::default()
        }
    }

    /// Returns `true` if the bootstrap fallback may replace missing
    /// dependencies.
    ///
    /// That is the case only when at least one dependency is missing and
    /// every dependency that *does* exist is above zero: the zero floor then
    /// comes solely from dependencies that have never run. Once a dependency
    /// has a row, even at height zero, its own progress governs.
    #[must_use]
    pub fn needs_bootstrap(&self) -> bool {
        let any_missing = self
            .dependencies
            .iter()
            .any(|d| matches!(d, DependencyHeight::Missing));
        let existing_positive = self.dependencies.iter().all(|d| match d {
            DependencyHeight::Missing => true,
            DependencyHeight::At(h) => *h > 0,
        });
        any_missing && existing_positive
    }

    /// Minimum dependency height without any fallback.
    ///
    /// `None` means the job has no dependencies and the floor is unbounded.
    #[must_use]
    pub fn dependency_floor(&self) -> Option<i64> {
        self.dependencies
            .iter()
            .map(|d| d.contribution())
            .min()
    }

    /// Floor after applying the bootstrap fallback where permitted.
    #[must_use]
    pub fn effective_floor(&self) -> Option<i64> {
        match self.bootstrap_floor {
            Some(fallback) if self.needs_bootstrap() => self
                .dependencies
                .iter()
                .map(|d| match d {
                    DependencyHeight::Missing => fallback,
                    DependencyHeight::At(h) => *h,
                })
                .min(),
            _ => self.dependency_floor(),
        }
    }

    /// Resolves the plan into a window.
    ///
    /// The returned window may be empty; callers skip the tick in that case.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnboundedWindow`] if the job has neither
    /// dependencies nor a batch size, and [`CoreError::InvalidBatch`] for a
    /// non-positive batch size.
    pub fn resolve(&self, job_name: &str) -> Result<Window, CoreError> {
        if let Some(batch) = self.batch_size {
            if batch <= 0 {
                return Err(CoreError::InvalidBatch(format!(
                    "batch size {batch} for job '{job_name}' must be > 0"
                )));
            }
        }
        let end = match (self.batch_size, self.effective_floor()) {
            (Some(batch), Some(floor)) => self.start.saturating_add(batch).min(floor),
            (Some(batch), None) => self.start.saturating_add(batch),
            (None, Some(floor)) => floor,
            (None, None) => return Err(CoreError::UnboundedWindow(job_name.to_string())),
        };
        Ok(Window::new(self.start, end))
    }
}
