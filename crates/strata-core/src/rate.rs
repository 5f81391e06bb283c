//! Batch sizing under load.
//!
//! A fresh database (nothing live reads from it yet) can be filled as fast
//! as the upstream allows. A live system being reindexed must share the
//! database with readers, so its batches shrink and its pauses grow as load
//! rises.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Sampled health of the database host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Normalised load in `[0, 1]`; values outside are clamped.
    pub load: f64,
    /// `true` when the target database has no indexed data yet.
    pub fresh_start: bool,
}

impl HealthSnapshot {
    /// Snapshot of an idle, already populated database.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            load: 0.0,
            fresh_start: false,
        }
    }

    /// Operating mode implied by this snapshot.
    #[must_use]
    pub fn mode(&self) -> OperatingMode {
        if self.fresh_start {
            OperatingMode::FreshStart
        } else {
            OperatingMode::Reindexing
        }
    }

    fn clamped_load(&self) -> f64 {
        // An unreadable probe is treated as fully loaded.
        if self.load.is_nan() {
            1.0
        } else {
            self.load.clamp(0.0, 1.0)
        }
    }
}

/// How aggressively a job may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    /// Empty database, run at full speed.
    FreshStart,
    /// Live database, yield to readers.
    Reindexing,
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FreshStart => write!(f, "fresh_start"),
            Self::Reindexing => write!(f, "reindexing"),
        }
    }
}

/// Sizing parameters of one batch configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RatePolicy {
    /// Batch size on a fresh start.
    pub blocks_per_call: i64,
    /// Batch size while reindexing under low load.
    pub chunk_size: i64,
    /// Smallest batch ever handed out while reindexing.
    pub min_batch: i64,
    /// Load at or above which batches are at their minimum.
    pub high_load: f64,
    /// Load at or below which batches are at their maximum.
    pub low_load: f64,
    /// Pause after a batch under low load.
    pub base_delay: Duration,
    /// Pause after a batch under high load.
    pub max_delay: Duration,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            blocks_per_call: 1_000,
            chunk_size: 100,
            min_batch: 10,
            high_load: 0.8,
            low_load: 0.3,
            base_delay: Duration::ZERO,
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Batch size and pause chosen for the next window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatePlan {
    /// Maximum window length.
    pub batch_size: i64,
    /// Pause to honour after processing the window.
    pub delay: Duration,
}

impl RatePolicy {
    /// Checks that the policy is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidBatch`] for non-positive sizes, a
    /// minimum above the reindexing chunk, inverted load thresholds, or a
    /// maximum delay below the base delay.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.blocks_per_call <= 0 || self.chunk_size <= 0 || self.min_batch <= 0 {
            return Err(CoreError::InvalidBatch(format!(
                "sizes must be > 0 (blocks_per_call={}, chunk_size={}, min_batch={})",
                self.blocks_per_call, self.chunk_size, self.min_batch
            )));
        }
        if self.min_batch > self.chunk_size {
            return Err(CoreError::InvalidBatch(format!(
                "min_batch {} exceeds chunk_size {}",
                self.min_batch, self.chunk_size
            )));
        }
        if self.low_load >= self.high_load {
            return Err(CoreError::InvalidBatch(format!(
                "low_load {} must be below high_load {}",
                self.low_load, self.high_load
            )));
        }
        if self.max_delay < self.base_delay {
            return Err(CoreError::InvalidBatch(
                "max_delay must not be below base_delay".to_string(),
            ));
        }
        Ok(())
    }

    /// Plans the next batch for the given health.
    ///
    /// Between `low_load` and `high_load` the batch size shrinks and the
    /// delay grows linearly.
    #[must_use]
    pub fn plan(&self, health: &HealthSnapshot) -> RatePlan {
        if health.mode() == OperatingMode::FreshStart {
            return RatePlan {
                batch_size: self.blocks_per_call,
                delay: Duration::ZERO,
            };
        }
        let pressure = self.pressure(health.clamped_load());
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let batch_size = {
            let span = (self.chunk_size - self.min_batch) as f64;
            let shrunk = self.chunk_size - (span * pressure).round() as i64;
            shrunk.clamp(self.min_batch, self.chunk_size)
        };
        let delay = self.base_delay + self.max_delay.saturating_sub(self.base_delay).mul_f64(pressure);
        RatePlan { batch_size, delay }
    }

    /// Fraction of the way from `low_load` to `high_load`, in `[0, 1]`.
    fn pressure(&self, load: f64) -> f64 {
        if load <= self.low_load {
            0.0
        } else if load >= self.high_load {
            1.0
        } else {
            (load - self.low_load) / (self.high_load - self.low_load)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(load: f64) -> HealthSnapshot {
        HealthSnapshot {
            load,
            fresh_start: false,
        }
    }

    #[test]
    fn test_fresh_start_runs_full_speed() {
        let policy = RatePolicy::default();
        let plan = policy.plan(&HealthSnapshot {
            load: 0.99,
            fresh_start: true,
        });
        assert_eq!(plan.batch_size, 1_000);
        assert_eq!(plan.delay, Duration::ZERO);
    }

    #[test]
    fn test_reindexing_low_load_uses_chunk_size() {
        let plan = RatePolicy::default().plan(&loaded(0.1));
        assert_eq!(plan.batch_size, 100);
        assert_eq!(plan.delay, Duration::ZERO);
    }

    #[test]
    fn test_reindexing_high_load_clamps_to_min() {
        let plan = RatePolicy::default().plan(&loaded(0.95));
        assert_eq!(plan.batch_size, 10);
        assert_eq!(plan.delay, Duration::from_secs(5));
    }

    #[test]
    fn test_reindexing_interpolates() {
        let policy = RatePolicy::default();
        let mid = policy.plan(&loaded(0.55));
        assert_eq!(mid.batch_size, 55);
        assert!(mid.delay > Duration::ZERO && mid.delay < Duration::from_secs(5));
        let heavier = policy.plan(&loaded(0.7));
        assert!(heavier.batch_size < mid.batch_size);
        assert!(heavier.delay > mid.delay);
    }

    #[test]
    fn test_nan_load_is_cautious() {
        let plan = RatePolicy::default().plan(&loaded(f64::NAN));
        assert_eq!(plan.batch_size, 10);
    }

    #[test]
    fn test_validate() {
        assert!(RatePolicy::default().validate().is_ok());
        let bad = RatePolicy {
            min_batch: 500,
            ..RatePolicy::default()
        };
        assert!(bad.validate().is_err());
        let inverted = RatePolicy {
            low_load: 0.9,
            high_load: 0.1,
            ..RatePolicy::default()
        };
        assert!(inverted.validate().is_err());
        let zero = RatePolicy {
            chunk_size: 0,
            ..RatePolicy::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(HealthSnapshot::idle().mode().to_string(), "reindexing");
        assert_eq!(OperatingMode::FreshStart.to_string(), "fresh_start");
    }
}
