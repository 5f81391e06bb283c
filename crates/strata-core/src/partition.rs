//! Range partition layout.
//!
//! Partitions of a growing table cover contiguous, step-aligned id ranges
//! `[step * k, step * (k + 1))`. The layout decides when the next partition
//! is due (once the open partition has crossed its midpoint), which
//! partitions a span of ids needs, and how partitions are named.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A child partition and its declared half-open id range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    /// Table name of the partition.
    pub name: String,
    /// Inclusive lower bound.
    pub from_id: i64,
    /// Exclusive upper bound.
    pub to_id: i64,
}

impl PartitionDescriptor {
    /// Creates a descriptor named deterministically after `parent` and the bounds.
    #[must_use]
    pub fn for_range(parent: &str, from_id: i64, to_id: i64) -> Self {
        Self {
            name: partition_name(parent, from_id, to_id),
            from_id,
            to_id,
        }
    }

    /// Returns `true` if `id` falls inside `[from_id, to_id)`.
    #[must_use]
    pub fn contains(&self, id: i64) -> bool {
        id >= self.from_id && id < self.to_id
    }

    /// The last id that belongs to this partition.
    #[must_use]
    pub fn last_id(&self) -> i64 {
        self.to_id - 1
    }

    /// Returns `true` if the two ranges share at least one id.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.from_id < other.to_id && other.from_id < self.to_id
    }
}

impl fmt::Display for PartitionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}, {})", self.name, self.from_id, self.to_id)
    }
}

/// Deterministic partition name for a parent table and range.
///
/// Schema-qualified parents keep their schema: `chain.event` with
/// `[0, 1000)` becomes `chain.event_0_1000`.
#[must_use]
pub fn partition_name(parent: &str, from_id: i64, to_id: i64) -> String {
    format!("{parent}_{from_id}_{to_id}")
}

/// Fixed-step range partitioning scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLayout {
    step: i64,
}

impl PartitionLayout {
    /// Creates a layout with the given partition size.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidStep`] if `step <= 0`.
    pub fn new(step: i64) -> Result<Self, CoreError> {
        if step <= 0 {
            return Err(CoreError::InvalidStep(step));
        }
        Ok(Self { step })
    }

    /// Partition size.
    #[must_use]
    pub fn step(&self) -> i64 {
        self.step
    }

    /// Index of the step-aligned bucket containing `id`.
    #[must_use]
    pub fn bucket_of(&self, id: i64) -> i64 {
        id.div_euclid(self.step)
    }

    /// Range of bucket `bucket`.
    #[must_use]
    pub fn bucket_range(&self, bucket: i64) -> (i64, i64) {
        let from = bucket.saturating_mul(self.step);
        (from, from.saturating_add(self.step))
    }

    /// Partition that must hold `id`.
    #[must_use]
    pub fn partition_for(&self, parent: &str, id: i64) -> PartitionDescriptor {
        let (from, to) = self.bucket_range(self.bucket_of(id));
        PartitionDescriptor::for_range(parent, from, to)
    }

    /// Returns the next partition to create proactively, if it is due.
    ///
    /// The next partition is due once the open partition (the one holding
    /// `max_id`) is at least half full, so it exists well before the first
    /// row that needs it arrives.
    #[must_use]
    pub fn next_partition_due(&self, parent: &str, max_id: i64) -> Option<PartitionDescriptor> {
        let offset = max_id.rem_euclid(self.step);
        // offset * 2 < step, written to stay clear of overflow.
        if offset < self.step - offset {
            return None;
        }
        let (from, to) = self.bucket_range(self.bucket_of(max_id) + 1);
        Some(PartitionDescriptor::for_range(parent, from, to))
    }

    /// All partitions intersecting the inclusive id span `[start, end]`.
    ///
    /// Returns an empty list when `end < start`.
    #[must_use]
    pub fn covering(&self, parent: &str, start: i64, end: i64) -> Vec<PartitionDescriptor> {
        if end < start {
            return Vec::new();
        }
        (self.bucket_of(start)..=self.bucket_of(end))
            .map(|bucket| {
                let (from, to) = self.bucket_range(bucket);
                PartitionDescriptor::for_range(parent, from, to)
            })
            .collect()
    }

    /// Returns `true` if `partition` is exactly one step-aligned bucket.
    #[must_use]
    pub fn is_aligned(&self, partition: &PartitionDescriptor) -> bool {
        partition.from_id.rem_euclid(self.step) == 0
            && partition.to_id - partition.from_id == self.step
    }
}

/// Parses a `pg_get_expr(relpartbound, oid)` range bound.
///
/// Accepts both quoted and unquoted forms:
/// `FOR VALUES FROM ('0') TO ('1000')` and `FOR VALUES FROM (0) TO (1000)`.
///
/// # Errors
///
/// Returns [`CoreError::MalformedBound`] for `DEFAULT` partitions,
/// `MINVALUE`/`MAXVALUE` bounds, multi-column bounds, or anything else that
/// is not a single integer range.
pub fn parse_partition_bound(expr: &str) -> Result<(i64, i64), CoreError> {
    let malformed = || CoreError::MalformedBound(expr.to_string());
    let upper = expr.to_ascii_uppercase();
    let from_at = upper.find("FROM (").ok_or_else(malformed)?;
    let to_at = upper.find(") TO (").ok_or_else(malformed)?;
    if to_at < from_at {
        return Err(malformed());
    }
    let from_raw = &expr[from_at + "FROM (".len()..to_at];
    let rest = &expr[to_at + ") TO (".len()..];
    let to_raw = rest.strip_suffix(')').unwrap_or(rest);
    let to_raw = to_raw.split(')').next().ok_or_else(malformed)?;
    let parse = |raw: &str| -> Result<i64, CoreError> {
        let trimmed = raw.trim().trim_matches('\'');
        trimmed.parse::<i64>().map_err(|_| malformed())
    };
    let from = parse(from_raw)?;
    let to = parse(to_raw)?;
    if to <= from {
        return Err(malformed());
    }
    Ok((from, to))
}
