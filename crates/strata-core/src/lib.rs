//! # Strata Core
//!
//! Storage-independent logic for the checkpointed incremental pipeline and
//! the partition lifecycle manager.
//!
//! Everything in this crate is pure: it decides *what* should happen
//! (which window to process, which partition to create, which constraint
//! transition to apply, which SQL to run) and leaves *doing it* to the
//! storage backends in `strata-storage`.
//!
//! ## Modules
//!
//! - [`checkpoint`]: checkpoint records and `[start, end)` window planning
//! - [`partition`]: range partition layout, naming, and bound parsing
//! - [`constraint`]: the `empty → inserting → done` constraint state machine
//! - [`ddl`]: SQL statement builders for partition and cutover DDL
//! - [`rate`]: adaptive batch sizing from a health snapshot

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod checkpoint;
pub mod constraint;
pub mod ddl;
pub mod error;
pub mod partition;
pub mod rate;

pub use checkpoint::{Checkpoint, DependencyHeight, Window, WindowPlan};
pub use constraint::{
    plan_transition, CheckConstraint, ConstraintState, ConstraintTransition, ExistingConstraint,
    HeightBounds, InsertionStatus,
};
pub use error::CoreError;
pub use partition::{PartitionDescriptor, PartitionLayout};
pub use rate::{HealthSnapshot, OperatingMode, RatePlan, RatePolicy};

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
