//! # Strata DB
//!
//! Job layer of the Strata indexer: checkpointed incremental jobs, the
//! partition lifecycle, the constraint state machine and the live
//! migration to a partitioned table, all driven by one scheduler.
//!
//! ```text
//!   IndexerConfig ──► JobRegistry ──► Scheduler ──► tick ──► JobHandler
//!                                         │                     │
//!                                  MetricsRegistry       UnitOfWork (commit)
//! ```
//!
//! Every job tick either commits its writes together with its checkpoint
//! or rolls everything back. Errors carry an
//! [`ErrorClass`](strata_storage::ErrorClass) that picks the log level and
//! whether the ticker backs off before retrying.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constraint_reconciler;
pub mod error;
pub mod fanout;
pub mod job;
pub mod metrics;
pub mod migration;
pub mod partition_manager;
pub mod rate_controller;
pub mod registry;
pub mod scheduler;
pub mod status;
pub mod window;

pub use config::IndexerConfig;
pub use constraint_reconciler::{ConstraintJob, ConstraintReconciler};
pub use error::DbError;
pub use fanout::for_each_bounded;
pub use job::{IncrementalJob, JobHandler, SqlWindowProcessor, TickOutcome, WindowProcessor};
pub use metrics::{JobMetrics, JobMetricsSnapshot, MetricsRegistry};
pub use migration::{MigrationOrchestrator, MigrationReport};
pub use partition_manager::{PartitionJob, PartitionManager};
pub use rate_controller::{HealthProbe, RateController, StaticProbe, StoreHealthProbe};
pub use registry::JobRegistry;
pub use scheduler::Scheduler;
pub use status::CheckpointSummaryJob;
pub use window::{WindowCalculator, WindowOutcome};
