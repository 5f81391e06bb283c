//! # Strata Storage
//!
//! Checkpoint store and partition catalog backends.
//!
//! The [`IndexStore`] and [`UnitOfWork`] traits are the only way the job
//! layer touches the database. Two backends implement them:
//!
//! - [`postgres::PgIndexStore`]: production backend over a
//!   `deadpool-postgres` pool
//! - [`memory::MemoryStore`]: in-memory engine with the same partition,
//!   constraint and rollback semantics, used by tests
//!
//! Every error carries an [`ErrorClass`] that tells the scheduler whether to
//! retry, skip, or report it.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{ErrorClass, StorageError};
pub use memory::MemoryStore;
pub use postgres::{PgIndexStore, StoreConfig};
pub use store::{IndexStore, StoreActivity, UnitOfWork};
