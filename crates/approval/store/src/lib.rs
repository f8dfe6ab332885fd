//! Approval storage abstractions.
//!
//! This crate defines the storage contract the approval engine runs on:
//! - workflow definitions with sequential ids and versions
//! - approval instances, guarded by the one-active-instance-per-record rule
//! - step executions and todos, written with compare-and-set versions
//! - append-only instance history and pending record-store outcomes
//!
//! Every state-machine transition is persisted as a single [`ChangeSet`]
//! through [`ChangeStore::commit`]: either all of it applies or none of it.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod model;
mod traits;

pub use error::{StorageError, StorageResult};
pub use model::{ChangeSet, HasVersion, Versioned};
pub use traits::{ApprovalStore, ChangeStore, DefinitionStore, InstanceStore, TodoStore};
