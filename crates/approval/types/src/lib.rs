//! Approval Workflow Domain Types
//!
//! Business records (contracts, opportunities, expenses, ...) are routed
//! through a flat, ordered list of approval steps before they are
//! considered approved. This crate holds the shared vocabulary used by the
//! store, the engine and the daemon.
//!
//! # Key Concepts
//!
//! - **WorkflowDefinition**: the per-module blueprint: ordered steps,
//!   amount conditions, priority and an active flag.
//! - **ApprovalInstance**: one execution of a definition against one record.
//!   At most one instance per record is active at a time.
//! - **StepExecution**: the decisions collected for one activation of one
//!   step. Closed executions are immutable.
//! - **Todo**: a unit of work owned by one actor, either bound to an
//!   approval step through a single-use task token, or free-standing.
//! - **HistoryEntry**: the append-only audit trail of an instance.
//!
//! # Design Principles
//!
//! 1. Records are referenced by a tagged pair (module type, module id),
//!    never by inheritance.
//! 2. Every state change is versioned so stores can apply it with
//!    compare-and-set semantics.
//! 3. Terminal states never re-open.

#![deny(unsafe_code)]

mod decision;
mod definition;
mod errors;
mod execution;
mod history;
mod instance;
mod module;
mod todo;

pub use decision::*;
pub use definition::*;
pub use errors::*;
pub use execution::*;
pub use history::*;
pub use instance::*;
pub use module::*;
pub use todo::*;
