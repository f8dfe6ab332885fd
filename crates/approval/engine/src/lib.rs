//! Approval Workflow Engine
//!
//! Routes business records through the workflow definitions held in an
//! [`approval_store::ApprovalStore`]:
//!
//! - [`DefinitionRegistry`] selects the definition a record must go through
//! - [`ApproverResolver`] turns a step's approver spec into concrete users
//! - [`StateMachine`] computes each transition as one atomic change set
//! - [`TodoLedger`] owns the per-actor work items
//! - [`NotificationOutbox`] mirrors todo changes to external channels
//! - [`RecordStore`] receives terminal outcomes
//!
//! [`ApprovalEngine`] ties these together and is the only entry point the
//! daemon uses.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod definition_registry;
pub mod directory;
pub mod engine;
pub mod ledger;
pub mod notify;
pub mod record_store;
pub mod resolver;
pub mod state_machine;

pub use config::{EngineConfig, NotificationConfig};
pub use definition_registry::{select_from, DefinitionRegistry};
pub use directory::{DirectoryUser, IdentityDirectory, InMemoryDirectory};
pub use engine::{ApprovalEngine, StartOutcome, StartRequest};
pub use ledger::{NewTask, TodoLedger};
pub use notify::{
    DispatchError, FlushReport, LoggingDispatcher, NotificationDispatcher, NotificationOutbox,
};
pub use record_store::{RecordStore, RecordStoreError};
pub use resolver::ApproverResolver;
pub use state_machine::{
    Activation, DecisionContext, DecisionEffect, StateMachine, Transition, APPROVAL_TODO_PRIORITY,
};
