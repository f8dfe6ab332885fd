//! Approval daemon library
//!
//! This module provides the components behind `approvald`:
//! - layered configuration
//! - REST API handlers over the approval engine
//! - server lifecycle, including the notification worker

pub mod api;
pub mod config;
pub mod error;
pub mod record_store;
pub mod server;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError};
pub use record_store::LoggingRecordStore;
pub use server::Server;
