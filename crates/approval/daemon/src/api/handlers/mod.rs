//! API request handlers

mod approvals;
mod decisions;
mod health;
mod todos;
mod workflows;

pub use approvals::*;
pub use decisions::*;
pub use health::*;
pub use todos::*;
pub use workflows::*;
