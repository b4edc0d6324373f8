//! Fleet coordinator - domain-wide management operations
//!
//! Pushes a management operation to every host controller and server in a
//! fleet using a prepare / commit-or-rollback / finalize protocol, collects
//! exactly one result per participant per phase, and assembles a single
//! domain outcome.

pub mod config;
pub mod error;
pub mod orchestration;
pub mod topology;
pub mod utils;
pub mod value;

pub use error::{CoordinationError, Result};
pub use value::StructuredValue;
