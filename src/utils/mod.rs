//! Pure utility functions.
//!
//! These are stateless helpers shared by the library and its binaries.

pub mod bootstrap;
pub mod retry;
