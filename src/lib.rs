//! Black-box test orchestration for IRC daemons
//!
//! Drives an externally supplied IRC server as an opaque process, opens
//! simulated client connections against it, and verifies observable
//! behavior by matching received lines against expected patterns within
//! time bounds. The server's output is never parsed into a protocol model;
//! it is line-oriented text to be matched.

pub mod common;
pub mod pattern;
pub mod scenario;
pub mod server;
pub mod session;
pub mod stress;
pub mod transport;

// Re-export commonly used types for tests
pub use common::{Config, Error, Result};
pub use scenario::{Harness, SuiteSummary, TestResult};
