//! Suite definitions and their execution
//!
//! A suite is an ordered list of test cases; a case connects its client
//! roles, runs steps and procedure invocations in order, and always
//! disconnects on the way out. Suites load from YAML or are built in code.

pub mod config;
pub mod procedures;
pub mod runner;

pub use config::{CaseEntry, CaseSpec, ExpectSpec, PatternSpec, StepSpec, SuiteFile};
pub use procedures::ProcedureRegistry;
pub use runner::{Harness, SuiteSummary, TestResult};
