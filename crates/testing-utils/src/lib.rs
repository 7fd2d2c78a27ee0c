//! # Orchestrator Testing Utils
//!
//! Shared testing utilities for the import orchestrator workspace.
//!
//! ## Features
//!
//! - **Test Data Builders**: `ImportRequestBuilder`, `ScheduleBuilder`
//! - **Mock Executors**: scripted `ImportExecutor` implementations
//! - **Mock Audit Sinks**: sinks that fail on purpose
//! - **Integration Test Helpers**: polling and fixed-clock helpers
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! orchestrator-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
