// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the storage expansion workflow.
//!
//! These tests drive `ExpansionWorkflow` end to end WITHOUT a live
//! Kubernetes cluster. A scripted platform stands in for the cluster and
//! records every call, so the tests can assert what was provisioned,
//! patched and resized.
//!
//! ```bash
//! # Run all functional tests
//! cargo test --test functional
//!
//! # Run specific test
//! cargo test --test functional test_offline_expansion_when_disallowed
//! ```
//!
//! Retry and timeout behavior is tested with tokio's paused clock, so
//! multi-minute budgets complete in milliseconds.

mod fake_platform;

pub use fake_platform::*;
