//! storage-expansion library crate
//!
//! Verifies that CloudNativePG clusters can grow their persistent volumes,
//! online when the storage class allows volume expansion and offline when
//! it does not. The binary in `main.rs` runs both scenarios against the
//! current kubeconfig context.

pub mod capability;
pub mod config;
pub mod crd;
pub mod error;
pub mod platform;
pub mod retry;
pub mod scenario;
pub mod workflow;

pub use capability::{StorageCapability, probe_capability};
pub use config::{ConfigError, TestLevel, WorkflowConfig};
pub use error::{FailureKind, PlatformError, ScenarioError};
pub use platform::{ClusterPlatform, CommandOutput, KubePlatform};
pub use retry::{RetryError, RetryPolicy, RetryTimeout, retry_until_ok, retry_while};
pub use scenario::{ExpansionScenario, Gate};
pub use workflow::{
    ExpansionWorkflow, ScenarioOutcome, ScenarioReport, SuiteReport, WorkflowPhase,
};
