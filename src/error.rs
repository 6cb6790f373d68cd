//! Error types for the verification workflow.
//!
//! `PlatformError` is what the cluster collaborators return. `ScenarioError`
//! is the classified failure a scenario terminates with.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::workflow::WorkflowPhase;

/// Error returned by a [`ClusterPlatform`](crate::platform::ClusterPlatform) operation.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// A shell command exited unsuccessfully
    #[error("command `{command}` failed ({status}): {stderr}")]
    Command {
        command: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    /// A shell command could not be started
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Manifest template could not be read or rendered
    #[error("template error: {0}")]
    Template(String),

    /// Rendered manifest is not a usable Cluster
    #[error("invalid manifest: {0}")]
    Manifest(String),

    /// Volumes did not reach the requested state in time
    #[error("not converged after {timeout:?}: {last_observed}")]
    ConvergenceTimeout {
        timeout: Duration,
        last_observed: String,
    },

    /// A retried operation never succeeded
    #[error("{operation} did not succeed: {message}")]
    Exhausted { operation: String, message: String },

    /// Observed state contradicts what the operation expects
    #[error("unexpected state: {0}")]
    Unexpected(String),
}

impl PlatformError {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error is worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            PlatformError::Kube(e) => {
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                ) || matches!(e, kube::Error::Service(_) | kube::Error::HyperError(_))
            }
            PlatformError::Command { .. } | PlatformError::Unexpected(_) => true,
            PlatformError::Spawn { .. }
            | PlatformError::Template(_)
            | PlatformError::Manifest(_)
            | PlatformError::ConvergenceTimeout { .. }
            | PlatformError::Exhausted { .. } => false,
        }
    }
}

/// Classification of a failed scenario.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Environment could not be probed or provisioned
    Setup,
    /// A transient patch error outlived its retry budget
    PatchTimeout,
    /// The resize primitive reported a failure
    Resize,
    /// Volumes never reached the requested size
    ConvergenceTimeout,
    /// The workflow asked for a transition its table does not allow
    InvalidTransition,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Setup => write!(f, "SetupError"),
            FailureKind::PatchTimeout => write!(f, "PatchTimeout"),
            FailureKind::Resize => write!(f, "ResizeError"),
            FailureKind::ConvergenceTimeout => write!(f, "ConvergenceTimeout"),
            FailureKind::InvalidTransition => write!(f, "InvalidTransition"),
        }
    }
}

/// Terminal failure of a single scenario.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// Probe, namespace or cluster creation failed
    #[error("setup failed in {phase}: {source}")]
    Setup {
        phase: WorkflowPhase,
        #[source]
        source: PlatformError,
    },

    /// Patch kept failing until its deadline
    #[error(
        "`{command}` did not succeed within {timeout:?} ({attempts} attempts), last error: {last_error}"
    )]
    PatchTimeout {
        command: String,
        timeout: Duration,
        attempts: u32,
        last_error: String,
    },

    /// Resize primitive failed
    #[error("resize failed in {phase}: {source}")]
    Resize {
        phase: WorkflowPhase,
        #[source]
        source: PlatformError,
    },

    /// Volumes never converged
    #[error("volumes did not converge in {phase}: {source}")]
    Convergence {
        phase: WorkflowPhase,
        #[source]
        source: PlatformError,
    },

    /// No transition for the event in the current phase
    #[error("invalid transition from {from} on {event}")]
    InvalidTransition { from: WorkflowPhase, event: String },
}

impl ScenarioError {
    /// Wrap a platform failure that happened while executing `phase`.
    ///
    /// Convergence timeouts are reported as such regardless of the phase.
    pub fn during(phase: WorkflowPhase, source: PlatformError) -> Self {
        match (&source, phase) {
            (PlatformError::ConvergenceTimeout { .. }, _) | (_, WorkflowPhase::AssertConverged) => {
                ScenarioError::Convergence { phase, source }
            }
            (
                _,
                WorkflowPhase::ProbeCapability
                | WorkflowPhase::CreateNamespace
                | WorkflowPhase::CreateCluster,
            ) => ScenarioError::Setup { phase, source },
            _ => ScenarioError::Resize { phase, source },
        }
    }

    /// Classify this failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            ScenarioError::Setup { .. } => FailureKind::Setup,
            ScenarioError::PatchTimeout { .. } => FailureKind::PatchTimeout,
            ScenarioError::Resize { .. } => FailureKind::Resize,
            ScenarioError::Convergence { .. } => FailureKind::ConvergenceTimeout,
            ScenarioError::InvalidTransition { .. } => FailureKind::InvalidTransition,
        }
    }
}

/// Result type alias for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;
