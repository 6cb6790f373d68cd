//! The cluster collaborators the workflow drives.
//!
//! [`ClusterPlatform`] is the seam between the verification workflow and the
//! environment: namespace and cluster provisioning, the resize primitives,
//! the storage capability query and command execution. [`KubePlatform`] is
//! the implementation backed by a live Kubernetes cluster.

mod kubernetes;
pub mod template;
pub mod volumes;
pub mod wait;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::error::Result;

pub use kubernetes::KubePlatform;

/// Captured output of a command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Operations the verification workflow needs from its environment.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterPlatform: Send + Sync {
    /// `allowVolumeExpansion` of a storage class; `None` when the attribute is absent.
    async fn storage_allow_expansion(&self, storage_class: &str) -> Result<Option<bool>>;

    /// Create an isolated namespace named `{prefix}-{suffix}` and return its name.
    async fn create_unique_namespace(&self, prefix: &str) -> Result<String>;

    /// Create a cluster from a manifest template and wait until it is ready.
    async fn create_cluster(
        &self,
        namespace: &str,
        cluster_name: &str,
        manifest_template: &Path,
    ) -> Result<()>;

    /// Grow the cluster's volumes in place and verify they converge.
    async fn online_resize_pvc(&self, namespace: &str, cluster_name: &str) -> Result<()>;

    /// Grow the cluster's volumes by recreating them, within `timeout`.
    async fn offline_resize_pvc(
        &self,
        namespace: &str,
        cluster_name: &str,
        timeout: Duration,
    ) -> Result<()>;

    /// Run a shell-style command. A non-zero exit is an error.
    async fn run_unchecked(&self, command: &str) -> Result<CommandOutput>;

    /// Check once that every volume of the cluster reports the expanded size.
    async fn verify_expanded(&self, namespace: &str, cluster_name: &str) -> Result<()>;
}

/// `kubectl patch` invocation applying a JSON merge patch.
///
/// The patch is single-quoted for the shell, so it must not contain `'`.
pub fn merge_patch_command(
    kind: &str,
    name: &str,
    namespace: &str,
    patch: &serde_json::Value,
) -> String {
    format!(
        "kubectl patch {} {} -n {} -p '{}' --type=merge",
        kind, name, namespace, patch
    )
}

/// Merge patch turning off in-use volume resizing.
pub fn disable_resize_in_use_patch() -> serde_json::Value {
    serde_json::json!({ "spec": { "storage": { "resizeInUseVolumes": false } } })
}

/// Merge patch requesting a new volume size, for WAL volumes too when present.
pub fn storage_size_patch(size: &str, include_wal: bool) -> serde_json::Value {
    if include_wal {
        serde_json::json!({
            "spec": {
                "storage": { "size": size },
                "walStorage": { "size": size }
            }
        })
    } else {
        serde_json::json!({ "spec": { "storage": { "size": size } } })
    }
}
