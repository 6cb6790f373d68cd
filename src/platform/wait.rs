//! Watch-based condition waiting.
//!
//! Waits for resources to reach a state using the Kubernetes watch API
//! rather than polling `get` in a loop.

use std::fmt::Debug;
use std::time::Duration;

use futures::StreamExt;
use kube::Resource;
use kube::api::Api;
use kube::runtime::watcher::{self, Event};
use serde::de::DeserializeOwned;
use tokio::time::timeout;

use crate::crd::Cluster;
use crate::error::PlatformError;

/// Error type for wait operations.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("Timeout waiting for {what} after {timeout:?}")]
    Timeout { what: String, timeout: Duration },

    #[error("{0} was deleted while waiting")]
    ResourceDeleted(String),

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Watcher error: {0}")]
    WatcherError(#[from] watcher::Error),

    #[error("Watch stream ended unexpectedly")]
    StreamEnded,
}

impl From<WaitError> for PlatformError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::Timeout { what, timeout } => PlatformError::ConvergenceTimeout {
                timeout,
                last_observed: format!("{} not reached", what),
            },
            WaitError::KubeError(e) => PlatformError::Kube(e),
            other => PlatformError::Unexpected(other.to_string()),
        }
    }
}

fn name_selector(name: &str) -> watcher::Config {
    watcher::Config::default().fields(&format!("metadata.name={}", name))
}

/// Wait for a resource to satisfy a condition.
///
/// Checks the current state first, then watches for changes. Deletion of
/// the resource ends the wait with [`WaitError::ResourceDeleted`].
pub async fn wait_for_condition<K, F>(
    api: &Api<K>,
    name: &str,
    condition: F,
    timeout_duration: Duration,
) -> Result<K, WaitError>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + 'static,
    <K as Resource>::DynamicType: Default,
    F: Fn(&K) -> bool,
{
    let watch_future = async {
        let mut stream = watcher::watcher(api.clone(), name_selector(name)).boxed();

        if let Ok(resource) = api.get(name).await
            && condition(&resource)
        {
            return Ok(resource);
        }

        while let Some(event) = stream.next().await {
            match event {
                Ok(Event::Apply(resource)) | Ok(Event::InitApply(resource)) => {
                    if condition(&resource) {
                        return Ok(resource);
                    }
                }
                Ok(Event::Delete(_)) => {
                    return Err(WaitError::ResourceDeleted(name.to_string()));
                }
                Ok(Event::Init) | Ok(Event::InitDone) => {}
                Err(e) => return Err(WaitError::WatcherError(e)),
            }
        }

        Err(WaitError::StreamEnded)
    };

    timeout(timeout_duration, watch_future)
        .await
        .map_err(|_| WaitError::Timeout {
            what: format!("condition on {}", name),
            timeout: timeout_duration,
        })?
}

// ============================================================
// Cluster-specific wait helpers
// ============================================================

/// Wait for a Cluster to report every instance ready.
pub async fn wait_for_cluster_ready(
    api: &Api<Cluster>,
    name: &str,
    timeout_duration: Duration,
) -> Result<Cluster, WaitError> {
    wait_for_condition(api, name, Cluster::is_ready, timeout_duration)
        .await
        .map_err(|e| match e {
            WaitError::Timeout { timeout, .. } => WaitError::Timeout {
                what: format!("cluster {} to become ready", name),
                timeout,
            },
            other => other,
        })
}
