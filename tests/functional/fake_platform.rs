//! Scripted stand-in for a Kubernetes cluster running CloudNativePG.
//!
//! `FakePlatform` keeps a small model of one cluster per namespace: its
//! volume sizes, its `resizeInUseVolumes` flag and how often its pods were
//! recreated. Behavior that a test wants to vary (capability, patch
//! failures, resize latency) is set through builder methods.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use storage_expansion::error::{PlatformError, Result};
use storage_expansion::platform::{ClusterPlatform, CommandOutput};

/// Model of a provisioned cluster.
#[derive(Clone, Debug)]
pub struct FakeCluster {
    pub name: String,
    pub instances: usize,
    pub volume_sizes: Vec<String>,
    pub resize_in_use_volumes: bool,
    pub pod_recreations: usize,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<String>,
    namespaces: Vec<String>,
    clusters: BTreeMap<String, FakeCluster>,
    patch_failures_left: u32,
    patch_attempts: u32,
}

/// Scripted cluster platform.
#[derive(Debug)]
pub struct FakePlatform {
    allow_expansion: Option<bool>,
    probe_error: Option<String>,
    always_fail_patch: bool,
    resize_converges: bool,
    resize_latency: Duration,
    instances: usize,
    expanded_size: String,
    state: Mutex<State>,
}

impl FakePlatform {
    /// Platform whose storage class reports `allow_expansion`.
    pub fn new(allow_expansion: Option<bool>) -> Self {
        Self {
            allow_expansion,
            probe_error: None,
            always_fail_patch: false,
            resize_converges: true,
            resize_latency: Duration::ZERO,
            instances: 3,
            expanded_size: "2Gi".to_string(),
            state: Mutex::new(State::default()),
        }
    }

    /// Storage class lookup fails with `message`.
    pub fn with_probe_error(mut self, message: &str) -> Self {
        self.probe_error = Some(message.to_string());
        self
    }

    /// The first `count` patch commands fail.
    pub fn with_patch_failures(self, count: u32) -> Self {
        self.state.lock().unwrap().patch_failures_left = count;
        self
    }

    /// Every patch command fails.
    pub fn with_failing_patch(mut self) -> Self {
        self.always_fail_patch = true;
        self
    }

    /// Resizes never reach the requested size.
    pub fn with_stuck_resize(mut self) -> Self {
        self.resize_converges = false;
        self
    }

    /// Each resize takes `latency` of (virtual) time.
    pub fn with_resize_latency(mut self, latency: Duration) -> Self {
        self.resize_latency = latency;
        self
    }

    /// Calls made so far, e.g. `create_cluster storage-expansion-true-00000001/storage-expansion`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Names of calls made so far, without arguments.
    pub fn call_names(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c.split_whitespace().next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.state.lock().unwrap().namespaces.clone()
    }

    pub fn cluster(&self, namespace: &str) -> Option<FakeCluster> {
        self.state.lock().unwrap().clusters.get(namespace).cloned()
    }

    pub fn patch_attempts(&self) -> u32 {
        self.state.lock().unwrap().patch_attempts
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn resize(&self, namespace: &str, recreate_pods: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let cluster = state
            .clusters
            .get_mut(namespace)
            .ok_or_else(|| PlatformError::Unexpected(format!("no cluster in {}", namespace)))?;
        if recreate_pods {
            cluster.pod_recreations += cluster.instances;
        }
        if !self.resize_converges {
            return Err(PlatformError::ConvergenceTimeout {
                timeout: Duration::from_secs(600),
                last_observed: format!("0/{} PVCs report {}", cluster.instances, self.expanded_size),
            });
        }
        for size in &mut cluster.volume_sizes {
            *size = self.expanded_size.clone();
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterPlatform for FakePlatform {
    async fn storage_allow_expansion(&self, storage_class: &str) -> Result<Option<bool>> {
        self.record(format!("storage_allow_expansion {}", storage_class));
        match &self.probe_error {
            Some(message) => Err(PlatformError::Unexpected(message.clone())),
            None => Ok(self.allow_expansion),
        }
    }

    async fn create_unique_namespace(&self, prefix: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let name = format!("{}-{:08x}", prefix, state.namespaces.len() + 1);
        state.namespaces.push(name.clone());
        state.calls.push(format!("create_unique_namespace {}", prefix));
        Ok(name)
    }

    async fn create_cluster(
        &self,
        namespace: &str,
        cluster_name: &str,
        manifest_template: &Path,
    ) -> Result<()> {
        self.record(format!("create_cluster {}/{}", namespace, cluster_name));
        if !manifest_template.ends_with("cluster-storage-expansion.yaml.template") {
            return Err(PlatformError::Template(format!(
                "unexpected template {}",
                manifest_template.display()
            )));
        }
        let cluster = FakeCluster {
            name: cluster_name.to_string(),
            instances: self.instances,
            volume_sizes: vec!["1Gi".to_string(); self.instances],
            resize_in_use_volumes: true,
            pod_recreations: 0,
        };
        self.state
            .lock()
            .unwrap()
            .clusters
            .insert(namespace.to_string(), cluster);
        Ok(())
    }

    async fn online_resize_pvc(&self, namespace: &str, cluster_name: &str) -> Result<()> {
        self.record(format!("online_resize_pvc {}/{}", namespace, cluster_name));
        tokio::time::sleep(self.resize_latency).await;
        self.resize(namespace, false)
    }

    async fn offline_resize_pvc(
        &self,
        namespace: &str,
        cluster_name: &str,
        timeout: Duration,
    ) -> Result<()> {
        self.record(format!(
            "offline_resize_pvc {}/{} {}s",
            namespace,
            cluster_name,
            timeout.as_secs()
        ));
        if self
            .cluster(namespace)
            .is_some_and(|c| c.resize_in_use_volumes)
        {
            return Err(PlatformError::Unexpected(
                "resizeInUseVolumes is still enabled".to_string(),
            ));
        }
        if self.resize_latency > timeout {
            tokio::time::sleep(timeout).await;
            return Err(PlatformError::ConvergenceTimeout {
                timeout,
                last_observed: "resize still in progress".to_string(),
            });
        }
        tokio::time::sleep(self.resize_latency).await;
        self.resize(namespace, true)
    }

    async fn run_unchecked(&self, command: &str) -> Result<CommandOutput> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("run_unchecked {}", command));
        state.patch_attempts += 1;

        let failure = || PlatformError::Command {
            command: command.to_string(),
            status: "exit status: 1".to_string(),
            stdout: String::new(),
            stderr: "Error from server: etcdserver: request timed out".to_string(),
        };
        if self.always_fail_patch {
            return Err(failure());
        }
        if state.patch_failures_left > 0 {
            state.patch_failures_left -= 1;
            return Err(failure());
        }

        let namespace = command
            .split_whitespace()
            .skip_while(|arg| *arg != "-n")
            .nth(1)
            .unwrap_or_default()
            .to_string();
        let cluster = state
            .clusters
            .get_mut(&namespace)
            .ok_or_else(|| PlatformError::Unexpected(format!("no cluster in {}", namespace)))?;
        if command.contains("\"resizeInUseVolumes\":false") {
            let unchanged = !cluster.resize_in_use_volumes;
            cluster.resize_in_use_volumes = false;
            let verb = if unchanged { "patched (no change)" } else { "patched" };
            return Ok(CommandOutput {
                stdout: format!("cluster.postgresql.cnpg.io/{} {}", cluster.name, verb),
                stderr: String::new(),
            });
        }
        Err(PlatformError::Unexpected(format!("unsupported command {}", command)))
    }

    async fn verify_expanded(&self, namespace: &str, cluster_name: &str) -> Result<()> {
        self.record(format!("verify_expanded {}/{}", namespace, cluster_name));
        let cluster = self
            .cluster(namespace)
            .ok_or_else(|| PlatformError::Unexpected(format!("no cluster in {}", namespace)))?;
        if cluster.volume_sizes.iter().all(|s| *s == self.expanded_size) {
            Ok(())
        } else {
            Err(PlatformError::Unexpected(format!(
                "volumes report {:?}",
                cluster.volume_sizes
            )))
        }
    }
}
