//! [`ClusterPlatform`] backed by a live Kubernetes cluster running the
//! CloudNativePG operator.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, PersistentVolumeClaim, Pod};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::volumes::{self, VolumeObservation};
use super::wait::wait_for_cluster_ready;
use super::{ClusterPlatform, CommandOutput, merge_patch_command, storage_size_patch, template};
use crate::config::WorkflowConfig;
use crate::crd::{Cluster, INSTANCE_ROLE_LABEL, PRIMARY_ROLE, WAL_PVC_SUFFIX};
use crate::error::{PlatformError, Result};
use crate::retry::{RetryError, RetryPolicy, retry_while};

/// Label marking namespaces created by this tool.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`].
pub const MANAGED_BY_VALUE: &str = "storage-expansion-e2e";

/// Grace period used when deleting instance pods during an offline resize.
const QUICK_DELETION_SECS: u32 = 1;

/// Kubernetes implementation of the cluster collaborators.
#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
    config: Arc<WorkflowConfig>,
    provisioned: Arc<Mutex<Vec<String>>>,
}

impl KubePlatform {
    /// Wrap an existing client.
    pub fn new(client: Client, config: WorkflowConfig) -> Self {
        Self {
            client,
            config: Arc::new(config),
            provisioned: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Connect using the inferred kubeconfig.
    pub async fn try_default(config: WorkflowConfig) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, config))
    }

    /// The underlying client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Namespaces created through this platform, oldest first.
    pub async fn provisioned_namespaces(&self) -> Vec<String> {
        self.provisioned.lock().await.clone()
    }

    /// Delete a namespace created by [`ClusterPlatform::create_unique_namespace`].
    ///
    /// Clusters are deleted first and their finalizers stripped so the
    /// namespace does not hang in Terminating. A missing namespace is fine.
    pub async fn delete_namespace(&self, name: &str) -> Result<()> {
        let clusters: Api<Cluster> = Api::namespaced(self.client.clone(), name);
        match clusters.list(&ListParams::default()).await {
            Ok(list) => {
                let finalizer_patch: Patch<serde_json::Value> =
                    Patch::Merge(json!({ "metadata": { "finalizers": null } }));
                for cluster in list.items {
                    let cluster_name = cluster.name_any();
                    if let Err(e) = clusters.delete(&cluster_name, &DeleteParams::default()).await {
                        debug!(namespace = %name, cluster = %cluster_name, error = %e, "Failed to delete cluster");
                    }
                    if cluster.finalizers().is_empty() {
                        continue;
                    }
                    if let Err(e) = clusters
                        .patch(&cluster_name, &PatchParams::default(), &finalizer_patch)
                        .await
                    {
                        warn!(namespace = %name, cluster = %cluster_name, error = %e, "Failed to remove finalizers");
                    }
                }
            }
            Err(e) => debug!(namespace = %name, error = %e, "Failed to list clusters for cleanup"),
        }

        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let dp = DeleteParams {
            propagation_policy: Some(kube::api::PropagationPolicy::Background),
            ..Default::default()
        };
        match namespaces.delete(name, &dp).await {
            Ok(_) => {
                info!(namespace = %name, "Deleted namespace");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn cluster_api(&self, namespace: &str) -> Api<Cluster> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn list_pvcs(&self, namespace: &str, cluster_name: &str) -> Result<Vec<PersistentVolumeClaim>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&volumes::cluster_selector(cluster_name));
        Ok(api.list(&lp).await?.items)
    }

    /// Instance pods only; job pods share the cluster label.
    async fn list_instance_pods(&self, namespace: &str, cluster_name: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&volumes::instance_selector(cluster_name));
        let mut pods = api.list(&lp).await?.items;
        pods.retain(|p| volumes::is_instance_pod(p, cluster_name));
        Ok(pods)
    }

    async fn observe_volumes(&self, namespace: &str, cluster_name: &str) -> Result<Vec<VolumeObservation>> {
        Ok(volumes::observe(&self.list_pvcs(namespace, cluster_name).await?))
    }

    /// Every PVC must still be at the template's size before resizing.
    async fn verify_initial_size(&self, namespace: &str, cluster: &Cluster) -> Result<()> {
        let cluster_name = cluster.name_any();
        let expected = cluster.expected_pvc_count();
        let observations = self.observe_volumes(namespace, &cluster_name).await?;
        if !volumes::all_at_capacity(&observations, &self.config.initial_size, expected) {
            return Err(PlatformError::Unexpected(format!(
                "volumes are not at their initial size before expansion: {}",
                volumes::summarize(&observations, &self.config.initial_size, expected)
            )));
        }
        debug!(namespace, cluster = %cluster_name, expected, "Volumes at initial size");
        Ok(())
    }

    /// Request the expanded size, retrying while the operator rejects the patch.
    async fn request_expansion(&self, namespace: &str, cluster: &Cluster) -> Result<()> {
        let cluster_name = cluster.name_any();
        let patch = storage_size_patch(&self.config.expanded_size, cluster.has_wal_storage());
        let command = merge_patch_command("cluster", &cluster_name, namespace, &patch);
        self.retry_command(&command, self.config.patch_retry).await?;
        info!(namespace, cluster = %cluster_name, size = %self.config.expanded_size, "Requested storage expansion");
        Ok(())
    }

    async fn retry_command(&self, command: &str, policy: RetryPolicy) -> Result<CommandOutput> {
        retry_while(
            policy,
            || async move { self.run_unchecked(command).await },
            PlatformError::is_retryable,
        )
        .await
        .map_err(|e| match e {
            RetryError::Permanent { error, .. } => error,
            RetryError::Timeout(timeout) => PlatformError::Exhausted {
                operation: format!("`{}`", command),
                message: timeout.to_string(),
            },
        })
    }

    /// Poll PVC capacities until all of them report the expanded size.
    async fn wait_for_expansion(&self, namespace: &str, cluster: &Cluster, timeout: Duration) -> Result<()> {
        let owned_name = cluster.name_any();
        let cluster_name = owned_name.as_str();
        let expected = cluster.expected_pvc_count();
        let size = self.config.expanded_size.as_str();
        let policy = self.config.patch_retry.with_timeout(timeout);

        let result = retry_while(
            policy,
            || async move {
                let observations = self.observe_volumes(namespace, cluster_name).await?;
                if volumes::all_at_capacity(&observations, size, expected) {
                    Ok(())
                } else {
                    Err(PlatformError::Unexpected(volumes::summarize(
                        &observations,
                        size,
                        expected,
                    )))
                }
            },
            PlatformError::is_retryable,
        )
        .await;

        result.map_err(|e| converged_or_cause(e, timeout))?;
        info!(namespace, cluster = %cluster_name, size, expected, "Volumes expanded");
        Ok(())
    }

    /// Offline resize: request the size, then recreate every instance with
    /// its volumes so the new claims are provisioned at the expanded size.
    async fn offline_resize(&self, namespace: &str, cluster_name: &str, timeout: Duration) -> Result<()> {
        let api = self.cluster_api(namespace);
        let cluster = api.get(cluster_name).await?;
        self.verify_initial_size(namespace, &cluster).await?;
        self.request_expansion(namespace, &cluster).await?;

        let pods = self.list_instance_pods(namespace, cluster_name).await?;
        let instances = usize::try_from(cluster.spec.instances).unwrap_or(0);
        if pods.len() != instances {
            return Err(PlatformError::Unexpected(format!(
                "expected {} instance pods, found {}",
                instances,
                pods.len()
            )));
        }

        // Replicas first so the primary is only touched once its standbys are back.
        let (primaries, replicas): (Vec<&Pod>, Vec<&Pod>) =
            pods.iter().partition(|p| is_primary(p, &cluster));
        for pod in replicas.into_iter().chain(primaries) {
            let current = api.get(cluster_name).await?;
            self.recreate_instance(namespace, &current, pod).await?;
        }

        self.wait_for_expansion(namespace, &cluster, timeout).await
    }

    /// Delete an instance's PVCs and pod, then wait for the cluster to heal.
    async fn recreate_instance(&self, namespace: &str, cluster: &Cluster, pod: &Pod) -> Result<()> {
        let pod_name = pod.name_any();
        let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        let mut claims = vec![pod_name.clone()];
        if cluster.has_wal_storage() {
            claims.push(format!("{}{}", pod_name, WAL_PVC_SUFFIX));
        }
        for claim in &claims {
            match pvcs.delete(claim, &DeleteParams::default()).await {
                Ok(_) => debug!(namespace, pvc = %claim, "Deleted PVC"),
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(e.into()),
            }
        }

        let quick_delete = DeleteParams {
            grace_period_seconds: Some(QUICK_DELETION_SECS),
            ..Default::default()
        };
        pods.delete(&pod_name, &quick_delete).await?;
        info!(namespace, pod = %pod_name, "Deleted instance pod and its volumes");

        // The cluster status can still report every instance ready at this
        // point, so wait on the pods themselves before trusting it.
        let replaced = pod.metadata.uid.as_deref();
        let instances = usize::try_from(cluster.spec.instances).unwrap_or(0);
        let owned_name = cluster.name_any();
        let cluster_name = owned_name.as_str();
        let settle = RetryPolicy::new(self.config.cluster_ready_timeout, Duration::from_secs(1));
        retry_while(
            settle,
            || async move {
                let current = self.list_instance_pods(namespace, cluster_name).await?;
                match volumes::replacement_pending(&current, replaced, instances) {
                    Some(pending) => Err(PlatformError::Unexpected(pending)),
                    None => Ok(()),
                }
            },
            PlatformError::is_retryable,
        )
        .await
        .map_err(|e| converged_or_cause(e, settle.timeout))?;
        debug!(namespace, pod = %pod_name, "Replacement instance is ready");

        wait_for_cluster_ready(
            &self.cluster_api(namespace),
            cluster_name,
            self.config.cluster_ready_timeout,
        )
        .await?;
        Ok(())
    }
}

/// A timed-out wait becomes a convergence timeout carrying the last
/// observation; a permanent error is returned as is.
fn converged_or_cause(err: RetryError<PlatformError>, timeout: Duration) -> PlatformError {
    match err {
        RetryError::Permanent { error, .. } => error,
        RetryError::Timeout(t) => PlatformError::ConvergenceTimeout {
            timeout,
            last_observed: t.last_error_message(),
        },
    }
}

fn is_primary(pod: &Pod, cluster: &Cluster) -> bool {
    let labelled = pod
        .labels()
        .get(INSTANCE_ROLE_LABEL)
        .is_some_and(|role| role == PRIMARY_ROLE);
    let reported = cluster
        .status
        .as_ref()
        .and_then(|s| s.current_primary.as_deref())
        .is_some_and(|primary| primary == pod.name_any());
    labelled || reported
}

#[async_trait]
impl ClusterPlatform for KubePlatform {
    async fn storage_allow_expansion(&self, storage_class: &str) -> Result<Option<bool>> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        let class = api.get(storage_class).await?;
        Ok(class.allow_volume_expansion)
    }

    async fn create_unique_namespace(&self, prefix: &str) -> Result<String> {
        let uuid = Uuid::new_v4().simple().to_string();
        let suffix = uuid.get(..8).unwrap_or(uuid.as_str());
        let name = format!("{}-{}", prefix, suffix);

        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(
                    [(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &ns).await?;
        self.provisioned.lock().await.push(name.clone());

        info!(namespace = %name, "Created namespace");
        Ok(name)
    }

    async fn create_cluster(
        &self,
        namespace: &str,
        cluster_name: &str,
        manifest_template: &Path,
    ) -> Result<()> {
        let rendered = template::render_file(manifest_template, &self.config.template_vars).await?;
        let mut cluster: Cluster = serde_yaml::from_str(&rendered).map_err(|e| {
            PlatformError::Manifest(format!("{}: {}", manifest_template.display(), e))
        })?;

        let declared = cluster.name_any();
        if declared != cluster_name {
            return Err(PlatformError::Manifest(format!(
                "{} declares cluster {:?}, expected {:?}",
                manifest_template.display(),
                declared,
                cluster_name
            )));
        }
        cluster.metadata.namespace = Some(namespace.to_string());

        let api = self.cluster_api(namespace);
        api.create(&PostParams::default(), &cluster).await?;
        info!(namespace, cluster = cluster_name, instances = cluster.spec.instances, "Created cluster");

        wait_for_cluster_ready(&api, cluster_name, self.config.cluster_ready_timeout).await?;
        info!(namespace, cluster = cluster_name, "Cluster is ready");
        Ok(())
    }

    async fn online_resize_pvc(&self, namespace: &str, cluster_name: &str) -> Result<()> {
        let cluster = self.cluster_api(namespace).get(cluster_name).await?;
        self.verify_initial_size(namespace, &cluster).await?;

        let before = volumes::fingerprint_pods(&self.list_instance_pods(namespace, cluster_name).await?);
        self.request_expansion(namespace, &cluster).await?;
        self.wait_for_expansion(namespace, &cluster, self.config.online_resize_timeout)
            .await?;

        let after = volumes::fingerprint_pods(&self.list_instance_pods(namespace, cluster_name).await?);
        let disruptions = volumes::pod_disruptions(&before, &after);
        if !disruptions.is_empty() {
            return Err(PlatformError::Unexpected(format!(
                "online resize disrupted pods: {}",
                disruptions.join(", ")
            )));
        }
        Ok(())
    }

    async fn offline_resize_pvc(
        &self,
        namespace: &str,
        cluster_name: &str,
        timeout: Duration,
    ) -> Result<()> {
        match tokio::time::timeout(timeout, self.offline_resize(namespace, cluster_name, timeout)).await {
            Ok(result) => result,
            Err(_) => {
                let observed = self.observe_volumes(namespace, cluster_name).await.unwrap_or_default();
                Err(PlatformError::ConvergenceTimeout {
                    timeout,
                    last_observed: volumes::summarize(
                        &observed,
                        &self.config.expanded_size,
                        observed.len(),
                    ),
                })
            }
        }
    }

    async fn run_unchecked(&self, command: &str) -> Result<CommandOutput> {
        debug!(command, "Running command");
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|source| PlatformError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(PlatformError::Command {
                command: command.to_string(),
                status: output.status.to_string(),
                stdout,
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(CommandOutput { stdout, stderr })
    }

    async fn verify_expanded(&self, namespace: &str, cluster_name: &str) -> Result<()> {
        let cluster = self.cluster_api(namespace).get(cluster_name).await?;
        let expected = cluster.expected_pvc_count();
        let size = &self.config.expanded_size;
        let observations = self.observe_volumes(namespace, cluster_name).await?;
        if volumes::all_at_capacity(&observations, size, expected) {
            Ok(())
        } else {
            Err(PlatformError::Unexpected(volumes::summarize(
                &observations,
                size,
                expected,
            )))
        }
    }
}
