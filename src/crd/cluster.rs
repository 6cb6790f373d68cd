//! CloudNativePG `Cluster` resource, as far as storage expansion needs it.
//!
//! Only the fields the workflow reads or patches are modelled. Anything else
//! present in a manifest (bootstrap, postgresql parameters, monitoring, ...)
//! is carried through untouched in `extra` so a rendered template round-trips
//! into the API server without losing configuration.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A PostgreSQL cluster managed by the CloudNativePG operator.
///
/// Example:
/// ```yaml
/// apiVersion: postgresql.cnpg.io/v1
/// kind: Cluster
/// metadata:
///   name: storage-expansion
/// spec:
///   instances: 3
///   storage:
///     size: 1Gi
///     storageClass: standard
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "postgresql.cnpg.io",
    version = "v1",
    kind = "Cluster",
    plural = "clusters",
    status = "ClusterStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Number of PostgreSQL instances (primary plus replicas).
    #[serde(default = "default_instances")]
    pub instances: i32,

    /// PostgreSQL image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,

    /// PGDATA volume configuration.
    pub storage: StorageConfiguration,

    /// Optional dedicated WAL volume.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wal_storage: Option<StorageConfiguration>,

    /// Remaining spec fields, passed through verbatim.
    #[serde(flatten, default)]
    #[schemars(skip)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_instances() -> i32 {
    1
}

/// Volume configuration shared by `storage` and `walStorage`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfiguration {
    /// Requested size (e.g. `1Gi`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    /// Storage class used for the PVCs. Cluster default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    /// Whether the operator may resize volumes while they are in use.
    /// The operator treats an absent value as `true`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resize_in_use_volumes: Option<bool>,
}

impl StorageConfiguration {
    /// Effective value of `resizeInUseVolumes`.
    pub fn resizes_in_use(&self) -> bool {
        self.resize_in_use_volumes.unwrap_or(true)
    }
}

/// Observed state reported by the operator.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Human readable phase, e.g. "Cluster in healthy state".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Instances reported by the operator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instances: Option<i32>,

    /// Instances passing their readiness probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_instances: Option<i32>,

    /// Pod name of the current primary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_primary: Option<String>,
}

/// Label the operator puts on every pod and PVC of a cluster.
pub const CLUSTER_LABEL: &str = "cnpg.io/cluster";

/// Label telling instance pods apart from the operator's job pods.
pub const POD_ROLE_LABEL: &str = "cnpg.io/podRole";

/// [`POD_ROLE_LABEL`] value of a PostgreSQL instance pod.
pub const INSTANCE_POD_ROLE: &str = "instance";

/// Label carrying an instance's role (`primary` or `replica`).
pub const INSTANCE_ROLE_LABEL: &str = "cnpg.io/instanceRole";

/// Label value marking the primary instance.
pub const PRIMARY_ROLE: &str = "primary";

/// Suffix the operator appends to WAL volume claims.
pub const WAL_PVC_SUFFIX: &str = "-wal";

impl Cluster {
    /// Whether a dedicated WAL volume is configured.
    pub fn has_wal_storage(&self) -> bool {
        self.spec.wal_storage.is_some()
    }

    /// Number of PVCs the operator creates for this cluster.
    pub fn expected_pvc_count(&self) -> usize {
        let per_instance = if self.has_wal_storage() { 2 } else { 1 };
        usize::try_from(self.spec.instances).unwrap_or(0) * per_instance
    }

    /// Whether every desired instance is ready.
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.ready_instances)
            .is_some_and(|ready| ready >= self.spec.instances && self.spec.instances > 0)
    }
}
