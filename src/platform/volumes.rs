//! Observations of a cluster's volumes and pods during a resize.
//!
//! These are pure functions over Kubernetes objects so the convergence
//! logic can be tested without a cluster.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::ResourceExt;

use crate::crd::{CLUSTER_LABEL, INSTANCE_POD_ROLE, POD_ROLE_LABEL};

/// Label selector matching every object of a cluster, PVCs included.
pub fn cluster_selector(cluster_name: &str) -> String {
    format!("{}={}", CLUSTER_LABEL, cluster_name)
}

/// Label selector matching only the PostgreSQL instance pods of a cluster.
///
/// The operator's initdb and join job pods carry the cluster label too.
pub fn instance_selector(cluster_name: &str) -> String {
    format!(
        "{},{}={}",
        cluster_selector(cluster_name),
        POD_ROLE_LABEL,
        INSTANCE_POD_ROLE
    )
}

/// Whether `pod` is an instance pod of `cluster_name`.
pub fn is_instance_pod(pod: &Pod, cluster_name: &str) -> bool {
    let labels = pod.labels();
    labels.get(CLUSTER_LABEL).is_some_and(|c| c == cluster_name)
        && labels
            .get(POD_ROLE_LABEL)
            .is_some_and(|r| r == INSTANCE_POD_ROLE)
}

/// Whether the pod's `Ready` condition is true.
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// What is still missing after the pod with uid `replaced` was deleted.
///
/// Returns `None` once exactly `instances` pods exist, all Ready, and none
/// of them is the deleted one.
pub fn replacement_pending(pods: &[Pod], replaced: Option<&str>, instances: usize) -> Option<String> {
    if let Some(old) = pods
        .iter()
        .find(|p| replaced.is_some() && p.metadata.uid.as_deref() == replaced)
    {
        return Some(format!("pod {} still terminating", old.name_any()));
    }
    let ready = pods.iter().filter(|p| is_pod_ready(p)).count();
    if pods.len() != instances || ready != instances {
        return Some(format!(
            "{}/{} instance pods ready ({} present)",
            ready,
            instances,
            pods.len()
        ));
    }
    None
}

/// Capacity reported by one PVC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeObservation {
    pub name: String,
    /// `status.capacity.storage`, absent until the claim is bound.
    pub capacity: Option<String>,
}

impl VolumeObservation {
    /// Whether the reported capacity equals `size`.
    pub fn has_capacity(&self, size: &str) -> bool {
        match (self.capacity.as_deref(), parse_quantity(size)) {
            (Some(actual), Some(wanted)) => parse_quantity(actual) == Some(wanted),
            (Some(actual), None) => actual == size,
            (None, _) => false,
        }
    }
}

/// Extract capacities from a list of claims, sorted by name.
pub fn observe(pvcs: &[PersistentVolumeClaim]) -> Vec<VolumeObservation> {
    let mut observations: Vec<VolumeObservation> = pvcs
        .iter()
        .map(|pvc| VolumeObservation {
            name: pvc.name_any(),
            capacity: pvc
                .status
                .as_ref()
                .and_then(|s| s.capacity.as_ref())
                .and_then(|c| c.get("storage"))
                .map(|q| q.0.clone()),
        })
        .collect();
    observations.sort_by(|a, b| a.name.cmp(&b.name));
    observations
}

/// Number of observations reporting exactly `size`.
pub fn count_at_capacity(observations: &[VolumeObservation], size: &str) -> usize {
    observations.iter().filter(|o| o.has_capacity(size)).count()
}

/// Whether exactly `expected` volumes exist and all report `size`.
pub fn all_at_capacity(observations: &[VolumeObservation], size: &str, expected: usize) -> bool {
    observations.len() == expected && count_at_capacity(observations, size) == expected
}

/// One-line description used in progress logs and timeout errors.
pub fn summarize(observations: &[VolumeObservation], size: &str, expected: usize) -> String {
    let details: Vec<String> = observations
        .iter()
        .map(|o| format!("{}={}", o.name, o.capacity.as_deref().unwrap_or("<unbound>")))
        .collect();
    format!(
        "{}/{} PVCs report {} [{}]",
        count_at_capacity(observations, size),
        expected,
        size,
        details.join(", ")
    )
}

/// Parse a Kubernetes quantity into bytes.
///
/// Handles plain numbers, binary (`Ki`..`Ei`) and decimal (`k`..`E`)
/// suffixes. Returns `None` for anything else.
pub fn parse_quantity(quantity: &str) -> Option<u128> {
    const SUFFIXES: [(&str, u128); 12] = [
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("Pi", 1 << 50),
        ("Ei", 1 << 60),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
        ("P", 1_000_000_000_000_000),
        ("E", 1_000_000_000_000_000_000),
    ];

    let quantity = quantity.trim();
    let (number, multiplier) = SUFFIXES
        .iter()
        .find_map(|(suffix, mult)| quantity.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((quantity, 1));

    if let Ok(whole) = number.parse::<u128>() {
        return whole.checked_mul(multiplier);
    }
    let fractional = number.parse::<f64>().ok()?;
    if !fractional.is_finite() || fractional < 0.0 {
        return None;
    }
    Some((fractional * multiplier as f64).round() as u128)
}

/// Identity and restart count of a pod, used to prove nothing restarted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodFingerprint {
    pub uid: Option<String>,
    pub restarts: i32,
}

/// Fingerprint every pod by name.
pub fn fingerprint_pods(pods: &[Pod]) -> BTreeMap<String, PodFingerprint> {
    pods.iter()
        .map(|pod| {
            let restarts = pod
                .status
                .as_ref()
                .and_then(|s| s.container_statuses.as_ref())
                .map(|statuses| statuses.iter().map(|c| c.restart_count).sum())
                .unwrap_or(0);
            (
                pod.name_any(),
                PodFingerprint {
                    uid: pod.metadata.uid.clone(),
                    restarts,
                },
            )
        })
        .collect()
}

/// Describe every pod that was recreated, restarted or vanished.
pub fn pod_disruptions(
    before: &BTreeMap<String, PodFingerprint>,
    after: &BTreeMap<String, PodFingerprint>,
) -> Vec<String> {
    before
        .iter()
        .filter_map(|(name, old)| match after.get(name) {
            None => Some(format!("{} disappeared", name)),
            Some(new) if new.uid != old.uid => Some(format!("{} was recreated", name)),
            Some(new) if new.restarts > old.restarts => Some(format!(
                "{} restarted ({} -> {})",
                name, old.restarts, new.restarts
            )),
            Some(_) => None,
        })
        .collect()
}
