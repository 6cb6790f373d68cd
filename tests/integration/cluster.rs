//! Shared test cluster singleton.
//!
//! Provides a Kubernetes cluster connection for all integration tests.
//! Each test creates its own Client from the shared cluster for isolation.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::OnceLock;

use kube::{Client, Config};
use storage_expansion::config::WorkflowConfig;
use tokio::sync::OnceCell;

/// Global shared test cluster instance.
static SHARED_CLUSTER: OnceCell<Arc<SharedTestCluster>> = OnceCell::const_new();

/// Storage class used when `E2E_DEFAULT_STORAGE_CLASS` is unset.
const FALLBACK_STORAGE_CLASS: &str = "standard";

/// Shared test cluster providing Kubernetes connectivity.
///
/// Uses a singleton pattern to ensure connectivity is validated once.
/// Each test creates its own Client via `new_client()` for isolation.
pub struct SharedTestCluster {
    _marker: (),
}

impl SharedTestCluster {
    /// Get or create the shared test cluster.
    ///
    /// The first call validates connectivity, subsequent calls return
    /// the cached instance.
    pub async fn get() -> Arc<SharedTestCluster> {
        SHARED_CLUSTER
            .get_or_init(|| async {
                let cluster = Self::connect().await.expect(
                    "Failed to connect to Kubernetes cluster. Is your kubeconfig configured?",
                );
                Arc::new(cluster)
            })
            .await
            .clone()
    }

    /// Create a new Kubernetes client.
    pub async fn new_client(&self) -> Client {
        let config = Config::infer().await.expect("Failed to infer kube config");
        Client::try_from(config).expect("Failed to create kube client")
    }

    /// Workflow configuration for live tests.
    ///
    /// Reads the environment like the binary does, but always runs at the
    /// deepest level and uses this crate's fixtures.
    pub fn workflow_config(&self) -> WorkflowConfig {
        WorkflowConfig::from_env()
            .unwrap_or_else(|_| WorkflowConfig::new(FALLBACK_STORAGE_CLASS))
            .with_test_depth(4)
            .with_fixtures_dir(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"))
    }

    async fn connect() -> Result<Self, kube::Error> {
        let config = Config::infer()
            .await
            .map_err(|e| kube::Error::Service(std::io::Error::other(e.to_string()).into()))?;
        let client = Client::try_from(config)?;

        let version = client.apiserver_version().await?;
        tracing::info!(
            "Connected to Kubernetes cluster: {} {}",
            version.platform,
            version.git_version
        );

        Ok(Self { _marker: () })
    }
}

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Initialize tracing for tests (call once per test, repeat calls are no-ops).
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("storage_expansion=debug,kube=info")
            .try_init();
    });
}
