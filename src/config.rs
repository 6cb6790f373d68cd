//! Workflow configuration.
//!
//! Everything the workflow reads from the environment is captured once by
//! [`WorkflowConfig::from_env`] and passed around explicitly afterwards.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;

/// Environment variable naming the storage class to probe.
pub const STORAGE_CLASS_ENV: &str = "E2E_DEFAULT_STORAGE_CLASS";

/// Environment variable holding the suite depth.
pub const TEST_DEPTH_ENV: &str = "TEST_DEPTH";

/// Environment variable overriding the fixtures directory.
pub const FIXTURES_DIR_ENV: &str = "E2E_FIXTURES_DIR";

/// Environment variable that keeps namespaces around after the run.
pub const PRESERVE_NAMESPACES_ENV: &str = "E2E_PRESERVE_NAMESPACES";

/// Name of the cluster each scenario creates.
pub const CLUSTER_NAME: &str = "storage-expansion";

/// Manifest template, relative to the fixtures directory.
pub const MANIFEST_TEMPLATE: &str = "storage_expansion/cluster-storage-expansion.yaml.template";

const DEFAULT_TEST_DEPTH: u8 = 2;
const DEFAULT_FIXTURES_DIR: &str = "fixtures";

/// Error loading configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),

    #[error("environment variable {name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// How thorough a suite run is. Lower levels are more important.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TestLevel {
    Highest = 0,
    High = 1,
    Medium = 2,
    Low = 3,
    Lowest = 4,
}

impl TestLevel {
    /// Whether a suite running at `depth` includes tests of this level.
    pub fn included_at(self, depth: u8) -> bool {
        depth >= self as u8
    }
}

/// Configuration of a verification run.
#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    /// Storage class whose capability is probed.
    pub storage_class: String,
    /// Suite depth; see [`TestLevel`].
    pub test_depth: u8,
    /// Level of the storage expansion scenarios.
    pub level: TestLevel,
    /// Directory holding manifest templates.
    pub fixtures_dir: PathBuf,
    /// Name of the cluster created in each namespace.
    pub cluster_name: String,
    /// Policy for the `resizeInUseVolumes` patch.
    pub patch_retry: RetryPolicy,
    /// Convergence budget handed to the offline resize.
    pub offline_resize_timeout: Duration,
    /// Convergence budget of the online resize.
    pub online_resize_timeout: Duration,
    /// How long to wait for a new cluster to become ready.
    pub cluster_ready_timeout: Duration,
    /// Volume size the template provisions.
    pub initial_size: String,
    /// Volume size the resize requests.
    pub expanded_size: String,
    /// Keep namespaces after the run.
    pub preserve_namespaces: bool,
    /// Variables available to manifest templates.
    pub template_vars: BTreeMap<String, String>,
}

impl WorkflowConfig {
    /// Configuration with defaults for everything but the storage class.
    pub fn new(storage_class: impl Into<String>) -> Self {
        let storage_class = storage_class.into();
        let mut template_vars = BTreeMap::new();
        template_vars.insert(STORAGE_CLASS_ENV.to_string(), storage_class.clone());
        Self {
            storage_class,
            test_depth: TestLevel::Lowest as u8,
            level: TestLevel::Lowest,
            fixtures_dir: PathBuf::from(DEFAULT_FIXTURES_DIR),
            cluster_name: CLUSTER_NAME.to_string(),
            patch_retry: RetryPolicy::PATCH,
            offline_resize_timeout: Duration::from_secs(600),
            online_resize_timeout: Duration::from_secs(300),
            cluster_ready_timeout: Duration::from_secs(600),
            initial_size: "1Gi".to_string(),
            expanded_size: "2Gi".to_string(),
            preserve_namespaces: false,
            template_vars,
        }
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from an explicit set of variables.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: BTreeMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let storage_class = vars
            .get(STORAGE_CLASS_ENV)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or(ConfigError::Missing(STORAGE_CLASS_ENV))?;

        let test_depth = match vars.get(TEST_DEPTH_ENV) {
            Some(raw) => raw.parse::<u8>().map_err(|e| ConfigError::Invalid {
                name: TEST_DEPTH_ENV,
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_TEST_DEPTH,
        };

        let preserve_namespaces = match vars.get(PRESERVE_NAMESPACES_ENV) {
            Some(raw) => parse_bool(PRESERVE_NAMESPACES_ENV, raw)?,
            None => false,
        };

        let mut config = Self::new(storage_class).with_test_depth(test_depth);
        if let Some(dir) = vars.get(FIXTURES_DIR_ENV) {
            config.fixtures_dir = PathBuf::from(dir);
        }
        config.preserve_namespaces = preserve_namespaces;
        config.template_vars = vars;
        Ok(config)
    }

    /// Override the suite depth.
    pub fn with_test_depth(mut self, depth: u8) -> Self {
        self.test_depth = depth;
        self
    }

    /// Override the fixtures directory.
    pub fn with_fixtures_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fixtures_dir = dir.into();
        self
    }

    /// Override the patch retry policy.
    pub fn with_patch_retry(mut self, policy: RetryPolicy) -> Self {
        self.patch_retry = policy;
        self
    }

    /// Override the offline resize budget.
    pub fn with_offline_resize_timeout(mut self, timeout: Duration) -> Self {
        self.offline_resize_timeout = timeout;
        self
    }

    /// Path of the cluster manifest template.
    pub fn manifest_template(&self) -> PathBuf {
        self.fixtures_dir.join(MANIFEST_TEMPLATE)
    }

    /// Whether the configured depth includes this workflow.
    pub fn depth_allows(&self) -> bool {
        self.level.included_at(self.test_depth)
    }

    /// Reject configurations whose waits could never make progress.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.patch_retry.poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "patch_retry.poll_interval",
                value: "0s".to_string(),
                reason: "poll interval must be positive".to_string(),
            });
        }
        if self.patch_retry.timeout < self.patch_retry.poll_interval {
            return Err(ConfigError::Invalid {
                name: "patch_retry.timeout",
                value: format!("{:?}", self.patch_retry.timeout),
                reason: "timeout must be at least one poll interval".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" | "" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
