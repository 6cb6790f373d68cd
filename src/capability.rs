//! Storage class expansion capability and the probe that reads it.

use std::fmt;

use tracing::info;

use crate::error::Result;
use crate::platform::ClusterPlatform;

/// Whether the active storage class supports live volume expansion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageCapability {
    /// `allowVolumeExpansion: true`
    Allowed,
    /// `allowVolumeExpansion: false`
    Disallowed,
    /// Attribute absent from the storage class
    Unknown,
}

impl StorageCapability {
    /// All capability values.
    pub const ALL: [StorageCapability; 3] = [
        StorageCapability::Allowed,
        StorageCapability::Disallowed,
        StorageCapability::Unknown,
    ];

    /// Whether live expansion is advertised.
    pub fn is_allowed(self) -> bool {
        self == StorageCapability::Allowed
    }
}

impl From<Option<bool>> for StorageCapability {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => StorageCapability::Allowed,
            Some(false) => StorageCapability::Disallowed,
            None => StorageCapability::Unknown,
        }
    }
}

impl fmt::Display for StorageCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageCapability::Allowed => write!(f, "Allowed"),
            StorageCapability::Disallowed => write!(f, "Disallowed"),
            StorageCapability::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Query the expansion capability of `storage_class`.
///
/// Query failures are returned as-is; callers treat them as setup errors and
/// do not retry.
pub async fn probe_capability<P>(platform: &P, storage_class: &str) -> Result<StorageCapability>
where
    P: ClusterPlatform + ?Sized,
{
    let capability = StorageCapability::from(platform.storage_allow_expansion(storage_class).await?);
    info!(storage_class, %capability, "Probed storage class expansion capability");
    Ok(capability)
}
