//! Expansion scenarios and the precondition gate that selects between them.

use std::fmt;

use crate::capability::StorageCapability;

/// One of the two expansion paths under test.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExpansionScenario {
    /// Storage class grows volumes in place.
    OnlineExpansion,
    /// Volumes must be recreated to grow.
    OfflineExpansion,
}

/// Result of evaluating a scenario's precondition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Gate {
    /// Precondition holds, provision and execute.
    Run,
    /// Precondition contradicted, nothing gets provisioned.
    Skip(String),
}

impl Gate {
    /// Whether the scenario should execute.
    pub fn is_run(&self) -> bool {
        matches!(self, Gate::Run)
    }
}

impl ExpansionScenario {
    /// Both scenarios, in the order the suite runs them.
    pub const ALL: [ExpansionScenario; 2] = [
        ExpansionScenario::OnlineExpansion,
        ExpansionScenario::OfflineExpansion,
    ];

    /// Prefix of the namespace created for this scenario.
    pub fn namespace_prefix(self) -> &'static str {
        match self {
            ExpansionScenario::OnlineExpansion => "storage-expansion-true",
            ExpansionScenario::OfflineExpansion => "storage-expansion-false",
        }
    }

    /// What the scenario verifies.
    pub fn description(self) -> &'static str {
        match self {
            ExpansionScenario::OnlineExpansion => "expands PVCs via online resize",
            ExpansionScenario::OfflineExpansion => "expands PVCs via offline resize",
        }
    }

    /// Whether `capability` satisfies this scenario's precondition.
    ///
    /// Unknown counts as "not allowed".
    pub fn admits(self, capability: StorageCapability) -> bool {
        match self {
            ExpansionScenario::OnlineExpansion => capability.is_allowed(),
            ExpansionScenario::OfflineExpansion => !capability.is_allowed(),
        }
    }

    /// Decide whether to run this scenario on `storage_class`.
    pub fn should_run(self, capability: StorageCapability, storage_class: &str) -> Gate {
        if self.admits(capability) {
            return Gate::Run;
        }
        let advertised = match self {
            ExpansionScenario::OnlineExpansion => "false",
            ExpansionScenario::OfflineExpansion => "true",
        };
        Gate::Skip(format!(
            "AllowedVolumeExpansion is {} on {}",
            advertised, storage_class
        ))
    }
}

impl fmt::Display for ExpansionScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpansionScenario::OnlineExpansion => write!(f, "OnlineExpansion"),
            ExpansionScenario::OfflineExpansion => write!(f, "OfflineExpansion"),
        }
    }
}
