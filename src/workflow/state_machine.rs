//! Finite state machine for a single expansion scenario.
//!
//! Every step of a scenario is a phase; the runner reports events and the
//! table below decides where the scenario goes next. Only transitions listed
//! in the table are valid.
//!
//! ## Paths
//!
//! ### Skip
//! Start → Skipped (test depth too low)
//! Start → ProbeCapability → Skipped (precondition mismatch)
//!
//! ### Online
//! Start → ProbeCapability → CreateNamespace → CreateCluster →
//! InvokeOnlineResize → AssertConverged → Done
//!
//! ### Offline
//! Start → ProbeCapability → CreateNamespace → CreateCluster →
//! PatchResizeInUseVolumes → InvokeOfflineResize → AssertConverged → Done
//!
//! Any non-terminal phase moves to Failed on `StepFailed`.

use std::fmt;

use crate::scenario::ExpansionScenario;

/// Phase of a scenario.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WorkflowPhase {
    /// Nothing has happened yet.
    #[default]
    Start,
    /// Reading the storage class capability.
    ProbeCapability,
    /// Creating the scenario's namespace.
    CreateNamespace,
    /// Creating the cluster from its manifest template.
    CreateCluster,
    /// Running the online resize primitive.
    InvokeOnlineResize,
    /// Patching `resizeInUseVolumes` to false under retry.
    PatchResizeInUseVolumes,
    /// Running the offline resize primitive.
    InvokeOfflineResize,
    /// Checking the volumes report the expanded size.
    AssertConverged,
    /// Scenario passed.
    Done,
    /// Scenario did not apply to this environment.
    Skipped,
    /// Scenario failed.
    Failed,
}

impl WorkflowPhase {
    /// Whether the scenario has finished.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowPhase::Done | WorkflowPhase::Skipped | WorkflowPhase::Failed
        )
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowPhase::Start => write!(f, "Start"),
            WorkflowPhase::ProbeCapability => write!(f, "ProbeCapability"),
            WorkflowPhase::CreateNamespace => write!(f, "CreateNamespace"),
            WorkflowPhase::CreateCluster => write!(f, "CreateCluster"),
            WorkflowPhase::InvokeOnlineResize => write!(f, "InvokeOnlineResize"),
            WorkflowPhase::PatchResizeInUseVolumes => write!(f, "PatchResizeInUseVolumes"),
            WorkflowPhase::InvokeOfflineResize => write!(f, "InvokeOfflineResize"),
            WorkflowPhase::AssertConverged => write!(f, "AssertConverged"),
            WorkflowPhase::Done => write!(f, "Done"),
            WorkflowPhase::Skipped => write!(f, "Skipped"),
            WorkflowPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Events reported by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowEvent {
    /// Scenario entered and the suite depth includes it
    Started,
    /// Suite depth is below the scenario's level
    DepthBelowLevel,
    /// Capability satisfies the scenario's precondition
    GatePassed,
    /// Capability contradicts the scenario's precondition
    PreconditionMismatch,
    /// The cluster is ready; the scenario decides the path
    ClusterCreated(ExpansionScenario),
    /// Current phase's work finished
    PhaseComplete,
    /// Current phase's work failed
    StepFailed,
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowEvent::Started => write!(f, "Started"),
            WorkflowEvent::DepthBelowLevel => write!(f, "DepthBelowLevel"),
            WorkflowEvent::GatePassed => write!(f, "GatePassed"),
            WorkflowEvent::PreconditionMismatch => write!(f, "PreconditionMismatch"),
            WorkflowEvent::ClusterCreated(s) => write!(f, "ClusterCreated({})", s),
            WorkflowEvent::PhaseComplete => write!(f, "PhaseComplete"),
            WorkflowEvent::StepFailed => write!(f, "StepFailed"),
        }
    }
}

/// A transition in the table.
#[derive(Debug)]
pub struct Transition {
    pub from: WorkflowPhase,
    pub to: WorkflowPhase,
    pub event: WorkflowEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: WorkflowPhase,
        to: WorkflowPhase,
        event: WorkflowEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a transition.
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Success {
        from: WorkflowPhase,
        to: WorkflowPhase,
        description: &'static str,
    },
    InvalidTransition {
        current: WorkflowPhase,
        event: WorkflowEvent,
    },
}

/// Transition table for expansion scenarios.
pub struct WorkflowStateMachine {
    transitions: Vec<Transition>,
}

impl Default for WorkflowStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

const NON_TERMINAL: [WorkflowPhase; 8] = [
    WorkflowPhase::Start,
    WorkflowPhase::ProbeCapability,
    WorkflowPhase::CreateNamespace,
    WorkflowPhase::CreateCluster,
    WorkflowPhase::InvokeOnlineResize,
    WorkflowPhase::PatchResizeInUseVolumes,
    WorkflowPhase::InvokeOfflineResize,
    WorkflowPhase::AssertConverged,
];

impl WorkflowStateMachine {
    pub fn new() -> Self {
        use WorkflowEvent as E;
        use WorkflowPhase as P;

        let mut transitions = vec![
            // Entry
            Transition::new(P::Start, P::ProbeCapability, E::Started, "Probing storage class"),
            Transition::new(P::Start, P::Skipped, E::DepthBelowLevel, "Test depth too low"),
            // Gate
            Transition::new(
                P::ProbeCapability,
                P::CreateNamespace,
                E::GatePassed,
                "Precondition holds, provisioning",
            ),
            Transition::new(
                P::ProbeCapability,
                P::Skipped,
                E::PreconditionMismatch,
                "Storage class contradicts precondition",
            ),
            // Provisioning
            Transition::new(
                P::CreateNamespace,
                P::CreateCluster,
                E::PhaseComplete,
                "Namespace created, creating cluster",
            ),
            Transition::new(
                P::CreateCluster,
                P::InvokeOnlineResize,
                E::ClusterCreated(ExpansionScenario::OnlineExpansion),
                "Cluster ready, resizing online",
            ),
            Transition::new(
                P::CreateCluster,
                P::PatchResizeInUseVolumes,
                E::ClusterCreated(ExpansionScenario::OfflineExpansion),
                "Cluster ready, disabling in-use resize",
            ),
            // Online path
            Transition::new(
                P::InvokeOnlineResize,
                P::AssertConverged,
                E::PhaseComplete,
                "Online resize finished",
            ),
            // Offline path
            Transition::new(
                P::PatchResizeInUseVolumes,
                P::InvokeOfflineResize,
                E::PhaseComplete,
                "resizeInUseVolumes disabled, resizing offline",
            ),
            Transition::new(
                P::InvokeOfflineResize,
                P::AssertConverged,
                E::PhaseComplete,
                "Offline resize finished",
            ),
            // Convergence
            Transition::new(
                P::AssertConverged,
                P::Done,
                E::PhaseComplete,
                "Volumes report the expanded size",
            ),
        ];

        for phase in NON_TERMINAL {
            transitions.push(Transition::new(phase, P::Failed, E::StepFailed, "Step failed"));
        }

        Self { transitions }
    }

    /// Attempt a transition from `current` on `event`.
    pub fn transition(&self, current: WorkflowPhase, event: WorkflowEvent) -> TransitionResult {
        match self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event)
        {
            Some(t) => TransitionResult::Success {
                from: t.from,
                to: t.to,
                description: t.description,
            },
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    /// Check if a transition is valid.
    pub fn can_transition(&self, from: WorkflowPhase, event: WorkflowEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == event)
    }

    /// Events accepted in `phase`.
    pub fn valid_events(&self, phase: WorkflowPhase) -> Vec<WorkflowEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == phase)
            .map(|t| t.event)
            .collect()
    }
}
