//! Per-scenario and per-suite results.

use std::fmt;
use std::time::Duration;

use jiff::Timestamp;

use super::WorkflowPhase;
use crate::capability::StorageCapability;
use crate::error::FailureKind;
use crate::scenario::ExpansionScenario;

/// How a scenario ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScenarioOutcome {
    /// Every step passed.
    Done,
    /// Preconditions did not hold, nothing was provisioned.
    Skipped { reason: String },
    /// A step failed.
    Failed { kind: FailureKind, message: String },
}

impl fmt::Display for ScenarioOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioOutcome::Done => write!(f, "passed"),
            ScenarioOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
            ScenarioOutcome::Failed { kind, message } => {
                write!(f, "failed ({}): {}", kind, message)
            }
        }
    }
}

/// Result of running one scenario.
#[derive(Clone, Debug)]
pub struct ScenarioReport {
    pub scenario: ExpansionScenario,
    pub outcome: ScenarioOutcome,
    /// Namespace created for the scenario, if provisioning got that far.
    pub namespace: Option<String>,
    /// Probed capability, if the probe ran.
    pub capability: Option<StorageCapability>,
    /// Phases visited in order, starting with `Start`.
    pub phases: Vec<WorkflowPhase>,
    pub started_at: Timestamp,
    pub elapsed: Duration,
}

impl ScenarioReport {
    pub fn is_done(&self) -> bool {
        self.outcome == ScenarioOutcome::Done
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, ScenarioOutcome::Skipped { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, ScenarioOutcome::Failed { .. })
    }

    /// Failure classification, if the scenario failed.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            ScenarioOutcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Last phase reached.
    pub fn final_phase(&self) -> WorkflowPhase {
        self.phases.last().copied().unwrap_or_default()
    }

    /// Whether the scenario passed through `phase`.
    pub fn visited(&self, phase: WorkflowPhase) -> bool {
        self.phases.contains(&phase)
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} in {:.1}s",
            self.scenario,
            self.outcome,
            self.elapsed.as_secs_f64()
        )?;
        if let Some(ns) = &self.namespace {
            write!(f, " (namespace {})", ns)?;
        }
        Ok(())
    }
}

/// Results of every scenario in a run.
#[derive(Clone, Debug, Default)]
pub struct SuiteReport {
    pub reports: Vec<ScenarioReport>,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.reports.iter().filter(|r| r.is_done()).count()
    }

    pub fn skipped(&self) -> usize {
        self.reports.iter().filter(|r| r.is_skipped()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.iter().filter(|r| r.is_failed()).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Report for `scenario`, if it ran.
    pub fn get(&self, scenario: ExpansionScenario) -> Option<&ScenarioReport> {
        self.reports.iter().find(|r| r.scenario == scenario)
    }

    /// Namespaces provisioned during the run.
    pub fn namespaces(&self) -> Vec<&str> {
        self.reports
            .iter()
            .filter_map(|r| r.namespace.as_deref())
            .collect()
    }

    /// One-line summary, e.g. `1 passed, 1 skipped, 0 failed`.
    pub fn summary(&self) -> String {
        format!(
            "{} passed, {} skipped, {} failed",
            self.passed(),
            self.skipped(),
            self.failed()
        )
    }
}
