//! Executes expansion scenarios against a [`ClusterPlatform`].

use std::time::Duration;

use jiff::Timestamp;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::report::{ScenarioOutcome, ScenarioReport, SuiteReport};
use super::state_machine::{TransitionResult, WorkflowEvent, WorkflowPhase, WorkflowStateMachine};
use crate::capability::{StorageCapability, probe_capability};
use crate::config::WorkflowConfig;
use crate::error::ScenarioError;
use crate::platform::{ClusterPlatform, disable_resize_in_use_patch, merge_patch_command};
use crate::retry::retry_until_ok;
use crate::scenario::{ExpansionScenario, Gate};

const DEPTH_SKIP_REASON: &str = "Test depth is lower than the amount requested for this test";

/// Progress of one scenario through the state machine.
struct ScenarioRun<'a> {
    machine: &'a WorkflowStateMachine,
    scenario: ExpansionScenario,
    phases: Vec<WorkflowPhase>,
    namespace: Option<String>,
    capability: Option<StorageCapability>,
}

impl<'a> ScenarioRun<'a> {
    fn new(machine: &'a WorkflowStateMachine, scenario: ExpansionScenario) -> Self {
        Self {
            machine,
            scenario,
            phases: vec![WorkflowPhase::Start],
            namespace: None,
            capability: None,
        }
    }

    fn phase(&self) -> WorkflowPhase {
        self.phases.last().copied().unwrap_or_default()
    }

    fn advance(&mut self, event: WorkflowEvent) -> Result<(), ScenarioError> {
        match self.machine.transition(self.phase(), event) {
            TransitionResult::Success {
                from,
                to,
                description,
            } => {
                debug!(
                    scenario = %self.scenario,
                    from = %from,
                    to = %to,
                    event = %event,
                    "{}", description
                );
                self.phases.push(to);
                Ok(())
            }
            TransitionResult::InvalidTransition { current, event } => {
                Err(ScenarioError::InvalidTransition {
                    from: current,
                    event: event.to_string(),
                })
            }
        }
    }
}

/// Runs the storage expansion scenarios.
pub struct ExpansionWorkflow<P> {
    platform: P,
    config: WorkflowConfig,
    machine: WorkflowStateMachine,
}

impl<P: ClusterPlatform> ExpansionWorkflow<P> {
    pub fn new(platform: P, config: WorkflowConfig) -> Self {
        Self {
            platform,
            config,
            machine: WorkflowStateMachine::new(),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Run both scenarios concurrently. Each probes the capability itself
    /// and provisions its own namespace.
    pub async fn run_all(&self) -> SuiteReport {
        let runs = ExpansionScenario::ALL.map(|scenario| self.run_scenario(scenario));
        let reports = futures::future::join_all(runs).await;
        let suite = SuiteReport { reports };
        info!(summary = %suite.summary(), "Storage expansion suite finished");
        suite
    }

    /// Run one scenario to a terminal phase.
    pub async fn run_scenario(&self, scenario: ExpansionScenario) -> ScenarioReport {
        let started_at = Timestamp::now();
        let clock = Instant::now();
        let mut run = ScenarioRun::new(&self.machine, scenario);

        info!(
            scenario = %scenario,
            storage_class = %self.config.storage_class,
            "Storage expansion scenario {}", scenario.description()
        );

        let outcome = match self.execute(&mut run).await {
            Ok(None) => {
                info!(scenario = %scenario, "Scenario passed");
                ScenarioOutcome::Done
            }
            Ok(Some(reason)) => {
                warn!(scenario = %scenario, reason = %reason, "Scenario skipped");
                ScenarioOutcome::Skipped { reason }
            }
            Err(err) => {
                let kind = err.kind();
                error!(
                    scenario = %scenario,
                    phase = %run.phase(),
                    kind = %kind,
                    error = %err,
                    "Scenario failed"
                );
                if !run.phase().is_terminal() {
                    if let Err(e) = run.advance(WorkflowEvent::StepFailed) {
                        warn!(scenario = %scenario, error = %e, "Could not record failure transition");
                    }
                }
                ScenarioOutcome::Failed {
                    kind,
                    message: err.to_string(),
                }
            }
        };

        ScenarioReport {
            scenario,
            outcome,
            namespace: run.namespace,
            capability: run.capability,
            phases: run.phases,
            started_at,
            elapsed: clock.elapsed(),
        }
    }

    /// Drive the scenario; `Ok(Some(reason))` means it was skipped.
    async fn execute(&self, run: &mut ScenarioRun<'_>) -> Result<Option<String>, ScenarioError> {
        let scenario = run.scenario;
        let cluster_name = self.config.cluster_name.as_str();

        if !self.config.depth_allows() {
            run.advance(WorkflowEvent::DepthBelowLevel)?;
            return Ok(Some(DEPTH_SKIP_REASON.to_string()));
        }
        run.advance(WorkflowEvent::Started)?;

        let capability = probe_capability(&self.platform, &self.config.storage_class)
            .await
            .map_err(|e| ScenarioError::during(WorkflowPhase::ProbeCapability, e))?;
        run.capability = Some(capability);

        if let Gate::Skip(reason) = scenario.should_run(capability, &self.config.storage_class) {
            run.advance(WorkflowEvent::PreconditionMismatch)?;
            return Ok(Some(reason));
        }
        run.advance(WorkflowEvent::GatePassed)?;

        let namespace = self
            .platform
            .create_unique_namespace(scenario.namespace_prefix())
            .await
            .map_err(|e| ScenarioError::during(WorkflowPhase::CreateNamespace, e))?;
        info!(scenario = %scenario, namespace = %namespace, "Namespace created");
        run.namespace = Some(namespace.clone());
        run.advance(WorkflowEvent::PhaseComplete)?;

        self.platform
            .create_cluster(&namespace, cluster_name, &self.config.manifest_template())
            .await
            .map_err(|e| ScenarioError::during(WorkflowPhase::CreateCluster, e))?;
        run.advance(WorkflowEvent::ClusterCreated(scenario))?;

        match scenario {
            ExpansionScenario::OnlineExpansion => {
                self.platform
                    .online_resize_pvc(&namespace, cluster_name)
                    .await
                    .map_err(|e| ScenarioError::during(WorkflowPhase::InvokeOnlineResize, e))?;
            }
            ExpansionScenario::OfflineExpansion => {
                self.disable_resize_in_use(&namespace).await?;
                run.advance(WorkflowEvent::PhaseComplete)?;

                self.platform
                    .offline_resize_pvc(&namespace, cluster_name, self.config.offline_resize_timeout)
                    .await
                    .map_err(|e| ScenarioError::during(WorkflowPhase::InvokeOfflineResize, e))?;
            }
        }
        run.advance(WorkflowEvent::PhaseComplete)?;

        self.platform
            .verify_expanded(&namespace, cluster_name)
            .await
            .map_err(|e| ScenarioError::during(WorkflowPhase::AssertConverged, e))?;
        run.advance(WorkflowEvent::PhaseComplete)?;

        Ok(None)
    }

    /// Set `spec.storage.resizeInUseVolumes` to false on the cluster in
    /// `namespace`, retrying under the patch policy.
    ///
    /// The patch is a merge patch, so applying it to a cluster that already
    /// has the value succeeds on the first attempt.
    pub async fn disable_resize_in_use(&self, namespace: &str) -> Result<(), ScenarioError> {
        let command = merge_patch_command(
            "cluster",
            &self.config.cluster_name,
            namespace,
            &disable_resize_in_use_patch(),
        );
        let policy = self.config.patch_retry;
        let platform = &self.platform;
        let cmd = command.as_str();

        let result = retry_until_ok(policy, || async move { platform.run_unchecked(cmd).await }).await;
        match result {
            Ok(output) => {
                debug!(namespace, stdout = %output.stdout.trim(), "resizeInUseVolumes disabled");
                Ok(())
            }
            Err(timeout) => Err(ScenarioError::PatchTimeout {
                timeout: policy.timeout,
                attempts: timeout.attempts,
                last_error: timeout.last_error_message(),
                command,
            }),
        }
    }
}

/// Time a scenario may take at most under `config`, excluding cluster creation.
pub fn resize_budget(config: &WorkflowConfig, scenario: ExpansionScenario) -> Duration {
    match scenario {
        ExpansionScenario::OnlineExpansion => config.online_resize_timeout,
        ExpansionScenario::OfflineExpansion => {
            config.patch_retry.max_wait() + config.offline_resize_timeout
        }
    }
}
