// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Property-based tests for storage-expansion.
//!
//! Uses proptest to generate random inputs and verify invariants.

use std::collections::BTreeMap;
use std::time::Duration;

use proptest::prelude::*;

use storage_expansion::capability::StorageCapability;
use storage_expansion::platform::template;
use storage_expansion::platform::volumes::{VolumeObservation, parse_quantity};
use storage_expansion::retry::{RetryPolicy, retry_until_ok};
use storage_expansion::scenario::{ExpansionScenario, Gate};
use storage_expansion::workflow::{TransitionResult, WorkflowEvent, WorkflowPhase, WorkflowStateMachine};

/// Strategy for generating capability values.
fn any_capability() -> impl Strategy<Value = StorageCapability> {
    prop_oneof![
        Just(StorageCapability::Allowed),
        Just(StorageCapability::Disallowed),
        Just(StorageCapability::Unknown),
    ]
}

/// Strategy for generating scenarios.
fn any_scenario() -> impl Strategy<Value = ExpansionScenario> {
    prop_oneof![
        Just(ExpansionScenario::OnlineExpansion),
        Just(ExpansionScenario::OfflineExpansion),
    ]
}

/// Strategy for generating random phases.
fn any_phase() -> impl Strategy<Value = WorkflowPhase> {
    prop_oneof![
        Just(WorkflowPhase::Start),
        Just(WorkflowPhase::ProbeCapability),
        Just(WorkflowPhase::CreateNamespace),
        Just(WorkflowPhase::CreateCluster),
        Just(WorkflowPhase::InvokeOnlineResize),
        Just(WorkflowPhase::PatchResizeInUseVolumes),
        Just(WorkflowPhase::InvokeOfflineResize),
        Just(WorkflowPhase::AssertConverged),
        Just(WorkflowPhase::Done),
        Just(WorkflowPhase::Skipped),
        Just(WorkflowPhase::Failed),
    ]
}

/// Strategy for generating random events.
fn any_event() -> impl Strategy<Value = WorkflowEvent> {
    prop_oneof![
        Just(WorkflowEvent::Started),
        Just(WorkflowEvent::DepthBelowLevel),
        Just(WorkflowEvent::GatePassed),
        Just(WorkflowEvent::PreconditionMismatch),
        any_scenario().prop_map(WorkflowEvent::ClusterCreated),
        Just(WorkflowEvent::PhaseComplete),
        Just(WorkflowEvent::StepFailed),
    ]
}

/// Kubernetes-ish storage class names.
fn storage_class_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,30}"
}

proptest! {
    /// Property: online runs exactly when expansion is allowed, offline
    /// exactly when it is not.
    #[test]
    fn prop_gate_matches_capability(
        scenario in any_scenario(),
        capability in any_capability(),
        sc in storage_class_name(),
    ) {
        let gate = scenario.should_run(capability, &sc);
        let expected = match scenario {
            ExpansionScenario::OnlineExpansion => capability == StorageCapability::Allowed,
            ExpansionScenario::OfflineExpansion => capability != StorageCapability::Allowed,
        };
        prop_assert_eq!(gate.is_run(), expected);
    }

    /// Property: a skip always names the storage class and is never empty.
    #[test]
    fn prop_skip_reason_names_storage_class(
        scenario in any_scenario(),
        capability in any_capability(),
        sc in storage_class_name(),
    ) {
        if let Gate::Skip(reason) = scenario.should_run(capability, &sc) {
            prop_assert!(reason.starts_with("AllowedVolumeExpansion is "));
            let expected_suffix = format!(" on {}", sc);
            prop_assert!(reason.ends_with(&expected_suffix));
        }
    }

    /// Property: the two scenarios partition every capability.
    #[test]
    fn prop_exactly_one_scenario_runs(capability in any_capability()) {
        let running = ExpansionScenario::ALL
            .iter()
            .filter(|s| s.admits(capability))
            .count();
        prop_assert_eq!(running, 1);
    }

    /// Property: the probe mapping preserves the tri-state.
    #[test]
    fn prop_capability_from_optional_bool(value in proptest::option::of(any::<bool>())) {
        let capability = StorageCapability::from(value);
        prop_assert_eq!(capability.is_allowed(), value == Some(true));
        prop_assert_eq!(capability == StorageCapability::Unknown, value.is_none());
    }

    /// Property: terminal phases accept no events.
    #[test]
    fn prop_terminal_phases_are_final(phase in any_phase(), event in any_event()) {
        let sm = WorkflowStateMachine::new();
        if phase.is_terminal() {
            prop_assert!(!sm.can_transition(phase, event));
        }
    }

    /// Property: every non-terminal phase can fail.
    #[test]
    fn prop_non_terminal_phases_can_fail(phase in any_phase()) {
        let sm = WorkflowStateMachine::new();
        prop_assert_eq!(
            sm.can_transition(phase, WorkflowEvent::StepFailed),
            !phase.is_terminal()
        );
    }

    /// Property: transition() and can_transition() agree.
    #[test]
    fn prop_transition_consistency(phase in any_phase(), event in any_event()) {
        let sm = WorkflowStateMachine::new();
        let succeeded = matches!(sm.transition(phase, event), TransitionResult::Success { .. });
        prop_assert_eq!(succeeded, sm.can_transition(phase, event));
    }

    /// Property: rendering substitutes every defined variable and leaves
    /// surrounding text alone.
    #[test]
    fn prop_template_substitution(
        prefix in "[a-z: ]{0,20}",
        value in "[a-zA-Z0-9._-]{1,20}",
        suffix in "[a-z: ]{0,20}",
    ) {
        let vars: BTreeMap<String, String> =
            [("E2E_DEFAULT_STORAGE_CLASS".to_string(), value.clone())].into_iter().collect();
        let rendered = template::render(
            &format!("{}${{E2E_DEFAULT_STORAGE_CLASS}}{}", prefix, suffix),
            &vars,
        ).unwrap();
        prop_assert_eq!(rendered, format!("{}{}{}", prefix, value, suffix));
    }

    /// Property: binary quantities compare by value, not spelling.
    #[test]
    fn prop_binary_quantities_compare_by_value(gib in 1u128..1024) {
        let mib = gib * 1024;
        prop_assert_eq!(parse_quantity(&format!("{}Gi", gib)), parse_quantity(&format!("{}Mi", mib)));
        let observation = VolumeObservation {
            name: "pg-1".to_string(),
            capacity: Some(format!("{}Mi", mib)),
        };
        let expected = format!("{}Gi", gib);
        prop_assert!(observation.has_capacity(&expected));
    }

    /// Property: a loop whose action always fails gives up after the
    /// timeout and no later than one poll interval past it.
    #[test]
    fn prop_retry_always_terminates(timeout_secs in 1u64..120, poll_secs in 1u64..30) {
        let policy = RetryPolicy::from_secs(timeout_secs, poll_secs);
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        let failure = rt.block_on(async {
            retry_until_ok(policy, || async { Err::<(), _>("connection refused") }).await
        }).unwrap_err();

        prop_assert!(failure.elapsed >= policy.timeout);
        prop_assert!(failure.elapsed <= policy.max_wait());
        let max_attempts = u32::try_from(timeout_secs / poll_secs).unwrap() + 2;
        prop_assert!(failure.attempts >= 1 && failure.attempts <= max_attempts);
        prop_assert_eq!(failure.last_error, Some("connection refused"));
    }

    /// Property: a loop whose action succeeds on attempt `n` returns
    /// without sleeping past that attempt.
    #[test]
    fn prop_retry_returns_on_first_success(succeed_on in 1u32..6) {
        let policy = RetryPolicy::from_secs(60, 5);
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        let (attempts, elapsed) = rt.block_on(async {
            let start = tokio::time::Instant::now();
            let mut calls = 0u32;
            retry_until_ok(policy, || {
                calls += 1;
                let n = calls;
                async move { if n >= succeed_on { Ok(n) } else { Err("not yet") } }
            })
            .await
            .map(|n| (n, start.elapsed()))
            .unwrap()
        });

        prop_assert_eq!(attempts, succeed_on);
        prop_assert!(elapsed < Duration::from_secs(5) * succeed_on);
    }
}
