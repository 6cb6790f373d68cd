//! The storage expansion verification workflow.
//!
//! Each scenario walks a fixed state machine: probe the storage class, gate
//! on the result, provision a namespace and cluster, run the resize
//! primitive, then assert the volumes converged.

mod report;
mod runner;
mod state_machine;

pub use report::{ScenarioOutcome, ScenarioReport, SuiteReport};
pub use runner::{ExpansionWorkflow, resize_budget};
pub use state_machine::{
    Transition, TransitionResult, WorkflowEvent, WorkflowPhase, WorkflowStateMachine,
};
