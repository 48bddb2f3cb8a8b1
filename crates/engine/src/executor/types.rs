//! Core executor data types.

use serde::Serialize;
use serde_json::Value;
use stepwise_types::{ReasoningTranscript, StepFailurePolicy, WorkflowSettings};
use std::time::Duration;

use crate::agent::LoopLimits;
use crate::state::ExecutionState;

use super::retry::RetryPolicy;

/// Status of a step after the run moved past it.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Output validated and stored in the execution state.
    Succeeded,
    /// Transient failures exhausted their retries and the run was configured to continue.
    Skipped,
}

/// What happened to one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub id: String,
    pub status: StepStatus,
    /// Number of reasoning-loop attempts (>= 1).
    pub attempts: u32,
    /// Transcript of the last attempt.
    pub transcript: ReasoningTranscript,
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: ExecutionState,
    pub steps: Vec<StepReport>,
}

impl RunReport {
    /// Output record of a succeeded step.
    pub fn output(&self, step_id: &str) -> Option<&Value> {
        self.state.get(step_id)
    }

    pub fn step(&self, step_id: &str) -> Option<&StepReport> {
        self.steps.iter().find(|report| report.id == step_id)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|report| report.status == StepStatus::Skipped)
    }
}

/// Run-wide knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorOptions {
    /// Pause between consecutive steps.
    pub pacing_delay: Duration,
    pub retry: RetryPolicy,
    /// Defaults for every step; `max_iterations` may be overridden per step.
    pub limits: LoopLimits,
    pub failure_policy: StepFailurePolicy,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from_settings(&WorkflowSettings::default())
    }
}

impl ExecutorOptions {
    pub fn from_settings(settings: &WorkflowSettings) -> Self {
        Self {
            pacing_delay: Duration::from_secs(settings.pacing_delay_secs),
            retry: RetryPolicy::from_settings(&settings.retry),
            limits: LoopLimits {
                max_iterations: settings.max_iterations,
                max_consecutive_tool_failures: settings.max_consecutive_tool_failures,
            },
            failure_policy: settings.on_step_failure,
        }
    }
}
