//! Execution engine: walks the graph's execution order, resolves each step's inputs,
//! binds its tools, runs the reasoning loop, and stores validated output.
//!
//! - Steps run strictly one at a time in topological order
//! - Transient failures retry the whole step with exponential backoff
//! - A pacing delay separates consecutive steps
//! - Every wait observes the run's cancellation token

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map as JsonMap, Value};
use stepwise_types::{ReasoningTranscript, StepFailurePolicy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{DecisionFunction, LoopLimits, ReasoningLoop, ReasoningTask};
use crate::error::{AgentError, ExecutionError, StepFailure};
use crate::graph::{StepNode, WorkflowGraph};
use crate::resolve::{Environment, resolve_inputs};
use crate::state::ExecutionState;
use crate::tools::ToolRegistry;

pub mod retry;
pub mod types;

pub use retry::RetryPolicy;
pub use types::{ExecutorOptions, RunReport, StepReport, StepStatus};

/// Drives a workflow run against a tool registry and a decision function.
pub struct Executor {
    registry: Arc<ToolRegistry>,
    decision: Arc<dyn DecisionFunction>,
    environment: Environment,
    options: ExecutorOptions,
}

impl Executor {
    pub fn new(registry: Arc<ToolRegistry>, decision: Arc<dyn DecisionFunction>, environment: Environment) -> Self {
        Self {
            registry,
            decision,
            environment,
            options: ExecutorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Runs every step of the graph in execution order.
    ///
    /// Returns the final state and per-step reports, or the first unrecoverable error. State
    /// is only written after a step's output validated, so a failed or cancelled step leaves
    /// no entry behind.
    pub async fn run(
        &self,
        graph: &WorkflowGraph,
        initial: JsonMap<String, Value>,
        cancel: CancellationToken,
    ) -> Result<RunReport, ExecutionError> {
        let mut state = ExecutionState::new(initial);
        let mut reports = Vec::with_capacity(graph.len());
        info!(steps = graph.len(), "workflow run started");

        for (index, node) in graph.execution_order().enumerate() {
            if index > 0 {
                self.pace(node, &cancel).await?;
            }
            if cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled {
                    step: Some(node.id().to_string()),
                });
            }

            let report = self.run_step(node, &mut state, &cancel).await?;
            reports.push(report);
        }

        info!(
            completed = state.completed_steps().count(),
            skipped = reports.iter().filter(|report| report.status == StepStatus::Skipped).count(),
            "workflow run finished"
        );
        Ok(RunReport { state, steps: reports })
    }

    async fn pace(&self, next: &StepNode, cancel: &CancellationToken) -> Result<(), ExecutionError> {
        let delay = self.options.pacing_delay;
        if delay.is_zero() {
            return Ok(());
        }
        info!(next_step = %next.id(), delay_secs = delay.as_secs_f64(), "pacing before next step");
        sleep_or_cancel(delay, cancel)
            .await
            .map_err(|()| ExecutionError::Cancelled {
                step: Some(next.id().to_string()),
            })
    }

    async fn run_step(
        &self,
        node: &StepNode,
        state: &mut ExecutionState,
        cancel: &CancellationToken,
    ) -> Result<StepReport, ExecutionError> {
        let step_id = node.id();
        info!(step_id = %step_id, agent = %node.spec.agent, "step started");

        let input = resolve_inputs(&node.inputs, state).map_err(|source| ExecutionError::UnresolvedInput {
            step: step_id.to_string(),
            source,
        })?;
        debug!(step_id = %step_id, inputs = input.len(), "inputs resolved");

        let tools = self
            .registry
            .bind(&node.tools, &self.environment)
            .map_err(|error| ExecutionError::StepFailed {
                step: step_id.to_string(),
                attempts: 0,
                cause: StepFailure::Binding(error),
                transcript: ReasoningTranscript::new(),
            })?;

        let limits = LoopLimits {
            max_iterations: node
                .spec
                .max_iterations
                .unwrap_or(self.options.limits.max_iterations)
                .max(1),
            max_consecutive_tool_failures: self.options.limits.max_consecutive_tool_failures.max(1),
        };
        let task = ReasoningTask {
            step_id,
            agent: node.spec.agent,
            instructions: &node.instructions,
            input: &input,
            tools: &tools,
            output_schema: &node.spec.output_schema,
        };
        let max_attempts = self.options.retry.attempts();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = ReasoningLoop::new(self.decision.as_ref(), limits, cancel.clone())
                .run(task)
                .await;

            let error = match outcome.output {
                Ok(output) => {
                    if !state.record(step_id, output) {
                        warn!(step_id = %step_id, "state entry already present; keeping the first output");
                    }
                    info!(step_id = %step_id, attempt, turns = outcome.transcript.len(), "step succeeded");
                    return Ok(StepReport {
                        id: step_id.to_string(),
                        status: StepStatus::Succeeded,
                        attempts: attempt,
                        transcript: outcome.transcript,
                    });
                }
                Err(AgentError::Cancelled) => {
                    return Err(ExecutionError::Cancelled {
                        step: Some(step_id.to_string()),
                    });
                }
                Err(error) => StepFailure::Agent(error),
            };

            let transient = error.is_transient();
            if transient && attempt < max_attempts {
                let delay = self.options.retry.delay_after(attempt);
                warn!(
                    step_id = %step_id,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient step failure; retrying"
                );
                sleep_or_cancel(delay, cancel).await.map_err(|()| ExecutionError::Cancelled {
                    step: Some(step_id.to_string()),
                })?;
                continue;
            }

            if transient && self.options.failure_policy == StepFailurePolicy::Skip {
                warn!(step_id = %step_id, attempts = attempt, error = %error, "step skipped after exhausting retries");
                return Ok(StepReport {
                    id: step_id.to_string(),
                    status: StepStatus::Skipped,
                    attempts: attempt,
                    transcript: outcome.transcript,
                });
            }

            warn!(step_id = %step_id, attempts = attempt, transient, error = %error, "step failed");
            return Err(ExecutionError::StepFailed {
                step: step_id.to_string(),
                attempts: attempt,
                cause: error,
                transcript: outcome.transcript,
            });
        }
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<(), ()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(()),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}
