//! Per-step reasoning loop.
//!
//! The loop alternates between asking a [`DecisionFunction`] what to do next and carrying
//! out the chosen action:
//!
//! ```text
//! Thinking -> Acting -> Observing -> Thinking ...
//!          \-> Final candidate -> schema check -> Finished | Observing (rejected)
//! ```
//!
//! Every decision call uses one iteration. The loop is bounded by `max_iterations` and by a
//! cap on consecutive failed tool invocations. Tool failures and schema rejections are fed
//! back to the decision function as observations so it can correct itself.

pub mod profile;

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value};
use stepwise_types::{
    AgentKind, Decision, Observation, OutputSchema, ReasoningTranscript, ToolDescriptor, Turn, validate_output_record,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AgentError, DecisionError, ToolError};
use crate::tools::ToolBinding;

/// Everything the decision function sees for one turn.
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    pub step_id: &'a str,
    pub agent: AgentKind,
    /// Agent preamble plus the step's instructions.
    pub instructions: &'a str,
    pub input: &'a JsonMap<String, Value>,
    pub tools: &'a [ToolDescriptor],
    pub output_schema: &'a OutputSchema,
    pub transcript: &'a ReasoningTranscript,
    /// 1-based iteration number within the current attempt.
    pub iteration: u32,
}

/// The opaque reasoning backend.
#[async_trait]
pub trait DecisionFunction: Send + Sync {
    async fn decide(&self, request: DecisionRequest<'_>) -> Result<Decision, DecisionError>;
}

/// Bounds applied to one loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    pub max_iterations: u32,
    pub max_consecutive_tool_failures: u32,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            max_consecutive_tool_failures: 3,
        }
    }
}

/// One step's work item.
#[derive(Debug, Clone, Copy)]
pub struct ReasoningTask<'a> {
    pub step_id: &'a str,
    pub agent: AgentKind,
    pub instructions: &'a str,
    pub input: &'a JsonMap<String, Value>,
    pub tools: &'a [ToolBinding],
    pub output_schema: &'a OutputSchema,
}

/// Result of a loop run together with the transcript that produced it.
#[derive(Debug)]
pub struct LoopOutcome {
    pub output: Result<Value, AgentError>,
    pub transcript: ReasoningTranscript,
}

pub struct ReasoningLoop<'a> {
    decision: &'a dyn DecisionFunction,
    limits: LoopLimits,
    cancel: CancellationToken,
}

impl<'a> ReasoningLoop<'a> {
    pub fn new(decision: &'a dyn DecisionFunction, limits: LoopLimits, cancel: CancellationToken) -> Self {
        Self { decision, limits, cancel }
    }

    /// Runs until a schema-conforming final answer or a terminal failure.
    pub async fn run(&self, task: ReasoningTask<'_>) -> LoopOutcome {
        let mut transcript = ReasoningTranscript::new();
        let output = self.drive(task, &mut transcript).await;
        LoopOutcome { output, transcript }
    }

    async fn drive(&self, task: ReasoningTask<'_>, transcript: &mut ReasoningTranscript) -> Result<Value, AgentError> {
        let descriptors: Vec<ToolDescriptor> = task.tools.iter().map(|binding| binding.descriptor().clone()).collect();
        let mut consecutive_failures = 0u32;

        for iteration in 1..=self.limits.max_iterations {
            let request = DecisionRequest {
                step_id: task.step_id,
                agent: task.agent,
                instructions: task.instructions,
                input: task.input,
                tools: &descriptors,
                output_schema: task.output_schema,
                transcript,
                iteration,
            };
            debug!(step_id = %task.step_id, iteration, "requesting decision");

            let decision = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                decision = self.decision.decide(request) => decision.map_err(AgentError::DecisionFault)?,
            };

            if let Some(thought) = decision.thought()
                && !thought.trim().is_empty()
            {
                transcript.push(Turn::Thought {
                    text: thought.to_string(),
                });
            }

            match decision {
                Decision::Action { tool, arguments, .. } => {
                    transcript.push(Turn::Action {
                        tool: tool.clone(),
                        arguments: arguments.clone(),
                    });
                    let Some(binding) = task.tools.iter().find(|binding| binding.name() == tool) else {
                        warn!(step_id = %task.step_id, tool = %tool, "decision requested an unbound tool");
                        return Err(AgentError::UnknownToolRequested {
                            tool,
                            bound: task.tools.iter().map(|binding| binding.name().to_string()).collect(),
                        });
                    };

                    info!(step_id = %task.step_id, tool = %tool, iteration, "invoking tool");
                    let result = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                        result = binding.invoke(arguments) => result,
                    };

                    match result {
                        Ok(value) => {
                            consecutive_failures = 0;
                            transcript.push_observation(Observation::ToolResult { tool, result: value });
                        }
                        Err(error) => {
                            consecutive_failures += 1;
                            warn!(
                                step_id = %task.step_id,
                                tool = %tool,
                                consecutive_failures,
                                retryable = error.is_retryable(),
                                error = %error,
                                "tool invocation failed"
                            );
                            transcript.push_observation(Observation::ToolFailure {
                                tool: tool.clone(),
                                message: failure_message(&error),
                                retryable: error.is_retryable(),
                            });
                            if consecutive_failures >= self.limits.max_consecutive_tool_failures {
                                return Err(AgentError::ToolRepeatedFailure {
                                    tool,
                                    failures: consecutive_failures,
                                    last: error,
                                });
                            }
                        }
                    }
                }
                Decision::Final { output, .. } => match validate_output_record(&output, task.output_schema) {
                    Ok(()) => {
                        transcript.push(Turn::Final { output: output.clone() });
                        info!(step_id = %task.step_id, iteration, "final answer accepted");
                        return Ok(output);
                    }
                    Err(violations) => {
                        debug!(step_id = %task.step_id, iteration, violations = violations.len(), "final answer rejected");
                        transcript.push_observation(Observation::SchemaRejected { violations });
                    }
                },
            }
        }

        Err(AgentError::MaxIterationsExceeded {
            max_iterations: self.limits.max_iterations,
        })
    }
}

fn failure_message(error: &ToolError) -> String {
    match error {
        ToolError::InvocationFailed { cause, .. } => cause.message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolFailure;
    use crate::resolve::Environment;
    use crate::tools::{Tool, ToolRegistry};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    };
    use stepwise_types::{FieldShape, ToolSpec};

    struct Script {
        decisions: Mutex<VecDeque<Result<Decision, DecisionError>>>,
        seen_transcript_lengths: Mutex<Vec<usize>>,
    }

    impl Script {
        fn new(decisions: Vec<Result<Decision, DecisionError>>) -> Self {
            Self {
                decisions: Mutex::new(decisions.into()),
                seen_transcript_lengths: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DecisionFunction for Script {
        async fn decide(&self, request: DecisionRequest<'_>) -> Result<Decision, DecisionError> {
            self.seen_transcript_lengths.lock().unwrap().push(request.transcript.len());
            self.decisions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Decision::action("lookup", JsonMap::new())))
        }
    }

    struct FlakyLookup {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Tool for FlakyLookup {
        async fn invoke(&self, _arguments: JsonMap<String, Value>) -> Result<Value, ToolFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(ToolFailure::retryable("503 Service Unavailable"));
            }
            Ok(json!({ "leads": ["a", "b"] }))
        }
    }

    fn bindings(failures: u32) -> (Vec<ToolBinding>, Arc<FlakyLookup>) {
        let lookup = Arc::new(FlakyLookup {
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        });
        let mut registry = ToolRegistry::new();
        registry.register(
            lookup.clone(),
            ToolDescriptor {
                name: "lookup".into(),
                purpose: "Find leads.".into(),
                parameters: Vec::new(),
            },
        );
        let bound = registry
            .bind_specs(&[ToolSpec::named("lookup")], &Environment::default())
            .expect("binds");
        (bound, lookup)
    }

    fn schema() -> OutputSchema {
        OutputSchema::required([("leads", FieldShape::List)])
    }

    async fn run(script: &Script, tools: &[ToolBinding], limits: LoopLimits) -> LoopOutcome {
        let input = JsonMap::new();
        let schema = schema();
        ReasoningLoop::new(script, limits, CancellationToken::new())
            .run(ReasoningTask {
                step_id: "search",
                agent: AgentKind::React,
                instructions: "find leads",
                input: &input,
                tools,
                output_schema: &schema,
            })
            .await
    }

    #[tokio::test]
    async fn act_observe_then_finish() {
        let (tools, lookup) = bindings(0);
        let script = Script::new(vec![
            Ok(Decision::Action {
                thought: Some("search first".into()),
                tool: "lookup".into(),
                arguments: JsonMap::new(),
            }),
            Ok(Decision::final_output(json!({ "leads": ["a", "b"] }))),
        ]);

        let outcome = run(&script, &tools, LoopLimits::default()).await;
        assert_eq!(outcome.output.expect("finishes"), json!({ "leads": ["a", "b"] }));
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.transcript.len(), 4);
        assert!(matches!(outcome.transcript.turns[0], Turn::Thought { .. }));
        assert_eq!(*script.seen_transcript_lengths.lock().unwrap(), vec![0, 3]);
    }

    #[tokio::test]
    async fn schema_rejection_is_fed_back() {
        let (tools, _) = bindings(0);
        let script = Script::new(vec![
            Ok(Decision::final_output(json!({ "leads": "a,b" }))),
            Ok(Decision::final_output(json!({ "leads": ["a", "b"] }))),
        ]);

        let outcome = run(&script, &tools, LoopLimits::default()).await;
        assert!(outcome.output.is_ok());
        let rejected: Vec<_> = outcome.transcript.observations().collect();
        assert!(matches!(rejected[0], Observation::SchemaRejected { violations } if violations.len() == 1));
    }

    #[tokio::test]
    async fn always_non_conforming_hits_iteration_cap() {
        let (tools, _) = bindings(0);
        let script = Script::new((0..5).map(|_| Ok(Decision::final_output(json!({})))).collect());
        let limits = LoopLimits {
            max_iterations: 3,
            max_consecutive_tool_failures: 3,
        };

        let outcome = run(&script, &tools, limits).await;
        assert!(matches!(outcome.output, Err(AgentError::MaxIterationsExceeded { max_iterations: 3 })));
        assert_eq!(outcome.transcript.observations().count(), 3);
    }

    #[tokio::test]
    async fn always_acting_hits_iteration_cap() {
        let (tools, lookup) = bindings(0);
        let script = Script::new(Vec::new());
        let limits = LoopLimits {
            max_iterations: 4,
            max_consecutive_tool_failures: 2,
        };

        let outcome = run(&script, &tools, limits).await;
        assert!(matches!(outcome.output, Err(AgentError::MaxIterationsExceeded { .. })));
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn unknown_tool_fails_immediately() {
        let (tools, lookup) = bindings(0);
        let script = Script::new(vec![Ok(Decision::action("send_email", JsonMap::new()))]);

        let outcome = run(&script, &tools, LoopLimits::default()).await;
        let Err(AgentError::UnknownToolRequested { tool, bound }) = outcome.output else {
            panic!("expected unknown tool");
        };
        assert_eq!(tool, "send_email");
        assert_eq!(bound, vec!["lookup".to_string()]);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn consecutive_failures_reset_on_success() {
        let (tools, _) = bindings(2);
        let limits = LoopLimits {
            max_iterations: 10,
            max_consecutive_tool_failures: 2,
        };
        let script = Script::new(Vec::new());
        let outcome = run(&script, &tools, limits).await;
        assert!(matches!(
            outcome.output,
            Err(AgentError::ToolRepeatedFailure { failures: 2, ref last, .. }) if last.is_retryable()
        ));

        let (tools, _) = bindings(1);
        let script = Script::new(vec![
            Ok(Decision::action("lookup", JsonMap::new())),
            Ok(Decision::action("lookup", JsonMap::new())),
            Ok(Decision::final_output(json!({ "leads": [] }))),
        ]);
        let outcome = run(&script, &tools, limits).await;
        assert!(outcome.output.is_ok());
        let failures: Vec<bool> = outcome.transcript.observations().map(Observation::is_failure).collect();
        assert_eq!(failures, vec![true, false]);
    }

    #[tokio::test]
    async fn decision_errors_become_faults() {
        let (tools, _) = bindings(0);
        let script = Script::new(vec![Err(DecisionError::Timeout)]);
        let outcome = run(&script, &tools, LoopLimits::default()).await;
        assert!(matches!(outcome.output, Err(AgentError::DecisionFault(DecisionError::Timeout))));
    }

    #[tokio::test]
    async fn cancellation_stops_before_deciding() {
        let (tools, _) = bindings(0);
        let script = Script::new(vec![Ok(Decision::final_output(json!({ "leads": [] })))]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let input = JsonMap::new();
        let schema = schema();
        let outcome = ReasoningLoop::new(&script, LoopLimits::default(), cancel)
            .run(ReasoningTask {
                step_id: "search",
                agent: AgentKind::React,
                instructions: "",
                input: &input,
                tools: &tools,
                output_schema: &schema,
            })
            .await;
        assert!(matches!(outcome.output, Err(AgentError::Cancelled)));
        assert!(outcome.transcript.is_empty());
    }

    /// Cancels the run from inside the call, then never completes.
    struct StalledSearch {
        cancel: CancellationToken,
    }

    #[async_trait]
    impl Tool for StalledSearch {
        async fn invoke(&self, _arguments: JsonMap<String, Value>) -> Result<Value, ToolFailure> {
            self.cancel.cancel();
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_stalled_tool() {
        let cancel = CancellationToken::new();
        let mut registry = ToolRegistry::new();
        registry.register(
            Arc::new(StalledSearch { cancel: cancel.clone() }),
            ToolDescriptor {
                name: "lookup".into(),
                purpose: "Never answers.".into(),
                parameters: Vec::new(),
            },
        );
        let tools = registry
            .bind_specs(&[ToolSpec::named("lookup")], &Environment::default())
            .expect("binds");
        let script = Script::new(vec![Ok(Decision::action("lookup", JsonMap::new()))]);
        let input = JsonMap::new();
        let schema = schema();

        let outcome = ReasoningLoop::new(&script, LoopLimits::default(), cancel)
            .run(ReasoningTask {
                step_id: "search",
                agent: AgentKind::React,
                instructions: "",
                input: &input,
                tools: &tools,
                output_schema: &schema,
            })
            .await;

        assert!(matches!(outcome.output, Err(AgentError::Cancelled)));
        assert!(matches!(outcome.transcript.turns.last(), Some(Turn::Action { tool, .. }) if tool == "lookup"));
        assert_eq!(outcome.transcript.observations().count(), 0);
    }
}
