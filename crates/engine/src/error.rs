//! Error taxonomy for workflow loading and execution.
//!
//! Only [`GraphError`] (at load time) and [`ExecutionError`] (at run time) are returned to
//! callers; the remaining kinds travel inside them as `source` causes.

use stepwise_types::ReasoningTranscript;
use thiserror::Error;

/// Boxed error used to keep the underlying cause of a tool or backend failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while parsing `{{ ... }}` templates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("empty reference in '{template}'")]
    EmptyReference { template: String },

    #[error("invalid reference '{expression}': {reason}")]
    InvalidReference { expression: String, reason: String },
}

/// Load-time errors produced while building the workflow graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("cycle detected in workflow steps involving: {}", steps.join(", "))]
    CycleDetected { steps: Vec<String> },

    #[error("step '{step}' references unknown step '{reference}'")]
    UnknownReference { step: String, reference: String },

    #[error("duplicate step identifier detected: '{0}'")]
    DuplicateStep(String),

    #[error("step identifier '{0}' is reserved for pipeline seed data")]
    ReservedStepId(String),

    #[error("step '{step}' has an invalid template in {field}")]
    InvalidTemplate {
        step: String,
        field: String,
        #[source]
        source: TemplateError,
    },

    #[error("step '{step}' has invalid tool configuration")]
    InvalidToolConfig {
        step: String,
        #[source]
        source: ToolError,
    },
}

/// A reference that could not be resolved against state or environment.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("'{expression}' could not be resolved: '{missing}' is missing")]
    MissingPath { expression: String, missing: String },

    #[error("environment variable '{name}' is not set")]
    MissingEnvVar { name: String },
}

/// Failure reported by a tool implementation, classified by the tool itself.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ToolFailure {
    pub message: String,
    pub retryable: bool,
    #[source]
    pub source: Option<BoxError>,
}

impl ToolFailure {
    /// A failure worth retrying (network trouble, rate limiting, upstream 5xx).
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            source: None,
        }
    }

    /// A failure that will not go away on retry.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Errors from binding or invoking tools.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{name}' is not registered")]
    UnknownTool { name: String },

    #[error("tool '{tool}' has an invalid placeholder in config key '{key}'")]
    InvalidConfig {
        tool: String,
        key: String,
        #[source]
        source: TemplateError,
    },

    #[error("tool '{tool}' configuration could not be resolved")]
    Configuration {
        tool: String,
        #[source]
        source: ResolutionError,
    },

    #[error("tool '{tool}' invocation failed: {cause}")]
    InvocationFailed {
        tool: String,
        retryable: bool,
        #[source]
        cause: ToolFailure,
    },
}

impl ToolError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::InvocationFailed { retryable: true, .. })
    }
}

/// Errors produced by a decision function.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("decision backend timed out")]
    Timeout,

    #[error("decision backend error: {message}")]
    Backend {
        message: String,
        retryable: bool,
        #[source]
        source: Option<BoxError>,
    },

    #[error("malformed decision: {0}")]
    Malformed(String),
}

impl DecisionError {
    pub fn backend(message: impl Into<String>, retryable: bool) -> Self {
        DecisionError::Backend {
            message: message.into(),
            retryable,
            source: None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            DecisionError::Timeout => true,
            DecisionError::Backend { retryable, .. } => *retryable,
            DecisionError::Malformed(_) => false,
        }
    }
}

/// Terminal failures of a reasoning loop.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("decision function requested tool '{tool}' which is not bound to this step (bound: {})", bound.join(", "))]
    UnknownToolRequested { tool: String, bound: Vec<String> },

    #[error("tool '{tool}' failed {failures} consecutive times")]
    ToolRepeatedFailure {
        tool: String,
        failures: u32,
        #[source]
        last: ToolError,
    },

    #[error("no schema-conforming final answer within {max_iterations} iterations")]
    MaxIterationsExceeded { max_iterations: u32 },

    #[error("decision function fault")]
    DecisionFault(#[source] DecisionError),

    #[error("reasoning loop cancelled")]
    Cancelled,
}

impl AgentError {
    /// Transient failures are worth retrying the whole step for.
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::ToolRepeatedFailure { last, .. } => last.is_retryable(),
            AgentError::DecisionFault(cause) => cause.is_retryable(),
            AgentError::UnknownToolRequested { .. } | AgentError::MaxIterationsExceeded { .. } | AgentError::Cancelled => false,
        }
    }
}

/// Why a step could not produce output.
#[derive(Debug, Error)]
pub enum StepFailure {
    #[error(transparent)]
    Binding(#[from] ToolError),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl StepFailure {
    pub fn is_transient(&self) -> bool {
        match self {
            StepFailure::Binding(_) => false,
            StepFailure::Agent(error) => error.is_transient(),
        }
    }
}

/// The only error kind returned from a workflow run.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("step '{step}' has an unresolved input")]
    UnresolvedInput {
        step: String,
        #[source]
        source: ResolutionError,
    },

    #[error("step '{step}' failed after {attempts} attempt(s)")]
    StepFailed {
        step: String,
        attempts: u32,
        #[source]
        cause: StepFailure,
        transcript: ReasoningTranscript,
    },

    #[error("run cancelled{}", step.as_deref().map(|id| format!(" during step '{id}'")).unwrap_or_default())]
    Cancelled { step: Option<String> },
}

impl ExecutionError {
    /// Identifier of the step the run stopped at, if any.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            ExecutionError::UnresolvedInput { step, .. } | ExecutionError::StepFailed { step, .. } => Some(step),
            ExecutionError::Cancelled { step } => step.as_deref(),
        }
    }

    /// Transcript leading to the failure, when the failure came out of a reasoning loop.
    pub fn transcript(&self) -> Option<&ReasoningTranscript> {
        match self {
            ExecutionError::StepFailed { transcript, .. } => Some(transcript),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification_follows_tool_and_decision_tags() {
        let retryable = AgentError::ToolRepeatedFailure {
            tool: "lookup".into(),
            failures: 3,
            last: ToolError::InvocationFailed {
                tool: "lookup".into(),
                retryable: true,
                cause: ToolFailure::retryable("429"),
            },
        };
        assert!(retryable.is_transient());
        assert!(AgentError::DecisionFault(DecisionError::Timeout).is_transient());
        assert!(!AgentError::DecisionFault(DecisionError::Malformed("{".into())).is_transient());
        assert!(!AgentError::MaxIterationsExceeded { max_iterations: 2 }.is_transient());
        assert!(!StepFailure::Binding(ToolError::UnknownTool { name: "x".into() }).is_transient());
    }

    #[test]
    fn cancelled_message_names_step() {
        let error = ExecutionError::Cancelled {
            step: Some("enrich".into()),
        };
        assert_eq!(error.to_string(), "run cancelled during step 'enrich'");
        assert_eq!(error.step_id(), Some("enrich"));
        assert_eq!(ExecutionError::Cancelled { step: None }.to_string(), "run cancelled");
    }
}
