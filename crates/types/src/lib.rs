//! Shared type definitions for Stepwise workflows.
//!
//! These are plain serde models with no runtime behavior beyond validation: the workflow
//! document, output schemas, reasoning transcripts, and the values exchanged with the
//! decision function.

pub mod decision;
pub mod schema;
pub mod transcript;
pub mod workflow;

pub use decision::{Decision, ParameterSpec, ToolDescriptor};
pub use schema::{FieldRule, FieldShape, OutputSchema};
pub use transcript::{Observation, ReasoningTranscript, Turn};
pub use workflow::validation::validate_output_record;
pub use workflow::{
    AgentKind, INITIAL_STATE_KEY, RetrySettings, StepFailurePolicy, StepSpec, ToolSpec, WorkflowDocument, WorkflowSettings,
};
