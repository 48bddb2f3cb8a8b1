//! Strongly typed workflow document definitions shared by the engine, providers, and CLI.
//!
//! A workflow document is an ordered list of agent steps plus pipeline-wide settings. The
//! models preserve authoring order (via `IndexMap`) so inputs, tool configuration, and output
//! fields are rendered to the reasoning backend in the order they were written.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::schema::OutputSchema;

pub mod validation;

/// Reserved execution-state key holding the pipeline seed data.
pub const INITIAL_STATE_KEY: &str = "initial";

/// Describes a fully authored workflow: metadata, seed data, settings, and steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDocument {
    /// Human-readable workflow name printed when a run starts.
    #[serde(default, alias = "name")]
    pub workflow_name: String,
    /// Optional descriptive copy.
    #[serde(default)]
    pub description: Option<String>,
    /// Seed record stored under the reserved `initial` state entry.
    #[serde(default)]
    pub initial: JsonMap<String, JsonValue>,
    /// Pipeline-wide pacing, retry, and loop limits.
    #[serde(default)]
    pub settings: WorkflowSettings,
    /// Ordered list of steps as declared by the author.
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

/// Pacing, retry, and iteration limits applied to every step of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSettings {
    /// Pause between consecutive steps to respect external rate limits.
    #[serde(default = "default_pacing_delay_secs")]
    pub pacing_delay_secs: u64,
    /// Maximum decision calls per step attempt.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Consecutive failed tool invocations tolerated before the step gives up.
    #[serde(default = "default_max_consecutive_tool_failures")]
    pub max_consecutive_tool_failures: u32,
    /// What to do once a transient step failure has exhausted its retries.
    #[serde(default)]
    pub on_step_failure: StepFailurePolicy,
    /// Step-level retry policy for transient failures.
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            pacing_delay_secs: default_pacing_delay_secs(),
            max_iterations: default_max_iterations(),
            max_consecutive_tool_failures: default_max_consecutive_tool_failures(),
            on_step_failure: StepFailurePolicy::default(),
            retry: RetrySettings::default(),
        }
    }
}

fn default_pacing_delay_secs() -> u64 {
    30
}

fn default_max_iterations() -> u32 {
    8
}

fn default_max_consecutive_tool_failures() -> u32 {
    3
}

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrySettings {
    /// Total attempts per step, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any single backoff delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor applied after each failed attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_max_attempts() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

/// Policy applied when a step keeps failing transiently after all retries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepFailurePolicy {
    /// Stop the run and report the failing step.
    #[default]
    Abort,
    /// Record the step as skipped and continue with the next one.
    Skip,
}

/// Immutable definition of a single workflow node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepSpec {
    /// Unique identifier; doubles as the execution-state key for this step's output.
    pub id: String,
    /// Reasoning policy used for this step.
    #[serde(default, alias = "agent_kind")]
    pub agent: AgentKind,
    /// Natural-language goal text handed to the decision function.
    #[serde(default)]
    pub instructions: String,
    /// Local parameter name to literal value or `{{step.output.path}}` reference.
    #[serde(default)]
    pub inputs: IndexMap<String, JsonValue>,
    /// Ordered tool bindings requested by this step.
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    /// Required output fields and their coarse shapes.
    #[serde(default)]
    pub output_schema: OutputSchema,
    /// Per-step override of `settings.max_iterations`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
}

/// A requested tool: its registry name plus configuration that may hold `{{ENV_VAR}}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(from = "RawToolSpec")]
pub struct ToolSpec {
    /// Registry name of the tool.
    pub name: String,
    /// Configuration merged into every invocation of the tool.
    #[serde(default)]
    pub config: IndexMap<String, JsonValue>,
}

impl ToolSpec {
    /// Creates a tool request without configuration.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: IndexMap::new(),
        }
    }

    /// Adds a configuration entry, returning the updated spec.
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// Authoring forms accepted for a tool entry: a bare name or a `{name, config}` record.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawToolSpec {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        config: Option<IndexMap<String, JsonValue>>,
    },
}

impl From<RawToolSpec> for ToolSpec {
    fn from(raw: RawToolSpec) -> Self {
        match raw {
            RawToolSpec::Name(name) => ToolSpec::named(name),
            RawToolSpec::Full { name, config } => ToolSpec {
                name,
                config: config.unwrap_or_default(),
            },
        }
    }
}

/// Closed set of reasoning policies a step can use.
///
/// Every kind contributes a fixed instruction preamble and a default tool set that is used
/// when the step does not list tools explicitly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Generic think/act/observe agent without default tools.
    #[default]
    #[serde(alias = "ReActAgent", alias = "ReAct")]
    React,
    /// Finds companies and people matching the target profile.
    #[serde(alias = "ProspectorAgent")]
    Prospector,
    /// Adds firmographic and contact detail to existing leads.
    #[serde(alias = "EnricherAgent")]
    Enricher,
    /// Drafts and sends outreach email.
    #[serde(alias = "OutreachAgent")]
    Outreach,
    /// Collects campaign engagement and records it.
    #[serde(alias = "TrackerAgent")]
    Tracker,
}

impl AgentKind {
    /// Every kind, in declaration order.
    pub const ALL: [AgentKind; 5] = [
        AgentKind::React,
        AgentKind::Prospector,
        AgentKind::Enricher,
        AgentKind::Outreach,
        AgentKind::Tracker,
    ];

    /// Canonical lowercase name used in documents and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::React => "react",
            AgentKind::Prospector => "prospector",
            AgentKind::Enricher => "enricher",
            AgentKind::Outreach => "outreach",
            AgentKind::Tracker => "tracker",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
