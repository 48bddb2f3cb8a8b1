//! Reasoning transcript: the ordered record of one step's think/act/observe loop.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// One entry in a reasoning transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "turn", rename_all = "snake_case")]
pub enum Turn {
    /// Free-form reasoning returned alongside a decision.
    Thought { text: String },
    /// A tool the decision function chose to call.
    Action { tool: String, arguments: JsonMap<String, JsonValue> },
    /// What came back from an action, or why a final answer was rejected.
    Observation { observation: Observation },
    /// The accepted output record.
    Final { output: JsonValue },
}

/// Outcome fed back to the decision function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    ToolResult {
        tool: String,
        result: JsonValue,
    },
    ToolFailure {
        tool: String,
        message: String,
        retryable: bool,
    },
    /// Synthetic observation produced when a candidate final answer failed schema validation.
    SchemaRejected {
        violations: Vec<String>,
    },
}

impl Observation {
    /// True for tool failures and schema rejections.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Observation::ToolResult { .. })
    }
}

/// Ordered turns for one step attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReasoningTranscript {
    pub turns: Vec<Turn>,
}

impl ReasoningTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn push_observation(&mut self, observation: Observation) {
        self.turns.push(Turn::Observation { observation });
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Observations in the order they were recorded.
    pub fn observations(&self) -> impl Iterator<Item = &Observation> {
        self.turns.iter().filter_map(|turn| match turn {
            Turn::Observation { observation } => Some(observation),
            _ => None,
        })
    }
}
