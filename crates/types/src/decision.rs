//! Types exchanged across the decision-function boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

/// A tool parameter as advertised to the reasoning backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required: false,
        }
    }
}

/// Machine-usable description of a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub name: String,
    /// Natural-language purpose, used verbatim in prompts.
    pub purpose: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl ToolDescriptor {
    /// One-line rendering: `- name(param, optional?): purpose`.
    pub fn render(&self) -> String {
        let parameters = self
            .parameters
            .iter()
            .map(|parameter| {
                if parameter.required {
                    parameter.name.clone()
                } else {
                    format!("{}?", parameter.name)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("- {}({}): {}", self.name, parameters, self.purpose)
    }
}

/// What the decision function wants to do next.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decision {
    Action {
        #[serde(default)]
        thought: Option<String>,
        tool: String,
        #[serde(default)]
        arguments: JsonMap<String, JsonValue>,
    },
    Final {
        #[serde(default)]
        thought: Option<String>,
        output: JsonValue,
    },
}

impl Decision {
    pub fn action(tool: impl Into<String>, arguments: JsonMap<String, JsonValue>) -> Self {
        Decision::Action {
            thought: None,
            tool: tool.into(),
            arguments,
        }
    }

    pub fn final_output(output: JsonValue) -> Self {
        Decision::Final { thought: None, output }
    }

    pub fn thought(&self) -> Option<&str> {
        match self {
            Decision::Action { thought, .. } | Decision::Final { thought, .. } => thought.as_deref(),
        }
    }
}
