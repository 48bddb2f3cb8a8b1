//! # Stepwise Engine
//!
//! The Stepwise Engine loads declarative workflows of autonomous agent steps and runs them
//! one step at a time. Each step is a bounded think/act/observe loop driven by an external
//! decision function, with tools bound from a registry and data flowing between steps only
//! through the execution state.
//!
//! ## Key Features
//!
//! - **Graph Building**: Input references such as `{{prospect.output.leads}}` become
//!   dependency edges; the execution order is topological with declaration-order ties
//! - **Template Resolution**: References are compiled once at load time and resolved
//!   against the execution state or the captured environment
//! - **Reasoning Loop**: Iteration caps, tool failure caps, and output schema checks
//!   around whatever the decision function returns
//! - **Execution**: Step-level retry with exponential backoff, inter-step pacing, and
//!   cooperative cancellation
//!
//! ## Usage
//!
//! ```rust
//! use stepwise_engine::{WorkflowGraph, parse_workflow_file};
//!
//! let temp_dir = tempfile::tempdir()?;
//! let workflow_path = temp_dir.path().join("pipeline.yaml");
//! std::fs::write(&workflow_path, r#"
//! workflow_name: "outbound"
//! steps:
//!   - id: prospect
//!     agent: prospector
//!     output_schema: { leads: list }
//!   - id: enrich
//!     agent: enricher
//!     inputs:
//!       leads: "{{prospect.output.leads}}"
//! "#)?;
//!
//! let document = parse_workflow_file(&workflow_path)?;
//! let graph = WorkflowGraph::from_document(&document)?;
//! assert_eq!(graph.order_ids(), vec!["prospect", "enrich"]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`graph`**: Step DAG and execution order
//! - **`templates`** / **`resolve`**: Reference parsing and resolution
//! - **`state`**: Write-once execution state
//! - **`tools`**: Tool registry and bindings
//! - **`agent`**: Decision-function seam, agent profiles, reasoning loop
//! - **`executor`**: Run orchestration, retry, and pacing

use std::{fs, path::Path};

use anyhow::{Context, Result};
use stepwise_types::WorkflowDocument;

pub mod agent;
pub mod error;
pub mod executor;
pub mod graph;
pub mod resolve;
pub mod state;
pub mod templates;
pub mod tools;

pub use agent::{DecisionFunction, DecisionRequest, LoopLimits, LoopOutcome, ReasoningLoop, ReasoningTask};
pub use error::{
    AgentError, DecisionError, ExecutionError, GraphError, ResolutionError, StepFailure, TemplateError, ToolError, ToolFailure,
};
pub use executor::{Executor, ExecutorOptions, RetryPolicy, RunReport, StepReport, StepStatus};
pub use graph::{StepNode, WorkflowGraph};
pub use resolve::Environment;
pub use state::ExecutionState;
pub use tools::{Tool, ToolBinding, ToolRegistry, ToolRequest};

/// Loads a workflow document from the filesystem.
///
/// Files ending in `.json` are parsed as JSON; everything else is parsed as YAML, which
/// also accepts JSON content.
pub fn parse_workflow_file(file_path: impl AsRef<Path>) -> Result<WorkflowDocument> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("Failed to read workflow file: {}", file_path.display()))?;

    let is_json = file_path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));

    let document = if is_json {
        serde_json::from_str::<WorkflowDocument>(&content)
            .with_context(|| format!("Failed to parse JSON workflow: {}", file_path.display()))?
    } else {
        serde_yaml::from_str::<WorkflowDocument>(&content)
            .with_context(|| format!("Failed to parse YAML workflow: {}", file_path.display()))?
    };
    Ok(document)
}

/// Loads a JSON or YAML object used to seed the `initial` state entry.
pub fn parse_initial_file(file_path: impl AsRef<Path>) -> Result<serde_json::Map<String, serde_json::Value>> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("Failed to read initial data file: {}", file_path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("Initial data must be a JSON or YAML object: {}", file_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_json_workflow_by_extension() {
        let temp_dir = tempfile::tempdir().unwrap();
        let workflow_path = temp_dir.path().join("workflow.json");
        fs::write(
            &workflow_path,
            r#"{
  "workflow_name": "AI Sales Outreach",
  "steps": [
    { "id": "find_leads", "agent": "ReActAgent", "tools": ["search_apollo"], "output_schema": { "leads": "list" } }
  ]
}"#,
        )
        .unwrap();

        let document = parse_workflow_file(&workflow_path).expect("parses");
        assert_eq!(document.workflow_name, "AI Sales Outreach");
        assert_eq!(document.steps[0].tools[0].name, "search_apollo");
    }

    #[test]
    fn reports_parse_failures_with_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let workflow_path = temp_dir.path().join("broken.yaml");
        fs::write(&workflow_path, "steps: [ { id: 1, tools: 7 } ]").unwrap();

        let error = parse_workflow_file(&workflow_path).expect_err("invalid");
        assert!(format!("{error:#}").contains("broken.yaml"), "unexpected error: {error:#}");

        let missing = parse_workflow_file(temp_dir.path().join("absent.yaml")).expect_err("missing");
        assert!(missing.to_string().contains("Failed to read workflow file"));
    }

    #[test]
    fn parses_initial_seed_data() {
        let temp_dir = tempfile::tempdir().unwrap();
        let seed_path = temp_dir.path().join("icp.yaml");
        fs::write(&seed_path, "industry: Software\nsignals: [hiring for sales roles]\n").unwrap();

        let seed = parse_initial_file(&seed_path).expect("parses");
        assert_eq!(seed["signals"], json!(["hiring for sales roles"]));

        fs::write(&seed_path, "- just\n- a list\n").unwrap();
        assert!(parse_initial_file(&seed_path).is_err());
    }
}
