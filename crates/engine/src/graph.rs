//! Workflow graph construction and execution ordering.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use indexmap::IndexMap;
use stepwise_types::{INITIAL_STATE_KEY, StepSpec, WorkflowDocument};

use crate::agent::profile;
use crate::error::GraphError;
use crate::templates::InputTemplate;
use crate::tools::ToolRequest;

/// A step with its templates compiled and its producers resolved.
#[derive(Debug, Clone)]
pub struct StepNode {
    pub spec: StepSpec,
    /// Position in the authored step list.
    pub position: usize,
    pub inputs: IndexMap<String, InputTemplate>,
    /// Explicit tools, or the agent kind's defaults.
    pub tools: Vec<ToolRequest>,
    /// Producer step ids in first-reference order, excluding `initial`.
    pub dependencies: Vec<String>,
    /// Agent preamble plus the step's own instructions.
    pub instructions: String,
}

impl StepNode {
    pub fn id(&self) -> &str {
        &self.spec.id
    }
}

/// Immutable DAG of steps plus a total execution order.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    nodes: Vec<StepNode>,
    order: Vec<usize>,
}

impl WorkflowGraph {
    /// Builds the graph from an ordered step list.
    ///
    /// Dependencies come from the references in each step's inputs. The execution order is
    /// topological; steps that could run in either order keep their declaration order.
    pub fn build(steps: Vec<StepSpec>) -> Result<Self, GraphError> {
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(steps.len());
        for (position, step) in steps.iter().enumerate() {
            if step.id == INITIAL_STATE_KEY {
                return Err(GraphError::ReservedStepId(step.id.clone()));
            }
            if positions.insert(step.id.clone(), position).is_some() {
                return Err(GraphError::DuplicateStep(step.id.clone()));
            }
        }

        let nodes = steps
            .into_iter()
            .enumerate()
            .map(|(position, spec)| compile_node(spec, position, &positions))
            .collect::<Result<Vec<_>, _>>()?;

        let order = topological_order(&nodes, &positions)?;
        Ok(Self { nodes, order })
    }

    pub fn from_document(document: &WorkflowDocument) -> Result<Self, GraphError> {
        Self::build(document.steps.clone())
    }

    /// Steps in execution order.
    pub fn execution_order(&self) -> impl Iterator<Item = &StepNode> {
        self.order.iter().map(|index| &self.nodes[*index])
    }

    pub fn order_ids(&self) -> Vec<&str> {
        self.execution_order().map(StepNode::id).collect()
    }

    /// Steps in declaration order.
    pub fn nodes(&self) -> &[StepNode] {
        &self.nodes
    }

    pub fn get(&self, step_id: &str) -> Option<&StepNode> {
        self.nodes.iter().find(|node| node.id() == step_id)
    }

    /// `(producer, consumer)` pairs in execution order of the consumer.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.execution_order()
            .flat_map(|node| node.dependencies.iter().map(move |producer| (producer.as_str(), node.id())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn compile_node(spec: StepSpec, position: usize, positions: &HashMap<String, usize>) -> Result<StepNode, GraphError> {
    let mut inputs = IndexMap::with_capacity(spec.inputs.len());
    let mut dependencies: Vec<String> = Vec::new();

    for (name, value) in &spec.inputs {
        let template = InputTemplate::compile(value).map_err(|source| GraphError::InvalidTemplate {
            step: spec.id.clone(),
            field: format!("inputs.{name}"),
            source,
        })?;
        for reference in template.references() {
            if reference.root == INITIAL_STATE_KEY {
                continue;
            }
            if !positions.contains_key(&reference.root) {
                return Err(GraphError::UnknownReference {
                    step: spec.id.clone(),
                    reference: reference.root.clone(),
                });
            }
            if !dependencies.contains(&reference.root) {
                dependencies.push(reference.root.clone());
            }
        }
        inputs.insert(name.clone(), template);
    }

    let tools = profile::effective_tools(&spec)
        .iter()
        .map(ToolRequest::compile)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| GraphError::InvalidToolConfig {
            step: spec.id.clone(),
            source,
        })?;

    let instructions = profile::compose_instructions(spec.agent, &spec.instructions);
    Ok(StepNode {
        spec,
        position,
        inputs,
        tools,
        dependencies,
        instructions,
    })
}

/// Kahn's algorithm with a min-heap on declaration position for deterministic ties.
fn topological_order(nodes: &[StepNode], positions: &HashMap<String, usize>) -> Result<Vec<usize>, GraphError> {
    let mut in_degrees = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for node in nodes {
        for producer in &node.dependencies {
            let producer_position = positions[producer];
            dependents[producer_position].push(node.position);
            in_degrees[node.position] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degrees
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(position, _)| Reverse(position))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(position)) = ready.pop() {
        order.push(position);
        for dependent in &dependents[position] {
            in_degrees[*dependent] -= 1;
            if in_degrees[*dependent] == 0 {
                ready.push(Reverse(*dependent));
            }
        }
    }

    if order.len() != nodes.len() {
        let steps = nodes
            .iter()
            .filter(|node| in_degrees[node.position] > 0)
            .map(|node| node.id().to_string())
            .collect();
        return Err(GraphError::CycleDetected { steps });
    }

    Ok(order)
}
