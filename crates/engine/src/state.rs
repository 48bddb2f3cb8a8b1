//! Execution state: the seed record plus one output record per completed step.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value};
use stepwise_types::INITIAL_STATE_KEY;

/// Step outputs keyed by step id, in completion order.
///
/// Entries are written once. Only the executor records outputs, and only after a step
/// produced a schema-conforming final answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ExecutionState {
    entries: IndexMap<String, Value>,
}

impl ExecutionState {
    /// Creates a state seeded with the `initial` record.
    pub fn new(initial: JsonMap<String, Value>) -> Self {
        let mut entries = IndexMap::new();
        entries.insert(INITIAL_STATE_KEY.to_string(), Value::Object(initial));
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// The seed record.
    pub fn initial(&self) -> Option<&Value> {
        self.entries.get(INITIAL_STATE_KEY)
    }

    /// Identifiers of completed steps, in completion order.
    pub fn completed_steps(&self) -> impl Iterator<Item = &str> {
        self.entries
            .keys()
            .map(String::as_str)
            .filter(|key| *key != INITIAL_STATE_KEY)
    }

    /// Records a step output. Returns `false` and leaves the state untouched if the key is
    /// already present.
    pub(crate) fn record(&mut self, step_id: &str, output: Value) -> bool {
        if self.entries.contains_key(step_id) {
            return false;
        }
        self.entries.insert(step_id.to_string(), output);
        true
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.entries.iter().map(|(key, value)| (key.clone(), value.clone())).collect())
    }
}
