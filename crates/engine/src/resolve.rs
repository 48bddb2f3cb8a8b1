//! # Template Resolution
//!
//! Compiled templates are resolved against one of two sources:
//!
//! - [`ExecutionState`] for step inputs (`{{prospect.output.leads}}`, `{{initial.industry}}`)
//! - [`Environment`] for tool configuration (`{{APOLLO_API_KEY}}`)
//!
//! A string that is exactly one reference resolves to the referenced JSON value unchanged
//! (a list stays a list). References embedded in surrounding text are rendered to text.
//! Resolution is all-or-nothing: the first missing reference aborts with a
//! [`ResolutionError`] and no partial result is returned.
//!
//! When a state path starts with `output` and the step record has no `output` field, that
//! segment is skipped, so `{{prospect.output.leads}}` and `{{prospect.leads}}` address the
//! same value.
//!
//! ## Usage
//!
//! ```rust
//! use stepwise_engine::resolve::{Environment, resolve_config};
//! use stepwise_engine::templates::ConfigTemplate;
//! use indexmap::IndexMap;
//! use serde_json::json;
//!
//! let environment = Environment::from_iter([("APOLLO_API_KEY", "k-123")]);
//! let mut config = IndexMap::new();
//! config.insert("api_key".to_string(), ConfigTemplate::compile(&json!("{{APOLLO_API_KEY}}")).unwrap());
//!
//! let resolved = resolve_config(&config, &environment).unwrap();
//! assert_eq!(resolved["api_key"], "k-123");
//! ```

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value};

use crate::error::ResolutionError;
use crate::state::ExecutionState;
use crate::templates::{ConfigTemplate, EnvVar, InputTemplate, PathSegment, StatePath, Template, TemplatePart, render_text};

/// Snapshot of environment variables used for tool configuration.
///
/// Captured once at startup so resolution does not read process globals mid-run.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    variables: HashMap<String, String>,
}

impl Environment {
    /// Captures the current process environment.
    pub fn from_process() -> Self {
        Self {
            variables: std::env::vars().collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            variables: iter.into_iter().map(|(key, value)| (key.into(), value.into())).collect(),
        }
    }
}

/// Something references can be looked up in.
pub trait ReferenceSource<R> {
    fn lookup(&self, reference: &R) -> Result<Value, ResolutionError>;
}

impl ReferenceSource<EnvVar> for Environment {
    fn lookup(&self, reference: &EnvVar) -> Result<Value, ResolutionError> {
        match self.get(reference.name()) {
            Some(value) if !value.is_empty() => Ok(Value::String(value.to_string())),
            _ => Err(ResolutionError::MissingEnvVar {
                name: reference.name().to_string(),
            }),
        }
    }
}

impl ReferenceSource<StatePath> for ExecutionState {
    fn lookup(&self, reference: &StatePath) -> Result<Value, ResolutionError> {
        lookup_state_path(self, reference).cloned()
    }
}

/// Walks a state path and borrows the addressed value.
pub fn lookup_state_path<'a>(state: &'a ExecutionState, path: &StatePath) -> Result<&'a Value, ResolutionError> {
    let missing = |segment: String| ResolutionError::MissingPath {
        expression: path.expression(),
        missing: segment,
    };

    let mut current = state.get(&path.root).ok_or_else(|| missing(path.root.clone()))?;
    let mut segments = path.segments.as_slice();

    if let Some((PathSegment::Key(first), rest)) = segments.split_first()
        && first == "output"
        && current.get("output").is_none()
    {
        segments = rest;
    }

    for segment in segments {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key),
            (PathSegment::Index(index), Value::Array(items)) => items.get(*index),
            (PathSegment::Index(index), Value::Object(map)) => map.get(&index.to_string()),
            _ => None,
        }
        .ok_or_else(|| {
            missing(match segment {
                PathSegment::Key(key) => key.clone(),
                PathSegment::Index(index) => format!("[{index}]"),
            })
        })?;
    }

    Ok(current)
}

/// Resolves a compiled template against a source.
pub fn resolve_template<R, S>(template: &Template<R>, source: &S) -> Result<Value, ResolutionError>
where
    S: ReferenceSource<R>,
{
    match template {
        Template::Literal(value) => Ok(value.clone()),
        Template::Reference(reference) => source.lookup(reference),
        Template::Interpolated(parts) => {
            let mut rendered = String::new();
            for part in parts {
                match part {
                    TemplatePart::Text(text) => rendered.push_str(text),
                    TemplatePart::Reference(reference) => rendered.push_str(&render_text(&source.lookup(reference)?)),
                }
            }
            Ok(Value::String(rendered))
        }
        Template::List(items) => items
            .iter()
            .map(|item| resolve_template(item, source))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Template::Map(entries) => {
            let mut resolved = JsonMap::with_capacity(entries.len());
            for (key, entry) in entries {
                resolved.insert(key.clone(), resolve_template(entry, source)?);
            }
            Ok(Value::Object(resolved))
        }
    }
}

/// Resolves every declared input of a step against the current state.
pub fn resolve_inputs(inputs: &IndexMap<String, InputTemplate>, state: &ExecutionState) -> Result<JsonMap<String, Value>, ResolutionError> {
    resolve_entries(inputs, state)
}

/// Resolves tool configuration against the captured environment.
pub fn resolve_config(config: &IndexMap<String, ConfigTemplate>, environment: &Environment) -> Result<JsonMap<String, Value>, ResolutionError> {
    resolve_entries(config, environment)
}

fn resolve_entries<R, S>(entries: &IndexMap<String, Template<R>>, source: &S) -> Result<JsonMap<String, Value>, ResolutionError>
where
    S: ReferenceSource<R>,
{
    let mut resolved = JsonMap::with_capacity(entries.len());
    for (name, template) in entries {
        resolved.insert(name.clone(), resolve_template(template, source)?);
    }
    Ok(resolved)
}
