//! Tool registry and bound tools.
//!
//! A [`Tool`] is an async capability taking a plain argument record. The registry pairs each
//! tool with a [`ToolDescriptor`] advertised to the decision function. Binding resolves a
//! step's requested tool configuration against the captured [`Environment`]; the resulting
//! [`ToolBinding`] merges that configuration into every call.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value};
use stepwise_types::{ToolDescriptor, ToolSpec};
use tracing::debug;

use crate::error::{ToolError, ToolFailure};
use crate::resolve::{Environment, resolve_config};
use crate::templates::ConfigTemplate;

/// An invocable external capability.
///
/// Implementations classify their own failures through [`ToolFailure::retryable`] and
/// [`ToolFailure::fatal`].
#[async_trait]
pub trait Tool: Send + Sync {
    async fn invoke(&self, arguments: JsonMap<String, Value>) -> Result<Value, ToolFailure>;
}

/// A requested tool with its configuration compiled into templates.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub name: String,
    pub config: IndexMap<String, ConfigTemplate>,
}

impl ToolRequest {
    /// Compiles the `{{ENV_VAR}}` placeholders of a tool spec.
    pub fn compile(spec: &ToolSpec) -> Result<Self, ToolError> {
        let mut config = IndexMap::with_capacity(spec.config.len());
        for (key, value) in &spec.config {
            let template = ConfigTemplate::compile(value).map_err(|source| ToolError::InvalidConfig {
                tool: spec.name.clone(),
                key: key.clone(),
                source,
            })?;
            config.insert(key.clone(), template);
        }
        Ok(Self {
            name: spec.name.clone(),
            config,
        })
    }

    /// Environment variables the configuration refers to.
    pub fn env_vars(&self) -> Vec<&str> {
        self.config
            .values()
            .flat_map(|template| template.references())
            .map(|variable| variable.name())
            .collect()
    }
}

struct RegisteredTool {
    capability: Arc<dyn Tool>,
    descriptor: ToolDescriptor,
}

/// Name to capability map.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a capability under `descriptor.name`, replacing any previous registration.
    pub fn register(&mut self, capability: Arc<dyn Tool>, descriptor: ToolDescriptor) {
        self.tools
            .insert(descriptor.name.clone(), RegisteredTool { capability, descriptor });
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolves configuration for each request, preserving request order.
    pub fn bind(&self, requests: &[ToolRequest], environment: &Environment) -> Result<Vec<ToolBinding>, ToolError> {
        requests
            .iter()
            .map(|request| {
                let registered = self.tools.get(&request.name).ok_or_else(|| ToolError::UnknownTool {
                    name: request.name.clone(),
                })?;
                let config = resolve_config(&request.config, environment).map_err(|source| ToolError::Configuration {
                    tool: request.name.clone(),
                    source,
                })?;
                debug!(tool = %request.name, config_keys = config.len(), "tool bound");
                Ok(ToolBinding {
                    name: request.name.clone(),
                    config,
                    descriptor: registered.descriptor.clone(),
                    capability: Arc::clone(&registered.capability),
                })
            })
            .collect()
    }

    /// Compiles and binds raw tool specs in one call.
    pub fn bind_specs(&self, specs: &[ToolSpec], environment: &Environment) -> Result<Vec<ToolBinding>, ToolError> {
        let requests = specs.iter().map(ToolRequest::compile).collect::<Result<Vec<_>, _>>()?;
        self.bind(&requests, environment)
    }
}

/// A tool ready to call: resolved configuration plus the capability.
#[derive(Clone)]
pub struct ToolBinding {
    name: String,
    config: JsonMap<String, Value>,
    descriptor: ToolDescriptor,
    capability: Arc<dyn Tool>,
}

impl ToolBinding {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    /// Calls the capability with bound configuration merged under the arguments.
    pub async fn invoke(&self, arguments: JsonMap<String, Value>) -> Result<Value, ToolError> {
        let merged = merge_arguments(&self.config, arguments);
        self.capability
            .invoke(merged)
            .await
            .map_err(|cause| ToolError::InvocationFailed {
                tool: self.name.clone(),
                retryable: cause.retryable,
                cause,
            })
    }
}

impl fmt::Debug for ToolBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolBinding")
            .field("name", &self.name)
            .field("config", &self.config.keys().map(|key| (key.as_str(), "<redacted>")).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Per-call arguments win unless they are null or an empty string.
fn merge_arguments(config: &JsonMap<String, Value>, mut arguments: JsonMap<String, Value>) -> JsonMap<String, Value> {
    for (key, value) in config {
        let overridden = match arguments.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(text)) => !text.is_empty(),
            Some(_) => true,
        };
        if !overridden {
            arguments.insert(key.clone(), value.clone());
        }
    }
    arguments
}
