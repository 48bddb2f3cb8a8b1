//! Shared HTTP client and failure classification for provider tools.
//!
//! Network errors, timeouts, interrupted bodies, HTTP 429 and 5xx responses are retryable.
//! Every other non-success status and any unparseable success body is not. Request URLs are
//! stripped from transport errors before they are reported.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, StatusCode, header};
use serde_json::{Map as JsonMap, Value};
use stepwise_engine::ToolFailure;
use tracing::debug;

/// Longest slice of a response body kept in failure messages.
const MAX_BODY_IN_MESSAGE: usize = 300;

/// Thin wrapper around a configured `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpClient {
    pub http: Client,
    pub user_agent: String,
}

impl HttpClient {
    /// Builds a client with a request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build().context("build http client")?;
        Ok(Self {
            http,
            user_agent: format!("stepwise/{}; {}", env!("CARGO_PKG_VERSION"), std::env::consts::OS),
        })
    }

    pub fn request(&self, method: reqwest::Method, url: &str) -> RequestBuilder {
        debug!(%url, %method, "building request");
        self.http
            .request(method, url)
            .header(header::USER_AGENT, &self.user_agent)
    }

    /// Sends a request and parses a JSON body, classifying any failure.
    ///
    /// An empty success body yields `Value::Null`.
    pub async fn send_json(&self, tool: &str, builder: RequestBuilder) -> Result<Value, ToolFailure> {
        let (status, text) = self.send_text(tool, builder).await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|error| {
            ToolFailure::fatal(format!("{tool} returned malformed JSON (HTTP {})", status.as_u16())).with_source(error)
        })
    }

    /// Sends a request and returns the status and raw body of a successful response.
    pub async fn send_text(&self, tool: &str, builder: RequestBuilder) -> Result<(StatusCode, String), ToolFailure> {
        let response = builder.send().await.map_err(|error| transport_failure(tool, error))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_failure(tool, status, &text));
        }
        let text = response.text().await.map_err(|error| transport_failure(tool, error))?;
        Ok((status, text))
    }
}

/// Retryable for 429 and 5xx, fatal otherwise.
pub fn status_failure(tool: &str, status: StatusCode, body: &str) -> ToolFailure {
    let message = format!(
        "{tool} failed with HTTP {}: {}",
        status.as_u16(),
        truncate_for_message(body.trim(), MAX_BODY_IN_MESSAGE)
    );
    if is_retryable_status(status) {
        ToolFailure::retryable(message)
    } else {
        ToolFailure::fatal(message)
    }
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn transport_failure(tool: &str, error: reqwest::Error) -> ToolFailure {
    let error = error.without_url();
    let message = format!("{tool} request failed: {error}");
    let interrupted = error.is_timeout() || error.is_connect() || error.is_request();
    let failure = if interrupted || error.is_body() || error.is_decode() {
        ToolFailure::retryable(message)
    } else {
        ToolFailure::fatal(message)
    };
    failure.with_source(error)
}

fn truncate_for_message(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", truncated.trim_end())
}

/// Typed access to a tool's merged argument record.
pub struct ToolArguments<'a> {
    tool: &'a str,
    arguments: &'a JsonMap<String, Value>,
}

impl<'a> ToolArguments<'a> {
    pub fn new(tool: &'a str, arguments: &'a JsonMap<String, Value>) -> Self {
        Self { tool, arguments }
    }

    /// Fails with one message naming every missing or empty parameter.
    pub fn require(&self, names: &[&str]) -> Result<(), ToolFailure> {
        let missing: Vec<&str> = names.iter().copied().filter(|name| self.is_blank(name)).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ToolFailure::fatal(format!(
                "missing required parameters for tool '{}': {}",
                self.tool,
                missing.join(", ")
            )))
        }
    }

    pub fn str(&self, name: &str) -> Option<&'a str> {
        self.arguments
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }

    /// String parameter, rendering numbers and booleans as text.
    pub fn text(&self, name: &str) -> Option<String> {
        match self.arguments.get(name)? {
            Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Value::Number(number) => Some(number.to_string()),
            Value::Bool(flag) => Some(flag.to_string()),
            _ => None,
        }
    }

    pub fn value(&self, name: &str) -> Option<&'a Value> {
        self.arguments.get(name).filter(|value| !value.is_null())
    }

    /// Object parameter. A string holding a JSON object is accepted too.
    pub fn object(&self, name: &str) -> Result<JsonMap<String, Value>, ToolFailure> {
        match self.value(name) {
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => Ok(map),
                _ => Err(ToolFailure::fatal(format!(
                    "parameter '{name}' of tool '{}' must be a JSON object",
                    self.tool
                ))),
            },
            Some(_) => Err(ToolFailure::fatal(format!(
                "parameter '{name}' of tool '{}' must be a JSON object",
                self.tool
            ))),
            None => Err(ToolFailure::fatal(format!(
                "missing required parameters for tool '{}': {name}",
                self.tool
            ))),
        }
    }

    fn is_blank(&self, name: &str) -> bool {
        match self.arguments.get(name) {
            None | Some(Value::Null) => true,
            Some(Value::String(text)) => text.trim().is_empty(),
            Some(_) => false,
        }
    }
}
