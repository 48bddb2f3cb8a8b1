//! Gemini-backed decision function.
//!
//! The model is asked for a single JSON object per turn holding a `thought` and either an
//! `action` (`tool_name` plus `parameters`) or a `final_answer`. Any text around the object
//! is ignored.
//!
//! The API key travels in the `x-goog-api-key` header so request URLs, and any error that
//! quotes them, never carry it.

use std::fmt;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{Map as JsonMap, Value, json};
use stepwise_engine::{DecisionError, DecisionFunction, DecisionRequest};
use stepwise_types::Decision;
use tracing::{debug, warn};

use crate::http::{HttpClient, is_retryable_status};

pub const DEFAULT_MODEL: &str = "gemini-pro-latest";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Clone)]
pub struct GeminiDecisionFunction {
    client: HttpClient,
    api_key: String,
    model: String,
    base_url: String,
}

impl fmt::Debug for GeminiDecisionFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiDecisionFunction")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl GeminiDecisionFunction {
    pub fn new(client: HttpClient, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Names of the models that support `generateContent`, across all result pages.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut builder = self
                .client
                .request(Method::GET, &format!("{}/models", self.base_url))
                .header(API_KEY_HEADER, &self.api_key);
            if let Some(token) = &page_token {
                builder = builder.query(&[("pageToken", token.as_str())]);
            }
            let response = builder
                .send()
                .await
                .map_err(reqwest::Error::without_url)
                .context("list Gemini models")?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                bail!("listing Gemini models failed with HTTP {}: {}", status.as_u16(), body.trim());
            }
            let page: ModelPage = response
                .json()
                .await
                .map_err(reqwest::Error::without_url)
                .context("decode Gemini model list")?;
            names.extend(
                page.models
                    .into_iter()
                    .filter(|model| model.supported_generation_methods.iter().any(|method| method == "generateContent"))
                    .map(|model| model.name),
            );
            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(names)
    }

    async fn generate(&self, prompt: String) -> Result<String, DecisionError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": 0 },
        });
        let response = self
            .client
            .request(Method::POST, &url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(backend_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(backend_transport_error)?;
        if !status.is_success() {
            warn!(status = status.as_u16(), model = %self.model, "Gemini request failed");
            return Err(DecisionError::backend(
                format!("Gemini returned HTTP {}: {}", status.as_u16(), text.trim()),
                is_retryable_status(status),
            ));
        }

        let reply: GenerateReply = serde_json::from_str(&text).map_err(|error| DecisionError::Backend {
            message: "Gemini response was not valid JSON".into(),
            retryable: false,
            source: Some(Box::new(error)),
        })?;
        reply
            .text()
            .ok_or_else(|| DecisionError::Malformed("Gemini response contained no text candidate".into()))
    }
}

#[async_trait]
impl DecisionFunction for GeminiDecisionFunction {
    async fn decide(&self, request: DecisionRequest<'_>) -> Result<Decision, DecisionError> {
        debug!(step_id = request.step_id, iteration = request.iteration, model = %self.model, "requesting decision");
        let reply = self.generate(build_prompt(&request)).await?;
        parse_decision(&reply)
    }
}

fn backend_transport_error(error: reqwest::Error) -> DecisionError {
    let error = error.without_url();
    if error.is_timeout() {
        return DecisionError::Timeout;
    }
    DecisionError::Backend {
        message: format!("Gemini request failed: {error}"),
        retryable: error.is_connect() || error.is_request() || error.is_body(),
        source: Some(Box::new(error)),
    }
}

/// Renders the per-turn prompt.
pub fn build_prompt(request: &DecisionRequest<'_>) -> String {
    let tools = if request.tools.is_empty() {
        "No tools available.".to_string()
    } else {
        request.tools.iter().map(|tool| tool.render()).collect::<Vec<_>>().join("\n")
    };
    let input = serde_json::to_string_pretty(request.input).unwrap_or_default();
    let schema = serde_json::to_string_pretty(&request.output_schema.to_prompt_value()).unwrap_or_default();
    let history = if request.transcript.is_empty() {
        "Nothing yet.".to_string()
    } else {
        serde_json::to_string_pretty(&request.transcript.turns).unwrap_or_default()
    };

    format!(
        "You are an autonomous agent named '{step}' ({agent}).\n\
         Your instructions are: {instructions}\n\n\
         Input:\n{input}\n\n\
         You have access to the following tools. You MUST use the exact tool names provided below:\n\
         --- TOOLS ---\n{tools}\n--- END TOOLS ---\n\n\
         Previous turns of this step:\n{history}\n\n\
         To use a tool, respond with a JSON object containing 'thought' and 'action'.\n\
         The 'action' is a JSON object with 'tool_name' and 'parameters'.\n\
         When the task is complete, respond with a JSON object containing 'thought' and 'final_answer'.\n\
         The 'final_answer' must be an object with these fields:\n{schema}\n\n\
         This is turn {iteration}. Your response MUST be a single, valid JSON object and nothing else.",
        step = request.step_id,
        agent = request.agent,
        instructions = request.instructions,
        iteration = request.iteration,
    )
}

/// Turns a raw model reply into a [`Decision`].
pub fn parse_decision(reply: &str) -> Result<Decision, DecisionError> {
    let object = extract_json_object(reply)
        .ok_or_else(|| DecisionError::Malformed(format!("no JSON object in reply: {}", reply.trim())))?;
    let Value::Object(mut fields) = object else {
        return Err(DecisionError::Malformed("reply is not a JSON object".into()));
    };
    let thought = fields.get("thought").and_then(Value::as_str).map(str::to_string);

    if let Some(action) = fields.remove("action") {
        let Value::Object(mut action) = action else {
            return Err(DecisionError::Malformed("'action' must be an object".into()));
        };
        let tool = match action.get("tool_name").and_then(Value::as_str) {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => return Err(DecisionError::Malformed("'action' is missing 'tool_name'".into())),
        };
        let arguments = match action.remove("parameters") {
            None | Some(Value::Null) => JsonMap::new(),
            Some(Value::Object(arguments)) => arguments,
            Some(_) => return Err(DecisionError::Malformed("'parameters' must be an object".into())),
        };
        return Ok(Decision::Action { thought, tool, arguments });
    }

    if let Some(output) = fields.remove("final_answer") {
        return Ok(Decision::Final { thought, output });
    }

    Err(DecisionError::Malformed("reply contained neither 'action' nor 'final_answer'".into()))
}

/// Parses the text between the first `{` and the last `}`.
fn extract_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if start >= end {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    text: Option<String>,
}

impl GenerateReply {
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content.parts.iter().filter_map(|part| part.text.as_deref()).collect();
        if text.trim().is_empty() { None } else { Some(text) }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelPage {
    #[serde(default)]
    models: Vec<ModelInfo>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelInfo {
    name: String,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{refused_url, response, serve_once};
    use std::time::Duration;
    use stepwise_types::{AgentKind, FieldShape, OutputSchema, ParameterSpec, ReasoningTranscript, ToolDescriptor};

    #[test]
    fn parses_action_wrapped_in_prose() {
        let reply = "Sure, here you go:\n```json\n{\"thought\": \"find leads\", \"action\": {\"tool_name\": \"search_apollo\", \"parameters\": {\"icp\": {\"industry\": \"Software\"}}}}\n```";
        let decision = parse_decision(reply).expect("action");
        match decision {
            Decision::Action { thought, tool, arguments } => {
                assert_eq!(thought.as_deref(), Some("find leads"));
                assert_eq!(tool, "search_apollo");
                assert_eq!(arguments["icp"]["industry"], json!("Software"));
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn parses_final_answer() {
        let decision = parse_decision(r#"{"thought":"done","final_answer":{"leads":[]}}"#).expect("final");
        assert_eq!(
            decision,
            Decision::Final {
                thought: Some("done".into()),
                output: json!({ "leads": [] }),
            }
        );
    }

    #[test]
    fn rejects_replies_without_a_decision() {
        for reply in ["no json here", r#"{"thought":"hmm"}"#, r#"{"action":{"parameters":{}}}"#, "} {"] {
            let error = parse_decision(reply).expect_err(reply);
            assert!(matches!(error, DecisionError::Malformed(_)), "{reply}: {error:?}");
            assert!(!error.is_retryable());
        }
    }

    #[test]
    fn prompt_carries_tools_schema_and_history() {
        let input = json!({ "icp": { "industry": "Software" } }).as_object().cloned().unwrap();
        let tools = vec![ToolDescriptor {
            name: "search_apollo".into(),
            purpose: "Searches Apollo.".into(),
            parameters: vec![ParameterSpec::required("icp", "profile")],
        }];
        let schema = OutputSchema::required([("leads", FieldShape::List)]);
        let transcript = ReasoningTranscript::new();
        let request = DecisionRequest {
            step_id: "find_leads",
            agent: AgentKind::Prospector,
            instructions: "Find leads.",
            input: &input,
            tools: &tools,
            output_schema: &schema,
            transcript: &transcript,
            iteration: 2,
        };

        let prompt = build_prompt(&request);
        assert!(prompt.contains("named 'find_leads'"));
        assert!(prompt.contains("- search_apollo(icp): Searches Apollo."));
        assert!(prompt.contains("\"leads\""));
        assert!(prompt.contains("Nothing yet."));
        assert!(prompt.contains("This is turn 2."));
    }

    #[test]
    fn debug_output_hides_the_api_key() {
        let backend = GeminiDecisionFunction::new(HttpClient::new(Duration::from_secs(1)).unwrap(), "secret-key")
            .with_model("gemini-2.5-flash");
        let rendered = format!("{backend:?}");
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("gemini-2.5-flash"));
    }

    const SECRET: &str = "AIza-not-for-logs";

    async fn decide_once(backend: &GeminiDecisionFunction) -> Result<Decision, DecisionError> {
        let input = JsonMap::new();
        let schema = OutputSchema::required([("leads", FieldShape::List)]);
        let transcript = ReasoningTranscript::new();
        backend
            .decide(DecisionRequest {
                step_id: "find_leads",
                agent: AgentKind::Prospector,
                instructions: "Find leads.",
                input: &input,
                tools: &[],
                output_schema: &schema,
                transcript: &transcript,
                iteration: 1,
            })
            .await
    }

    #[tokio::test]
    async fn transport_errors_never_quote_the_api_key() {
        let backend = GeminiDecisionFunction::new(HttpClient::new(Duration::from_secs(5)).unwrap(), SECRET)
            .with_base_url(refused_url());

        let error = decide_once(&backend).await.expect_err("nothing is listening");
        assert!(error.is_retryable(), "unexpected error: {error:?}");
        assert!(!format!("{error}").contains(SECRET));
        assert!(!format!("{error:?}").contains(SECRET));

        let error = backend.list_models().await.expect_err("nothing is listening");
        assert!(!format!("{error:#}").contains(SECRET));
        assert!(!format!("{error:?}").contains(SECRET));
    }

    #[tokio::test]
    async fn api_key_is_sent_as_a_header() {
        let reply = r#"{"candidates":[{"content":{"parts":[{"text":"{\"thought\":\"done\",\"final_answer\":{\"leads\":[]}}"}]}}]}"#;
        let (base_url, request) = serve_once(response("200 OK", reply)).await;
        let backend = GeminiDecisionFunction::new(HttpClient::new(Duration::from_secs(5)).unwrap(), SECRET)
            .with_base_url(base_url);

        let decision = decide_once(&backend).await.expect("decision");
        assert_eq!(decision, Decision::Final { thought: Some("done".into()), output: json!({ "leads": [] }) });

        let request = request.await.unwrap();
        let request_line = request.lines().next().unwrap_or_default();
        assert_eq!(request_line, "POST /models/gemini-pro-latest:generateContent HTTP/1.1");
        assert!(request.to_ascii_lowercase().contains(&format!("x-goog-api-key: {}", SECRET.to_ascii_lowercase())));
    }

    #[tokio::test]
    async fn rate_limited_backend_is_retryable() {
        let (base_url, _) = serve_once(response("429 Too Many Requests", r#"{"error":"quota"}"#)).await;
        let backend = GeminiDecisionFunction::new(HttpClient::new(Duration::from_secs(5)).unwrap(), SECRET)
            .with_base_url(base_url);

        let error = decide_once(&backend).await.expect_err("rate limited");
        assert!(matches!(error, DecisionError::Backend { retryable: true, .. }), "{error:?}");
    }

    #[test]
    fn reply_text_joins_parts_of_the_first_candidate() {
        let reply: GenerateReply = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"final_answer\":" }, { "text": "{}}" }] } }]
        }))
        .unwrap();
        assert_eq!(reply.text().as_deref(), Some("{\"final_answer\":{}}"));

        let empty: GenerateReply = serde_json::from_value(json!({ "candidates": [] })).unwrap();
        assert!(empty.text().is_none());
    }
}
