use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map as JsonMap, Value, json};
use stepwise_engine::{Tool, ToolFailure};
use stepwise_types::{ParameterSpec, ToolDescriptor};
use tracing::info;

use crate::http::{HttpClient, ToolArguments};

pub const DEFAULT_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

/// `send_email_sendgrid`: sends one plain-text or HTML email.
pub struct SendEmailSendgrid {
    client: HttpClient,
    endpoint: String,
}

impl SendEmailSendgrid {
    pub const NAME: &'static str = "send_email_sendgrid";

    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: Self::NAME.into(),
            purpose: "Sends a personalized email through SendGrid.".into(),
            parameters: vec![
                ParameterSpec::required("to_email", "recipient address"),
                ParameterSpec::required("subject", "subject line"),
                ParameterSpec::required("body", "message body, sent as HTML"),
                ParameterSpec::optional("html", "false to send the body as plain text"),
                ParameterSpec::optional("from_email", "sender address, defaults to the configured one"),
            ],
        }
    }
}

pub fn mail_payload(from: &str, to: &str, subject: &str, body: &str, html: bool) -> Value {
    let content_type = if html { "text/html" } else { "text/plain" };
    json!({
        "personalizations": [{ "to": [{ "email": to }] }],
        "from": { "email": from },
        "subject": subject,
        "content": [{ "type": content_type, "value": body }],
    })
}

#[async_trait]
impl Tool for SendEmailSendgrid {
    async fn invoke(&self, arguments: JsonMap<String, Value>) -> Result<Value, ToolFailure> {
        let args = ToolArguments::new(Self::NAME, &arguments);
        args.require(&["api_key", "from_email", "to_email", "subject", "body"])?;
        let plain_text = matches!(args.value("html"), Some(Value::Bool(false)))
            || args.str("html").is_some_and(|flag| flag.eq_ignore_ascii_case("false"));
        let html = !plain_text;
        let payload = mail_payload(
            args.str("from_email").unwrap_or_default(),
            args.str("to_email").unwrap_or_default(),
            args.str("subject").unwrap_or_default(),
            args.str("body").unwrap_or_default(),
            html,
        );

        info!(tool = Self::NAME, html, "sending email");
        let builder = self
            .client
            .request(Method::POST, &self.endpoint)
            .bearer_auth(args.str("api_key").unwrap_or_default())
            .json(&payload);
        let (status, _) = self.client.send_text(Self::NAME, builder).await?;
        Ok(json!({ "status": "success", "statusCode": status.as_u16() }))
    }
}
