use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map as JsonMap, Value, json};
use stepwise_engine::{Tool, ToolFailure};
use stepwise_types::{ParameterSpec, ToolDescriptor};
use tracing::info;

use crate::http::{HttpClient, ToolArguments};

pub const DEFAULT_BASE_URL: &str = "https://api.peopledatalabs.com/v5";

/// `enrich_with_pdl`: person enrichment by email through People Data Labs.
pub struct EnrichWithPdl {
    client: HttpClient,
    base_url: String,
}

impl EnrichWithPdl {
    pub const NAME: &'static str = "enrich_with_pdl";

    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: Self::NAME.into(),
            purpose: "Enriches one lead with job title, company, and social profiles from People Data Labs, looked up by email."
                .into(),
            parameters: vec![ParameterSpec::required("email", "email address of the lead")],
        }
    }
}

#[async_trait]
impl Tool for EnrichWithPdl {
    async fn invoke(&self, arguments: JsonMap<String, Value>) -> Result<Value, ToolFailure> {
        let args = ToolArguments::new(Self::NAME, &arguments);
        args.require(&["api_key", "email"])?;
        let email = args.str("email").unwrap_or_default();

        info!(tool = Self::NAME, "enriching lead");
        let builder = self
            .client
            .request(Method::GET, &format!("{}/person/enrich", self.base_url))
            .header("X-Api-Key", args.str("api_key").unwrap_or_default())
            .query(&[("email", email)]);
        let data = self.client.send_json(Self::NAME, builder).await?;
        Ok(json!({ "status": "success", "data": data }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::refused_url;
    use std::time::Duration;

    #[tokio::test]
    async fn unreachable_host_is_retryable() {
        let tool = EnrichWithPdl::new(HttpClient::new(Duration::from_secs(2)).unwrap()).with_base_url(refused_url());
        let arguments = json!({ "api_key": "k", "email": "ada@example.com" })
            .as_object()
            .cloned()
            .unwrap();
        let failure = tool.invoke(arguments).await.expect_err("nothing is listening");
        assert!(failure.retryable, "unexpected failure: {}", failure.message);
        assert!(failure.message.starts_with("enrich_with_pdl request failed"));
    }
}
