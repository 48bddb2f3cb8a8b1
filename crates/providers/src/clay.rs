use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map as JsonMap, Value, json};
use stepwise_engine::{Tool, ToolFailure};
use stepwise_types::{ParameterSpec, ToolDescriptor};
use tracing::info;

use crate::http::{HttpClient, ToolArguments};

/// `search_clay`: hands the profile to a Clay table webhook, which enriches asynchronously.
pub struct SearchClay {
    client: HttpClient,
}

impl SearchClay {
    pub const NAME: &'static str = "search_clay";

    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: Self::NAME.into(),
            purpose: "Triggers a Clay table workflow for the ideal customer profile. Results land in the Clay table, not in the response."
                .into(),
            parameters: vec![ParameterSpec::required("icp", "ideal customer profile object")],
        }
    }
}

#[async_trait]
impl Tool for SearchClay {
    async fn invoke(&self, arguments: JsonMap<String, Value>) -> Result<Value, ToolFailure> {
        let args = ToolArguments::new(Self::NAME, &arguments);
        args.require(&["api_key", "table_webhook", "icp"])?;
        let icp = args.object("icp")?;
        let webhook = args.str("table_webhook").unwrap_or_default();

        info!(tool = Self::NAME, "triggering Clay table workflow");
        let builder = self
            .client
            .request(Method::POST, webhook)
            .bearer_auth(args.str("api_key").unwrap_or_default())
            .json(&json!({ "icp": icp }));
        self.client.send_text(Self::NAME, builder).await?;
        Ok(json!({ "status": "success", "message": "Clay workflow triggered." }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn webhook_is_required() {
        let tool = SearchClay::new(HttpClient::new(Duration::from_secs(1)).unwrap());
        let arguments = json!({ "api_key": "k", "icp": { "industry": "Software" } })
            .as_object()
            .cloned()
            .unwrap();
        let failure = tool.invoke(arguments).await.expect_err("missing webhook");
        assert_eq!(failure.message, "missing required parameters for tool 'search_clay': table_webhook");
    }
}
