//! Apollo.io prospect search and campaign analytics.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map as JsonMap, Value, json};
use stepwise_engine::{Tool, ToolFailure};
use stepwise_types::{ParameterSpec, ToolDescriptor};
use tracing::info;

use crate::http::{HttpClient, ToolArguments};

pub const DEFAULT_BASE_URL: &str = "https://api.apollo.io/v1";

/// `search_apollo`: people search filtered by the ideal customer profile.
pub struct SearchApollo {
    client: HttpClient,
    base_url: String,
}

impl SearchApollo {
    pub const NAME: &'static str = "search_apollo";

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
            purpose: "Searches Apollo.io for people at companies matching the ideal customer profile (company_name, location, employee_range)."
                .into(),
            parameters: vec![ParameterSpec::required("icp", "ideal customer profile object")],
        }
    }
}

/// Maps profile fields onto Apollo's search filters. Scalars become one-element lists.
pub fn search_payload(icp: &JsonMap<String, Value>) -> Value {
    let filter = |key: &str| match icp.get(key) {
        None | Some(Value::Null) => Value::Array(Vec::new()),
        Some(Value::Array(items)) => Value::Array(items.clone()),
        Some(other) => Value::Array(vec![other.clone()]),
    };
    json!({
        "q_organization_domains": filter("company_name"),
        "organization_locations": filter("location"),
        "organization_num_employees_ranges": filter("employee_range"),
    })
}

#[async_trait]
impl Tool for SearchApollo {
    async fn invoke(&self, arguments: JsonMap<String, Value>) -> Result<Value, ToolFailure> {
        let args = ToolArguments::new(Self::NAME, &arguments);
        args.require(&["api_key", "icp"])?;
        let icp = args.object("icp")?;
        let api_key = args.str("api_key").unwrap_or_default();

        info!(tool = Self::NAME, "searching Apollo");
        let builder = self
            .client
            .request(Method::POST, &format!("{}/mixed_search", self.base_url))
            .header("Cache-Control", "no-cache")
            .header("X-Api-Key", api_key)
            .json(&search_payload(&icp));
        let response = self.client.send_json(Self::NAME, builder).await?;

        let people = response.get("people").cloned().unwrap_or_else(|| Value::Array(Vec::new()));
        Ok(json!({ "status": "success", "data": people }))
    }
}

/// `track_apollo_campaign`: engagement analytics for one email campaign.
pub struct TrackApolloCampaign {
    client: HttpClient,
    base_url: String,
}

impl TrackApolloCampaign {
    pub const NAME: &'static str = "track_apollo_campaign";

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
            purpose: "Fetches open, reply, and bounce analytics for an Apollo.io email campaign.".into(),
            parameters: vec![ParameterSpec::required("campaign_id", "Apollo email campaign id")],
        }
    }
}

#[async_trait]
impl Tool for TrackApolloCampaign {
    async fn invoke(&self, arguments: JsonMap<String, Value>) -> Result<Value, ToolFailure> {
        let args = ToolArguments::new(Self::NAME, &arguments);
        args.require(&["api_key", "campaign_id"])?;
        let campaign_id = args.text("campaign_id").unwrap_or_default();
        let api_key = args.str("api_key").unwrap_or_default();

        info!(tool = Self::NAME, campaign_id = %campaign_id, "tracking Apollo campaign");
        let builder = self
            .client
            .request(
                Method::GET,
                &format!("{}/email_campaigns/{}/analytics", self.base_url, campaign_id),
            )
            .header("X-Api-Key", api_key);
        let data = self.client.send_json(Self::NAME, builder).await?;
        Ok(json!({ "status": "success", "data": data }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{response, serve_once};
    use std::time::Duration;

    #[test]
    fn payload_wraps_scalar_filters() {
        let icp = json!({ "location": "USA", "employee_range": ["51-200"], "industry": "Software" });
        let payload = search_payload(icp.as_object().unwrap());
        assert_eq!(
            payload,
            json!({
                "q_organization_domains": [],
                "organization_locations": ["USA"],
                "organization_num_employees_ranges": ["51-200"],
            })
        );
    }

    #[tokio::test]
    async fn missing_parameters_fail_without_a_request() {
        let client = HttpClient::new(Duration::from_secs(1)).unwrap();
        let tool = SearchApollo::new(client.clone()).with_base_url("http://127.0.0.1:9");
        let failure = tool.invoke(JsonMap::new()).await.expect_err("missing");
        assert!(!failure.retryable);
        assert!(failure.message.contains("api_key, icp"));

        let tracker = TrackApolloCampaign::new(client).with_base_url("http://127.0.0.1:9");
        let mut arguments = JsonMap::new();
        arguments.insert("api_key".into(), json!("k"));
        let failure = tracker.invoke(arguments).await.expect_err("missing");
        assert!(failure.message.contains("campaign_id"));
    }

    fn search_arguments() -> JsonMap<String, Value> {
        json!({ "api_key": "k", "icp": { "company_name": "acme.io" } })
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn search_posts_filters_and_wraps_people() {
        let (base_url, request) = serve_once(response("200 OK", r#"{"people":[{"name":"Ada"}]}"#)).await;
        let tool = SearchApollo::new(HttpClient::new(Duration::from_secs(5)).unwrap()).with_base_url(base_url);

        let result = tool.invoke(search_arguments()).await.expect("search succeeds");
        assert_eq!(result, json!({ "status": "success", "data": [{ "name": "Ada" }] }));

        let request = request.await.unwrap();
        assert!(request.starts_with("POST /mixed_search"));
        assert!(request.to_ascii_lowercase().contains("x-api-key: k"));
        assert!(request.contains(r#""q_organization_domains":["acme.io"]"#));
    }

    #[tokio::test]
    async fn interrupted_response_is_not_an_empty_success() {
        let raw = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 500\r\n\r\n{\"people\":";
        let (base_url, _) = serve_once(raw).await;
        let tool = SearchApollo::new(HttpClient::new(Duration::from_secs(5)).unwrap()).with_base_url(base_url);

        let failure = tool.invoke(search_arguments()).await.expect_err("body was cut short");
        assert!(failure.retryable, "unexpected failure: {}", failure.message);
    }
}
