use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Map as JsonMap, Value, json};
use stepwise_engine::{Tool, ToolFailure};
use stepwise_types::{ParameterSpec, ToolDescriptor};
use tracing::info;

use crate::http::{HttpClient, ToolArguments};

pub const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
pub const DEFAULT_SHEET_NAME: &str = "ai";

/// `write_to_google_sheet`: appends rows to a spreadsheet tab.
pub struct WriteToGoogleSheet {
    client: HttpClient,
    base_url: String,
}

impl WriteToGoogleSheet {
    pub const NAME: &'static str = "write_to_google_sheet";

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
            purpose: "Appends rows to a Google Sheet. `data` may be one object, a list of objects, or a list of rows.".into(),
            parameters: vec![
                ParameterSpec::required("data", "rows to append"),
                ParameterSpec::optional("sheet_name", "tab name, defaults to 'ai'"),
                ParameterSpec::optional("sheet_id", "spreadsheet id, defaults to the configured one"),
            ],
        }
    }
}

/// Flattens `data` into spreadsheet rows. Objects contribute their values in key order.
pub fn to_rows(data: &Value) -> Vec<Vec<Value>> {
    fn row(value: &Value) -> Vec<Value> {
        match value {
            Value::Object(map) => map.values().cloned().collect(),
            Value::Array(cells) => cells.clone(),
            other => vec![other.clone()],
        }
    }
    match data {
        Value::Array(items) => items.iter().map(row).collect(),
        Value::Null => Vec::new(),
        other => vec![row(other)],
    }
}

#[async_trait]
impl Tool for WriteToGoogleSheet {
    async fn invoke(&self, arguments: JsonMap<String, Value>) -> Result<Value, ToolFailure> {
        let args = ToolArguments::new(Self::NAME, &arguments);
        args.require(&["sheet_id", "access_token", "data"])?;
        let sheet_id = args.str("sheet_id").unwrap_or_default();
        let sheet_name = args.str("sheet_name").unwrap_or(DEFAULT_SHEET_NAME);
        let rows = to_rows(args.value("data").unwrap_or(&Value::Null));

        info!(tool = Self::NAME, rows = rows.len(), sheet = %sheet_name, "appending rows");
        let url = format!("{}/{}/values/{}!A1:append", self.base_url, sheet_id, sheet_name);
        let builder = self
            .client
            .request(Method::POST, &url)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .bearer_auth(args.str("access_token").unwrap_or_default())
            .json(&json!({ "values": rows }));
        let data = self.client.send_json(Self::NAME, builder).await?;
        Ok(json!({ "status": "success", "data": data }))
    }
}
