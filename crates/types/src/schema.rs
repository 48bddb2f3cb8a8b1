//! Output schema: the required fields of a step's final record and their coarse shapes.
//!
//! Two authoring forms are accepted:
//!
//! ```yaml
//! # shorthand, a trailing `?` marks a field optional
//! output_schema:
//!   leads: list
//!   summary: string
//!   cursor: scalar?
//!
//! # JSON-schema-like
//! output_schema:
//!   type: object
//!   properties:
//!     leads: { type: array }
//!   required: [leads]
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Coarse shape a required output field must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldShape {
    /// Any non-null value.
    Any,
    /// String, number, or boolean.
    Scalar,
    String,
    Number,
    Integer,
    Boolean,
    List,
    Object,
}

impl FieldShape {
    /// Parses a shape keyword (`list`, `array`, `object`, `scalar`, ...), case-insensitively.
    pub fn parse(keyword: &str) -> Option<Self> {
        let shape = match keyword.trim().to_ascii_lowercase().as_str() {
            "any" => FieldShape::Any,
            "scalar" => FieldShape::Scalar,
            "string" | "str" | "text" => FieldShape::String,
            "number" | "float" => FieldShape::Number,
            "integer" | "int" => FieldShape::Integer,
            "boolean" | "bool" => FieldShape::Boolean,
            "list" | "array" => FieldShape::List,
            "object" | "map" | "dict" => FieldShape::Object,
            _ => return None,
        };
        Some(shape)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldShape::Any => "any",
            FieldShape::Scalar => "scalar",
            FieldShape::String => "string",
            FieldShape::Number => "number",
            FieldShape::Integer => "integer",
            FieldShape::Boolean => "boolean",
            FieldShape::List => "list",
            FieldShape::Object => "object",
        }
    }

    /// Returns true when `value` has this shape. `null` never matches.
    pub fn matches(&self, value: &JsonValue) -> bool {
        match self {
            FieldShape::Any => !value.is_null(),
            FieldShape::Scalar => matches!(value, JsonValue::String(_) | JsonValue::Number(_) | JsonValue::Bool(_)),
            FieldShape::String => value.is_string(),
            FieldShape::Number => value.is_number(),
            FieldShape::Integer => value.is_i64() || value.is_u64(),
            FieldShape::Boolean => value.is_boolean(),
            FieldShape::List => value.is_array(),
            FieldShape::Object => value.is_object(),
        }
    }
}

/// Describes the shape of an arbitrary JSON value using the schema vocabulary.
pub fn describe_value_shape(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "object",
    }
}

/// Shape and presence rule for one output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    pub shape: FieldShape,
    pub required: bool,
}

impl FieldRule {
    fn parse_shorthand(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let (keyword, required) = match trimmed.strip_suffix('?') {
            Some(keyword) => (keyword, false),
            None => (trimmed, true),
        };
        Some(Self {
            shape: FieldShape::parse(keyword)?,
            required,
        })
    }

    fn to_shorthand(self) -> String {
        if self.required {
            self.shape.as_str().to_string()
        } else {
            format!("{}?", self.shape.as_str())
        }
    }
}

/// Structural description of the record a step must emit.
///
/// An empty schema accepts any JSON object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "JsonValue", into = "IndexMap<String, String>")]
pub struct OutputSchema {
    fields: IndexMap<String, FieldRule>,
}

impl OutputSchema {
    /// Builds a schema from `(field, shape)` pairs; every field is required.
    pub fn required<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldShape)>,
        K: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, shape)| (name.into(), FieldRule { shape, required: true }))
                .collect(),
        }
    }

    /// Looks up the rule for a field.
    pub fn field(&self, name: &str) -> Option<&FieldRule> {
        self.fields.get(name)
    }

    /// Iterates over fields in authoring order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldRule)> {
        self.fields.iter().map(|(name, rule)| (name.as_str(), rule))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// JSON rendering used when advertising the schema to the reasoning backend.
    pub fn to_prompt_value(&self) -> JsonValue {
        let fields = self
            .fields
            .iter()
            .map(|(name, rule)| (name.clone(), JsonValue::String(rule.to_shorthand())))
            .collect();
        JsonValue::Object(fields)
    }

    fn from_json_schema(object: &serde_json::Map<String, JsonValue>) -> Result<Self, String> {
        if let Some(kind) = object.get("type").and_then(primary_type_keyword)
            && kind != "object"
        {
            return Err(format!("output schema must describe an object, found type '{kind}'"));
        }

        let required: Option<Vec<&str>> = object
            .get("required")
            .and_then(JsonValue::as_array)
            .map(|names| names.iter().filter_map(JsonValue::as_str).collect());

        let mut fields = IndexMap::new();
        if let Some(properties) = object.get("properties").and_then(JsonValue::as_object) {
            for (name, property) in properties {
                let shape = match property.get("type").and_then(primary_type_keyword) {
                    Some(keyword) => {
                        FieldShape::parse(keyword).ok_or_else(|| format!("field '{name}' has unsupported type '{keyword}'"))?
                    }
                    None => FieldShape::Any,
                };
                let is_required = required.as_ref().map(|names| names.contains(&name.as_str())).unwrap_or(true);
                fields.insert(
                    name.clone(),
                    FieldRule {
                        shape,
                        required: is_required,
                    },
                );
            }
        }
        Ok(Self { fields })
    }
}

fn primary_type_keyword(value: &JsonValue) -> Option<&str> {
    match value {
        JsonValue::String(keyword) => Some(keyword.as_str()),
        JsonValue::Array(keywords) => keywords.iter().filter_map(JsonValue::as_str).find(|keyword| *keyword != "null"),
        _ => None,
    }
}

impl TryFrom<JsonValue> for OutputSchema {
    type Error = String;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        let object = match value {
            JsonValue::Null => return Ok(Self::default()),
            JsonValue::Object(object) => object,
            other => return Err(format!("output schema must be a map, found {}", describe_value_shape(&other))),
        };

        if object.contains_key("properties") || object.get("type").and_then(JsonValue::as_str) == Some("object") {
            return Self::from_json_schema(&object);
        }

        let mut fields = IndexMap::new();
        for (name, raw_rule) in &object {
            let rule = match raw_rule {
                JsonValue::String(shorthand) => FieldRule::parse_shorthand(shorthand),
                JsonValue::Object(fragment) => fragment
                    .get("type")
                    .and_then(primary_type_keyword)
                    .and_then(FieldShape::parse)
                    .map(|shape| FieldRule { shape, required: true }),
                _ => None,
            }
            .ok_or_else(|| format!("field '{name}' has an unsupported shape: {raw_rule}"))?;
            fields.insert(name.clone(), rule);
        }
        Ok(Self { fields })
    }
}

impl From<OutputSchema> for IndexMap<String, String> {
    fn from(schema: OutputSchema) -> Self {
        schema
            .fields
            .into_iter()
            .map(|(name, rule)| (name, rule.to_shorthand()))
            .collect()
    }
}
