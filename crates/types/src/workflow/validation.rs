//! Validation of candidate step output against the declared output schema.
//!
//! The checks are coarse:
//! - The candidate must be a JSON object.
//! - Required fields must be present and non-null.
//! - Present fields must match their declared shape (scalar vs. list vs. object, or a finer
//!   primitive type when the schema names one).
//! - Fields not named by the schema are allowed.

use serde_json::Value;

use crate::schema::{OutputSchema, describe_value_shape};

/// Validate a candidate output record, returning every violation found.
pub fn validate_output_record(candidate: &Value, schema: &OutputSchema) -> Result<(), Vec<String>> {
    let Value::Object(record) = candidate else {
        return Err(vec![format!(
            "final answer must be a JSON object, found {}",
            describe_value_shape(candidate)
        )]);
    };

    let mut violations = Vec::new();
    for (field_name, rule) in schema.fields() {
        match record.get(field_name) {
            None | Some(Value::Null) => {
                if rule.required {
                    violations.push(format!("missing required field '{}' ({})", field_name, rule.shape.as_str()));
                }
            }
            Some(value) => {
                if !rule.shape.matches(value) {
                    violations.push(format!(
                        "field '{}' must be {} but was {}",
                        field_name,
                        rule.shape.as_str(),
                        describe_value_shape(value)
                    ));
                }
            }
        }
    }

    if violations.is_empty() { Ok(()) } else { Err(violations) }
}
