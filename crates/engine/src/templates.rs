//! Template parsing shared by step inputs and tool configuration.
//!
//! Both use `{{ ... }}` delimiters but reference different sources: step inputs point into
//! the execution state (`{{prospect.output.leads[0]}}`), tool configuration names an
//! environment variable (`{{APOLLO_API_KEY}}`). Templates are compiled once when the graph
//! is built so malformed references surface at load time instead of mid-run.

use std::fmt;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::TemplateError;

static ENV_VAR_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid env var regex"));

/// A reference kind that can appear between `{{` and `}}`.
pub trait Reference: Sized + Clone + fmt::Debug + PartialEq + fmt::Display {
    /// Parses the trimmed text between the delimiters.
    fn parse(expression: &str) -> Result<Self, TemplateError>;

    /// Recognizes a reference written without delimiters. Only state paths support this.
    fn parse_bare(_text: &str) -> Option<Self> {
        None
    }
}

/// One segment of a state path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// `step_id(.segment | [n])*`, rooted at a step identifier or `initial`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePath {
    pub root: String,
    pub segments: Vec<PathSegment>,
}

impl StatePath {
    /// Canonical text form, used in diagnostics.
    pub fn expression(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)?;
        for segment in &self.segments {
            match segment {
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl Reference for StatePath {
    fn parse(expression: &str) -> Result<Self, TemplateError> {
        let invalid = |reason: &str| TemplateError::InvalidReference {
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let (root, remainder) = split_root_identifier(expression).ok_or_else(|| invalid("expected a step identifier"))?;
        let segments = parse_path_segments(remainder).map_err(|reason| invalid(&reason))?;
        Ok(StatePath {
            root: root.to_string(),
            segments,
        })
    }

    fn parse_bare(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        let (root, remainder) = split_root_identifier(trimmed)?;
        let after_output = remainder.strip_prefix(".output")?;
        if !(after_output.is_empty() || after_output.starts_with('.') || after_output.starts_with('[')) {
            return None;
        }
        let segments = parse_path_segments(remainder).ok()?;
        Some(StatePath {
            root: root.to_string(),
            segments,
        })
    }
}

fn split_root_identifier(raw: &str) -> Option<(&str, &str)> {
    let end = raw
        .char_indices()
        .find(|(_, character)| !(character.is_ascii_alphanumeric() || *character == '_' || *character == '-'))
        .map(|(index, _)| index)
        .unwrap_or(raw.len());
    if end == 0 {
        return None;
    }
    let remainder = &raw[end..];
    if !(remainder.is_empty() || remainder.starts_with('.') || remainder.starts_with('[')) {
        return None;
    }
    Some((&raw[..end], remainder))
}

fn parse_path_segments(path: &str) -> Result<Vec<PathSegment>, String> {
    let mut segments = Vec::new();
    let mut chars = path.chars().peekable();

    while let Some(character) = chars.next() {
        match character {
            '.' => {
                let mut key = String::new();
                while let Some(next) = chars.peek().copied() {
                    if next == '.' || next == '[' {
                        break;
                    }
                    key.push(next);
                    chars.next();
                }
                let key = key.trim();
                if key.is_empty() {
                    return Err("empty path segment".into());
                }
                match key.parse::<usize>() {
                    Ok(index) => segments.push(PathSegment::Index(index)),
                    Err(_) => segments.push(PathSegment::Key(key.to_string())),
                }
            }
            '[' => {
                let mut inner = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(next);
                }
                if !closed {
                    return Err("unterminated index".into());
                }
                let index = inner
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| format!("index '{}' is not a non-negative integer", inner.trim()))?;
                segments.push(PathSegment::Index(index));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(segments)
}

/// An environment variable named in tool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar(pub String);

impl EnvVar {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Reference for EnvVar {
    fn parse(expression: &str) -> Result<Self, TemplateError> {
        let name = expression.strip_prefix("env.").unwrap_or(expression);
        if ENV_VAR_NAME.is_match(name) {
            Ok(EnvVar(name.to_string()))
        } else {
            Err(TemplateError::InvalidReference {
                expression: expression.to_string(),
                reason: "environment variable names use letters, digits, and underscores".into(),
            })
        }
    }
}

/// A piece of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart<R> {
    Text(String),
    Reference(R),
}

/// Compiled form of a JSON value that may contain references.
#[derive(Debug, Clone, PartialEq)]
pub enum Template<R> {
    /// Passed through unchanged.
    Literal(Value),
    /// A string that is exactly one reference; resolves to the referenced JSON value.
    Reference(R),
    /// Text with embedded references; resolves to a string.
    Interpolated(Vec<TemplatePart<R>>),
    List(Vec<Template<R>>),
    Map(IndexMap<String, Template<R>>),
}

pub type InputTemplate = Template<StatePath>;
pub type ConfigTemplate = Template<EnvVar>;

impl<R: Reference> Template<R> {
    /// Compiles a JSON value, recursing into arrays and objects.
    pub fn compile(value: &Value) -> Result<Self, TemplateError> {
        match value {
            Value::String(text) => compile_string(text),
            Value::Array(items) => {
                let compiled = items.iter().map(Template::compile).collect::<Result<Vec<_>, _>>()?;
                if compiled.iter().all(Template::is_literal) {
                    Ok(Template::Literal(value.clone()))
                } else {
                    Ok(Template::List(compiled))
                }
            }
            Value::Object(map) => {
                let mut compiled = IndexMap::with_capacity(map.len());
                for (key, nested) in map {
                    compiled.insert(key.clone(), Template::compile(nested)?);
                }
                if compiled.values().all(Template::is_literal) {
                    Ok(Template::Literal(value.clone()))
                } else {
                    Ok(Template::Map(compiled))
                }
            }
            other => Ok(Template::Literal(other.clone())),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Template::Literal(_))
    }

    /// Every reference in the template, depth first.
    pub fn references(&self) -> Vec<&R> {
        let mut collected = Vec::new();
        self.collect_references(&mut collected);
        collected
    }

    fn collect_references<'a>(&'a self, collected: &mut Vec<&'a R>) {
        match self {
            Template::Literal(_) => {}
            Template::Reference(reference) => collected.push(reference),
            Template::Interpolated(parts) => {
                for part in parts {
                    if let TemplatePart::Reference(reference) = part {
                        collected.push(reference);
                    }
                }
            }
            Template::List(items) => items.iter().for_each(|item| item.collect_references(collected)),
            Template::Map(entries) => entries.values().for_each(|entry| entry.collect_references(collected)),
        }
    }
}

fn compile_string<R: Reference>(text: &str) -> Result<Template<R>, TemplateError> {
    let parts = split_template_parts::<R>(text)?;
    let reference_count = parts
        .iter()
        .filter(|part| matches!(part, TemplatePart::Reference(_)))
        .count();

    if reference_count == 0 {
        if let Some(reference) = R::parse_bare(text) {
            return Ok(Template::Reference(reference));
        }
        return Ok(Template::Literal(Value::String(text.to_string())));
    }

    if let [TemplatePart::Reference(reference)] = parts.as_slice() {
        return Ok(Template::Reference(reference.clone()));
    }
    Ok(Template::Interpolated(parts))
}

/// Splits text into literal runs and parsed references.
///
/// An opening `{{` without a matching `}}` is kept as literal text.
fn split_template_parts<R: Reference>(text: &str) -> Result<Vec<TemplatePart<R>>, TemplateError> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut remainder = text;

    while let Some(start) = remainder.find("{{") {
        let after_start = &remainder[start + 2..];
        let Some(end) = after_start.find("}}") else {
            break;
        };
        literal.push_str(&remainder[..start]);
        let expression = after_start[..end].trim();
        if expression.is_empty() {
            return Err(TemplateError::EmptyReference {
                template: text.to_string(),
            });
        }
        if !literal.is_empty() {
            parts.push(TemplatePart::Text(std::mem::take(&mut literal)));
        }
        parts.push(TemplatePart::Reference(R::parse(expression)?));
        remainder = &after_start[end + 2..];
    }

    literal.push_str(remainder);
    if !literal.is_empty() {
        parts.push(TemplatePart::Text(literal));
    }
    Ok(parts)
}

/// Renders a resolved value for embedding into text.
pub fn render_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(expression: &str) -> StatePath {
        StatePath::parse(expression).expect("valid path")
    }

    #[test]
    fn parses_dot_and_bracket_indices() {
        let parsed = path("prospect.output.leads[0].email");
        assert_eq!(parsed.root, "prospect");
        assert_eq!(
            parsed.segments,
            vec![
                PathSegment::Key("output".into()),
                PathSegment::Key("leads".into()),
                PathSegment::Index(0),
                PathSegment::Key("email".into()),
            ]
        );
        assert_eq!(path("prospect.output.leads.0").segments[2], PathSegment::Index(0));
        assert_eq!(parsed.to_string(), "prospect.output.leads[0].email");
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(StatePath::parse("prospect..leads").is_err());
        assert!(StatePath::parse("prospect.leads[x]").is_err());
        assert!(StatePath::parse("prospect.leads[1").is_err());
        assert!(StatePath::parse(".leads").is_err());
        assert!(StatePath::parse("a b").is_err());
    }

    #[test]
    fn whole_reference_compiles_to_reference() {
        let template = InputTemplate::compile(&json!("{{ prospect.output.leads }}")).expect("compiles");
        assert_eq!(template, Template::Reference(path("prospect.output.leads")));
    }

    #[test]
    fn embedded_references_compile_to_interpolation() {
        let template = InputTemplate::compile(&json!("Leads from {{initial.output.industry}} in {{initial.location}}")).expect("compiles");
        let Template::Interpolated(parts) = template else {
            panic!("expected interpolation");
        };
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], TemplatePart::Text("Leads from ".into()));
    }

    #[test]
    fn unterminated_opening_is_literal_text() {
        let template = InputTemplate::compile(&json!("price {{ 10")).expect("compiles");
        assert_eq!(template, Template::Literal(json!("price {{ 10")));
    }

    #[test]
    fn empty_reference_is_an_error() {
        assert!(matches!(
            InputTemplate::compile(&json!("{{   }}")),
            Err(TemplateError::EmptyReference { .. })
        ));
    }

    #[test]
    fn bare_output_paths_are_references() {
        let template = InputTemplate::compile(&json!("prospect.output.leads")).expect("compiles");
        assert_eq!(template, Template::Reference(path("prospect.output.leads")));
        let literal = InputTemplate::compile(&json!("www.example.com")).expect("compiles");
        assert!(literal.is_literal());
        let outputs = InputTemplate::compile(&json!("prospect.outputs")).expect("compiles");
        assert!(outputs.is_literal());
    }

    #[test]
    fn nested_values_collect_references_in_order() {
        let template = InputTemplate::compile(&json!({
            "first": "{{a.output.x}}",
            "rest": ["literal", "{{b.output.y}}"],
            "flag": true
        }))
        .expect("compiles");
        let roots: Vec<&str> = template.references().iter().map(|reference| reference.root.as_str()).collect();
        assert_eq!(roots, vec!["a", "b"]);
        assert!(InputTemplate::compile(&json!({ "n": 1, "list": ["x"] })).expect("compiles").is_literal());
    }

    #[test]
    fn env_var_names_are_validated() {
        assert_eq!(
            ConfigTemplate::compile(&json!("{{APOLLO_API_KEY}}")).expect("compiles"),
            Template::Reference(EnvVar("APOLLO_API_KEY".into()))
        );
        assert_eq!(
            ConfigTemplate::compile(&json!("{{ env.SHEET_ID }}")).expect("compiles"),
            Template::Reference(EnvVar("SHEET_ID".into()))
        );
        assert!(ConfigTemplate::compile(&json!("{{9LIVES}}")).is_err());
        assert!(ConfigTemplate::compile(&json!("{{prospect.output}}")).is_err());
        assert!(ConfigTemplate::compile(&json!("prospect.output.leads")).expect("compiles").is_literal());
    }

    #[test]
    fn render_text_formats_scalars_and_structures() {
        assert_eq!(render_text(&json!("x")), "x");
        assert_eq!(render_text(&json!(null)), "");
        assert_eq!(render_text(&json!(3)), "3");
        assert_eq!(render_text(&json!(["a"])), "[\"a\"]");
    }
}
