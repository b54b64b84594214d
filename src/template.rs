//! Record templates
//!
//! A template is plain text with embedded `{{ .field.path }}` actions that
//! pull values out of a parsed JSON record. Templates are compiled once at
//! startup and evaluated for every record; evaluation never fails; anything
//! that cannot be resolved renders as an empty string.

use crate::error::{ExporterError, Result};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Field(Vec<String>),
}

/// A compiled, immutable template. Cheap to share between tasks.
#[derive(Clone, PartialEq)]
pub struct Template {
    name: String,
    source: String,
    segments: Vec<Segment>,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("source", &self.source)
            .finish()
    }
}

impl Template {
    /// Compile `source`. `name` identifies the template in error messages.
    pub fn compile(name: impl Into<String>, source: &str) -> Result<Self> {
        let name = name.into();
        let fail = |message: String| ExporterError::Template {
            name: name.clone(),
            message,
        };

        let mut segments = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| fail(format!("unterminated action at byte {}", source.len() - rest.len() + start)))?;
            let path = parse_path(after[..end].trim()).map_err(fail)?;
            segments.push(Segment::Field(path));
            rest = &after[end + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self {
            name,
            source: source.to_string(),
            segments,
        })
    }

    /// Text the template was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render the template against `record`.
    pub fn evaluate(&self, record: &Value) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field(path) => {
                    if let Some(value) = lookup(record, path) {
                        render_value(value, &mut out);
                    }
                }
            }
        }
        out
    }
}

fn parse_path(action: &str) -> std::result::Result<Vec<String>, String> {
    if action.is_empty() {
        return Err("empty action".to_string());
    }
    if action.chars().any(char::is_whitespace) {
        return Err(format!("unsupported action '{}'", action));
    }
    let Some(path) = action.strip_prefix('.') else {
        return Err(format!("field reference '{}' must start with '.'", action));
    };
    if path.is_empty() {
        return Ok(Vec::new());
    }
    path.split('.')
        .map(|seg| {
            if seg.is_empty() || seg.contains('}') {
                Err(format!("invalid field path '{}'", action))
            } else {
                Ok(seg.to_string())
            }
        })
        .collect()
}

fn lookup<'a>(record: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = record;
    for key in path {
        current = match current {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn render_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Array(_) | Value::Object(_) => out.push_str(&value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(src: &str, record: &Value) -> String {
        Template::compile("test", src).unwrap().evaluate(record)
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(render("static", &json!({})), "static");
        assert_eq!(render("", &json!({})), "");
    }

    #[test]
    fn test_field_references() {
        let record = json!({
            "status": 200,
            "method": "GET",
            "latency": 0.25,
            "ok": true,
            "request": {"path": "/api", "tags": ["a", "b"]}
        });
        assert_eq!(render("{{.method}}", &record), "GET");
        assert_eq!(render("{{ .status }}", &record), "200");
        assert_eq!(render("{{.latency}}", &record), "0.25");
        assert_eq!(render("{{.ok}}", &record), "true");
        assert_eq!(render("{{.request.path}}", &record), "/api");
        assert_eq!(render("{{.request.tags.1}}", &record), "b");
        assert_eq!(render("{{.method}} {{.request.path}}!", &record), "GET /api!");
        assert_eq!(render("{{.request.tags}}", &record), r#"["a","b"]"#);
    }

    #[test]
    fn test_unresolvable_fields_render_empty() {
        let record = json!({"value": null, "name": "x", "list": [1]});
        assert_eq!(render("{{.value}}", &record), "");
        assert_eq!(render("{{.missing}}", &record), "");
        assert_eq!(render("{{.name.inner}}", &record), "");
        assert_eq!(render("{{.list.7}}", &record), "");
        assert_eq!(render("{{.list.first}}", &record), "");
        assert_eq!(render("[{{.missing}}]", &json!("scalar")), "[]");
    }

    #[test]
    fn test_dot_renders_whole_record() {
        assert_eq!(render("{{.}}", &json!("line")), "line");
        assert_eq!(render("{{.}}", &json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn test_compile_errors() {
        for bad in ["{{.value", "{{}}", "{{ value }}", "{{.a..b}}", "{{.a | b}}"] {
            let err = Template::compile("bad", bad).unwrap_err();
            assert!(
                matches!(err, ExporterError::Template { ref name, .. } if name == "bad"),
                "expected compile error for {bad}"
            );
        }
    }
}
