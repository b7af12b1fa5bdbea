//! Output formatting for CLI

use serde::Serialize;
use serde_json::Value;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

/// Format output based on selected format
pub fn format_output<T: Serialize>(data: &T, format: &str) -> String {
    let value = serde_json::to_value(data).unwrap_or_default();
    match OutputFormat::from(format) {
        OutputFormat::Json => {
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Text => {
            let mut lines = Vec::new();
            write_text(&mut lines, "", &value);
            lines.join("\n")
        }
    }
}

/// Flatten nested objects into `a.b: value` lines
fn write_text(lines: &mut Vec<String>, prefix: &str, value: &Value) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, value) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                write_text(lines, &key, value);
            }
        }
        Value::String(s) => lines.push(format!("{prefix}: {s}")),
        Value::Null => lines.push(format!("{prefix}: -")),
        other if prefix.is_empty() => lines.push(other.to_string()),
        other => lines.push(format!("{prefix}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_flattens_objects() {
        let data = json!({"backoff": {"initial": 5}, "endpoint": null, "name": "s1"});
        let text = format_output(&data, "text");
        assert_eq!(text, "backoff.initial: 5\nendpoint: -\nname: s1");
    }

    #[test]
    fn test_json_is_pretty() {
        let text = format_output(&json!({"ok": true}), "JSON");
        assert!(text.contains("\n  \"ok\": true"));
    }
}
