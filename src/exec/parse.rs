// src/exec/parse.rs

//! Interpreting raw worker output according to an item's [`OutputSchema`].

use serde_json::Value;

use crate::dag::work_item::{FieldKind, OutputSchema, TypedSchema};
use crate::types::ParsedFormat;

/// Parsed form of an accepted output.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub format: ParsedFormat,
    pub value: Option<Value>,
}

impl Parsed {
    pub fn raw() -> Self {
        Self {
            format: ParsedFormat::Raw,
            value: None,
        }
    }
}

/// Parse `raw` per `schema`.
///
/// `OutputSchema::None` always yields `Raw`. Errors describe why the output
/// does not fit; the caller decides whether that is fatal.
pub fn parse_output(raw: &str, schema: &OutputSchema) -> Result<Parsed, String> {
    match schema {
        OutputSchema::None => Ok(Parsed::raw()),
        OutputSchema::Json { schema } => {
            let value = extract_json(raw)?;
            check_json_schema(&value, schema)?;
            Ok(Parsed {
                format: ParsedFormat::Json,
                value: Some(value),
            })
        }
        OutputSchema::Typed(typed) => {
            let value = extract_json(raw)?;
            check_typed(&value, typed)?;
            Ok(Parsed {
                format: ParsedFormat::Typed,
                value: Some(value),
            })
        }
    }
}

/// Remove a surrounding Markdown code fence (```` ```json ... ``` ````).
pub fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening line.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Find a JSON document in worker output.
///
/// Tries the whole (fence-stripped) text first, then the outermost
/// `{...}` or `[...]` span.
pub fn extract_json(raw: &str) -> Result<Value, String> {
    let body = strip_code_fences(raw);
    if body.is_empty() {
        return Err("output is empty".to_string());
    }

    let direct_err = match serde_json::from_str::<Value>(body) {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (body.find(open), body.rfind(close)) {
            if start < end {
                if let Ok(v) = serde_json::from_str::<Value>(&body[start..=end]) {
                    return Ok(v);
                }
            }
        }
    }

    Err(format!("output is not valid JSON: {direct_err}"))
}

/// Enforce the `type` and `required` keywords of a JSON Schema document.
fn check_json_schema(value: &Value, schema: &Value) -> Result<(), String> {
    if let Some(expected) = schema.get("type").and_then(Value::as_str) {
        let ok = match expected {
            "object" => value.is_object(),
            "array" => value.is_array(),
            "string" => value.is_string(),
            "number" => value.is_number(),
            "integer" => value.is_i64() || value.is_u64(),
            "boolean" => value.is_boolean(),
            _ => true,
        };
        if !ok {
            return Err(format!("expected a JSON {expected}"));
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let obj = value
            .as_object()
            .ok_or_else(|| "expected a JSON object with required keys".to_string())?;
        let missing: Vec<&str> = required
            .iter()
            .filter_map(Value::as_str)
            .filter(|key| !obj.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing required key(s): {}", missing.join(", ")));
        }
    }

    Ok(())
}

fn check_typed(value: &Value, typed: &TypedSchema) -> Result<(), String> {
    let obj = value
        .as_object()
        .ok_or_else(|| format!("expected a JSON object for {}", typed.name))?;

    let mut issues = Vec::new();
    for (field, kind) in typed.fields.iter() {
        match obj.get(field) {
            None => issues.push(format!("missing field '{field}'")),
            Some(v) if !kind_matches(*kind, v) => {
                issues.push(format!("field '{field}' should be {kind:?}"))
            }
            Some(_) => {}
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(format!("{}: {}", typed.name, issues.join("; ")))
    }
}

fn kind_matches(kind: FieldKind, v: &Value) -> bool {
    match kind {
        FieldKind::String => v.is_string(),
        FieldKind::Number => v.is_number(),
        FieldKind::Integer => v.is_i64() || v.is_u64(),
        FieldKind::Boolean => v.is_boolean(),
        FieldKind::Array => v.is_array(),
        FieldKind::Object => v.is_object(),
        FieldKind::Any => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_fences_with_info_string() {
        assert_eq!(strip_code_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  plain  "), "plain");
    }

    #[test]
    fn finds_json_inside_prose() {
        let v = extract_json("Sure! Here it is: {\"ok\": true} Hope that helps.").unwrap();
        assert_eq!(v, json!({"ok": true}));
    }

    #[test]
    fn json_schema_required_keys() {
        let schema = OutputSchema::Json {
            schema: json!({"type": "object", "required": ["score", "notes"]}),
        };
        let parsed = parse_output("{\"score\": 3, \"notes\": \"\"}", &schema).unwrap();
        assert_eq!(parsed.format, ParsedFormat::Json);

        let err = parse_output("{\"score\": 3}", &schema).unwrap_err();
        assert!(err.contains("notes"));
    }

    #[test]
    fn typed_schema_checks_kinds() {
        let schema = OutputSchema::Typed(TypedSchema {
            name: "Review".into(),
            fields: vec![
                ("score".into(), FieldKind::Integer),
                ("approved".into(), FieldKind::Boolean),
            ],
        });

        assert!(parse_output(r#"{"score": 4, "approved": true}"#, &schema).is_ok());
        let err = parse_output(r#"{"score": "4", "approved": true}"#, &schema).unwrap_err();
        assert!(err.contains("score"));
    }

    #[test]
    fn no_schema_is_raw() {
        assert_eq!(parse_output("{}", &OutputSchema::None), Ok(Parsed::raw()));
    }
}
