//! Canonical JSON text for manifests, patches and proposal records.
//!
//! Two records that are semantically equal always produce byte-identical text:
//!
//! - object keys are sorted by byte order at every nesting level
//! - integral numbers are written as integers (`1.0` and `1` agree), other
//!   floats use the shortest round-trip form
//! - two-space indentation, `": "` between key and value
//! - exactly one trailing newline
//!
//! Strings use the minimal escape set (quote, backslash, control characters).

use crate::core::error::SpecPackError;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::fmt::Write as _;

const INDENT: &str = "  ";

/// Largest integer an f64 represents exactly.
const MAX_EXACT_F64_INT: f64 = 9_007_199_254_740_992.0;

pub fn to_canonical_string<T: Serialize + ?Sized>(record: &T) -> Result<String, SpecPackError> {
    let value = serde_json::to_value(record)
        .map_err(|e| SpecPackError::Serialization(format!("record is not serializable: {e}")))?;
    Ok(value_to_canonical_string(&value))
}

pub fn to_canonical_bytes<T: Serialize + ?Sized>(record: &T) -> Result<Vec<u8>, SpecPackError> {
    to_canonical_string(record).map(String::into_bytes)
}

pub fn value_to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    emit_value(value, 0, &mut out);
    out.push('\n');
    out
}

/// Parses JSON text and re-emits it canonically.
pub fn canonicalize_json(input: &str) -> Result<String, SpecPackError> {
    let value: Value = serde_json::from_str(input)?;
    Ok(value_to_canonical_string(&value))
}

fn emit_value(value: &Value, depth: usize, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => emit_number(n, out),
        Value::String(s) => emit_string(s, out),
        Value::Array(items) => emit_array(items, depth, out),
        Value::Object(obj) => emit_object(obj, depth, out),
    }
}

fn emit_number(n: &Number, out: &mut String) {
    if let Some(i) = n.as_i64() {
        let _ = write!(out, "{i}");
    } else if let Some(u) = n.as_u64() {
        let _ = write!(out, "{u}");
    } else if let Some(f) = n.as_f64() {
        if f.fract() == 0.0 && f.abs() <= MAX_EXACT_F64_INT {
            let _ = write!(out, "{}", f as i64);
        } else {
            out.push_str(&n.to_string());
        }
    }
}

fn emit_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if ('\u{0000}'..='\u{001F}').contains(&c) => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn push_indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn emit_array(items: &[Value], depth: usize, out: &mut String) {
    if items.is_empty() {
        out.push_str("[]");
        return;
    }
    out.push_str("[\n");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(",\n");
        }
        push_indent(depth + 1, out);
        emit_value(item, depth + 1, out);
    }
    out.push('\n');
    push_indent(depth, out);
    out.push(']');
}

fn emit_object(obj: &Map<String, Value>, depth: usize, out: &mut String) {
    if obj.is_empty() {
        out.push_str("{}");
        return;
    }
    let mut keys: Vec<&String> = obj.keys().collect();
    keys.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));

    out.push_str("{\n");
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push_str(",\n");
        }
        push_indent(depth + 1, out);
        emit_string(key, out);
        out.push_str(": ");
        if let Some(v) = obj.get(*key) {
            emit_value(v, depth + 1, out);
        }
    }
    out.push('\n');
    push_indent(depth, out);
    out.push('}');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn key_order_does_not_affect_output() {
        let a = canonicalize_json(r#"{"z": 1, "a": {"y": true, "b": null}}"#).unwrap();
        let b = canonicalize_json(r#"{"a": {"b": null, "y": true}, "z": 1}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a,
            "{\n  \"a\": {\n    \"b\": null,\n    \"y\": true\n  },\n  \"z\": 1\n}\n"
        );
    }

    #[test]
    fn hashmap_iteration_order_is_irrelevant() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for i in 0..32 {
            first.insert(format!("k{i}"), i);
        }
        for i in (0..32).rev() {
            second.insert(format!("k{i}"), i);
        }
        assert_eq!(
            to_canonical_string(&first).unwrap(),
            to_canonical_string(&second).unwrap()
        );
    }

    #[test]
    fn integral_floats_collapse_to_integers() {
        assert_eq!(value_to_canonical_string(&json!(1.0)), "1\n");
        assert_eq!(value_to_canonical_string(&json!(1)), "1\n");
        assert_eq!(value_to_canonical_string(&json!(-2.5)), "-2.5\n");
        assert_eq!(value_to_canonical_string(&json!(0.1)), "0.1\n");
    }

    #[test]
    fn empty_containers_and_escapes() {
        let text = value_to_canonical_string(&json!({"a": [], "b": {}, "c": "q\"\n\u{1}"}));
        assert_eq!(
            text,
            "{\n  \"a\": [],\n  \"b\": {},\n  \"c\": \"q\\\"\\n\\u0001\"\n}\n"
        );
    }

    #[test]
    fn non_string_map_keys_are_a_serialization_error() {
        let mut bad = HashMap::new();
        bad.insert(vec![1u8], 1);
        let err = to_canonical_string(&bad).unwrap_err();
        assert!(matches!(err, SpecPackError::Serialization(_)));
    }

    #[test]
    fn output_ends_with_single_newline() {
        let text = to_canonical_string(&json!({"a": 1})).unwrap();
        assert!(text.ends_with("}\n"));
        assert!(!text.ends_with("\n\n"));
    }
}
