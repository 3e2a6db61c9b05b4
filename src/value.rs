//! Thin helpers over `serde_json::Value`, shared by the expression
//! evaluator (`expr`) and the runtime primitives (`runtime`).
//!
//! No custom `Value` enum is introduced (SPEC_FULL.md §3): `serde_json::Map`
//! is a `BTreeMap` as long as the `preserve_order` feature stays off, which
//! is what gives `<each>` over an object its code-point-ascending key order
//! for free.

use serde_json::Value;

/// JS-like truthiness: `null`, `false`, `0`, and `""` are falsy; everything
/// else — including empty arrays and objects — is truthy.
pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Stringification shared by `escape_html` and unescaped (`!{...}`)
/// interpolation.
pub fn to_display_string(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(v).unwrap_or_default(),
    }
}

/// What `<each>` sees when it classifies its operand (spec §4.6).
pub enum Shape<'a> {
    Empty,
    Sequence(&'a [Value]),
    Mapping(&'a serde_json::Map<String, Value>),
    Other(&'static str),
}

pub fn shape(v: &Value) -> Shape<'_> {
    match v {
        Value::Null => Shape::Empty,
        Value::Array(items) => Shape::Sequence(items),
        Value::Object(map) => Shape::Mapping(map),
        Value::Bool(_) => Shape::Other("boolean"),
        Value::Number(_) => Shape::Other("number"),
        Value::String(_) => Shape::Other("string"),
    }
}
