//! Runtime primitives (C6): `escape_html`, the `each` iteration primitive,
//! and the frame-stack `Scope` used by the renderer (spec §4.6, §9 "Scope
//! model at render time").

use std::collections::HashMap;

use serde_json::Value;

use crate::value::{self, Shape};

/// A lexical environment: a stack of frames, innermost last. Lookups walk
/// the stack top-down; writes always land in the innermost frame — the same
/// visibility rule as the source's `Object.create(parent)` prototype trick
/// (spec §4.5 item 3), without the self-referential borrow a linked-list of
/// borrowed parents would need across a recursive tree-walk.
pub struct Scope {
    frames: Vec<HashMap<String, Value>>,
}

impl Scope {
    pub fn root(locals: HashMap<String, Value>) -> Self {
        Scope { frames: vec![locals] }
    }

    /// Push a fresh, empty frame inheriting everything already visible.
    pub fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    /// Pop the innermost frame, discarding any bindings made inside it.
    pub fn pop(&mut self) {
        self.frames.pop();
        debug_assert!(!self.frames.is_empty(), "popped the root scope frame");
    }

    pub fn get(&self, name: &str) -> Value {
        for frame in self.frames.iter().rev() {
            if let Some(v) = frame.get(name) {
                return v.clone();
            }
        }
        Value::Null
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.frames
            .last_mut()
            .expect("scope always has at least one frame")
            .insert(name.into(), value);
    }
}

/// `escape_html(x)` (spec §4.6): stringify, then replace `&`, `<`, `>`, `"`
/// in that exact order so the escaping of `&` doesn't re-escape later
/// entities.
pub fn escape_html(v: &Value) -> String {
    value::to_display_string(v)
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// One iteration's worth of bindings: `(name, name_index/name_key,
/// name_last, name_has_next)` plus the bound value itself, in the order
/// they should be applied to a fresh per-iteration scope.
pub type Bindings = Vec<(String, Value)>;

/// Classify and flatten `value` into the binding sets `<each>` should run
/// its body under (spec §4.6). `Ok(None)` means "null/undefined: do
/// nothing, not an error"; `Err(type_description)` means `NonIterable`.
pub fn each_bindings(name: &str, value: &Value) -> Result<Option<Vec<Bindings>>, String> {
    match value::shape(value) {
        Shape::Empty => Ok(None),
        Shape::Sequence(items) => {
            let len = items.len();
            let mut out = Vec::with_capacity(len);
            for (i, item) in items.iter().enumerate() {
                let is_last = i + 1 == len;
                out.push(vec![
                    (name.to_string(), item.clone()),
                    (format!("{name}_index"), Value::from(i)),
                    (format!("{name}_key"), Value::from(i)),
                    (format!("{name}_last"), Value::Bool(is_last)),
                    (format!("{name}_has_next"), Value::Bool(!is_last)),
                ]);
            }
            Ok(Some(out))
        }
        Shape::Mapping(map) => {
            // `serde_json::Map` is a `BTreeMap` here (no `preserve_order`
            // feature), so this iteration is already code-point ascending.
            let last_key = map.keys().last().cloned();
            let mut out = Vec::with_capacity(map.len());
            for (k, v) in map.iter() {
                let is_last = Some(k) == last_key.as_ref();
                out.push(vec![
                    (name.to_string(), v.clone()),
                    (format!("{name}_key"), Value::String(k.clone())),
                    (format!("{name}_index"), Value::String(k.clone())),
                    (format!("{name}_last"), Value::Bool(is_last)),
                    (format!("{name}_has_next"), Value::Bool(!is_last)),
                ]);
            }
            Ok(Some(out))
        }
        Shape::Other(type_description) => Err(type_description.to_string()),
    }
}
