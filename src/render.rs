//! Renderer emitter (C5): the `Lowered` tree produced by `compose.rs`, and
//! the tree-walking interpreter that turns it into a `(data) -> String`
//! function (spec §4.5). Direct interpretation, not code-generation — both
//! are allowed by the spec, and interpretation keeps the emitter a plain
//! recursive walk with no intermediate source-text stage.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{Error, SourceLocation};
use crate::expr::ExpressionEngine;
use crate::runtime::{self, Scope};
use crate::value;

/// One arm of a composed `If` (spec §3 `When`), already carrying its own
/// nested-scope wrapper in `body` (see `compose::compose_node`'s `If` arm).
#[derive(Debug, Clone)]
pub struct IfArm {
    pub expr: String,
    pub body: Vec<Lowered>,
    pub location: SourceLocation,
}

/// Structural composition output (spec §4.4 "lowered form"). `Expr`/`SetVar`/
/// `If`/`Each` still carry expression text — nothing here has been
/// evaluated, since the data environment doesn't exist until
/// `Renderer::render` is called.
#[derive(Debug, Clone)]
pub enum Lowered {
    Plain(String),
    Comment(String),
    Expr { expr: String, escape: bool, location: SourceLocation },
    SetVar { name: String, expr: String, location: SourceLocation },
    /// Render-time scope push/pop marker for an Include/Block/If/arm
    /// boundary (spec §3 invariant 5, §4.5 item 3).
    Scope(Vec<Lowered>),
    If { arms: Vec<IfArm>, otherwise: Option<Vec<Lowered>> },
    Each { name: String, expr: String, body: Vec<Lowered>, location: SourceLocation },
}

/// Inert placeholder globals for the closed set in spec §4.5 item 4.
/// `encodeURI`/`encodeURIComponent`/`decodeURI`/`decodeURIComponent` are
/// recognized by name at call-evaluation time in `expr::DefaultEngine`
/// regardless of what's bound here; the string placeholder only supports a
/// bare (non-call) reference to the name resolving to *something* instead
/// of `null`.
pub fn seed_globals() -> HashMap<String, Value> {
    let mut globals = HashMap::new();
    globals.insert("Math".to_string(), Value::Object(Map::new()));
    globals.insert("JSON".to_string(), Value::Object(Map::new()));
    globals.insert("Object".to_string(), Value::Object(Map::new()));
    globals.insert("Date".to_string(), Value::Object(Map::new()));
    for name in ["encodeURI", "encodeURIComponent", "decodeURI", "decodeURIComponent"] {
        globals.insert(name.to_string(), Value::String("[native function]".to_string()));
    }
    globals
}

/// Top-level render scope: globals seeded first, then `data`'s own keys
/// merged over them so user data always wins (spec §4.5 item 4).
pub fn root_scope_locals(data: Value) -> HashMap<String, Value> {
    let mut locals = seed_globals();
    if let Value::Object(map) = data {
        for (k, v) in map {
            locals.insert(k, v);
        }
    }
    locals
}

fn evaluate(
    engine: &dyn ExpressionEngine,
    expr: &str,
    scope: &Scope,
    path: &str,
    location: SourceLocation,
) -> Result<Value, Error> {
    engine.evaluate(expr, scope).map_err(|e| Error::Expression {
        path: path.to_string(),
        location,
        expr: expr.to_string(),
        cause: e.0,
    })
}

/// Execute a lowered node list against `scope`, appending output to `out`.
/// The only recursion here is the tree shape itself — no `.await` anywhere,
/// matching spec §4.5 item 2 ("synchronous render").
pub(crate) fn exec(
    nodes: &[Lowered],
    scope: &mut Scope,
    engine: &dyn ExpressionEngine,
    path: &str,
    out: &mut String,
) -> Result<(), Error> {
    for node in nodes {
        match node {
            Lowered::Plain(text) => out.push_str(text),

            Lowered::Comment(content) => {
                out.push_str("<!--");
                out.push_str(content);
                out.push_str("-->");
            }

            Lowered::Expr { expr, escape, location } => {
                let v = evaluate(engine, expr, scope, path, *location)?;
                if *escape {
                    out.push_str(&runtime::escape_html(&v));
                } else {
                    out.push_str(&value::to_display_string(&v));
                }
            }

            Lowered::SetVar { name, expr, location } => {
                let v = evaluate(engine, expr, scope, path, *location)?;
                scope.set(name.clone(), v);
            }

            Lowered::Scope(body) => {
                scope.push();
                let result = exec(body, scope, engine, path, out);
                scope.pop();
                result?;
            }

            Lowered::If { arms, otherwise } => {
                let mut fired = false;
                for arm in arms {
                    let cond = evaluate(engine, &arm.expr, scope, path, arm.location)?;
                    if value::truthy(&cond) {
                        exec(&arm.body, scope, engine, path, out)?;
                        fired = true;
                        break;
                    }
                }
                if !fired {
                    if let Some(body) = otherwise {
                        exec(body, scope, engine, path, out)?;
                    }
                }
            }

            Lowered::Each { name, expr, body, location } => {
                let v = evaluate(engine, expr, scope, path, *location)?;
                match runtime::each_bindings(name, &v) {
                    Err(type_description) => {
                        return Err(Error::NonIterable {
                            path: path.to_string(),
                            location: *location,
                            type_description,
                        });
                    }
                    Ok(None) => {}
                    Ok(Some(iterations)) => {
                        for bindings in iterations {
                            scope.push();
                            for (k, v) in bindings {
                                scope.set(k, v);
                            }
                            let result = exec(body, scope, engine, path, out);
                            scope.pop();
                            result?;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// The compiled artifact (spec §6): a pure function of `data`. Carries its
/// own `ExpressionEngine` and root path so render-time errors can still
/// report which file an expression came from.
pub struct Renderer {
    lowered: Vec<Lowered>,
    engine: Arc<dyn ExpressionEngine>,
    root_path: String,
}

impl Renderer {
    pub(crate) fn new(lowered: Vec<Lowered>, engine: Arc<dyn ExpressionEngine>, root_path: String) -> Self {
        Renderer { lowered, engine, root_path }
    }

    pub fn render(&self, data: &Value) -> Result<String, Error> {
        let locals = root_scope_locals(data.clone());
        let mut scope = Scope::root(locals);
        let mut out = String::new();
        exec(&self.lowered, &mut scope, self.engine.as_ref(), &self.root_path, &mut out)?;
        Ok(out)
    }
}
