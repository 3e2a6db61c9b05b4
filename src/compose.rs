//! Composition engine (C4): walks the fully-populated `Job` cache and
//! resolves `<include>`/`<block>`/`<def>`/`<append>`/`<prepend>`/`<inline>`
//! into a `Lowered` tree (spec §4.4). Purely synchronous — by the time this
//! runs, every transitively-referenced template is already parsed and
//! cached by the discovery phase (`loader::discover`).
//!
//! `Expr`/`Var`/`If`/`Each` are NOT evaluated here: the data environment
//! doesn't exist until `Renderer::render(data)` is called, so composition
//! only resolves *structure* — it passes expression text through to the
//! `Lowered` tree for the render-time walk in `render.rs` to evaluate.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{Error, SourceLocation};
use crate::node::{Def, DefMode, IncludeChild, Node};
use crate::path;
use crate::render::{IfArm, Lowered};
use crate::runtime;
use crate::{CompileOptions, Job};

/// Definitions in scope at the current point of the walk (spec §3
/// `CompositionContext`), one frame per enclosing `<include>`. A frame is
/// pushed right before descending into an included file and popped right
/// after, so a `<block:>` deep in an included layout can be satisfied by a
/// `<def:>` several Includes back (spec §4.4 "Layout inheritance") while
/// bindings never leak sideways.
///
/// A flat frame stack rather than a borrowed parent-linked chain (spec §9's
/// "stack-scoped frames with borrowed parent references" suggestion) —
/// composition recurses across function-call boundaries to unbounded
/// Include depth, and a self-referential `&'a CompositionContext<'a>`
/// cannot be threaded through that recursion without fixing one lifetime
/// for the whole walk, which a local variable introduced partway down the
/// call stack can never actually satisfy. See `runtime::Scope` for the same
/// fix applied to the render-time scope chain.
#[derive(Default)]
pub struct CompositionContext {
    frames: Vec<HashMap<String, (DefMode, Vec<Lowered>)>>,
}

impl CompositionContext {
    fn lookup(&self, name: &str) -> Option<(DefMode, Vec<Lowered>)> {
        for frame in self.frames.iter().rev() {
            if let Some((mode, body)) = frame.get(name) {
                return Some((*mode, body.clone()));
            }
        }
        None
    }

    fn push(&mut self, defs: HashMap<String, (DefMode, Vec<Lowered>)>) {
        self.frames.push(defs);
    }

    fn pop(&mut self) {
        self.frames.pop();
    }
}

/// Entry point: compose the root template named by `job.root`.
pub fn compose(job: &Job, options: &CompileOptions) -> Result<Vec<Lowered>, Error> {
    let mut ctx = CompositionContext::default();
    let root_nodes = job.ast.get(&job.root).ok_or_else(|| Error::Load {
        path: job.root.clone(),
        cause: "root template missing from job cache".to_string(),
    })?;
    compose_nodes(root_nodes, &job.root, &mut ctx, job, options)
}

fn compose_nodes(
    nodes: &[Node],
    file: &str,
    ctx: &mut CompositionContext,
    job: &Job,
    options: &CompileOptions,
) -> Result<Vec<Lowered>, Error> {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        out.extend(compose_node(node, file, ctx, job, options)?);
    }
    Ok(out)
}

fn compose_node(
    node: &Node,
    file: &str,
    ctx: &mut CompositionContext,
    job: &Job,
    options: &CompileOptions,
) -> Result<Vec<Lowered>, Error> {
    match node {
        Node::Plain(text) => Ok(vec![Lowered::Plain(text.clone())]),

        Node::Comment { content, .. } => {
            if options.strip_comments {
                Ok(vec![])
            } else {
                Ok(vec![Lowered::Comment(content.clone())])
            }
        }

        Node::Expr { expr, escape, location } => {
            Ok(vec![Lowered::Expr { expr: expr.clone(), escape: *escape, location: *location }])
        }

        Node::Var { name, expr, location } => {
            Ok(vec![Lowered::SetVar { name: name.clone(), expr: expr.clone(), location: *location }])
        }

        Node::Inline { file: target, escape, location } => {
            compose_inline(target, *escape, *location, file, job)
        }

        Node::Block { name, nodes, .. } => {
            let default_body = compose_nodes(nodes, file, ctx, job, options)?;
            let resolved = match ctx.lookup(name) {
                None => default_body,
                Some((DefMode::Replace, stored)) => stored,
                Some((DefMode::Append, stored)) => default_body.into_iter().chain(stored).collect(),
                Some((DefMode::Prepend, stored)) => stored.into_iter().chain(default_body).collect(),
            };
            Ok(vec![Lowered::Scope(resolved)])
        }

        Node::If { whens, otherwise, .. } => {
            let mut arms = Vec::with_capacity(whens.len());
            for when in whens {
                let body = compose_nodes(&when.nodes, file, ctx, job, options)?;
                arms.push(IfArm {
                    expr: when.expr.clone(),
                    body: vec![Lowered::Scope(body)],
                    location: when.location,
                });
            }
            let otherwise_body = match otherwise {
                Some(nodes) => Some(vec![Lowered::Scope(compose_nodes(nodes, file, ctx, job, options)?)]),
                None => None,
            };
            Ok(vec![Lowered::Scope(vec![Lowered::If { arms, otherwise: otherwise_body }])])
        }

        Node::Each { name, expr, nodes, location } => {
            let body = compose_nodes(nodes, file, ctx, job, options)?;
            Ok(vec![Lowered::Each {
                name: name.clone(),
                expr: expr.clone(),
                body,
                location: *location,
            }])
        }

        Node::Include { file: target, children, location } => {
            compose_include(target, children, *location, file, ctx, job, options)
        }
    }
}

fn compose_inline(
    file: &str,
    escape: bool,
    location: SourceLocation,
    current_file: &str,
    job: &Job,
) -> Result<Vec<Lowered>, Error> {
    let _ = location;
    let resolved = path::local_path(current_file, file)?;
    let content = job.raw.get(&resolved).ok_or_else(|| Error::Load {
        path: resolved.clone(),
        cause: "not found in job cache (discovery phase bug)".to_string(),
    })?;
    let text = if escape {
        runtime::escape_html(&Value::String(content.clone()))
    } else {
        content.clone()
    };
    Ok(vec![Lowered::Plain(text)])
}

/// A `<include>`'s Def children are themselves part of the including file's
/// source, so they compose against the *current* (outer) frame stack;
/// only the included file's own body composes with the new frame pushed
/// (spec §4.4: "Process the Include's Def children first ... Then resolve
/// the included file ... under the new context").
fn compose_include(
    file: &str,
    children: &[IncludeChild],
    _location: SourceLocation,
    current_file: &str,
    ctx: &mut CompositionContext,
    job: &Job,
    options: &CompileOptions,
) -> Result<Vec<Lowered>, Error> {
    let _span = tracing::trace_span!("compose_include", from = %current_file, file = %file).entered();

    let mut defs: HashMap<String, (DefMode, Vec<Lowered>)> = HashMap::new();
    let mut pre: Vec<Lowered> = Vec::new();

    for child in children {
        match child {
            IncludeChild::Def(def) => {
                let Def { name, mode, nodes, .. } = def;
                let body = compose_nodes(nodes, current_file, ctx, job, options)?;
                merge_def(&mut defs, name, *mode, body);
            }
            IncludeChild::Var { name, expr, location } => {
                pre.push(Lowered::SetVar { name: name.clone(), expr: expr.clone(), location: *location });
            }
        }
    }

    let resolved = path::local_path(current_file, file)?;
    let included_nodes = job.ast.get(&resolved).ok_or_else(|| Error::Load {
        path: resolved.clone(),
        cause: "not found in job cache (discovery phase bug)".to_string(),
    })?;

    ctx.push(defs);
    let body = compose_nodes(included_nodes, &resolved, ctx, job, options);
    ctx.pop();
    let body = body?;

    Ok(vec![Lowered::Scope(pre.into_iter().chain(body).collect())])
}

/// Merge a new Def body into `defs` using the new definition's own mode
/// (spec §4.4's Def rules / §8 property 6).
fn merge_def(
    defs: &mut HashMap<String, (DefMode, Vec<Lowered>)>,
    name: &str,
    mode: DefMode,
    body: Vec<Lowered>,
) {
    match defs.remove(name) {
        None => {
            defs.insert(name.to_string(), (mode, body));
        }
        Some((_, old)) => {
            let merged = match mode {
                DefMode::Replace => body,
                DefMode::Append => old.into_iter().chain(body).collect(),
                DefMode::Prepend => body.into_iter().chain(old).collect(),
            };
            defs.insert(name.to_string(), (mode, merged));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;
    use std::collections::HashMap as Map;

    fn job_from(files: &[(&str, &str)]) -> Job {
        let mut raw = Map::new();
        let mut ast = Map::new();
        for (path, content) in files {
            raw.insert(path.to_string(), content.to_string());
            ast.insert(path.to_string(), parser::parse(content, path).unwrap());
        }
        Job { raw, ast, root: files[0].0.to_string(), compiled: false }
    }

    fn render_lowered(lowered: &[Lowered]) -> String {
        use crate::runtime::Scope;
        use std::sync::Arc;
        let engine: Arc<dyn crate::expr::ExpressionEngine> = Arc::new(crate::expr::DefaultEngine);
        let mut scope = Scope::root(Map::new());
        let mut out = String::new();
        crate::render::exec(lowered, &mut scope, engine.as_ref(), "test", &mut out).unwrap();
        out
    }

    #[test]
    fn block_without_definition_renders_default() {
        let job = job_from(&[("layout.html", "<body><block:content>default</block:content></body>")]);
        let options = CompileOptions::default();
        let lowered = compose(&job, &options).unwrap();
        assert_eq!(render_lowered(&lowered), "<body>default</body>");
    }

    #[test]
    fn block_replace_discards_default() {
        let job = job_from(&[
            ("page.html", "<include file=\"layout.html\"><def:content>X</def:content></include>"),
            ("layout.html", "<body><block:content>default</block:content></body>"),
        ]);
        let options = CompileOptions::default();
        let lowered = compose(&job, &options).unwrap();
        assert_eq!(render_lowered(&lowered), "<body>X</body>");
    }

    #[test]
    fn nested_layouts_satisfy_inner_block_from_outer_def() {
        let job = job_from(&[
            (
                "page.html",
                "<include file=\"mid.html\"><def:content><p>X</p></def:content></include>",
            ),
            (
                "mid.html",
                "<include file=\"layout.html\"><def:content><section><block:content/></section></def:content></include>",
            ),
            ("layout.html", "<html><body><block:content/></body></html>"),
        ]);
        let options = CompileOptions::default();
        let lowered = compose(&job, &options).unwrap();
        assert_eq!(render_lowered(&lowered), "<html><body><section><p>X</p></section></body></html>");
    }

    #[test]
    fn strip_comments_option_removes_comment_nodes() {
        let job = job_from(&[("index.html", "before<!--hi-->after")]);
        let options = CompileOptions { strip_comments: true };
        let lowered = compose(&job, &options).unwrap();
        assert_eq!(render_lowered(&lowered), "beforeafter");
    }
}
