//! Loader adapter (C3) and the async discovery/preload phase that feeds
//! synchronous composition (spec §5, §6).
//!
//! The loader is an out-of-scope-by-design external capability: callers
//! supply filesystem/network/bundle-backed implementations. What this
//! module owns is the scheduling around it — a non-recursive worklist that
//! statically discovers every `<include>`/`<inline>` file reference reachable
//! from the entry template (valid because dynamic include paths are a
//! non-goal, spec §1) and loads each distinct normalized path through the
//! loader **at most once** (spec §8 property 2).

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::future::join_all;

use crate::error::Error;
use crate::node::{IncludeChild, Node};
use crate::parser;
use crate::path;

/// External file-content source (spec §6). Paths are logical, root-relative,
/// already-normalized paths as produced by `path::local_path`.
#[async_trait]
pub trait Loader: Send + Sync {
    async fn load(&self, path: &str) -> Result<String, LoaderError>;
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct LoaderError(pub String);

/// Everything discovered and parsed for one `compile()` call: raw file
/// contents (every distinct path the loader returned) plus parsed ASTs for
/// every path that is used as an `<include>` target anywhere in the tree.
pub struct Job {
    pub raw: HashMap<String, String>,
    pub ast: HashMap<String, Vec<Node>>,
    pub root: String,
    pub(crate) compiled: bool,
}

impl Job {
    /// Consumed by composition; a `Job` is single-use because composition
    /// mutates nothing in it but the API contract (spec §6) is one `Job` per
    /// `compile()` call — calling it twice is a programming error.
    pub fn mark_compiled(&mut self) -> Result<(), Error> {
        if self.compiled {
            return Err(Error::JobAlreadyCompiled);
        }
        self.compiled = true;
        Ok(())
    }
}

/// Run the discovery/preload phase starting at `root` and return a `Job`
/// ready for synchronous composition.
///
/// Round-based breadth-first walk: each round loads (concurrently, via
/// `join_all`) every not-yet-loaded path named by the previous round's
/// parsed nodes, then scans the newly parsed nodes for further references.
/// `loaded` gates every `loader.load()` call so a path used as both an
/// `<include>` and an `<inline>` target is still fetched once.
pub async fn discover(loader: &dyn Loader, root: &str) -> Result<Job, Error> {
    let root = path::normalize(root);

    let mut raw: HashMap<String, String> = HashMap::new();
    let mut ast: HashMap<String, Vec<Node>> = HashMap::new();
    let mut loaded: HashSet<String> = HashSet::new();
    let mut need_ast: HashSet<String> = HashSet::new();

    let mut pending_load: Vec<String> = vec![root.clone()];
    need_ast.insert(root.clone());

    while !pending_load.is_empty() {
        let batch: Vec<String> = pending_load
            .drain(..)
            .filter(|p| loaded.insert(p.clone()))
            .collect();

        if batch.is_empty() {
            continue;
        }

        let fetches = batch.iter().map(|p| async move {
            let content = loader.load(p).await;
            (p.clone(), content)
        });
        let results = join_all(fetches).await;

        let mut next_load: Vec<String> = Vec::new();

        for (p, content) in results {
            let content = content.map_err(|e| Error::Load { path: p.clone(), cause: e.0 })?;
            tracing::debug!(path = %p, bytes = content.len(), "loaded template");
            raw.insert(p.clone(), content.clone());

            if need_ast.contains(&p) {
                let nodes = parser::parse(&content, &p)?;
                for referenced in discover_refs(&nodes, &p, &mut need_ast)? {
                    if !loaded.contains(&referenced) {
                        next_load.push(referenced);
                    }
                }
                ast.insert(p, nodes);
            }
        }

        pending_load = next_load;
    }

    // A path first seen only as an `<inline>` target can later turn out to
    // also be an `<include>` target discovered via a different route; its
    // raw content is already cached, so no further loader call is needed —
    // just parse it. Parsing it can in turn add further entries to
    // `need_ast` (possibly for paths whose raw content was *also* already
    // fetched earlier), so this keeps going until a full pass over the
    // current `need_ast` snapshot adds nothing new, not just once.
    loop {
        let pending: Vec<String> = need_ast
            .iter()
            .filter(|p| !ast.contains_key(*p))
            .cloned()
            .collect();
        if pending.is_empty() {
            break;
        }

        for p in pending {
            if ast.contains_key(&p) {
                continue;
            }
            let content = match raw.get(&p).cloned() {
                Some(content) => content,
                None => {
                    loaded.insert(p.clone());
                    let content = loader
                        .load(&p)
                        .await
                        .map_err(|e| Error::Load { path: p.clone(), cause: e.0 })?;
                    raw.insert(p.clone(), content.clone());
                    content
                }
            };
            let nodes = parser::parse(&content, &p)?;
            for referenced in discover_refs(&nodes, &p, &mut need_ast)? {
                if loaded.insert(referenced.clone()) {
                    let content = loader
                        .load(&referenced)
                        .await
                        .map_err(|e| Error::Load { path: referenced.clone(), cause: e.0 })?;
                    raw.insert(referenced.clone(), content);
                }
            }
            ast.insert(p, nodes);
        }
    }

    Ok(Job { raw, ast, root, compiled: false })
}

/// Walk `nodes` (the direct children of file `owner`) and collect every
/// referenced logical path, recording in `need_ast` which ones must be
/// parsed (every `<include>` target; `<inline>` targets are raw-only and
/// never added). Does not recurse into already-discovered include targets'
/// own bodies — that happens naturally in the next round once that file's
/// AST exists.
fn discover_refs(
    nodes: &[Node],
    owner: &str,
    need_ast: &mut HashSet<String>,
) -> Result<Vec<String>, Error> {
    let mut out = Vec::new();
    walk(nodes, owner, need_ast, &mut out)?;
    Ok(out)
}

fn walk(
    nodes: &[Node],
    owner: &str,
    need_ast: &mut HashSet<String>,
    out: &mut Vec<String>,
) -> Result<(), Error> {
    for node in nodes {
        match node {
            Node::Include { file, children, .. } => {
                record_ref(file, owner, need_ast, out, true)?;
                for child in children {
                    if let IncludeChild::Def(def) = child {
                        walk(&def.nodes, owner, need_ast, out)?;
                    }
                }
            }
            Node::Inline { file, .. } => {
                record_ref(file, owner, need_ast, out, false)?;
            }
            Node::Block { nodes, .. } => walk(nodes, owner, need_ast, out)?,
            Node::If { whens, otherwise, .. } => {
                for when in whens {
                    walk(&when.nodes, owner, need_ast, out)?;
                }
                if let Some(nodes) = otherwise {
                    walk(nodes, owner, need_ast, out)?;
                }
            }
            Node::Each { nodes, .. } => walk(nodes, owner, need_ast, out)?,
            Node::Plain(_) | Node::Comment { .. } | Node::Expr { .. } | Node::Var { .. } => {}
        }
    }
    Ok(())
}

fn record_ref(
    file: &str,
    owner: &str,
    need_ast: &mut HashSet<String>,
    out: &mut Vec<String>,
    needs_ast: bool,
) -> Result<(), Error> {
    let resolved = path::local_path(owner, file)?;
    if needs_ast {
        need_ast.insert(resolved.clone());
    }
    out.push(resolved);
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::test_support::MapLoader;
    use super::*;

    #[tokio::test]
    async fn discovers_nested_includes_and_loads_each_path_once() {
        let loader = MapLoader::new([
            ("index.html", "<include file=\"layout.html\"></include>"),
            (
                "layout.html",
                "<block:body>fallback</block:body><include file=\"footer.html\"/>",
            ),
            ("footer.html", "footer"),
        ]);

        let job = discover(&loader, "index.html").await.unwrap();

        assert_eq!(job.raw.len(), 3);
        assert!(job.ast.contains_key("index.html"));
        assert!(job.ast.contains_key("layout.html"));
        assert!(job.ast.contains_key("footer.html"));
        assert_eq!(loader.call_count("layout.html"), 1);
        assert_eq!(loader.call_count("footer.html"), 1);
    }

    #[tokio::test]
    async fn inline_target_is_raw_only_and_not_parsed() {
        let loader = MapLoader::new([
            ("index.html", "<inline file=\"raw.txt\"/>"),
            ("raw.txt", "<div>not a template</div>"),
        ]);

        let job = discover(&loader, "index.html").await.unwrap();
        assert!(job.raw.contains_key("raw.txt"));
        assert!(!job.ast.contains_key("raw.txt"));
    }

    #[tokio::test]
    async fn path_used_as_both_include_and_inline_loads_once() {
        let loader = MapLoader::new([
            (
                "index.html",
                "<include file=\"shared.html\"></include><inline file=\"shared.html\"/>",
            ),
            ("shared.html", "shared content"),
        ]);

        let job = discover(&loader, "index.html").await.unwrap();
        assert_eq!(loader.call_count("shared.html"), 1);
        assert!(job.ast.contains_key("shared.html"));
        assert!(job.raw.contains_key("shared.html"));
    }

    #[tokio::test]
    async fn out_of_scope_reference_is_rejected() {
        let loader = MapLoader::new([("index.html", "<include file=\"../../secret.html\"/>")]);
        let err = discover(&loader, "index.html").await.unwrap_err();
        assert!(matches!(err, Error::OutOfScope { .. }));
    }
}
