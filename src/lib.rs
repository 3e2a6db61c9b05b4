//! ZenMill: a template engine for composing XML-ish documents (HTML, SVG)
//! via a static include/block/def composition pipeline.
//!
//! The compiler pipeline is the core: a grammar/parser (`parser`), a path
//! resolver (`path`), a loader adapter (`loader`), a static composition
//! engine (`compose`), a renderer emitter (`render`), and runtime
//! primitives (`runtime`). The loader and expression evaluator are external
//! capabilities defined by traits (`Loader`, `expr::ExpressionEngine`); this
//! crate ships a default expression evaluator but callers may supply their
//! own.

pub mod compose;
pub mod error;
pub mod expr;
pub mod loader;
pub mod node;
pub mod parser;
pub mod path;
pub mod render;
pub mod runtime;
pub mod value;

use std::sync::Arc;

pub use error::{Error, Result, SourceLocation};
pub use expr::{DefaultEngine, ExpressionEngine, ExpressionError};
pub use loader::{Job, Loader, LoaderError};
pub use render::Renderer;
pub use runtime::Scope;

/// Recognized options (spec §6): only `strip_comments` today. Unknown keys
/// arriving over an untyped boundary (e.g. FFI) should be ignored rather
/// than rejected, matching spec §6's "Unknown keys are ignored" — there's
/// simply nowhere for them to land on this typed struct.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    pub strip_comments: bool,
}

/// Entry point (spec §6). Owns the loader capability, compile options, and
/// the expression evaluator used by every `Renderer` it produces.
pub struct Compiler {
    loader: Arc<dyn Loader>,
    options: CompileOptions,
    expr: Arc<dyn ExpressionEngine>,
}

impl Compiler {
    pub fn new(loader: Arc<dyn Loader>, options: CompileOptions) -> Self {
        Compiler { loader, options, expr: Arc::new(DefaultEngine) }
    }

    /// Replace the default minimal expression evaluator with a caller's own
    /// (spec §1, §9: the expression sub-language is out of scope by design).
    pub fn with_expression_engine(mut self, engine: Arc<dyn ExpressionEngine>) -> Self {
        self.expr = engine;
        self
    }

    /// Load, parse, and compose `path` and everything it transitively
    /// references, producing a reusable `Renderer`. A fresh `Job` backs
    /// every call; Jobs are never reused (spec §5 "Reuse: a Job is
    /// single-shot").
    pub async fn compile(&self, path: &str) -> Result<Renderer> {
        let _span = tracing::info_span!("compile_job", path = %path).entered();
        let mut job = loader::discover(self.loader.as_ref(), path).await?;
        job.mark_compiled()?;
        let lowered = compose::compose(&job, &self.options)?;
        tracing::debug!(templates = job.ast.len(), "composed renderer");
        Ok(Renderer::new(lowered, Arc::clone(&self.expr), job.root.clone()))
    }

    /// Convenience for `compile(path).then(|r| r.render(data))` (spec §6).
    pub async fn render(&self, path: &str, data: serde_json::Value) -> Result<String> {
        let renderer = self.compile(path).await?;
        renderer.render(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::test_support::MapLoader;
    use serde_json::json;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn compiler(files: &[(&'static str, &'static str)]) -> Compiler {
        init_tracing();
        Compiler::new(Arc::new(MapLoader::new(files.iter().copied())), CompileOptions::default())
    }

    #[tokio::test]
    async fn s1_simple_include() {
        let c = compiler(&[
            ("index.html", "<body><include file='header.html'/>H</body>"),
            ("header.html", "<h>W</h>"),
        ]);
        let out = c.render("index.html", json!({})).await.unwrap();
        assert_eq!(out, "<body><h>W</h>H</body>");
    }

    #[tokio::test]
    async fn s2_block_redefinition() {
        let c = compiler(&[
            ("layout.html", "<html><body><block:content/></body></html>"),
            (
                "page.html",
                "<include file='layout.html'><def:content><h1>Hi</h1></def:content></include>",
            ),
        ]);
        let out = c.render("page.html", json!({})).await.unwrap();
        assert_eq!(out, "<html><body><h1>Hi</h1></body></html>");
    }

    #[tokio::test]
    async fn s3_nested_layouts() {
        let c = compiler(&[
            ("layout.html", "<html><body><block:content/></body></html>"),
            (
                "mid.html",
                "<include file='layout.html'><def:content><section><block:content/></section></def:content></include>",
            ),
            (
                "page.html",
                "<include file='mid.html'><def:content><p>X</p></def:content></include>",
            ),
        ]);
        let out = c.render("page.html", json!({})).await.unwrap();
        assert_eq!(out, "<html><body><section><p>X</p></section></body></html>");
    }

    #[tokio::test]
    async fn s4_if_when_otherwise() {
        let c = compiler(&[(
            "index.html",
            "<if><when expr=\"friends==1\"><p>one</p></when><when expr=\"friends>1 && friends<5\"><p>few</p></when><otherwise><p>#{friends}</p></otherwise></if>",
        )]);
        assert_eq!(c.render("index.html", json!({"friends": 2})).await.unwrap(), "<p>few</p>");
        assert_eq!(
            c.render("index.html", json!({"friends": 100500})).await.unwrap(),
            "<p>100500</p>"
        );
    }

    #[tokio::test]
    async fn s5_each_over_array() {
        let c = compiler(&[(
            "index.html",
            "<ul><each:user in=\"users\"><li>#{user_index}: #{user.name}</li></each:user></ul>",
        )]);
        let out = c
            .render("index.html", json!({"users": [{"name": "Alice"}, {"name": "Joe"}]}))
            .await
            .unwrap();
        assert_eq!(out, "<ul><li>0: Alice</li><li>1: Joe</li></ul>");
    }

    #[tokio::test]
    async fn s6_each_over_object_sorted_keys() {
        let c = compiler(&[(
            "index.html",
            "<ul><each:user in=\"users\"><li>#{user_key}: #{user}</li></each:user></ul>",
        )]);
        let out = c
            .render("index.html", json!({"users": {"bob": "Bob", "alice": "Alice"}}))
            .await
            .unwrap();
        assert_eq!(out, "<ul><li>alice: Alice</li><li>bob: Bob</li></ul>");
    }

    #[tokio::test]
    async fn s7_escaping() {
        let c = compiler(&[("index.html", "<p>#{s}</p>!{s}")]);
        let out = c.render("index.html", json!({"s": "<&>"})).await.unwrap();
        assert_eq!(out, "<p>&lt;&amp;&gt;</p><&>");
    }

    #[tokio::test]
    async fn s8_strip_comments_option() {
        init_tracing();
        let loader: Arc<dyn Loader> = Arc::new(MapLoader::new([("index.html", "before<!--hi-->after")]));
        let default = Compiler::new(Arc::clone(&loader), CompileOptions::default());
        assert_eq!(default.render("index.html", json!({})).await.unwrap(), "before<!--hi-->after");

        let stripping = Compiler::new(loader, CompileOptions { strip_comments: true });
        assert_eq!(stripping.render("index.html", json!({})).await.unwrap(), "beforeafter");
    }

    #[tokio::test]
    async fn caching_coherence_loader_invoked_at_most_once_per_path() {
        init_tracing();
        let loader = Arc::new(MapLoader::new([
            (
                "index.html",
                "<include file='shared.html'></include><include file='shared.html'></include>",
            ),
            ("shared.html", "S"),
        ]));
        let c = Compiler::new(Arc::clone(&loader) as Arc<dyn Loader>, CompileOptions::default());
        let out = c.render("index.html", json!({})).await.unwrap();
        assert_eq!(out, "SS");
        assert_eq!(loader.call_count("shared.html"), 1);
    }

    #[tokio::test]
    async fn determinism_same_inputs_yield_identical_output() {
        let c = compiler(&[("index.html", "<p>#{s}</p>")]);
        let a = c.render("index.html", json!({"s": "x"})).await.unwrap();
        let b = c.render("index.html", json!({"s": "x"})).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn scope_isolation_var_does_not_leak_past_include() {
        let c = compiler(&[
            ("index.html", "<include file='inc.html'></include>#{leak}"),
            ("inc.html", "<var:leak>'inside'</var:leak>#{leak}"),
        ]);
        let out = c.render("index.html", json!({})).await.unwrap();
        assert_eq!(out, "insidenull");
    }

    #[tokio::test]
    async fn unknown_block_renders_default_and_unused_def_is_not_an_error() {
        let c = compiler(&[
            ("layout.html", "<block:content>default</block:content>"),
            (
                "page.html",
                "<include file='layout.html'><def:other>unused</def:other></include>",
            ),
        ]);
        let out = c.render("page.html", json!({})).await.unwrap();
        assert_eq!(out, "default");
    }
}
