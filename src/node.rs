//! Node tree (spec §3): the tagged variant produced by the parser (C1) and
//! consumed by the composer/emitter (C4/C5).

use crate::error::SourceLocation;

/// How a `Def` body should be merged with whatever is already stored for its
/// block name (spec §3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefMode {
    Replace,
    Append,
    Prepend,
}

/// One arm of an `If` (spec §3).
#[derive(Debug, Clone)]
pub struct When {
    pub expr: String,
    pub nodes: Vec<Node>,
    pub location: SourceLocation,
}

/// A named replacement/merge body supplied at an `Include` site.
#[derive(Debug, Clone)]
pub struct Def {
    pub name: String,
    pub mode: DefMode,
    pub nodes: Vec<Node>,
    pub location: SourceLocation,
}

/// A child of `<include>...</include>`: either a definition or a `<var:>`
/// (spec §9 open question — relaxed admit set).
#[derive(Debug, Clone)]
pub enum IncludeChild {
    Def(Def),
    Var { name: String, expr: String, location: SourceLocation },
}

/// One parsed node. Exhaustive pattern matching over this enum is the whole
/// of the composition engine (C4) and the render lowering (C5); there is no
/// `UnknownNodeType` arm reachable by construction once parsing succeeds.
#[derive(Debug, Clone)]
pub enum Node {
    /// Literal text, emitted verbatim.
    Plain(String),
    /// XML-comment body (between `<!--` and `-->`), without the delimiters.
    Comment { content: String, location: SourceLocation },
    /// Interpolation: `#{expr}` (escape = true) or `!{expr}` (escape = false).
    Expr { expr: String, escape: bool, location: SourceLocation },
    /// `<var:name>expr</var:name>`: binds `name` in the current scope.
    Var { name: String, expr: String, location: SourceLocation },
    /// Static composition site. `children` carries only Def/Var nodes.
    Include { file: String, children: Vec<IncludeChild>, location: SourceLocation },
    /// Raw file inclusion, optionally HTML-escaped.
    Inline { file: String, escape: bool, location: SourceLocation },
    /// Named placeholder declared by a layout; renders its default body
    /// unless a matching `Def` is found on the context chain.
    Block { name: String, nodes: Vec<Node>, location: SourceLocation },
    /// Compound conditional.
    If { whens: Vec<When>, otherwise: Option<Vec<Node>>, location: SourceLocation },
    /// Iteration over an array or object.
    Each { name: String, expr: String, nodes: Vec<Node>, location: SourceLocation },
}

impl Node {
    pub fn location(&self) -> SourceLocation {
        match self {
            Node::Plain(_) => SourceLocation::default(),
            Node::Comment { location, .. }
            | Node::Expr { location, .. }
            | Node::Var { location, .. }
            | Node::Include { location, .. }
            | Node::Inline { location, .. }
            | Node::Block { location, .. }
            | Node::If { location, .. }
            | Node::Each { location, .. } => *location,
        }
    }
}
