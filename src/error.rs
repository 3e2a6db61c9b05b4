//! Unified error surface for the compiler pipeline (spec §6/§7).

use std::fmt;

/// A 1-based source location, tracked by the parser and carried forward by
/// the composer so render-time errors can point back at the node that
/// caused them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Top-level error type for the whole pipeline: parse, load, resolution,
/// lowering, and render-time failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{path}:{location}: syntax error: {message} (expected one of: {expected:?}, found: {found})")]
    Syntax {
        path: String,
        location: SourceLocation,
        message: String,
        expected: Vec<String>,
        found: String,
    },

    #[error("failed to load {path:?}: {cause}")]
    Load { path: String, cause: String },

    #[error("path {path:?} escapes the logical root")]
    OutOfScope { path: String },

    #[error("internal error: unknown node type {tag:?} (parser/composer disagreement)")]
    UnknownNodeType { tag: String },

    #[error("{path}:{location}: cannot iterate over {type_description} with <each>")]
    NonIterable {
        path: String,
        location: SourceLocation,
        type_description: String,
    },

    #[error("{path}:{location}: error evaluating expression `{expr}`: {cause}")]
    Expression {
        path: String,
        location: SourceLocation,
        expr: String,
        cause: String,
    },

    #[error("a Job may only be compiled once")]
    JobAlreadyCompiled,
}

pub type Result<T> = std::result::Result<T, Error>;
