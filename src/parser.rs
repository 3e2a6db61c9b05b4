//! Grammar / Parser (C1): converts a template string into a flat list of
//! [`Node`]s (spec §4.1). Hand-rolled recursive descent over a `Vec<char>`
//! with explicit line/column tracking, so a malformed template produces a
//! `SyntaxError` pointing at the exact source position.

use crate::error::{Error, SourceLocation};
use crate::node::{Def, DefMode, IncludeChild, Node, When};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Include,
    Inline,
    Block,
    Def,
    Append,
    Prepend,
    If,
    When,
    Otherwise,
    Each,
    Var,
}

impl Kind {
    fn tag_str(self) -> &'static str {
        match self {
            Kind::Include => "include",
            Kind::Inline => "inline",
            Kind::Block => "block",
            Kind::Def => "def",
            Kind::Append => "append",
            Kind::Prepend => "prepend",
            Kind::If => "if",
            Kind::When => "when",
            Kind::Otherwise => "otherwise",
            Kind::Each => "each",
            Kind::Var => "var",
        }
    }
}

/// A closing tag the current block is waiting for.
struct Close {
    tag: &'static str,
    name: Option<String>,
}

impl Close {
    fn tag(tag: &'static str) -> Self {
        Close { tag, name: None }
    }

    fn tag_name(tag: &'static str, name: &str) -> Self {
        Close {
            tag,
            name: Some(name.to_string()),
        }
    }

    fn literal(&self) -> String {
        match &self.name {
            Some(n) => format!("</{}:{}>", self.tag, n),
            None => format!("</{}>", self.tag),
        }
    }
}

/// Parse `source` (the content of the template at `path`) into a flat node
/// list. `path` is used only to annotate error messages.
pub fn parse(source: &str, path: &str) -> Result<Vec<Node>, Error> {
    let _span = tracing::trace_span!("parse_template", path = %path, bytes = source.len()).entered();
    let mut p = Scanner {
        chars: source.chars().collect(),
        pos: 0,
        line: 1,
        col: 1,
        path: path.to_string(),
    };
    p.parse_nodes(None)
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    path: String,
}

impl Scanner {
    // ── low-level cursor primitives ────────────────────────────────────

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = *self.chars.get(self.pos)?;
        self.pos += 1;
        if c == '\r' {
            if self.chars.get(self.pos) == Some(&'\n') {
                self.pos += 1;
            }
            self.line += 1;
            self.col = 1;
        } else if c == '\n' || c == '\u{2028}' || c == '\u{2029}' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn advance_n(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    fn record_location(&self) -> SourceLocation {
        SourceLocation {
            line: self.line,
            column: self.col,
        }
    }

    fn chars_eq_at(&self, at: usize, s: &str) -> bool {
        let mut i = at;
        for expected in s.chars() {
            match self.chars.get(i) {
                Some(&c) if c == expected => i += 1,
                _ => return false,
            }
        }
        true
    }

    fn starts_with(&self, s: &str) -> bool {
        self.chars_eq_at(self.pos, s)
    }

    fn expect_literal(&mut self, s: &str) -> Result<(), Error> {
        if self.chars_eq_at(self.pos, s) {
            self.advance_n(s.chars().count());
            Ok(())
        } else {
            Err(self.err_here(format!("expected {:?}", s), &[s]))
        }
    }

    fn eat_literal(&mut self, s: &str) -> bool {
        if self.chars_eq_at(self.pos, s) {
            self.advance_n(s.chars().count());
            true
        } else {
            false
        }
    }

    fn expect_char(&mut self, c: char) -> Result<(), Error> {
        if self.peek() == Some(c) {
            self.advance();
            Ok(())
        } else {
            let cs = c.to_string();
            Err(self.err_here(format!("expected '{}'", c), &[cs.as_str()]))
        }
    }

    fn is_ws(c: char) -> bool {
        matches!(c, ' ' | '\t' | '\r' | '\n')
    }

    fn skip_ws0(&mut self) {
        while matches!(self.peek(), Some(c) if Self::is_ws(c)) {
            self.advance();
        }
    }

    // ── error construction ─────────────────────────────────────────────

    fn describe_found(&self) -> String {
        match self.peek() {
            Some(_) => self.chars[self.pos..].iter().take(12).collect(),
            None => "<eof>".to_string(),
        }
    }

    fn err_here(&self, message: impl Into<String>, expected: &[&str]) -> Error {
        Error::Syntax {
            path: self.path.clone(),
            location: self.record_location(),
            message: message.into(),
            expected: expected.iter().map(|s| s.to_string()).collect(),
            found: self.describe_found(),
        }
    }

    fn err_eof(&self, expected_desc: &str) -> Error {
        self.err_here(
            format!("unexpected end of input, expected {}", expected_desc),
            &[expected_desc],
        )
    }

    // ── keyword lookahead ───────────────────────────────────────────────

    fn is_sep(&self, at: usize) -> bool {
        matches!(self.chars.get(at), Some(&c) if matches!(c, ' '|'\t'|'\r'|'\n'|'/'|'>'))
    }

    fn match_name_len(&self, at: usize) -> Option<usize> {
        match self.chars.get(at) {
            Some(&c) if c.is_ascii_lowercase() => {}
            _ => return None,
        }
        let mut len = 1;
        while let Some(&c) = self.chars.get(at + len) {
            if c.is_ascii_alphanumeric() || c == '_' {
                len += 1;
            } else {
                break;
            }
        }
        Some(len)
    }

    fn match_keyword_at(&self, at: usize) -> Option<(Kind, Option<String>)> {
        const BARE: &[(&str, Kind)] = &[
            ("include", Kind::Include),
            ("inline", Kind::Inline),
            ("otherwise", Kind::Otherwise),
            ("when", Kind::When),
            ("if", Kind::If),
        ];
        for (word, kind) in BARE {
            if self.chars_eq_at(at, word) {
                let after = at + word.chars().count();
                if self.is_sep(after) {
                    return Some((*kind, None));
                }
            }
        }

        const NAMED: &[(&str, Kind)] = &[
            ("block:", Kind::Block),
            ("def:", Kind::Def),
            ("append:", Kind::Append),
            ("prepend:", Kind::Prepend),
            ("each:", Kind::Each),
            ("var:", Kind::Var),
        ];
        for (word, kind) in NAMED {
            if self.chars_eq_at(at, word) {
                let name_start = at + word.chars().count();
                if let Some(name_len) = self.match_name_len(name_start) {
                    let after = name_start + name_len;
                    if self.is_sep(after) {
                        let name: String = self.chars[name_start..name_start + name_len]
                            .iter()
                            .collect();
                        return Some((*kind, Some(name)));
                    }
                }
            }
        }
        None
    }

    fn peek_opening_keyword(&self) -> Option<Kind> {
        if self.peek() != Some('<') {
            return None;
        }
        self.match_keyword_at(self.pos + 1).map(|(k, _)| k)
    }

    fn peek_closing_keyword(&self) -> Option<(Kind, Option<String>)> {
        if !(self.peek() == Some('<') && self.peek_at(1) == Some('/')) {
            return None;
        }
        self.match_keyword_at(self.pos + 2)
    }

    fn closes(&self, kind: Kind, name: &Option<String>, close: &Close) -> bool {
        kind.tag_str() == close.tag && name.as_deref() == close.name.as_deref()
    }

    fn consume_closing_tag(&mut self, close: &Close) -> Result<(), Error> {
        self.expect_literal(&close.literal())
    }

    // ── names, attribute values, balanced expressions ───────────────────

    fn parse_bare_name(&mut self) -> Result<String, Error> {
        let mut name = String::new();
        match self.peek() {
            Some(c) if c.is_ascii_lowercase() => name.push(self.advance().unwrap()),
            _ => return Err(self.err_here("expected a lowercase-initial name", &["name"])),
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(self.advance().unwrap());
            } else {
                break;
            }
        }
        Ok(name)
    }

    fn parse_attr_val(&mut self) -> Result<String, Error> {
        let quote = match self.peek() {
            Some(c @ ('\'' | '"')) => c,
            _ => return Err(self.err_here("expected attribute value", &["'", "\""])),
        };
        self.advance();
        let mut buf = String::new();
        loop {
            match self.peek() {
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some(_) => buf.push(self.advance().unwrap()),
                None => return Err(self.err_eof("closing quote")),
            }
        }
        Ok(buf)
    }

    /// Scan a run of balanced-brace, string-aware expression text, stopping
    /// (without consuming) at the first top-level character satisfying
    /// `stop`.
    fn scan_expr_chars(&mut self, stop_at_top_level: impl Fn(char) -> bool) -> Result<String, Error> {
        let mut buf = String::new();
        let mut depth = 0i32;
        loop {
            match self.peek() {
                None => return Err(self.err_eof("end of expression")),
                Some(c) if depth == 0 && stop_at_top_level(c) => break,
                Some('{') => {
                    depth += 1;
                    buf.push(self.advance().unwrap());
                }
                Some('}') => {
                    if depth == 0 {
                        return Err(self.err_here("unbalanced '}' in expression", &[]));
                    }
                    depth -= 1;
                    buf.push(self.advance().unwrap());
                }
                Some(q @ ('"' | '\'')) => {
                    buf.push(self.advance().unwrap());
                    loop {
                        match self.peek() {
                            None => return Err(self.err_eof("closing quote in expression")),
                            Some(c) if c == q => {
                                buf.push(self.advance().unwrap());
                                break;
                            }
                            Some(_) => buf.push(self.advance().unwrap()),
                        }
                    }
                }
                Some(_) => buf.push(self.advance().unwrap()),
            }
        }
        Ok(buf)
    }

    // ── node-sequence parsing ───────────────────────────────────────────

    fn parse_nodes(&mut self, terminator: Option<&Close>) -> Result<Vec<Node>, Error> {
        let mut nodes = Vec::new();
        loop {
            if self.pos >= self.chars.len() {
                return match terminator {
                    Some(close) => Err(self.err_eof(&close.literal())),
                    None => Ok(nodes),
                };
            }

            if self.peek() == Some('<') {
                if self.starts_with("<!--") {
                    nodes.push(self.parse_comment()?);
                    continue;
                }
                if self.peek_at(1) == Some('/') {
                    if let Some((kind, name)) = self.peek_closing_keyword() {
                        return match terminator {
                            Some(close) if self.closes(kind, &name, close) => {
                                self.consume_closing_tag(close)?;
                                Ok(nodes)
                            }
                            Some(close) => Err(self.err_here(
                                format!(
                                    "expected closing tag {}, found </{}{}>",
                                    close.literal(),
                                    kind.tag_str(),
                                    name.map(|n| format!(":{}", n)).unwrap_or_default()
                                ),
                                &[],
                            )),
                            None => Err(self.err_here(
                                format!(
                                    "unexpected closing tag </{}{}> with no matching open tag",
                                    kind.tag_str(),
                                    name.map(|n| format!(":{}", n)).unwrap_or_default()
                                ),
                                &[],
                            )),
                        };
                    }
                } else if let Some(kind) = self.peek_opening_keyword() {
                    nodes.push(self.parse_construct(kind)?);
                    continue;
                }
            } else if matches!(self.peek(), Some('#') | Some('!') | Some('$'))
                && self.peek_at(1) == Some('{')
            {
                nodes.push(self.parse_interpolation()?);
                continue;
            }

            nodes.push(self.parse_plain(terminator)?);
        }
    }

    fn parse_plain(&mut self, terminator: Option<&Close>) -> Result<Node, Error> {
        let _ = terminator;
        let mut buf = String::new();
        loop {
            match self.peek() {
                None => break,
                Some('<') => {
                    if self.starts_with("<!--") {
                        break;
                    }
                    if self.peek_at(1) == Some('/') {
                        if self.peek_closing_keyword().is_some() {
                            break;
                        }
                    } else if self.peek_opening_keyword().is_some() {
                        break;
                    }
                    buf.push(self.advance().unwrap());
                }
                Some(c) if matches!(c, '#' | '!' | '$') && self.peek_at(1) == Some('{') => break,
                Some(_) => buf.push(self.advance().unwrap()),
            }
        }
        Ok(Node::Plain(buf))
    }

    fn parse_construct(&mut self, kind: Kind) -> Result<Node, Error> {
        match kind {
            Kind::Include => self.parse_include(),
            Kind::Inline => self.parse_inline(),
            Kind::Block => self.parse_block(),
            Kind::If => self.parse_if(),
            Kind::Each => self.parse_each(),
            Kind::Var => {
                let (name, expr, location) = self.parse_var_raw()?;
                Ok(Node::Var { name, expr, location })
            }
            Kind::Def | Kind::Append | Kind::Prepend => Err(self.err_here(
                "<def:>/<append:>/<prepend:> may only appear inside <include>...</include>",
                &[],
            )),
            Kind::When | Kind::Otherwise => Err(self.err_here(
                "<when>/<otherwise> may only appear inside <if>...</if>",
                &[],
            )),
        }
    }

    // ── individual constructs ───────────────────────────────────────────

    fn parse_comment(&mut self) -> Result<Node, Error> {
        let location = self.record_location();
        self.expect_literal("<!--")?;
        let mut content = String::new();
        loop {
            if self.starts_with("-->") {
                self.advance_n(3);
                break;
            }
            match self.advance() {
                Some(c) => content.push(c),
                None => return Err(self.err_eof("-->")),
            }
        }
        Ok(Node::Comment { content, location })
    }

    fn parse_interpolation(&mut self) -> Result<Node, Error> {
        let location = self.record_location();
        let escape = match self.peek() {
            Some('#') | Some('$') => true,
            Some('!') => false,
            _ => unreachable!("parse_interpolation called without a sigil"),
        };
        self.advance(); // sigil
        self.advance(); // '{'
        let expr = self.scan_expr_chars(|c| c == '}')?;
        self.expect_char('}')?;
        Ok(Node::Expr { expr, escape, location })
    }

    fn parse_include(&mut self) -> Result<Node, Error> {
        let location = self.record_location();
        self.expect_literal("<include")?;
        self.skip_ws0();
        self.expect_literal("file")?;
        self.skip_ws0();
        self.expect_char('=')?;
        self.skip_ws0();
        let file = self.parse_attr_val()?;
        self.skip_ws0();
        if self.eat_literal("/>") {
            return Ok(Node::Include { file, children: vec![], location });
        }
        self.expect_char('>')?;
        let children = self.parse_include_children()?;
        self.expect_literal("</include>")?;
        Ok(Node::Include { file, children, location })
    }

    fn parse_include_children(&mut self) -> Result<Vec<IncludeChild>, Error> {
        let mut children = Vec::new();
        loop {
            self.skip_ws0();
            if self.starts_with("</include>") {
                return Ok(children);
            }
            if self.pos >= self.chars.len() {
                return Err(self.err_eof("</include>"));
            }
            match self.peek_opening_keyword() {
                Some(Kind::Def) | Some(Kind::Append) | Some(Kind::Prepend) => {
                    children.push(IncludeChild::Def(self.parse_def()?));
                }
                Some(Kind::Var) => {
                    let (name, expr, location) = self.parse_var_raw()?;
                    children.push(IncludeChild::Var { name, expr, location });
                }
                _ => {
                    return Err(self.err_here(
                        "expected <def:>, <append:>, <prepend:>, <var:>, or </include>",
                        &["def", "append", "prepend", "var", "/include"],
                    ))
                }
            }
        }
    }

    fn parse_def(&mut self) -> Result<Def, Error> {
        let location = self.record_location();
        let (prefix, tag, mode) = if self.starts_with("<def:") {
            ("<def:", "def", DefMode::Replace)
        } else if self.starts_with("<append:") {
            ("<append:", "append", DefMode::Append)
        } else if self.starts_with("<prepend:") {
            ("<prepend:", "prepend", DefMode::Prepend)
        } else {
            return Err(self.err_here(
                "expected <def:>, <append:>, or <prepend:>",
                &["def", "append", "prepend"],
            ));
        };
        self.expect_literal(prefix)?;
        let name = self.parse_bare_name()?;
        self.skip_ws0();
        self.expect_char('>')?;
        let close = Close::tag_name(tag, &name);
        let nodes = self.parse_nodes(Some(&close))?;
        Ok(Def { name, mode, nodes, location })
    }

    fn parse_var_raw(&mut self) -> Result<(String, String, SourceLocation), Error> {
        let location = self.record_location();
        self.expect_literal("<var:")?;
        let name = self.parse_bare_name()?;
        self.skip_ws0();
        self.expect_char('>')?;
        let expr = self.scan_expr_chars(|c| c == '<')?;
        self.expect_literal(&format!("</var:{}>", name))?;
        Ok((name, expr, location))
    }

    fn parse_inline(&mut self) -> Result<Node, Error> {
        let location = self.record_location();
        self.expect_literal("<inline")?;
        self.skip_ws0();
        self.expect_literal("file")?;
        self.skip_ws0();
        self.expect_char('=')?;
        self.skip_ws0();
        let raw = self.parse_attr_val()?;
        self.skip_ws0();
        self.expect_literal("/>")?;
        let (escape, file) = match raw.strip_prefix('!') {
            Some(rest) => (false, rest.to_string()),
            None => (true, raw),
        };
        Ok(Node::Inline { file, escape, location })
    }

    fn parse_block(&mut self) -> Result<Node, Error> {
        let location = self.record_location();
        self.expect_literal("<block:")?;
        let name = self.parse_bare_name()?;
        self.skip_ws0();
        if self.eat_literal("/>") {
            return Ok(Node::Block { name, nodes: vec![], location });
        }
        self.expect_char('>')?;
        let close = Close::tag_name("block", &name);
        let nodes = self.parse_nodes(Some(&close))?;
        Ok(Node::Block { name, nodes, location })
    }

    fn parse_each(&mut self) -> Result<Node, Error> {
        let location = self.record_location();
        self.expect_literal("<each:")?;
        let name = self.parse_bare_name()?;
        self.skip_ws0();
        self.expect_literal("in")?;
        self.skip_ws0();
        self.expect_char('=')?;
        self.skip_ws0();
        let expr = self.parse_attr_val()?;
        self.skip_ws0();
        self.expect_char('>')?;
        let close = Close::tag_name("each", &name);
        let nodes = self.parse_nodes(Some(&close))?;
        Ok(Node::Each { name, expr, nodes, location })
    }

    fn parse_if(&mut self) -> Result<Node, Error> {
        let location = self.record_location();
        self.expect_literal("<if")?;
        self.skip_ws0();
        if self.eat_literal(">") {
            return self.parse_if_compound(location);
        }
        self.expect_literal("expr")?;
        self.skip_ws0();
        self.expect_char('=')?;
        self.skip_ws0();
        let expr = self.parse_attr_val()?;
        self.skip_ws0();
        self.expect_char('>')?;
        let close = Close::tag("if");
        let nodes = self.parse_nodes(Some(&close))?;
        Ok(Node::If {
            whens: vec![When { expr, nodes, location }],
            otherwise: None,
            location,
        })
    }

    fn parse_if_compound(&mut self, location: SourceLocation) -> Result<Node, Error> {
        self.skip_ws0();
        let mut whens = Vec::new();
        while self.starts_with("<when") {
            whens.push(self.parse_when()?);
            self.skip_ws0();
        }
        if whens.is_empty() {
            return Err(self.err_here("expected at least one <when> inside <if>", &["when"]));
        }
        let otherwise = if self.starts_with("<otherwise") {
            let nodes = self.parse_otherwise()?;
            self.skip_ws0();
            Some(nodes)
        } else {
            None
        };
        self.expect_literal("</if>")?;
        Ok(Node::If { whens, otherwise, location })
    }

    fn parse_when(&mut self) -> Result<When, Error> {
        let location = self.record_location();
        self.expect_literal("<when")?;
        self.skip_ws0();
        self.expect_literal("expr")?;
        self.skip_ws0();
        self.expect_char('=')?;
        self.skip_ws0();
        let expr = self.parse_attr_val()?;
        self.skip_ws0();
        self.expect_char('>')?;
        let close = Close::tag("when");
        let nodes = self.parse_nodes(Some(&close))?;
        Ok(When { expr, nodes, location })
    }

    fn parse_otherwise(&mut self) -> Result<Vec<Node>, Error> {
        self.expect_literal("<otherwise")?;
        self.skip_ws0();
        self.expect_char('>')?;
        let close = Close::tag("otherwise");
        self.parse_nodes(Some(&close))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(nodes: &[Node], i: usize) -> &str {
        match &nodes[i] {
            Node::Plain(s) => s,
            other => panic!("expected Plain, got {:?}", other),
        }
    }

    #[test]
    fn parses_plain_text_only() {
        let nodes = parse("hello world", "t.html").unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(plain(&nodes, 0), "hello world");
    }

    #[test]
    fn ordinary_html_tags_are_plain_text() {
        let nodes = parse("<body><h1>hi</h1></body>", "t.html").unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(plain(&nodes, 0), "<body><h1>hi</h1></body>");
    }

    #[test]
    fn parses_self_closing_include() {
        let nodes = parse("<include file='header.html'/>", "t.html").unwrap();
        match &nodes[0] {
            Node::Include { file, children, .. } => {
                assert_eq!(file, "header.html");
                assert!(children.is_empty());
            }
            other => panic!("expected Include, got {:?}", other),
        }
    }

    #[test]
    fn parses_include_with_def_child() {
        let src = "<include file='layout.html'><def:content><h1>Hi</h1></def:content></include>";
        let nodes = parse(src, "t.html").unwrap();
        match &nodes[0] {
            Node::Include { file, children, .. } => {
                assert_eq!(file, "layout.html");
                assert_eq!(children.len(), 1);
                match &children[0] {
                    IncludeChild::Def(def) => {
                        assert_eq!(def.name, "content");
                        assert_eq!(def.mode, DefMode::Replace);
                    }
                    other => panic!("expected Def child, got {:?}", other),
                }
            }
            other => panic!("expected Include, got {:?}", other),
        }
    }

    #[test]
    fn parses_append_and_prepend() {
        let src = "<include file='l.html'><append:x>A</append:x><prepend:x>B</prepend:x></include>";
        let nodes = parse(src, "t.html").unwrap();
        match &nodes[0] {
            Node::Include { children, .. } => {
                assert_eq!(children.len(), 2);
                assert!(matches!(
                    &children[0],
                    IncludeChild::Def(Def { mode: DefMode::Append, .. })
                ));
                assert!(matches!(
                    &children[1],
                    IncludeChild::Def(Def { mode: DefMode::Prepend, .. })
                ));
            }
            other => panic!("expected Include, got {:?}", other),
        }
    }

    #[test]
    fn parses_inline_with_bang_prefix_for_no_escape() {
        let nodes = parse("<inline file='!raw.txt'/>", "t.html").unwrap();
        match &nodes[0] {
            Node::Inline { file, escape, .. } => {
                assert_eq!(file, "raw.txt");
                assert!(!escape);
            }
            other => panic!("expected Inline, got {:?}", other),
        }
    }

    #[test]
    fn parses_block_self_closing_and_with_body() {
        let nodes = parse("<block:content/>", "t.html").unwrap();
        assert!(matches!(&nodes[0], Node::Block { nodes, .. } if nodes.is_empty()));

        let nodes = parse("<block:content>default</block:content>", "t.html").unwrap();
        match &nodes[0] {
            Node::Block { name, nodes, .. } => {
                assert_eq!(name, "content");
                assert_eq!(nodes.len(), 1);
            }
            other => panic!("expected Block, got {:?}", other),
        }
    }

    #[test]
    fn block_closing_name_mismatch_is_an_error() {
        let err = parse("<block:a>x</block:b>", "t.html").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn parses_escaped_and_unescaped_interpolation() {
        let nodes = parse("#{a}!{b}", "t.html").unwrap();
        assert!(matches!(&nodes[0], Node::Expr { expr, escape: true, .. } if expr == "a"));
        assert!(matches!(&nodes[1], Node::Expr { expr, escape: false, .. } if expr == "b"));
    }

    #[test]
    fn interpolation_handles_nested_braces_and_strings() {
        let nodes = parse(r#"#{f({a: "}"}, '}')}"#, "t.html").unwrap();
        match &nodes[0] {
            Node::Expr { expr, .. } => assert_eq!(expr, r#"f({a: "}"}, '}')"#),
            other => panic!("expected Expr, got {:?}", other),
        }
    }

    #[test]
    fn parses_var_as_standalone_node() {
        let nodes = parse("<var:x>1 + 2</var:x>", "t.html").unwrap();
        match &nodes[0] {
            Node::Var { name, expr, .. } => {
                assert_eq!(name, "x");
                assert_eq!(expr, "1 + 2");
            }
            other => panic!("expected Var, got {:?}", other),
        }
    }

    #[test]
    fn parses_comment_and_can_contain_any_text() {
        let nodes = parse("<!-- hi <there> -->", "t.html").unwrap();
        match &nodes[0] {
            Node::Comment { content, .. } => assert_eq!(content, " hi <there> "),
            other => panic!("expected Comment, got {:?}", other),
        }
    }

    #[test]
    fn parses_if_standalone() {
        let nodes = parse("<if expr='x'>y</if>", "t.html").unwrap();
        match &nodes[0] {
            Node::If { whens, otherwise, .. } => {
                assert_eq!(whens.len(), 1);
                assert_eq!(whens[0].expr, "x");
                assert!(otherwise.is_none());
            }
            other => panic!("expected If, got {:?}", other),
        }
    }

    #[test]
    fn parses_if_compound_with_when_and_otherwise() {
        let src = "<if><when expr='a'>A</when><when expr='b'>B</when><otherwise>C</otherwise></if>";
        let nodes = parse(src, "t.html").unwrap();
        match &nodes[0] {
            Node::If { whens, otherwise, .. } => {
                assert_eq!(whens.len(), 2);
                assert!(otherwise.is_some());
            }
            other => panic!("expected If, got {:?}", other),
        }
    }

    #[test]
    fn compound_if_requires_at_least_one_when() {
        let err = parse("<if></if>", "t.html").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn parses_each_over_array_shape() {
        let src = "<ul><each:user in='users'><li>#{user.name}</li></each:user></ul>";
        let nodes = parse(src, "t.html").unwrap();
        assert_eq!(plain(&nodes, 0), "<ul>");
        match &nodes[1] {
            Node::Each { name, expr, nodes, .. } => {
                assert_eq!(name, "user");
                assert_eq!(expr, "users");
                assert_eq!(nodes.len(), 1);
            }
            other => panic!("expected Each, got {:?}", other),
        }
    }

    #[test]
    fn each_closing_name_mismatch_is_an_error() {
        let err = parse("<each:a in='x'>y</each:b>", "t.html").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn def_outside_include_is_a_syntax_error() {
        let err = parse("<def:x>y</def:x>", "t.html").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn when_outside_if_is_a_syntax_error() {
        let err = parse("<when expr='x'>y</when>", "t.html").unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn unterminated_construct_reports_syntax_error() {
        let err = parse("<include file='a.html'>", "t.html").unwrap_err();
        match err {
            Error::Syntax { .. } => {}
            other => panic!("expected Syntax error, got {:?}", other),
        }
    }

    #[test]
    fn error_location_points_at_failure() {
        let err = parse("line one\n<block:a>body</block:b>", "t.html").unwrap_err();
        match err {
            Error::Syntax { location, .. } => assert_eq!(location.line, 2),
            other => panic!("expected Syntax error, got {:?}", other),
        }
    }
}
