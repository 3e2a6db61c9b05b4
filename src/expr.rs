//! The expression sub-language is an external capability by design (spec
//! §1, §9): this module defines the `ExpressionEngine` trait callers may
//! replace, plus `DefaultEngine`, a minimal recursive-descent evaluator good
//! enough to run the end-to-end scenarios (property access, arithmetic,
//! comparisons, logical operators, literals, and a closed set of one-arg
//! URI-encoding globals).

use serde_json::Value;

use crate::runtime::Scope;
use crate::value;

/// Error returned by an `ExpressionEngine`; the render pipeline wraps this
/// with the failing expression's text and source location to build
/// `Error::Expression`.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ExpressionError(pub String);

impl From<String> for ExpressionError {
    fn from(s: String) -> Self {
        ExpressionError(s)
    }
}

/// The out-of-scope-by-design expression evaluator contract (spec §1, §9).
pub trait ExpressionEngine: Send + Sync {
    fn evaluate(&self, expr: &str, scope: &Scope) -> Result<Value, ExpressionError>;
}

/// A minimal recursive-descent evaluator: property/index access, unary `!`
/// and `-`, arithmetic, comparisons, `&&`/`||`, and string/number/bool/null
/// literals — not a JS engine (spec §9 "implement a minimal one").
#[derive(Debug, Default)]
pub struct DefaultEngine;

impl ExpressionEngine for DefaultEngine {
    fn evaluate(&self, expr: &str, scope: &Scope) -> Result<Value, ExpressionError> {
        let tokens = lex(expr).map_err(ExpressionError)?;
        let mut p = Parser { tokens: &tokens, pos: 0 };
        let ast = p.parse_or().map_err(ExpressionError)?;
        if p.pos != p.tokens.len() {
            return Err(ExpressionError(format!(
                "unexpected trailing input in expression `{expr}`"
            )));
        }
        eval(&ast, scope).map_err(ExpressionError)
    }
}

// ── tokenizer ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Bool(bool),
    Null,
    Punct(&'static str),
}

fn lex(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut out = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()))
        {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n: f64 = text
                .parse()
                .map_err(|_| format!("invalid number literal `{text}`"))?;
            out.push(Token::Num(n));
            continue;
        }
        if c == '"' || c == '\'' {
            let quote = c;
            i += 1;
            let start = i;
            while i < chars.len() && chars[i] != quote {
                i += 1;
            }
            if i >= chars.len() {
                return Err("unterminated string literal".to_string());
            }
            let text: String = chars[start..i].iter().collect();
            i += 1;
            out.push(Token::Str(text));
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            match text.as_str() {
                "true" => out.push(Token::Bool(true)),
                "false" => out.push(Token::Bool(false)),
                "null" | "undefined" => out.push(Token::Null),
                _ => out.push(Token::Ident(text)),
            }
            continue;
        }

        let two: Option<&'static str> = match (c, chars.get(i + 1)) {
            ('=', Some('=')) => Some("=="),
            ('!', Some('=')) => Some("!="),
            ('<', Some('=')) => Some("<="),
            ('>', Some('=')) => Some(">="),
            ('&', Some('&')) => Some("&&"),
            ('|', Some('|')) => Some("||"),
            _ => None,
        };
        if let Some(op) = two {
            out.push(Token::Punct(op));
            i += 2;
            continue;
        }

        let one: &'static str = match c {
            '(' => "(",
            ')' => ")",
            '[' => "[",
            ']' => "]",
            '.' => ".",
            ',' => ",",
            '!' => "!",
            '-' => "-",
            '+' => "+",
            '*' => "*",
            '/' => "/",
            '%' => "%",
            '<' => "<",
            '>' => ">",
            other => return Err(format!("unexpected character `{other}` in expression")),
        };
        out.push(Token::Punct(one));
        i += 1;
    }

    Ok(out)
}

// ── AST + parser ─────────────────────────────────────────────────────────

enum Ast {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    Ident(String),
    Member(Box<Ast>, String),
    Index(Box<Ast>, Box<Ast>),
    Call(Box<Ast>, Vec<Ast>),
    Not(Box<Ast>),
    Neg(Box<Ast>),
    Binary(&'static str, Box<Ast>, Box<Ast>),
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(x)) if *x == p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), String> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(format!("expected `{p}`"))
        }
    }

    fn parse_or(&mut self) -> Result<Ast, String> {
        let mut left = self.parse_and()?;
        while self.eat_punct("||") {
            let right = self.parse_and()?;
            left = Ast::Binary("||", Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Ast, String> {
        let mut left = self.parse_equality()?;
        while self.eat_punct("&&") {
            let right = self.parse_equality()?;
            left = Ast::Binary("&&", Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Ast, String> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = if self.eat_punct("==") {
                "=="
            } else if self.eat_punct("!=") {
                "!="
            } else {
                break;
            };
            let right = self.parse_comparison()?;
            left = Ast::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Ast, String> {
        let mut left = self.parse_additive()?;
        loop {
            let op = if self.eat_punct("<=") {
                "<="
            } else if self.eat_punct(">=") {
                ">="
            } else if self.eat_punct("<") {
                "<"
            } else if self.eat_punct(">") {
                ">"
            } else {
                break;
            };
            let right = self.parse_additive()?;
            left = Ast::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Ast, String> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_punct("+") {
                "+"
            } else if self.eat_punct("-") {
                "-"
            } else {
                break;
            };
            let right = self.parse_multiplicative()?;
            left = Ast::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Ast, String> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_punct("*") {
                "*"
            } else if self.eat_punct("/") {
                "/"
            } else if self.eat_punct("%") {
                "%"
            } else {
                break;
            };
            let right = self.parse_unary()?;
            left = Ast::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Ast, String> {
        if self.eat_punct("!") {
            return Ok(Ast::Not(Box::new(self.parse_unary()?)));
        }
        if self.eat_punct("-") {
            return Ok(Ast::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Ast, String> {
        let mut node = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                let name = match self.bump() {
                    Some(Token::Ident(n)) => n.clone(),
                    _ => return Err("expected property name after `.`".to_string()),
                };
                node = Ast::Member(Box::new(node), name);
            } else if self.eat_punct("[") {
                let idx = self.parse_or()?;
                self.expect_punct("]")?;
                node = Ast::Index(Box::new(node), Box::new(idx));
            } else if self.eat_punct("(") {
                let mut args = Vec::new();
                if !self.eat_punct(")") {
                    loop {
                        args.push(self.parse_or()?);
                        if self.eat_punct(",") {
                            continue;
                        }
                        self.expect_punct(")")?;
                        break;
                    }
                }
                node = Ast::Call(Box::new(node), args);
            } else {
                break;
            }
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> Result<Ast, String> {
        match self.bump().cloned() {
            Some(Token::Num(n)) => Ok(Ast::Num(n)),
            Some(Token::Str(s)) => Ok(Ast::Str(s)),
            Some(Token::Bool(b)) => Ok(Ast::Bool(b)),
            Some(Token::Null) => Ok(Ast::Null),
            Some(Token::Ident(name)) => Ok(Ast::Ident(name)),
            Some(Token::Punct("(")) => {
                let inner = self.parse_or()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Some(other) => Err(format!("unexpected token `{other:?}` in expression")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

// ── evaluation ───────────────────────────────────────────────────────────

fn eval(ast: &Ast, scope: &Scope) -> Result<Value, String> {
    match ast {
        Ast::Null => Ok(Value::Null),
        Ast::Bool(b) => Ok(Value::Bool(*b)),
        Ast::Num(n) => Ok(Value::from(*n)),
        Ast::Str(s) => Ok(Value::String(s.clone())),
        Ast::Ident(name) => Ok(scope.get(name)),
        Ast::Member(base, name) => {
            let base = eval(base, scope)?;
            Ok(get_property(&base, name))
        }
        Ast::Index(base, idx) => {
            let base = eval(base, scope)?;
            let idx = eval(idx, scope)?;
            Ok(index_value(&base, &idx))
        }
        Ast::Not(e) => Ok(Value::Bool(!value::truthy(&eval(e, scope)?))),
        Ast::Neg(e) => {
            let v = eval(e, scope)?;
            Ok(Value::from(-as_f64(&v)))
        }
        Ast::Binary("&&", a, b) => {
            let av = eval(a, scope)?;
            if !value::truthy(&av) {
                Ok(av)
            } else {
                eval(b, scope)
            }
        }
        Ast::Binary("||", a, b) => {
            let av = eval(a, scope)?;
            if value::truthy(&av) {
                Ok(av)
            } else {
                eval(b, scope)
            }
        }
        Ast::Binary(op, a, b) => {
            let av = eval(a, scope)?;
            let bv = eval(b, scope)?;
            eval_binary(op, &av, &bv)
        }
        Ast::Call(callee, args) => eval_call(callee, args, scope),
    }
}

fn get_property(v: &Value, name: &str) -> Value {
    match v {
        Value::Object(map) => map.get(name).cloned().unwrap_or(Value::Null),
        Value::Array(items) => {
            if name == "length" {
                Value::from(items.len())
            } else {
                Value::Null
            }
        }
        Value::String(s) => {
            if name == "length" {
                Value::from(s.chars().count())
            } else {
                Value::Null
            }
        }
        _ => Value::Null,
    }
}

fn index_value(base: &Value, idx: &Value) -> Value {
    match (base, idx) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n.as_f64().unwrap_or(-1.0);
            if i >= 0.0 {
                items.get(i as usize).cloned().unwrap_or(Value::Null)
            } else {
                Value::Null
            }
        }
        (Value::Object(map), Value::String(k)) => map.get(k).cloned().unwrap_or(Value::Null),
        (Value::Object(map), Value::Number(n)) => map.get(&n.to_string()).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn as_f64(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::Bool(b) => if *b { 1.0 } else { 0.0 },
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::Null => 0.0,
        _ => f64::NAN,
    }
}

fn eval_binary(op: &str, a: &Value, b: &Value) -> Result<Value, String> {
    match op {
        "==" => Ok(Value::Bool(a == b)),
        "!=" => Ok(Value::Bool(a != b)),
        "+" => {
            if matches!(a, Value::String(_)) || matches!(b, Value::String(_)) {
                Ok(Value::String(format!(
                    "{}{}",
                    value::to_display_string(a),
                    value::to_display_string(b)
                )))
            } else {
                Ok(Value::from(as_f64(a) + as_f64(b)))
            }
        }
        "-" => Ok(Value::from(as_f64(a) - as_f64(b))),
        "*" => Ok(Value::from(as_f64(a) * as_f64(b))),
        "/" => Ok(Value::from(as_f64(a) / as_f64(b))),
        "%" => Ok(Value::from(as_f64(a) % as_f64(b))),
        "<" | "<=" | ">" | ">=" => Ok(Value::Bool(compare(op, a, b))),
        other => Err(format!("unsupported operator `{other}`")),
    }
}

fn compare(op: &str, a: &Value, b: &Value) -> bool {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return match op {
            "<" => x < y,
            "<=" => x <= y,
            ">" => x > y,
            ">=" => x >= y,
            _ => false,
        };
    }
    let (x, y) = (as_f64(a), as_f64(b));
    match op {
        "<" => x < y,
        "<=" => x <= y,
        ">" => x > y,
        ">=" => x >= y,
        _ => false,
    }
}

/// Calls are only meaningful on bare identifiers, and only the closed set
/// of URI-encoding globals from spec §4.5 item 4 is implemented — the rest
/// of that list (`Date`, `Math`, `JSON`, `Object`) is seeded in the render
/// scope as inert data (see `render::seed_globals`) for property access
/// like `Math.PI`, not as callables.
fn eval_call(callee: &Ast, args: &[Ast], scope: &Scope) -> Result<Value, String> {
    let name = match callee {
        Ast::Ident(n) => n.as_str(),
        _ => return Err("calls are only supported on bare identifiers".to_string()),
    };
    if args.len() != 1 {
        return Err(format!("{name} expects exactly one argument"));
    }
    let arg = eval(&args[0], scope)?;
    let s = value::to_display_string(&arg);
    match name {
        "encodeURI" => Ok(Value::String(percent_encode(&s, URI_SAFE))),
        "encodeURIComponent" => Ok(Value::String(percent_encode(&s, COMPONENT_SAFE))),
        "decodeURI" | "decodeURIComponent" => {
            percent_decode(&s).map(Value::String).map_err(|e| e)
        }
        other => Err(format!("unknown function `{other}`")),
    }
}

const URI_SAFE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789;,/?:@&=+$-_.!~*'()#";
const COMPONENT_SAFE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_.!~*'()";

fn percent_encode(s: &str, safe: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        let c = byte as char;
        if c.is_ascii() && safe.contains(c) {
            out.push(c);
        } else {
            out.push('%');
            out.push_str(&format!("{byte:02X}"));
        }
    }
    out
}

fn percent_decode(s: &str) -> Result<String, String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s
                .get(i + 1..i + 3)
                .ok_or_else(|| "truncated percent-escape".to_string())?;
            let byte = u8::from_str_radix(hex, 16)
                .map_err(|_| format!("invalid percent-escape `%{hex}`"))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| "percent-decoded bytes are not valid UTF-8".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn eval_str(expr: &str, data: HashMap<String, Value>) -> Value {
        let scope = Scope::root(data);
        DefaultEngine.evaluate(expr, &scope).unwrap()
    }

    #[test]
    fn evaluates_equality_and_comparisons() {
        let data = HashMap::from([("friends".to_string(), json!(2))]);
        assert_eq!(eval_str("friends==1", data.clone()), json!(false));
        assert_eq!(eval_str("friends>1 && friends<5", data), json!(true));
    }

    #[test]
    fn evaluates_property_access() {
        let data = HashMap::from([("user".to_string(), json!({"name": "Alice"}))]);
        assert_eq!(eval_str("user.name", data), json!("Alice"));
    }

    #[test]
    fn evaluates_arithmetic_and_string_concat() {
        assert_eq!(eval_str("1 + 2", HashMap::new()), json!(3.0));
        let data = HashMap::from([("s".to_string(), json!("hi"))]);
        assert_eq!(eval_str("s + '!'", data), json!("hi!"));
    }

    #[test]
    fn evaluates_unary_not_and_neg() {
        assert_eq!(eval_str("!false", HashMap::new()), json!(true));
        assert_eq!(eval_str("-5", HashMap::new()), json!(-5.0));
    }

    #[test]
    fn encode_uri_component_is_called_as_builtin() {
        let data = HashMap::from([("s".to_string(), json!("a b"))]);
        assert_eq!(eval_str("encodeURIComponent(s)", data), json!("a%20b"));
    }

    #[test]
    fn decode_uri_component_round_trips() {
        let data = HashMap::from([("s".to_string(), json!("a%20b"))]);
        assert_eq!(eval_str("decodeURIComponent(s)", data), json!("a b"));
    }

    #[test]
    fn unknown_identifier_is_null_not_an_error() {
        assert_eq!(eval_str("missing", HashMap::new()), Value::Null);
    }
}
