//! Minimal placeholder template engine for the code emitter.
//!
//! Templates are plain text with `{{...}}` placeholders, `{{#if expr}}`
//! / `{{else}}` / `{{/if}}` conditionals and `{{#each path}}` /
//! `{{/each}}` loops. A placeholder is either a dotted path into the
//! render context or a helper application `{{helper arg ...}}`; all
//! helpers are pure.
//!
//! Each registered template is parsed into segments once, on first
//! render, and the compiled form is reused for the rest of the process
//! lifetime. Template sources are fixed at registration, so there is no
//! invalidation.

use std::collections::HashMap;

use log::trace;
use serde_json::Value;

use crate::error::CompileError;
use crate::strings::{to_camel, to_pascal, to_snake};

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Expr(Vec<Token>),
    If {
        cond: Vec<Token>,
        then: Vec<Segment>,
        otherwise: Vec<Segment>,
    },
    Each {
        path: String,
        body: Vec<Segment>,
    },
}

#[derive(Debug, Clone)]
enum Token {
    Path(String),
    Str(String),
    Number(f64),
    Bool(bool),
}

#[derive(Debug)]
struct Compiled {
    segments: Vec<Segment>,
}

/// The engine: registered template sources plus the compile cache.
#[derive(Debug, Default)]
pub struct TemplateEngine {
    sources: HashMap<String, String>,
    compiled: HashMap<String, Compiled>,
}

impl TemplateEngine {
    pub fn new() -> TemplateEngine {
        TemplateEngine::default()
    }

    /// Register a template source under an id. Re-registering an id
    /// replaces the source and drops its compiled form.
    pub fn register(&mut self, id: &str, source: &str) {
        self.sources.insert(id.to_string(), source.to_string());
        self.compiled.remove(id);
    }

    pub fn has_template(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    /// Render a registered template against a context value. Unknown ids
    /// and malformed template syntax are `CompileError::Template`.
    pub fn render(&mut self, id: &str, context: &Value) -> Result<String, CompileError> {
        if !self.compiled.contains_key(id) {
            let source = self
                .sources
                .get(id)
                .ok_or_else(|| CompileError::Template(format!("unknown template '{}'", id)))?;
            trace!("compiling template '{}'", id);
            let segments = parse(source)
                .map_err(|e| CompileError::Template(format!("template '{}': {}", id, e)))?;
            self.compiled.insert(id.to_string(), Compiled { segments });
        }
        let compiled = &self.compiled[id];
        let mut out = String::new();
        let frames = vec![context];
        render_segments(&compiled.segments, &frames, &mut out)
            .map_err(|e| CompileError::Template(format!("template '{}': {}", id, e)))?;
        Ok(out)
    }
}

// ── Parsing ──────────────────────────────────────────────────────────────

fn parse(source: &str) -> Result<Vec<Segment>, String> {
    let mut pos = 0;
    let (segments, rest) = parse_until(source, &mut pos, None)?;
    if let Some(tag) = rest {
        return Err(format!("unexpected closing tag '{{{{{}}}}}'", tag));
    }
    Ok(segments)
}

/// Parse segments until the matching close tag (`/if` or `/each`), or to
/// the end of input when `expect_close` is `None`. Returns the stop tag
/// actually seen, so `{{else}}` can be handled by the `#if` caller.
fn parse_until(
    source: &str,
    pos: &mut usize,
    expect_close: Option<&str>,
) -> Result<(Vec<Segment>, Option<String>), String> {
    let mut segments = Vec::new();
    loop {
        let rest = &source[*pos..];
        let Some(open) = rest.find("{{") else {
            if !rest.is_empty() {
                segments.push(Segment::Literal(rest.to_string()));
            }
            *pos = source.len();
            if let Some(tag) = expect_close {
                return Err(format!("unterminated block, expected '{{{{{}}}}}'", tag));
            }
            return Ok((segments, None));
        };
        if open > 0 {
            segments.push(Segment::Literal(rest[..open].to_string()));
        }
        let after_open = *pos + open + 2;
        let close = source[after_open..]
            .find("}}")
            .ok_or_else(|| "unterminated '{{'".to_string())?;
        let inner = source[after_open..after_open + close].trim().to_string();
        *pos = after_open + close + 2;

        if inner == "else" || inner.starts_with('/') {
            return Ok((segments, Some(inner)));
        }
        if let Some(expr) = inner.strip_prefix("#if ") {
            let cond = tokenize(expr)?;
            let (then, stop) = parse_until(source, pos, Some("/if"))?;
            let (otherwise, stop) = match stop.as_deref() {
                Some("else") => {
                    let (otherwise, stop) = parse_until(source, pos, Some("/if"))?;
                    (otherwise, stop)
                }
                _ => (Vec::new(), stop),
            };
            if stop.as_deref() != Some("/if") {
                return Err("unterminated '#if'".to_string());
            }
            segments.push(Segment::If { cond, then, otherwise });
        } else if let Some(expr) = inner.strip_prefix("#each ") {
            let (body, stop) = parse_until(source, pos, Some("/each"))?;
            if stop.as_deref() != Some("/each") {
                return Err("unterminated '#each'".to_string());
            }
            segments.push(Segment::Each {
                path: expr.trim().to_string(),
                body,
            });
        } else if let Some(unknown) = inner.strip_prefix('#') {
            return Err(format!("unknown block tag '#{}'", unknown));
        } else {
            segments.push(Segment::Expr(tokenize(&inner)?));
        }
    }
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '\'' || c == '"' {
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    Some(ch) if ch == c => break,
                    Some(ch) => s.push(ch),
                    None => return Err(format!("unterminated string in '{}'", expr)),
                }
            }
            tokens.push(Token::Str(s));
            continue;
        }
        let mut word = String::new();
        while let Some(&ch) = chars.peek() {
            if ch.is_whitespace() {
                break;
            }
            word.push(ch);
            chars.next();
        }
        if let Ok(n) = word.parse::<f64>() {
            tokens.push(Token::Number(n));
        } else if word == "true" || word == "false" {
            tokens.push(Token::Bool(word == "true"));
        } else {
            tokens.push(Token::Path(word));
        }
    }
    if tokens.is_empty() {
        return Err("empty placeholder".to_string());
    }
    Ok(tokens)
}

// ── Evaluation ───────────────────────────────────────────────────────────

fn render_segments(segments: &[Segment], frames: &[&Value], out: &mut String) -> Result<(), String> {
    for segment in segments {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Expr(tokens) => out.push_str(&stringify(&eval(tokens, frames)?)),
            Segment::If { cond, then, otherwise } => {
                if truthy(&eval(cond, frames)?) {
                    render_segments(then, frames, out)?;
                } else {
                    render_segments(otherwise, frames, out)?;
                }
            }
            Segment::Each { path, body } => {
                let value = lookup(path, frames);
                if let Value::Array(items) = &value {
                    for item in items {
                        let mut inner = frames.to_vec();
                        inner.push(item);
                        render_segments(body, &inner, out)?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn eval(tokens: &[Token], frames: &[&Value]) -> Result<Value, String> {
    if tokens.len() == 1 {
        return Ok(token_value(&tokens[0], frames));
    }
    let Token::Path(helper) = &tokens[0] else {
        return Err("helper name expected".to_string());
    };
    let args: Vec<Value> = tokens[1..]
        .iter()
        .map(|t| token_value(t, frames))
        .collect();
    apply_helper(helper, &args)
}

fn token_value(token: &Token, frames: &[&Value]) -> Value {
    match token {
        Token::Str(s) => Value::String(s.clone()),
        Token::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Token::Bool(b) => Value::Bool(*b),
        Token::Path(path) => lookup(path, frames),
    }
}

/// Resolve a dotted path against the frame stack, innermost frame first.
/// `this` names the innermost frame itself.
fn lookup(path: &str, frames: &[&Value]) -> Value {
    let mut parts: Vec<&str> = path.split('.').collect();
    if parts.first() == Some(&"this") {
        parts.remove(0);
        let current = frames.last().copied().unwrap_or(&Value::Null);
        return walk(current, &parts);
    }
    for frame in frames.iter().rev() {
        let found = walk(frame, &parts);
        if !found.is_null() {
            return found;
        }
    }
    Value::Null
}

fn walk(value: &Value, parts: &[&str]) -> Value {
    let mut current = value;
    for part in parts {
        match current.get(part) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn apply_helper(name: &str, args: &[Value]) -> Result<Value, String> {
    let arity = |n: usize| -> Result<(), String> {
        if args.len() < n {
            Err(format!("helper '{}' needs {} argument(s)", name, n))
        } else {
            Ok(())
        }
    };
    match name {
        "camel" => {
            arity(1)?;
            Ok(Value::String(to_camel(&stringify(&args[0]))))
        }
        "pascal" => {
            arity(1)?;
            Ok(Value::String(to_pascal(&stringify(&args[0]))))
        }
        "snake" => {
            arity(1)?;
            Ok(Value::String(to_snake(&stringify(&args[0]))))
        }
        "join" => {
            arity(2)?;
            let sep = stringify(&args[1]);
            let parts: Vec<String> = match &args[0] {
                Value::Array(items) => items.iter().map(stringify).collect(),
                other => vec![stringify(other)],
            };
            Ok(Value::String(parts.join(&sep)))
        }
        "length" => {
            arity(1)?;
            let len = match &args[0] {
                Value::Array(items) => items.len(),
                Value::String(s) => s.len(),
                Value::Object(map) => map.len(),
                _ => 0,
            };
            Ok(Value::Number(len.into()))
        }
        "empty" => {
            arity(1)?;
            Ok(Value::Bool(!truthy(&args[0])))
        }
        "not" => {
            arity(1)?;
            Ok(Value::Bool(!truthy(&args[0])))
        }
        "and" => Ok(Value::Bool(args.iter().all(truthy))),
        "or" => Ok(Value::Bool(args.iter().any(truthy))),
        "eq" => {
            arity(2)?;
            Ok(Value::Bool(args[0] == args[1]))
        }
        "contains" => {
            arity(2)?;
            let found = match &args[0] {
                Value::Array(items) => items.contains(&args[1]),
                Value::String(s) => s.contains(&stringify(&args[1])),
                _ => false,
            };
            Ok(Value::Bool(found))
        }
        "json" => {
            arity(1)?;
            serde_json::to_string(&args[0]).map(Value::String).map_err(|e| e.to_string())
        }
        other => Err(format!("unknown helper '{}'", other)),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Number(_) => true,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
