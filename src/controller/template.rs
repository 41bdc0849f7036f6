//! # Templates
//!
//! A small text-template evaluator for rendering Secret values from resolved
//! key/value pairs.
//!
//! Supported syntax:
//!
//! - `{{ .key }}` field access, `{{ index . "dotted.key" }}` for awkward keys
//! - string (`"..."`, `` `...` ``), integer, float and `true`/`false` literals
//! - pipelines, `{{ .user | upper | quote }}`, and parenthesised sub-pipelines
//! - `{{ if }}` / `{{ else if }}` / `{{ else }}` / `{{ end }}`
//! - whitespace trimming with `{{-` and `-}}`, comments `{{/* ... */}}`
//!
//! Only the functions listed in [`FUNCTIONS`] exist. Missing keys render as
//! empty strings.
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use vals_secret_controller::controller::template::render;
//!
//! let mut data = BTreeMap::new();
//! data.insert("user".to_string(), "bob".to_string());
//! let out = render("user={{ .user | upper }}", &data).unwrap();
//! assert_eq!(out, "user=BOB");
//! ```

use std::collections::BTreeMap;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

/// Values a template is rendered against
pub type TemplateData = BTreeMap<String, String>;

/// Functions callable from templates
pub const FUNCTIONS: &[&str] = &[
    "and", "b64dec", "b64enc", "contains", "date", "default", "empty", "eq", "hasPrefix",
    "hasSuffix", "indent", "index", "len", "lower", "ne", "nindent", "not", "now", "or", "quote",
    "replace", "sha256sum", "squote", "title", "toString", "trim", "trimPrefix", "trimSuffix",
    "upper",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("template: {0}")]
    Parse(String),
    #[error("template: function \"{0}\" not defined")]
    UnknownFunction(String),
    #[error("template: error calling {name}: {message}")]
    Call { name: String, message: String },
}

fn parse_err(msg: impl Into<String>) -> TemplateError {
    TemplateError::Parse(msg.into())
}

fn call_err(name: &str, message: impl Into<String>) -> TemplateError {
    TemplateError::Call {
        name: name.to_string(),
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Nil,
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Time(DateTime<Utc>),
    Map(TemplateData),
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Self::Nil => false,
            Self::Str(s) => !s.is_empty(),
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Bool(b) => *b,
            Self::Time(_) => true,
            Self::Map(m) => !m.is_empty(),
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Nil => String::new(),
            Self::Str(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Time(t) => t.format("%Y-%m-%d %H:%M:%S%.f %z %Z").to_string(),
            Self::Map(m) => {
                let pairs: Vec<String> = m.iter().map(|(k, v)| format!("{k}:{v}")).collect();
                format!("map[{}]", pairs.join(" "))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Dot,
    Field(String),
    Literal(Value),
    Function(String),
    Sub(Pipeline),
}

type Command = Vec<Operand>;
type Pipeline = Vec<Command>;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Output(Pipeline),
    If {
        branches: Vec<(Pipeline, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
}

/// A parsed template
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Parse template source
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let items = split_items(source)?;
        let mut pos = 0;
        let (nodes, terminator) = parse_nodes(&items, &mut pos)?;
        if let Some(t) = terminator {
            return Err(parse_err(format!("unexpected {t:?}")));
        }
        Ok(Self { nodes })
    }

    /// Render against `data`
    #[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
    pub fn render(&self, data: &TemplateData) -> Result<String, TemplateError> {
        let mut out = String::new();
        render_nodes(&self.nodes, data, &mut out)?;
        Ok(out)
    }
}

/// Parse and render in one step
#[allow(clippy::missing_errors_doc, reason = "Error documentation is provided in doc comments")]
pub fn render(source: &str, data: &TemplateData) -> Result<String, TemplateError> {
    Template::parse(source)?.render(data)
}

/// md5 over the sorted `key + value` concatenation of a map
#[must_use]
pub fn secret_hash(data: &TemplateData) -> String {
    let joined: String = data.iter().map(|(k, v)| format!("{k}{v}")).collect();
    format!("{:x}", md5::compute(joined))
}

/// Hash of `templates` rendered with placeholder credentials
///
/// Detects template edits without needing the real credential. Any template that
/// fails to parse or render makes the hash empty, which disables the comparison.
/// This is an approximation: a template whose output does not depend on the
/// credential fields still hashes the same after unrelated backend changes.
#[must_use]
pub fn fake_hash(templates: &BTreeMap<String, String>) -> String {
    let mut placeholder = TemplateData::new();
    placeholder.insert("username".to_string(), "fake".to_string());
    placeholder.insert("password".to_string(), "fake".to_string());

    let mut rendered = TemplateData::new();
    for (key, body) in templates {
        match render(body, &placeholder) {
            Ok(out) => {
                rendered.insert(key.clone(), out);
            }
            Err(_) => return String::new(),
        }
    }
    secret_hash(&rendered)
}

// ---------------------------------------------------------------------------
// Lexing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Item {
    Text(String),
    Output(Pipeline),
    If(Pipeline),
    ElseIf(Pipeline),
    Else,
    End,
}

/// Split source into text and parsed actions, applying trim markers
fn split_items(source: &str) -> Result<Vec<Item>, TemplateError> {
    let mut items = Vec::new();
    let mut rest = source;
    let mut trim_next = false;

    while let Some(open) = rest.find("{{") {
        let mut text = &rest[..open];
        if trim_next {
            text = text.trim_start();
        }
        let after_open = &rest[open + 2..];
        let trim_left = after_open.starts_with('-')
            && after_open[1..].starts_with(|c: char| c.is_whitespace());
        if trim_left {
            text = text.trim_end();
        }
        if !text.is_empty() {
            items.push(Item::Text(text.to_string()));
        }

        let body_start = if trim_left { 1 } else { 0 };
        let close = find_close(&after_open[body_start..])
            .ok_or_else(|| parse_err("unclosed action"))?;
        let mut body = &after_open[body_start..body_start + close];
        rest = &after_open[body_start + close + 2..];

        trim_next = body.ends_with('-')
            && body[..body.len() - 1].ends_with(|c: char| c.is_whitespace());
        if trim_next {
            body = &body[..body.len() - 1];
        }

        let body = body.trim();
        if body.starts_with("/*") {
            if !body.ends_with("*/") {
                return Err(parse_err("unclosed comment"));
            }
            continue;
        }
        items.push(parse_action(body)?);
    }

    let tail = if trim_next { rest.trim_start() } else { rest };
    if !tail.is_empty() {
        items.push(Item::Text(tail.to_string()));
    }
    Ok(items)
}

/// Offset of the `}}` closing an action, skipping string literals
fn find_close(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(b'"') if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Dot,
    Field(String),
    Ident(String),
    Literal(Value),
    Pipe,
    LParen,
    RParen,
}

fn tokenize(body: &str) -> Result<Vec<Token>, TemplateError> {
    let chars: Vec<char> = body.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let is_ident = |c: char| c.is_alphanumeric() || c == '_';

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err(parse_err("unterminated quoted string"));
                    };
                    i += 1;
                    match ch {
                        '"' => break,
                        '\\' => {
                            let escaped = chars
                                .get(i)
                                .ok_or_else(|| parse_err("unterminated quoted string"))?;
                            i += 1;
                            s.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => *other,
                            });
                        }
                        other => s.push(other),
                    }
                }
                tokens.push(Token::Literal(Value::Str(s)));
            }
            '`' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == '`')
                    .ok_or_else(|| parse_err("unterminated raw string"))?;
                tokens.push(Token::Literal(Value::Str(
                    chars[start..start + end].iter().collect(),
                )));
                i = start + end + 1;
            }
            '.' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_ident(chars[end]) {
                    end += 1;
                }
                if end == start {
                    tokens.push(Token::Dot);
                } else {
                    if chars.get(end) == Some(&'.') {
                        return Err(parse_err("nested field access is not supported"));
                    }
                    tokens.push(Token::Field(chars[start..end].iter().collect()));
                }
                i = end;
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let literal = if text.contains('.') {
                    Value::Float(text.parse().map_err(|_| parse_err(format!("bad number {text}")))?)
                } else {
                    Value::Int(text.parse().map_err(|_| parse_err(format!("bad number {text}")))?)
                };
                tokens.push(Token::Literal(literal));
            }
            c if is_ident(c) => {
                let start = i;
                while i < chars.len() && is_ident(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "nil" => Token::Literal(Value::Nil),
                    _ => Token::Ident(word),
                });
            }
            other => return Err(parse_err(format!("unexpected character {other:?}"))),
        }
    }
    Ok(tokens)
}

fn parse_action(body: &str) -> Result<Item, TemplateError> {
    let tokens = tokenize(body)?;
    match tokens.first() {
        Some(Token::Ident(kw)) if kw == "end" => {
            if tokens.len() > 1 {
                return Err(parse_err("unexpected arguments to end"));
            }
            Ok(Item::End)
        }
        Some(Token::Ident(kw)) if kw == "if" => Ok(Item::If(parse_full_pipeline(&tokens[1..])?)),
        Some(Token::Ident(kw)) if kw == "else" => match tokens.get(1) {
            None => Ok(Item::Else),
            Some(Token::Ident(next)) if next == "if" => {
                Ok(Item::ElseIf(parse_full_pipeline(&tokens[2..])?))
            }
            Some(_) => Err(parse_err("unexpected arguments to else")),
        },
        Some(Token::Ident(kw)) if kw == "range" || kw == "with" || kw == "define" || kw == "template" => {
            Err(parse_err(format!("{kw} is not supported")))
        }
        Some(_) => Ok(Item::Output(parse_full_pipeline(&tokens)?)),
        None => Err(parse_err("empty action")),
    }
}

fn parse_full_pipeline(tokens: &[Token]) -> Result<Pipeline, TemplateError> {
    let mut pos = 0;
    let pipeline = parse_pipeline(tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(parse_err("unexpected )"));
    }
    Ok(pipeline)
}

fn parse_pipeline(tokens: &[Token], pos: &mut usize) -> Result<Pipeline, TemplateError> {
    let mut pipeline = Vec::new();
    let mut command = Vec::new();

    while let Some(token) = tokens.get(*pos) {
        match token {
            Token::RParen => break,
            Token::Pipe => {
                if command.is_empty() {
                    return Err(parse_err("missing command before |"));
                }
                pipeline.push(std::mem::take(&mut command));
            }
            Token::LParen => {
                *pos += 1;
                let sub = parse_pipeline(tokens, pos)?;
                if tokens.get(*pos) != Some(&Token::RParen) {
                    return Err(parse_err("unclosed ("));
                }
                command.push(Operand::Sub(sub));
            }
            Token::Dot => command.push(Operand::Dot),
            Token::Field(name) => command.push(Operand::Field(name.clone())),
            Token::Ident(name) => command.push(Operand::Function(name.clone())),
            Token::Literal(value) => command.push(Operand::Literal(value.clone())),
        }
        *pos += 1;
    }

    if command.is_empty() {
        return Err(parse_err("missing value for command"));
    }
    pipeline.push(command);
    Ok(pipeline)
}

fn parse_nodes(items: &[Item], pos: &mut usize) -> Result<(Vec<Node>, Option<Item>), TemplateError> {
    let mut nodes = Vec::new();

    while let Some(item) = items.get(*pos) {
        *pos += 1;
        match item {
            Item::Text(text) => nodes.push(Node::Text(text.clone())),
            Item::Output(pipeline) => nodes.push(Node::Output(pipeline.clone())),
            Item::If(cond) => {
                let mut branches = Vec::new();
                let mut cond = cond.clone();
                let otherwise = loop {
                    let (body, terminator) = parse_nodes(items, pos)?;
                    branches.push((cond, body));
                    match terminator {
                        Some(Item::End) => break Vec::new(),
                        Some(Item::ElseIf(next)) => cond = next,
                        Some(Item::Else) => {
                            let (body, terminator) = parse_nodes(items, pos)?;
                            if terminator != Some(Item::End) {
                                return Err(parse_err("expected end after else"));
                            }
                            break body;
                        }
                        _ => return Err(parse_err("unexpected EOF, missing end")),
                    }
                };
                nodes.push(Node::If {
                    branches,
                    otherwise,
                });
            }
            terminator @ (Item::ElseIf(_) | Item::Else | Item::End) => {
                return Ok((nodes, Some(terminator.clone())));
            }
        }
    }
    Ok((nodes, None))
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn render_nodes(nodes: &[Node], data: &TemplateData, out: &mut String) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Output(pipeline) => out.push_str(&eval_pipeline(pipeline, data)?.render()),
            Node::If {
                branches,
                otherwise,
            } => {
                let mut taken = false;
                for (cond, body) in branches {
                    if eval_pipeline(cond, data)?.truthy() {
                        render_nodes(body, data, out)?;
                        taken = true;
                        break;
                    }
                }
                if !taken {
                    render_nodes(otherwise, data, out)?;
                }
            }
        }
    }
    Ok(())
}

fn eval_pipeline(pipeline: &Pipeline, data: &TemplateData) -> Result<Value, TemplateError> {
    let mut previous: Option<Value> = None;
    for command in pipeline {
        previous = Some(eval_command(command, data, previous)?);
    }
    Ok(previous.unwrap_or(Value::Nil))
}

fn eval_command(
    command: &Command,
    data: &TemplateData,
    previous: Option<Value>,
) -> Result<Value, TemplateError> {
    match command.split_first() {
        Some((Operand::Function(name), args)) => {
            let mut values = args
                .iter()
                .map(|a| eval_operand(a, data))
                .collect::<Result<Vec<_>, _>>()?;
            values.extend(previous);
            call(name, values)
        }
        Some((operand, [])) => {
            if previous.is_some() {
                return Err(parse_err("can't give argument to non-function"));
            }
            eval_operand(operand, data)
        }
        Some(_) => Err(parse_err("can't give argument to non-function")),
        None => Err(parse_err("empty command")),
    }
}

fn eval_operand(operand: &Operand, data: &TemplateData) -> Result<Value, TemplateError> {
    Ok(match operand {
        Operand::Dot => Value::Map(data.clone()),
        Operand::Field(name) => Value::Str(data.get(name).cloned().unwrap_or_default()),
        Operand::Literal(value) => value.clone(),
        Operand::Function(name) => call(name, Vec::new())?,
        Operand::Sub(pipeline) => eval_pipeline(pipeline, data)?,
    })
}

fn expect_args(name: &str, args: &[Value], count: usize) -> Result<(), TemplateError> {
    if args.len() == count {
        Ok(())
    } else {
        Err(call_err(
            name,
            format!("wrong number of args: want {count} got {}", args.len()),
        ))
    }
}

fn str_arg(args: &[Value], index: usize) -> String {
    args.get(index).map(Value::render).unwrap_or_default()
}

fn call(name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
    let value = match name {
        "upper" => {
            expect_args(name, &args, 1)?;
            Value::Str(str_arg(&args, 0).to_uppercase())
        }
        "lower" => {
            expect_args(name, &args, 1)?;
            Value::Str(str_arg(&args, 0).to_lowercase())
        }
        "title" => {
            expect_args(name, &args, 1)?;
            Value::Str(title_case(&str_arg(&args, 0)))
        }
        "trim" => {
            expect_args(name, &args, 1)?;
            Value::Str(str_arg(&args, 0).trim().to_string())
        }
        "trimPrefix" => {
            expect_args(name, &args, 2)?;
            let (prefix, s) = (str_arg(&args, 0), str_arg(&args, 1));
            Value::Str(s.strip_prefix(prefix.as_str()).unwrap_or(&s).to_string())
        }
        "trimSuffix" => {
            expect_args(name, &args, 2)?;
            let (suffix, s) = (str_arg(&args, 0), str_arg(&args, 1));
            Value::Str(s.strip_suffix(suffix.as_str()).unwrap_or(&s).to_string())
        }
        "replace" => {
            expect_args(name, &args, 3)?;
            Value::Str(str_arg(&args, 2).replace(&str_arg(&args, 0), &str_arg(&args, 1)))
        }
        "contains" => {
            expect_args(name, &args, 2)?;
            Value::Bool(str_arg(&args, 1).contains(&str_arg(&args, 0)))
        }
        "hasPrefix" => {
            expect_args(name, &args, 2)?;
            Value::Bool(str_arg(&args, 1).starts_with(&str_arg(&args, 0)))
        }
        "hasSuffix" => {
            expect_args(name, &args, 2)?;
            Value::Bool(str_arg(&args, 1).ends_with(&str_arg(&args, 0)))
        }
        "default" => match args.as_slice() {
            [fallback] => fallback.clone(),
            [fallback, given] => {
                if given.truthy() {
                    given.clone()
                } else {
                    fallback.clone()
                }
            }
            _ => return Err(call_err(name, "wrong number of args: want 2")),
        },
        "empty" => {
            expect_args(name, &args, 1)?;
            Value::Bool(!args[0].truthy())
        }
        "quote" => Value::Str(
            args.iter()
                .map(|a| format!("{:?}", a.render()))
                .collect::<Vec<_>>()
                .join(" "),
        ),
        "squote" => Value::Str(
            args.iter()
                .map(|a| format!("'{}'", a.render()))
                .collect::<Vec<_>>()
                .join(" "),
        ),
        "b64enc" => {
            expect_args(name, &args, 1)?;
            Value::Str(general_purpose::STANDARD.encode(str_arg(&args, 0)))
        }
        "b64dec" => {
            expect_args(name, &args, 1)?;
            let decoded = general_purpose::STANDARD
                .decode(str_arg(&args, 0))
                .map_err(|e| call_err(name, e.to_string()))?;
            Value::Str(String::from_utf8(decoded).map_err(|e| call_err(name, e.to_string()))?)
        }
        "sha256sum" => {
            expect_args(name, &args, 1)?;
            let digest = Sha256::digest(str_arg(&args, 0).as_bytes());
            Value::Str(digest.iter().map(|b| format!("{b:02x}")).collect())
        }
        "toString" => {
            expect_args(name, &args, 1)?;
            Value::Str(str_arg(&args, 0))
        }
        "len" => {
            expect_args(name, &args, 1)?;
            let len = match &args[0] {
                Value::Map(m) => m.len(),
                other => other.render().chars().count(),
            };
            Value::Int(i64::try_from(len).unwrap_or(i64::MAX))
        }
        "indent" | "nindent" => {
            expect_args(name, &args, 2)?;
            let width = match &args[0] {
                Value::Int(n) => usize::try_from(*n).unwrap_or(0),
                _ => return Err(call_err(name, "indent width must be an integer")),
            };
            let pad = " ".repeat(width);
            let indented = str_arg(&args, 1)
                .lines()
                .map(|l| format!("{pad}{l}"))
                .collect::<Vec<_>>()
                .join("\n");
            Value::Str(if name == "nindent" {
                format!("\n{indented}")
            } else {
                indented
            })
        }
        "index" => {
            expect_args(name, &args, 2)?;
            match &args[0] {
                Value::Map(m) => Value::Str(m.get(&str_arg(&args, 1)).cloned().unwrap_or_default()),
                _ => return Err(call_err(name, "can't index item that is not a map")),
            }
        }
        "eq" => {
            if args.len() < 2 {
                return Err(call_err(name, "missing argument for comparison"));
            }
            Value::Bool(args[1..].iter().any(|other| *other == args[0]))
        }
        "ne" => {
            expect_args(name, &args, 2)?;
            Value::Bool(args[0] != args[1])
        }
        "not" => {
            expect_args(name, &args, 1)?;
            Value::Bool(!args[0].truthy())
        }
        "and" => {
            if args.is_empty() {
                return Err(call_err(name, "wrong number of args"));
            }
            args.iter()
                .find(|a| !a.truthy())
                .or(args.last())
                .cloned()
                .unwrap_or(Value::Nil)
        }
        "or" => {
            if args.is_empty() {
                return Err(call_err(name, "wrong number of args"));
            }
            args.iter()
                .find(|a| a.truthy())
                .or(args.last())
                .cloned()
                .unwrap_or(Value::Nil)
        }
        "now" => {
            expect_args(name, &args, 0)?;
            Value::Time(Utc::now())
        }
        "date" => {
            expect_args(name, &args, 2)?;
            let time = match &args[1] {
                Value::Time(t) => *t,
                Value::Int(secs) => Utc
                    .timestamp_opt(*secs, 0)
                    .single()
                    .ok_or_else(|| call_err(name, "timestamp out of range"))?,
                _ => return Err(call_err(name, "expected a time")),
            };
            Value::Str(time.format(&go_layout_to_chrono(&str_arg(&args, 0))).to_string())
        }
        other => return Err(TemplateError::UnknownFunction(other.to_string())),
    };
    Ok(value)
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start && c.is_alphabetic() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = !c.is_alphanumeric();
    }
    out
}

/// Translate a reference-time layout (`2006-01-02 15:04:05`) to a chrono format
fn go_layout_to_chrono(layout: &str) -> String {
    const TOKENS: &[(&str, &str)] = &[
        ("January", "%B"),
        ("Monday", "%A"),
        ("Z07:00", "%:z"),
        ("-07:00", "%:z"),
        ("-0700", "%z"),
        ("2006", "%Y"),
        ("Jan", "%b"),
        ("Mon", "%a"),
        ("MST", "%Z"),
        (".000", "%.3f"),
        ("01", "%m"),
        ("02", "%d"),
        ("03", "%I"),
        ("04", "%M"),
        ("05", "%S"),
        ("06", "%y"),
        ("15", "%H"),
        ("PM", "%p"),
    ];

    let mut out = String::new();
    let mut rest = layout;
    'outer: while !rest.is_empty() {
        for (token, replacement) in TOKENS {
            if let Some(stripped) = rest.strip_prefix(token) {
                out.push_str(replacement);
                rest = stripped;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            if c == '%' {
                out.push_str("%%");
            } else {
                out.push(c);
            }
        }
        rest = chars.as_str();
    }
    out
}
