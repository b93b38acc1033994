//! Username template engine
//!
//! Templates are literal text with `{{ ... }}` actions. An action is a
//! pipeline of commands separated by `|`; each stage's output is appended
//! as the final argument of the next stage:
//!
//! ```text
//! {{ printf "vault-%s-%s" (.DisplayName) (unix_time) | truncate 32 }}
//! ```
//!
//! Operands are string literals, integers, the fields `.Type`,
//! `.DisplayName` and `.PolicyName`, parenthesized pipelines and the
//! functions listed on [`Function`].
//!
//! Templates are parsed once by [`UsernameTemplate::new`]; unknown fields,
//! unknown functions and malformed syntax are reported there. Argument
//! errors surface from [`UsernameTemplate::render`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fmt::{self, Write};
use std::sync::Arc;

use super::{MAX_USERNAME_LENGTH, UsernameMetadata};

/// Maximum number of actions allowed in a single template
const MAX_TEMPLATE_ACTIONS: usize = 64;

/// Characters `random` draws from
const RANDOM_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Position in the template (line and column)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub column: usize,
}

impl Position {
    fn start() -> Self {
        Self { line: 1, column: 1 }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Template parse error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} at {position}")]
pub struct ParseError {
    /// What went wrong
    pub message: String,
    /// Where the offending action starts
    pub position: Position,
}

/// Template render error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (action at {position})")]
pub struct RenderError {
    /// What went wrong
    pub message: String,
    /// Where the failing action starts
    pub position: Position,
}

/// Metadata fields a template can reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// `.Type`
    Type,
    /// `.DisplayName`
    DisplayName,
    /// `.PolicyName`
    PolicyName,
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "Type" => Some(Self::Type),
            "DisplayName" => Some(Self::DisplayName),
            "PolicyName" => Some(Self::PolicyName),
            _ => None,
        }
    }
}

/// Functions available inside actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// `printf FORMAT ARGS...` with `%s`, `%d`, `%v`, `%%`
    Printf,
    /// `truncate N STR`
    Truncate,
    /// `truncate_sha256 N STR`: keeps `N-8` chars plus 8 hex chars of the tail's hash
    TruncateSha256,
    /// `uppercase STR`
    Uppercase,
    /// `lowercase STR`
    Lowercase,
    /// `replace OLD NEW STR`
    Replace,
    /// `random N`: N alphanumeric characters
    Random,
    /// `unix_time`
    UnixTime,
    /// `unix_time_millis`
    UnixTimeMillis,
    /// `timestamp FORMAT` (strftime syntax)
    Timestamp,
    /// `uuid`: random v4 UUID
    Uuid,
    /// `sha256 STR`: hex digest
    Sha256,
    /// `base64 STR`
    Base64,
}

impl Function {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "printf" => Self::Printf,
            "truncate" => Self::Truncate,
            "truncate_sha256" => Self::TruncateSha256,
            "uppercase" => Self::Uppercase,
            "lowercase" => Self::Lowercase,
            "replace" => Self::Replace,
            "random" => Self::Random,
            "unix_time" => Self::UnixTime,
            "unix_time_millis" => Self::UnixTimeMillis,
            "timestamp" => Self::Timestamp,
            "uuid" => Self::Uuid,
            "sha256" => Self::Sha256,
            "base64" => Self::Base64,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Self::Printf => "printf",
            Self::Truncate => "truncate",
            Self::TruncateSha256 => "truncate_sha256",
            Self::Uppercase => "uppercase",
            Self::Lowercase => "lowercase",
            Self::Replace => "replace",
            Self::Random => "random",
            Self::UnixTime => "unix_time",
            Self::UnixTimeMillis => "unix_time_millis",
            Self::Timestamp => "timestamp",
            Self::Uuid => "uuid",
            Self::Sha256 => "sha256",
            Self::Base64 => "base64",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Str(String),
    Int(i64),
    Field(Field),
    Func(Function),
    Group(Pipeline),
}

#[derive(Debug, Clone, PartialEq)]
struct Command {
    operands: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
struct Pipeline {
    commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
enum TemplatePart {
    Static(String),
    Action {
        pipeline: Pipeline,
        position: Position,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Int(i64),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(n) => write!(f, "{n}"),
        }
    }
}

/// A parsed username template
#[derive(Debug, Clone)]
pub struct UsernameTemplate {
    source: Arc<str>,
    parts: Vec<TemplatePart>,
}

impl UsernameTemplate {
    /// Parse a template
    pub fn new(source: &str) -> Result<Self, ParseError> {
        let parts = parse_template(source)?;
        Ok(Self {
            source: Arc::from(source),
            parts,
        })
    }

    /// Original template source
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render against the given metadata
    pub fn render(&self, metadata: &UsernameMetadata) -> Result<String, RenderError> {
        let mut out = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                TemplatePart::Static(text) => out.push_str(text),
                TemplatePart::Action { pipeline, position } => {
                    let value = eval_pipeline(pipeline, metadata).map_err(|message| {
                        RenderError {
                            message,
                            position: *position,
                        }
                    })?;
                    // Writing into a String cannot fail.
                    let _ = write!(out, "{value}");
                }
            }
        }
        Ok(out)
    }
}

// ── Parsing ─────────────────────────────────────────────────────────────────

fn parse_template(source: &str) -> Result<Vec<TemplatePart>, ParseError> {
    let chars: Vec<char> = source.chars().collect();
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut pos = Position::start();
    let mut i = 0;
    let mut actions = 0;

    while i < chars.len() {
        if chars[i] == '{' && chars.get(i + 1) == Some(&'{') {
            let start = pos;
            let close = find_close(&chars, i + 2).ok_or_else(|| ParseError {
                message: "unclosed action".into(),
                position: start,
            })?;

            actions += 1;
            if actions > MAX_TEMPLATE_ACTIONS {
                return Err(ParseError {
                    message: format!("more than {MAX_TEMPLATE_ACTIONS} actions"),
                    position: start,
                });
            }

            if !text.is_empty() {
                parts.push(TemplatePart::Static(std::mem::take(&mut text)));
            }

            let body: String = chars[i + 2..close].iter().collect();
            let pipeline = parse_action(&body).map_err(|message| ParseError {
                message,
                position: start,
            })?;
            parts.push(TemplatePart::Action {
                pipeline,
                position: start,
            });

            for c in &chars[i..close + 2] {
                advance(&mut pos, *c);
            }
            i = close + 2;
        } else {
            text.push(chars[i]);
            advance(&mut pos, chars[i]);
            i += 1;
        }
    }

    if !text.is_empty() {
        parts.push(TemplatePart::Static(text));
    }
    Ok(parts)
}

fn advance(pos: &mut Position, c: char) {
    if c == '\n' {
        pos.line += 1;
        pos.column = 1;
    } else {
        pos.column += 1;
    }
}

/// Index of the `}}` closing the action whose body starts at `from`,
/// skipping over string literals.
fn find_close(chars: &[char], from: usize) -> Option<usize> {
    let mut i = from;
    let mut in_string = false;
    while i < chars.len() {
        match chars[i] {
            '\\' if in_string => i += 1,
            '"' => in_string = !in_string,
            '}' if !in_string && chars.get(i + 1) == Some(&'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Int(i64),
    Field(String),
    Ident(String),
    Pipe,
    LParen,
    RParen,
}

fn tokenize(body: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = body.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

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
                    match chars.get(i) {
                        None => return Err("unterminated string literal".into()),
                        Some('"') => break,
                        Some('\\') => {
                            match chars.get(i + 1) {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some('"') => s.push('"'),
                                Some('\\') => s.push('\\'),
                                Some(other) => {
                                    return Err(format!("unknown escape sequence '\\{other}'"));
                                }
                                None => return Err("unterminated string literal".into()),
                            }
                            i += 2;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            '.' => {
                let start = i + 1;
                i = start;
                while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                    i += 1;
                }
                if i == start {
                    return Err("expected field name after '.'".into());
                }
                tokens.push(Token::Field(chars[start..i].iter().collect()));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let start = i;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let n = literal
                    .parse::<i64>()
                    .map_err(|_| format!("invalid number '{literal}'"))?;
                tokens.push(Token::Int(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

fn parse_action(body: &str) -> Result<Pipeline, String> {
    let tokens = tokenize(body)?;
    let mut cursor = 0;
    let pipeline = parse_pipeline(&tokens, &mut cursor)?;
    if cursor != tokens.len() {
        return Err("unexpected ')'".into());
    }
    Ok(pipeline)
}

fn parse_pipeline(tokens: &[Token], cursor: &mut usize) -> Result<Pipeline, String> {
    let mut commands = Vec::new();
    let mut operands = Vec::new();

    while let Some(token) = tokens.get(*cursor) {
        match token {
            Token::RParen => break,
            Token::Pipe => {
                if operands.is_empty() {
                    return Err("missing command before '|'".into());
                }
                commands.push(Command {
                    operands: std::mem::take(&mut operands),
                });
                *cursor += 1;
            }
            Token::LParen => {
                *cursor += 1;
                let inner = parse_pipeline(tokens, cursor)?;
                if tokens.get(*cursor) != Some(&Token::RParen) {
                    return Err("unclosed '('".into());
                }
                *cursor += 1;
                operands.push(Operand::Group(inner));
            }
            Token::Str(s) => {
                operands.push(Operand::Str(s.clone()));
                *cursor += 1;
            }
            Token::Int(n) => {
                operands.push(Operand::Int(*n));
                *cursor += 1;
            }
            Token::Field(name) => {
                let field = Field::parse(name).ok_or_else(|| format!("unknown field '.{name}'"))?;
                operands.push(Operand::Field(field));
                *cursor += 1;
            }
            Token::Ident(name) => {
                let func =
                    Function::parse(name).ok_or_else(|| format!("function \"{name}\" not defined"))?;
                operands.push(Operand::Func(func));
                *cursor += 1;
            }
        }
    }

    if operands.is_empty() {
        return Err(if commands.is_empty() {
            "empty action".into()
        } else {
            "missing command after '|'".into()
        });
    }
    commands.push(Command { operands });
    Ok(Pipeline { commands })
}

// ── Evaluation ──────────────────────────────────────────────────────────────

fn eval_pipeline(pipeline: &Pipeline, metadata: &UsernameMetadata) -> Result<Value, String> {
    let mut piped: Option<Value> = None;
    for command in &pipeline.commands {
        piped = Some(eval_command(command, metadata, piped.take())?);
    }
    piped.ok_or_else(|| "empty pipeline".to_string())
}

fn eval_command(
    command: &Command,
    metadata: &UsernameMetadata,
    piped: Option<Value>,
) -> Result<Value, String> {
    let (head, rest) = command
        .operands
        .split_first()
        .ok_or_else(|| "empty command".to_string())?;

    let Operand::Func(func) = head else {
        if !rest.is_empty() || piped.is_some() {
            return Err("can't give argument to non-function".into());
        }
        return eval_operand(head, metadata);
    };

    let mut args = rest
        .iter()
        .map(|operand| eval_operand(operand, metadata))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(value) = piped {
        args.push(value);
    }
    call(*func, args)
}

fn eval_operand(operand: &Operand, metadata: &UsernameMetadata) -> Result<Value, String> {
    match operand {
        Operand::Str(s) => Ok(Value::Str(s.clone())),
        Operand::Int(n) => Ok(Value::Int(*n)),
        Operand::Field(Field::Type) => Ok(Value::Str(metadata.kind.clone())),
        Operand::Field(Field::DisplayName) => Ok(Value::Str(metadata.display_name.clone())),
        Operand::Field(Field::PolicyName) => Ok(Value::Str(metadata.policy_name.clone())),
        Operand::Func(func) => call(*func, Vec::new()),
        Operand::Group(pipeline) => eval_pipeline(pipeline, metadata),
    }
}

fn expect_arity(func: Function, args: &[Value], n: usize) -> Result<(), String> {
    if args.len() == n {
        Ok(())
    } else {
        Err(format!(
            "wrong number of args for {}: want {n} got {}",
            func.name(),
            args.len()
        ))
    }
}

fn as_len(func: Function, value: &Value) -> Result<usize, String> {
    match value {
        Value::Int(n) if *n >= 0 => Ok(*n as usize),
        other => Err(format!(
            "{}: expected non-negative integer, got '{other}'",
            func.name()
        )),
    }
}

fn call(func: Function, args: Vec<Value>) -> Result<Value, String> {
    match func {
        Function::Printf => {
            let (format, rest) = args
                .split_first()
                .ok_or_else(|| "wrong number of args for printf: want at least 1 got 0".to_string())?;
            let Value::Str(format) = format else {
                return Err("printf: format must be a string".into());
            };
            printf(format, rest).map(Value::Str)
        }
        Function::Truncate => {
            expect_arity(func, &args, 2)?;
            let max = as_len(func, &args[0])?;
            Ok(Value::Str(args[1].to_string().chars().take(max).collect()))
        }
        Function::TruncateSha256 => {
            expect_arity(func, &args, 2)?;
            let max = as_len(func, &args[0])?;
            if max <= 8 {
                return Err("truncate_sha256: length must be greater than 8".into());
            }
            let s = args[1].to_string();
            let chars: Vec<char> = s.chars().collect();
            if chars.len() <= max {
                return Ok(Value::Str(s));
            }
            let keep = max - 8;
            let head: String = chars[..keep].iter().collect();
            let tail: String = chars[keep..].iter().collect();
            let digest = hex::encode(Sha256::digest(tail.as_bytes()));
            Ok(Value::Str(format!("{head}{}", &digest[..8])))
        }
        Function::Uppercase => {
            expect_arity(func, &args, 1)?;
            Ok(Value::Str(args[0].to_string().to_uppercase()))
        }
        Function::Lowercase => {
            expect_arity(func, &args, 1)?;
            Ok(Value::Str(args[0].to_string().to_lowercase()))
        }
        Function::Replace => {
            expect_arity(func, &args, 3)?;
            let (old, new) = (args[0].to_string(), args[1].to_string());
            Ok(Value::Str(args[2].to_string().replace(&old, &new)))
        }
        Function::Random => {
            expect_arity(func, &args, 1)?;
            let n = as_len(func, &args[0])?;
            if n > MAX_USERNAME_LENGTH {
                return Err(format!("random: length {n} exceeds {MAX_USERNAME_LENGTH}"));
            }
            let s = (0..n)
                .map(|_| RANDOM_CHARSET[rand::random_range(0..RANDOM_CHARSET.len())] as char)
                .collect();
            Ok(Value::Str(s))
        }
        Function::UnixTime => {
            expect_arity(func, &args, 0)?;
            Ok(Value::Int(Utc::now().timestamp()))
        }
        Function::UnixTimeMillis => {
            expect_arity(func, &args, 0)?;
            Ok(Value::Int(Utc::now().timestamp_millis()))
        }
        Function::Timestamp => {
            expect_arity(func, &args, 1)?;
            let format = args[0].to_string();
            let mut out = String::new();
            write!(out, "{}", Utc::now().format(&format))
                .map_err(|_| format!("timestamp: invalid format '{format}'"))?;
            Ok(Value::Str(out))
        }
        Function::Uuid => {
            expect_arity(func, &args, 0)?;
            Ok(Value::Str(uuid::Uuid::new_v4().to_string()))
        }
        Function::Sha256 => {
            expect_arity(func, &args, 1)?;
            Ok(Value::Str(hex::encode(Sha256::digest(
                args[0].to_string().as_bytes(),
            ))))
        }
        Function::Base64 => {
            expect_arity(func, &args, 1)?;
            Ok(Value::Str(B64.encode(args[0].to_string().as_bytes())))
        }
    }
}

fn printf(format: &str, args: &[Value]) -> Result<String, String> {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut chars = format.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s' | 'v') => {
                let arg = args.next().ok_or("printf: missing argument")?;
                let _ = write!(out, "{arg}");
            }
            Some('d') => match args.next().ok_or("printf: missing argument")? {
                Value::Int(n) => {
                    let _ = write!(out, "{n}");
                }
                Value::Str(s) => return Err(format!("printf: %d given string '{s}'")),
            },
            Some(other) => return Err(format!("printf: unsupported verb '%{other}'")),
            None => return Err("printf: trailing '%'".into()),
        }
    }

    if args.next().is_some() {
        return Err("printf: too many arguments".into());
    }
    Ok(out)
}
