//! Restricted value and label templates
//!
//! Templates are literal text with `{{ ... }}` actions. An action can only
//! project data out of the render context; there are no functions besides
//! `index`, no conditionals and no loops.
//!
//! # Syntax
//!
//! ```text
//! {{ .Payload }}                 whole payload
//! {{ .Payload.sensor.temp }}     field projection into a JSON payload
//! {{ .Payload.readings.0 }}      numeric steps index JSON arrays
//! {{ .Captures.0 }}              first capture group of the topic pattern
//! {{ index .Captures 0 }}        same, Go-template style
//! {{ index .Payload "a b" }}     keys that are not plain words
//! {{- .Payload -}}               trim whitespace around the action
//! ```

use serde_json::Value;
use thiserror::Error;

use super::payload::{ClassifiedPayload, RenderContext};

/// Errors raised while parsing a template
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// `{{` without a matching `}}`
    #[error("unclosed action starting at offset {offset}")]
    Unclosed { offset: usize },

    /// `{{ }}`
    #[error("empty action at offset {offset}")]
    EmptyAction { offset: usize },

    /// Field reference that does not start with `.Payload` or `.Captures`
    #[error("unknown field root '{root}', expected .Payload or .Captures")]
    UnknownRoot { root: String },

    /// Malformed field reference such as `.Payload..x`
    #[error("invalid field reference '{field}'")]
    InvalidField { field: String },

    /// Anything that is not a field reference or an `index` call
    #[error("unexpected token '{token}' in action at offset {offset}")]
    UnexpectedToken { token: String, offset: usize },

    /// Quoted string without closing quote
    #[error("unterminated string in action at offset {offset}")]
    UnterminatedString { offset: usize },

    /// Bad `index` call
    #[error("invalid index call at offset {offset}: {reason}")]
    InvalidIndex { offset: usize, reason: String },
}

/// Errors raised while rendering a template against a context
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Object does not contain the requested key
    #[error("missing key '{key}' in {field}")]
    MissingKey { field: String, key: String },

    /// Array or capture list is shorter than the requested index
    #[error("index {index} out of range in {field} (length {len})")]
    IndexOutOfRange {
        field: String,
        index: usize,
        len: usize,
    },

    /// Non-numeric step applied to an array or the capture list
    #[error("'{step}' is not a valid index in {field}")]
    InvalidIndex { field: String, step: String },

    /// Projection into a scalar value
    #[error("cannot access '{step}' on {kind} value in {field}")]
    NotIndexable {
        field: String,
        step: String,
        kind: &'static str,
    },

    /// Projection ended on a JSON null
    #[error("{field} is null")]
    NullValue { field: String },

    /// `{{ .Captures }}` without an index
    #[error("capture list must be indexed, e.g. .Captures.0")]
    CaptureList,
}

/// Result type for template rendering
pub type RenderResult<T> = Result<T, RenderError>;

/// Root of a field reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Root {
    Payload,
    Captures,
}

impl Root {
    fn as_str(&self) -> &'static str {
        match self {
            Root::Payload => ".Payload",
            Root::Captures => ".Captures",
        }
    }
}

/// A field reference with its projection steps
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldRef {
    root: Root,
    steps: Vec<String>,
}

impl FieldRef {
    /// Human readable path, used in render errors
    fn describe(&self, upto: usize) -> String {
        let mut out = self.root.as_str().to_string();
        for step in &self.steps[..upto] {
            out.push('.');
            out.push_str(step);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(FieldRef),
}

/// A compiled template
///
/// Parsing happens once at rule compilation; rendering is a pure function
/// of the template and the render context.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template string
    ///
    /// # Errors
    ///
    /// Returns a `TemplateError` describing the first syntax problem found.
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;
        let mut trim_next = false;

        loop {
            let Some(start) = rest.find("{{") else {
                let literal = if trim_next { rest.trim_start() } else { rest };
                if !literal.is_empty() {
                    segments.push(Segment::Literal(literal.to_string()));
                }
                break;
            };

            let mut literal = &rest[..start];
            if trim_next {
                literal = literal.trim_start();
            }

            let after_open = &rest[start + 2..];
            let trim_left = after_open.starts_with('-')
                && after_open[1..].starts_with(|c: char| c.is_whitespace());
            if trim_left {
                literal = literal.trim_end();
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(literal.to_string()));
            }

            let body_start = usize::from(trim_left);
            let body_all = &after_open[body_start..];
            let close = body_all.find("}}").ok_or(TemplateError::Unclosed {
                offset: offset + start,
            })?;

            let mut body = &body_all[..close];
            trim_next = false;
            if let Some(stripped) = body.strip_suffix('-') {
                if stripped.ends_with(|c: char| c.is_whitespace()) {
                    body = stripped;
                    trim_next = true;
                }
            }

            segments.push(Segment::Field(parse_action(body, offset + start)?));

            let consumed = start + 2 + body_start + close + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The original template text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render the template against a context
    ///
    /// # Errors
    ///
    /// Fails when any action cannot be resolved in the context. Rendering
    /// stops at the first failing action.
    pub fn render(&self, ctx: &RenderContext<'_>) -> RenderResult<String> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(field) => out.push_str(&resolve(field, ctx)?),
            }
        }
        Ok(out)
    }
}

impl std::fmt::Display for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
}

fn tokenize(body: &str, offset: usize) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = body.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '"' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some(other) => value.push(other),
                        None => break,
                    },
                    '"' => {
                        closed = true;
                        break;
                    }
                    other => value.push(other),
                }
            }
            if !closed {
                return Err(TemplateError::UnterminatedString { offset });
            }
            tokens.push(Token::Quoted(value));
            continue;
        }

        let mut word = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            word.push(c);
            chars.next();
        }
        tokens.push(Token::Word(word));
    }

    Ok(tokens)
}

fn parse_action(body: &str, offset: usize) -> Result<FieldRef, TemplateError> {
    let tokens = tokenize(body, offset)?;
    let mut iter = tokens.into_iter();

    let first = match iter.next() {
        Some(Token::Word(w)) => w,
        Some(Token::Quoted(s)) => {
            return Err(TemplateError::UnexpectedToken {
                token: format!("\"{}\"", s),
                offset,
            })
        }
        None => return Err(TemplateError::EmptyAction { offset }),
    };

    if first == "index" {
        let mut field = match iter.next() {
            Some(Token::Word(w)) if w.starts_with('.') => parse_field(&w)?,
            _ => {
                return Err(TemplateError::InvalidIndex {
                    offset,
                    reason: "first argument must be a field reference".to_string(),
                })
            }
        };

        let mut args = 0;
        for token in iter {
            let step = match token {
                Token::Quoted(s) => s,
                Token::Word(w) if !w.is_empty() && w.chars().all(|c| c.is_ascii_digit()) => w,
                Token::Word(w) => {
                    return Err(TemplateError::InvalidIndex {
                        offset,
                        reason: format!("'{}' is neither an integer nor a quoted string", w),
                    })
                }
            };
            field.steps.push(step);
            args += 1;
        }

        if args == 0 {
            return Err(TemplateError::InvalidIndex {
                offset,
                reason: "at least one key or position is required".to_string(),
            });
        }

        return Ok(field);
    }

    if !first.starts_with('.') {
        return Err(TemplateError::UnexpectedToken {
            token: first,
            offset,
        });
    }

    let field = parse_field(&first)?;

    if let Some(extra) = iter.next() {
        let token = match extra {
            Token::Word(w) => w,
            Token::Quoted(s) => format!("\"{}\"", s),
        };
        return Err(TemplateError::UnexpectedToken { token, offset });
    }

    Ok(field)
}

fn parse_field(word: &str) -> Result<FieldRef, TemplateError> {
    let mut parts = word[1..].split('.');

    let root = match parts.next().unwrap_or_default() {
        "Payload" => Root::Payload,
        "Captures" => Root::Captures,
        other => {
            return Err(TemplateError::UnknownRoot {
                root: format!(".{}", other),
            })
        }
    };

    let steps: Vec<String> = parts.map(str::to_string).collect();
    if steps.iter().any(String::is_empty) {
        return Err(TemplateError::InvalidField {
            field: word.to_string(),
        });
    }

    Ok(FieldRef { root, steps })
}

fn resolve(field: &FieldRef, ctx: &RenderContext<'_>) -> RenderResult<String> {
    match field.root {
        Root::Captures => resolve_capture(field, &ctx.captures),
        Root::Payload => resolve_payload(field, ctx.payload),
    }
}

fn resolve_capture(field: &FieldRef, captures: &[String]) -> RenderResult<String> {
    let Some(step) = field.steps.first() else {
        return Err(RenderError::CaptureList);
    };

    let index: usize = step.parse().map_err(|_| RenderError::InvalidIndex {
        field: field.describe(0),
        step: step.clone(),
    })?;

    let capture = captures
        .get(index)
        .ok_or_else(|| RenderError::IndexOutOfRange {
            field: field.describe(0),
            index,
            len: captures.len(),
        })?;

    if let Some(step) = field.steps.get(1) {
        return Err(RenderError::NotIndexable {
            field: field.describe(1),
            step: step.clone(),
            kind: "capture",
        });
    }

    Ok(capture.clone())
}

fn resolve_payload(field: &FieldRef, payload: &ClassifiedPayload) -> RenderResult<String> {
    let map = match payload {
        ClassifiedPayload::Structured(map) => map,
        ClassifiedPayload::Number(n) => {
            return match field.steps.first() {
                None => Ok(n.to_string()),
                Some(step) => Err(RenderError::NotIndexable {
                    field: field.describe(0),
                    step: step.clone(),
                    kind: "number",
                }),
            }
        }
        ClassifiedPayload::Text(s) => {
            return match field.steps.first() {
                None => Ok(s.clone()),
                Some(step) => Err(RenderError::NotIndexable {
                    field: field.describe(0),
                    step: step.clone(),
                    kind: "text",
                }),
            }
        }
    };

    let Some(first) = field.steps.first() else {
        return Ok(Value::Object(map.clone()).to_string());
    };

    let mut current = map.get(first).ok_or_else(|| RenderError::MissingKey {
        field: field.describe(0),
        key: first.clone(),
    })?;

    for (i, step) in field.steps.iter().enumerate().skip(1) {
        current = step_into(current, step, || field.describe(i))?;
    }

    render_value(current, || field.describe(field.steps.len()))
}

fn step_into<'v>(
    value: &'v Value,
    step: &str,
    describe: impl Fn() -> String,
) -> RenderResult<&'v Value> {
    match value {
        Value::Object(map) => map.get(step).ok_or_else(|| RenderError::MissingKey {
            field: describe(),
            key: step.to_string(),
        }),
        Value::Array(items) => {
            let index: usize = step.parse().map_err(|_| RenderError::InvalidIndex {
                field: describe(),
                step: step.to_string(),
            })?;
            items.get(index).ok_or_else(|| RenderError::IndexOutOfRange {
                field: describe(),
                index,
                len: items.len(),
            })
        }
        other => Err(RenderError::NotIndexable {
            field: describe(),
            step: step.to_string(),
            kind: json_kind(other),
        }),
    }
}

fn render_value(value: &Value, describe: impl Fn() -> String) -> RenderResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Err(RenderError::NullValue { field: describe() }),
        other => Ok(other.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
