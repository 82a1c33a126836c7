//! Word expansion.
//!
//! Each part of a word expands on its own to an [`Expansion`]: a list of
//! candidate strings plus markers for whitespace that was trimmed from
//! either end. [`fold`] then joins the per-part lists into final fields
//! without re-scanning the text, so an already expanded field is never
//! split a second time.

use super::ast::{NodeId, NodeKind, ParamOp};
use super::braceexpansion;
use super::devices::value_to_text;
use super::error::ShellError;
use super::executor::{run_substitution, Frame};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// Quoting context a word is expanded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Command arguments: brace expansion, field splitting, full unescaping.
    Default,
    /// Inside `"..."`: only `" \ $ `` and newline are unescaped.
    DoubleQuoted,
    /// Assignments, `[[ ]]`, redirect targets: one field, full unescaping,
    /// no brace expansion or splitting.
    Literal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionKind {
    /// Alternatives from brace expansion (or a single literal).
    Brace,
    /// Fields produced by splitting a substituted value.
    Split,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    pub values: Vec<String>,
    pub lead_ws: bool,
    pub trail_ws: bool,
    pub kind: ExpansionKind,
}

impl Expansion {
    pub fn single(text: impl Into<String>) -> Self {
        Self::alternatives(vec![text.into()])
    }

    pub fn alternatives(values: Vec<String>) -> Self {
        Self {
            values,
            lead_ws: false,
            trail_ws: false,
            kind: ExpansionKind::Brace,
        }
    }

    /// Split substituted text at whitespace.
    pub fn split(text: &str) -> Self {
        Self {
            values: text.split_whitespace().map(String::from).collect(),
            lead_ws: text.starts_with(char::is_whitespace),
            trail_ws: text.ends_with(char::is_whitespace),
            kind: ExpansionKind::Split,
        }
    }

    fn joined(&self) -> String {
        self.values.join(" ")
    }
}

/// Join per-part expansions into fields.
///
/// A part starts a new field when nothing has been output yet, when the
/// previous part ended in whitespace, or when it starts with whitespace.
/// Otherwise it is glued onto every brace alternative of the current word,
/// taking the cross product when the part has several alternatives itself.
pub fn fold(parts: Vec<Expansion>) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    // one list of fields per brace alternative; the last field of each is
    // still open for gluing
    let mut tracks: Vec<Vec<String>> = Vec::new();
    let mut break_next = false;

    for part in parts {
        if part.values.is_empty() {
            break_next |= part.lead_ws || part.trail_ws;
            continue;
        }
        let new_field = tracks.is_empty() || break_next || part.lead_ws;

        if new_field {
            fields.extend(tracks.drain(..).flatten());
            tracks = match part.kind {
                ExpansionKind::Brace => part.values.into_iter().map(|v| vec![v]).collect(),
                ExpansionKind::Split => vec![part.values],
            };
        } else {
            tracks = match part.kind {
                ExpansionKind::Brace => tracks
                    .into_iter()
                    .flat_map(|track| {
                        part.values.iter().map(move |value| glue(track.clone(), value, &[]))
                    })
                    .collect(),
                ExpansionKind::Split => {
                    let (first, rest) = part.values.split_at(1);
                    tracks
                        .into_iter()
                        .map(|track| glue(track, &first[0], rest))
                        .collect()
                }
            };
        }
        break_next = part.trail_ws;
    }
    fields.extend(tracks.into_iter().flatten());
    fields
}

/// Append `value` to the open field of `track`, then add `more` fields.
fn glue(mut track: Vec<String>, value: &str, more: &[String]) -> Vec<String> {
    if let Some(open) = track.last_mut() {
        open.push_str(value);
    }
    track.extend(more.iter().cloned());
    track
}

/// Remove backslash escapes according to `mode`.
pub fn unescape(text: &str, mode: Mode) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match (mode, chars.peek().copied()) {
            (_, None) => out.push('\\'),
            (Mode::DoubleQuoted, Some(next)) if !matches!(next, '"' | '\\' | '$' | '`' | '\n') => {
                out.push('\\');
            }
            // line continuation
            (_, Some('\n')) => {
                chars.next();
            }
            (_, Some(next)) => {
                chars.next();
                out.push(next);
            }
        }
    }
    out
}

fn literal(text: &str, mode: Mode) -> Expansion {
    // escaped text never brace-expands
    if mode == Mode::Default && !text.contains('\\') {
        return Expansion::alternatives(braceexpansion::expand(text));
    }
    Expansion::single(unescape(text, mode))
}

fn substituted(text: String, mode: Mode) -> Expansion {
    match mode {
        Mode::Default => Expansion::split(&text),
        Mode::DoubleQuoted | Mode::Literal => Expansion::single(text),
    }
}

type ExpandFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ShellError>> + 'a>>;

/// Expand word `id` to its final fields.
pub async fn expand_word(frame: &Frame, id: NodeId, mode: Mode) -> Result<Vec<String>, ShellError> {
    let parts = match frame.tree.kind(id) {
        NodeKind::Word { parts, .. } => parts.clone(),
        NodeKind::Unsupported { what } => return Err(ShellError::unsupported(what.clone(), 2)),
        other => {
            return Err(ShellError::Internal(format!(
                "expected a word, found {:?}",
                other
            )))
        }
    };

    let mut expansions = Vec::with_capacity(parts.len());
    for part in parts {
        expansions.push(expand_part(frame, part, mode).await?);
    }

    let fields = match mode {
        Mode::Default => fold(expansions),
        Mode::DoubleQuoted | Mode::Literal => {
            vec![expansions.iter().map(Expansion::joined).collect::<String>()]
        }
    };
    frame.tree.node(id).set_expanded(fields.join(" "));
    Ok(fields)
}

/// Expand word `id` to exactly one string.
pub async fn expand_single(frame: &Frame, id: NodeId) -> Result<String, ShellError> {
    let fields = expand_word(frame, id, Mode::Literal).await?;
    Ok(fields.concat())
}

fn expand_part(frame: &Frame, id: NodeId, mode: Mode) -> ExpandFuture<'_, Expansion> {
    Box::pin(async move {
        match frame.tree.kind(id) {
            NodeKind::Literal(text) => Ok(literal(text, mode)),
            NodeKind::SingleQuoted(text) => Ok(Expansion::single(text.clone())),
            NodeKind::DoubleQuoted { parts } => {
                let mut text = String::new();
                for part in parts.clone() {
                    let inner = expand_part(frame, part, Mode::DoubleQuoted).await?;
                    text.push_str(&inner.joined());
                }
                Ok(Expansion::single(text))
            }
            NodeKind::Param { .. } => {
                let text = expand_param(frame, id).await?;
                Ok(substituted(text, mode))
            }
            NodeKind::CommandSub { body, .. } => {
                let text = run_substitution(frame, *body).await?;
                Ok(substituted(text, mode))
            }
            NodeKind::Arithmetic(expr) => {
                Err(ShellError::unsupported(format!("$(({}))", expr), 2))
            }
            NodeKind::Unsupported { what } => Err(ShellError::unsupported(what.clone(), 2)),
            other => Err(ShellError::Internal(format!(
                "unexpected word part {:?}",
                other
            ))),
        }
    })
}

/// Value of a parameter before any operator is applied.
pub fn lookup_param(frame: &Frame, name: &str) -> Option<Value> {
    let session = &frame.session;
    let process = &frame.process;
    let positionals = || process.positionals();

    match name {
        "0" => Some(Value::from("sh")),
        "@" | "*" => Some(Value::from(positionals().join(" "))),
        "#" => Some(Value::from(positionals().len())),
        "?" => Some(Value::from(session.last_exit(process.background))),
        "$" => Some(Value::from(process.pid)),
        "!" => session.last_bg_pid().map(Value::from),
        "_" => session.terminal().last_value(),
        "-" => Some(Value::from("")),
        n if n.chars().all(|c| c.is_ascii_digit()) => {
            let index: usize = n.parse().ok()?;
            positionals().get(index.checked_sub(1)?).cloned().map(Value::from)
        }
        _ => session.lookup_var(process, name),
    }
}

async fn expand_param(frame: &Frame, id: NodeId) -> Result<String, ShellError> {
    let NodeKind::Param { name, op, word, .. } = frame.tree.kind(id) else {
        return Err(ShellError::Internal("expected a parameter".into()));
    };
    let value = lookup_param(frame, name);
    let text = value.as_ref().map(value_to_text);
    let unset_or_empty = |colon: bool| match &text {
        None => true,
        Some(t) => colon && t.is_empty(),
    };

    match op {
        None => Ok(text.unwrap_or_default()),
        Some(ParamOp::Default { colon }) => {
            if unset_or_empty(*colon) {
                operand(frame, *word).await
            } else {
                Ok(text.unwrap_or_default())
            }
        }
        Some(ParamOp::Assign { colon }) => {
            if unset_or_empty(*colon) {
                let assigned = operand(frame, *word).await?;
                frame
                    .session
                    .assign_var(&frame.process, name, Value::from(assigned.clone()));
                Ok(assigned)
            } else {
                Ok(text.unwrap_or_default())
            }
        }
        Some(ParamOp::Alternate { colon }) => {
            if unset_or_empty(*colon) {
                Ok(String::new())
            } else {
                operand(frame, *word).await
            }
        }
        Some(ParamOp::Length) => {
            let len = match &value {
                Some(Value::Array(items)) => items.len(),
                _ => text.map(|t| t.chars().count()).unwrap_or(0),
            };
            Ok(len.to_string())
        }
        Some(ParamOp::Other(op)) => Err(ShellError::unsupported(
            format!("${{{}{}}}", name, op),
            2,
        )),
    }
}

async fn operand(frame: &Frame, word: Option<NodeId>) -> Result<String, ShellError> {
    match word {
        Some(w) => expand_single(frame, w).await,
        None => Ok(String::new()),
    }
}
