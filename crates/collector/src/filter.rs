//! A small jq subset for post-processing fetched objects.
//!
//! Supported: identity `.`, field access (`.a.b`, `."key"`, `.["key"]`),
//! array indexing (`.[0]`, negative indices count from the end), iteration
//! (`.[]`, `.items[]`), `empty`, and assignment of a JSON literal
//! (`.kind="KubeletConfiguration"`). Stages are joined with `|`.

use apicollect_common::{Error, Result};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Appended to the warning recorded when a filter yields extra results.
pub const MORE_THAN_ONE: &str = "more than one object returned from the filter";

/// Largest array index an assignment may grow an array to.
const MAX_ASSIGN_INDEX: i64 = 536_870_912;

/// Error from parsing or running a filter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("syntax error at offset {offset}: {reason}")]
    Syntax { offset: usize, reason: String },

    #[error("{0}")]
    Runtime(String),

    #[error("couldn't get filtered object")]
    NoResult,
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Field(String),
    Index(i64),
    Iterate,
}

#[derive(Debug, Clone, PartialEq)]
enum Stage {
    Empty,
    Path(Vec<Step>),
    Assign(Vec<Step>, Value),
}

/// A parsed filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    stages: Vec<Stage>,
}

impl Filter {
    pub fn parse(source: &str) -> std::result::Result<Self, FilterError> {
        let mut stages = Vec::new();
        for (offset, stage) in split_outside_strings(source, '|') {
            stages.push(parse_stage(stage, offset)?);
        }
        Ok(Self { stages })
    }

    /// Run the filter and return every value it produces, in order.
    pub fn run(&self, input: Value) -> std::result::Result<Vec<Value>, FilterError> {
        let mut values = vec![input];
        for stage in &self.stages {
            let mut next = Vec::new();
            for value in values {
                match stage {
                    Stage::Empty => {}
                    Stage::Path(steps) => next.extend(select(value, steps)?),
                    Stage::Assign(steps, literal) => {
                        let mut value = value;
                        assign(&mut value, steps, literal)?;
                        next.push(value);
                    }
                }
            }
            values = next;
        }
        Ok(values)
    }
}

/// A filtered object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filtered {
    /// First result, compact JSON.
    pub body: Vec<u8>,
    /// Whether the filter produced more than one result.
    pub extra_results: bool,
}

/// Run `filter` over the JSON document `raw`.
///
/// The filter must produce at least one value; only the first is kept.
pub fn apply_filter(raw: &[u8], filter: &str) -> Result<Filtered> {
    let parsed = Filter::parse(filter).map_err(|e| filter_error(filter, e))?;
    let input: Value = serde_json::from_slice(raw)?;

    let mut results = parsed
        .run(input)
        .map_err(|e| filter_error(filter, e))?
        .into_iter();
    let first = results.next().ok_or_else(|| {
        debug!("No result from filter '{}'", filter);
        filter_error(filter, FilterError::NoResult)
    })?;

    Ok(Filtered {
        body: serde_json::to_vec(&first)?,
        extra_results: results.next().is_some(),
    })
}

/// Warning recorded when a filter yields more than one result.
pub fn extra_results_warning(filter: &str) -> String {
    format!(
        "Skipping extra results from filter '{}': {}",
        filter, MORE_THAN_ONE
    )
}

fn filter_error(filter: &str, err: FilterError) -> Error {
    Error::Filter {
        filter: filter.to_string(),
        reason: err.to_string(),
    }
}

fn select(value: Value, steps: &[Step]) -> std::result::Result<Vec<Value>, FilterError> {
    let mut values = vec![value];
    for step in steps {
        let mut next = Vec::with_capacity(values.len());
        for value in values {
            match step {
                Step::Field(key) => next.push(match value {
                    Value::Object(mut map) => map.remove(key).unwrap_or(Value::Null),
                    Value::Null => Value::Null,
                    other => {
                        return Err(FilterError::Runtime(format!(
                            "cannot index {} with \"{}\"",
                            type_name(&other),
                            key
                        )))
                    }
                }),
                Step::Index(index) => next.push(match value {
                    Value::Array(mut items) => match resolve_index(*index, items.len()) {
                        Some(i) => items.swap_remove(i),
                        None => Value::Null,
                    },
                    Value::Null => Value::Null,
                    other => {
                        return Err(FilterError::Runtime(format!(
                            "cannot index {} with number",
                            type_name(&other)
                        )))
                    }
                }),
                Step::Iterate => match value {
                    Value::Array(items) => next.extend(items),
                    Value::Object(map) => next.extend(map.into_iter().map(|(_, v)| v)),
                    other => {
                        return Err(FilterError::Runtime(format!(
                            "cannot iterate over {}",
                            type_name(&other)
                        )))
                    }
                },
            }
        }
        values = next;
    }
    Ok(values)
}

fn assign(target: &mut Value, steps: &[Step], literal: &Value) -> std::result::Result<(), FilterError> {
    let Some((step, rest)) = steps.split_first() else {
        *target = literal.clone();
        return Ok(());
    };

    match step {
        Step::Field(key) => {
            if target.is_null() {
                *target = Value::Object(serde_json::Map::new());
            }
            match target {
                Value::Object(map) => {
                    assign(map.entry(key.clone()).or_insert(Value::Null), rest, literal)
                }
                other => Err(FilterError::Runtime(format!(
                    "cannot index {} with \"{}\"",
                    type_name(other),
                    key
                ))),
            }
        }
        Step::Index(index) => {
            if target.is_null() {
                *target = Value::Array(Vec::new());
            }
            match target {
                Value::Array(items) => {
                    let i = match resolve_index(*index, items.len()) {
                        Some(i) => i,
                        None if *index > MAX_ASSIGN_INDEX => {
                            return Err(FilterError::Runtime(
                                "array index too large".to_string(),
                            ))
                        }
                        None if *index >= 0 => {
                            let i = *index as usize;
                            items.resize(i + 1, Value::Null);
                            i
                        }
                        None => {
                            return Err(FilterError::Runtime(
                                "out of bounds negative array index".to_string(),
                            ))
                        }
                    };
                    assign(&mut items[i], rest, literal)
                }
                other => Err(FilterError::Runtime(format!(
                    "cannot index {} with number",
                    type_name(other)
                ))),
            }
        }
        Step::Iterate => match target {
            Value::Array(items) => items
                .iter_mut()
                .try_for_each(|item| assign(item, rest, literal)),
            Value::Object(map) => map
                .values_mut()
                .try_for_each(|item| assign(item, rest, literal)),
            Value::Null => Ok(()),
            other => Err(FilterError::Runtime(format!(
                "cannot iterate over {}",
                type_name(other)
            ))),
        },
    }
}

fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let i = if index < 0 {
        len as i64 + index
    } else {
        index
    };
    (0..len as i64).contains(&i).then_some(i as usize)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Split on `sep` wherever it isn't inside a string literal, keeping each
/// part's byte offset into `source`.
fn split_outside_strings(source: &str, sep: char) -> Vec<(usize, &str)> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in source.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
        } else if c == '"' {
            in_string = true;
        } else if c == sep {
            parts.push((start, &source[start..i]));
            start = i + c.len_utf8();
        }
    }
    parts.push((start, &source[start..]));
    parts
}

fn parse_stage(stage: &str, offset: usize) -> std::result::Result<Stage, FilterError> {
    let trimmed = stage.trim();
    let offset = offset + (stage.len() - stage.trim_start().len());

    if trimmed == "empty" {
        return Ok(Stage::Empty);
    }

    let parts = split_outside_strings(trimmed, '=');
    match parts.as_slice() {
        [(_, path)] => Ok(Stage::Path(parse_path(path.trim_end(), offset)?)),
        [(_, lhs), (rhs_offset, rhs)] => {
            if rhs.starts_with('=') || lhs.ends_with(&['!', '<', '>'][..]) {
                return Err(syntax(offset + rhs_offset, "comparisons are not supported"));
            }
            let steps = parse_path(lhs.trim_end(), offset)?;
            let literal: Value = serde_json::from_str(rhs.trim()).map_err(|e| {
                syntax(
                    offset + rhs_offset,
                    format!("expected a JSON literal: {}", e),
                )
            })?;
            Ok(Stage::Assign(steps, literal))
        }
        _ => Err(syntax(offset, "chained assignment is not supported")),
    }
}

fn syntax(offset: usize, reason: impl Into<String>) -> FilterError {
    FilterError::Syntax {
        offset,
        reason: reason.into(),
    }
}

fn parse_path(path: &str, offset: usize) -> std::result::Result<Vec<Step>, FilterError> {
    let bytes = path.as_bytes();
    if bytes.first() != Some(&b'.') {
        return Err(syntax(offset, format!("expected a path, found '{}'", path)));
    }

    let mut steps = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        match bytes[pos] {
            b'.' => {
                pos += 1;
                match bytes.get(pos) {
                    None => {
                        if !steps.is_empty() {
                            return Err(syntax(offset + pos, "trailing '.'"));
                        }
                    }
                    Some(b'"') => {
                        let (key, end) = parse_string(path, pos, offset)?;
                        steps.push(Step::Field(key));
                        pos = end;
                    }
                    Some(b'[') => {}
                    Some(c) if c.is_ascii_alphabetic() || *c == b'_' => {
                        let end = bytes[pos..]
                            .iter()
                            .position(|c| !(c.is_ascii_alphanumeric() || *c == b'_'))
                            .map_or(bytes.len(), |n| pos + n);
                        steps.push(Step::Field(path[pos..end].to_string()));
                        pos = end;
                    }
                    Some(_) => return Err(syntax(offset + pos, "expected a field name")),
                }
            }
            b'[' => {
                let (step, end) = parse_bracket(path, pos, offset)?;
                steps.push(step);
                pos = end;
            }
            _ => {
                return Err(syntax(
                    offset + pos,
                    format!("unexpected '{}'", &path[pos..]),
                ))
            }
        }
    }
    Ok(steps)
}

/// Parse `[]`, `["key"]` or `[N]` starting at the `[` at `pos`.
fn parse_bracket(
    path: &str,
    pos: usize,
    offset: usize,
) -> std::result::Result<(Step, usize), FilterError> {
    let inner_start = pos + 1;
    let rest = &path[inner_start..];
    let inner = rest.trim_start();
    let inner_start = inner_start + (rest.len() - inner.len());

    if inner.starts_with(']') {
        return Ok((Step::Iterate, inner_start + 1));
    }

    let (step, after) = if inner.starts_with('"') {
        let (key, end) = parse_string(path, inner_start, offset)?;
        (Step::Field(key), end)
    } else {
        let len = inner
            .find(|c: char| !(c.is_ascii_digit() || c == '-'))
            .unwrap_or(inner.len());
        let index: i64 = inner[..len]
            .parse()
            .map_err(|_| syntax(offset + inner_start, "expected an index or a string key"))?;
        (Step::Index(index), inner_start + len)
    };

    let tail = &path[after..];
    let close = after + (tail.len() - tail.trim_start().len());
    if path[close..].starts_with(']') {
        Ok((step, close + 1))
    } else {
        Err(syntax(offset + close, "expected ']'"))
    }
}

/// Parse the JSON string literal starting at the quote at `pos`.
fn parse_string(
    path: &str,
    pos: usize,
    offset: usize,
) -> std::result::Result<(String, usize), FilterError> {
    let mut escaped = false;
    for (i, c) in path[pos + 1..].char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => {
                let end = pos + 1 + i + 1;
                let key: String = serde_json::from_str(&path[pos..end])
                    .map_err(|e| syntax(offset + pos, format!("bad string literal: {}", e)))?;
                return Ok((key, end));
            }
            _ => {}
        }
    }
    Err(syntax(offset + pos, "unterminated string"))
}
