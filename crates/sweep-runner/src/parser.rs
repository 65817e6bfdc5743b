use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use tracing::{trace, warn};

use crate::error::IngestError;
use crate::literal::{parse_literal, LiteralError};
use crate::schema::TabularSchema;

pub type Record = Map<String, Value>;

pub const FILE_COLUMN: &str = "file";
pub const POSITIONAL_KEY: &str = "";

const NON_FINITE_MARKERS: [&str; 2] = ["inf", "nan"];
const NON_FINITE_REPLACEMENT: &str = "-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    Syntax,
    Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub line: usize,
    pub reason: String,
}

impl ParseError {
    fn value(line: usize, reason: impl Into<String>) -> Self {
        Self {
            kind: ParseErrorKind::Value,
            line,
            reason: reason.into(),
        }
    }

    fn from_literal(line: usize, err: LiteralError) -> Self {
        match err {
            LiteralError::Syntax(reason) => Self {
                kind: ParseErrorKind::Syntax,
                line,
                reason,
            },
            LiteralError::Value(reason) => Self::value(line, reason),
        }
    }

    pub fn at(self, path: &Path) -> IngestError {
        let reason = format!("line {}: {}", self.line, self.reason);
        match self.kind {
            ParseErrorKind::Syntax => IngestError::SyntaxMalformed {
                path: path.to_path_buf(),
                reason,
            },
            ParseErrorKind::Value => IngestError::ValueMalformed {
                path: path.to_path_buf(),
                reason,
            },
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatOutput {
    pub header: Record,
    /// Body pairs with the header fields merged over them.
    pub data: Record,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TabularOutput {
    pub header: Record,
    pub rows: Vec<Record>,
}

pub fn parse_header(line: &str, file_id: u64) -> Result<Record, ParseError> {
    let mut header = match parse_literal(line).map_err(|e| ParseError::from_literal(1, e))? {
        Value::Object(map) => map,
        other => {
            return Err(ParseError::value(
                1,
                format!("header must be a mapping, found {}", kind_name(&other)),
            ))
        }
    };
    header.remove(POSITIONAL_KEY);
    header.insert(FILE_COLUMN.to_string(), Value::from(file_id));
    Ok(header)
}

/// Interpret the value side of a `key: value` body line.
///
/// `inf` and `nan` become `-1`. A well-formed expression that is not a plain
/// literal is kept as the trimmed text; text that does not tokenize fails.
pub fn parse_flat_value(raw: &str, line: usize) -> Result<Value, ParseError> {
    let text = raw.trim();
    let text = if NON_FINITE_MARKERS.contains(&text) {
        NON_FINITE_REPLACEMENT
    } else {
        text
    };
    match parse_literal(text) {
        Ok(value) => Ok(value),
        Err(LiteralError::Value(_)) => Ok(Value::String(text.to_string())),
        Err(err) => Err(ParseError::from_literal(line, err)),
    }
}

pub fn parse_flat(text: &str, file_id: u64) -> Result<Option<FlatOutput>, ParseError> {
    let mut lines = text.lines();
    let header = match lines.next() {
        Some(first) => parse_header(first, file_id)?,
        None => return Ok(None),
    };

    let mut data = Record::new();
    for (idx, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let line_no = idx + 2;
        let value = parse_flat_value(value, line_no)?;
        trace!(file = file_id, line = line_no, key, %value, "body pair");
        data.insert(key.to_string(), value);
    }
    for (key, value) in &header {
        data.insert(key.clone(), value.clone());
    }
    Ok(Some(FlatOutput { header, data }))
}

pub fn parse_tabular(
    text: &str,
    file_id: u64,
    schema: &TabularSchema,
) -> Result<Option<TabularOutput>, ParseError> {
    let mut lines = text.lines();
    let header = match lines.next() {
        Some(first) => parse_header(first, file_id)?,
        None => return Ok(None),
    };

    let mut rows = Vec::new();
    for (idx, line) in lines.enumerate() {
        let line_no = idx + 2;
        if line.trim().is_empty() {
            continue;
        }
        let values = match parse_literal(line).map_err(|e| ParseError::from_literal(line_no, e))? {
            Value::Array(values) => values,
            other => {
                return Err(ParseError::value(
                    line_no,
                    format!("expected a tuple row, found {}", kind_name(&other)),
                ))
            }
        };
        if values.len() != schema.columns.len() {
            if schema.strict_arity {
                return Err(ParseError::value(
                    line_no,
                    format!(
                        "row has {} values but {} columns are declared",
                        values.len(),
                        schema.columns.len()
                    ),
                ));
            }
            warn!(
                file = file_id,
                line = line_no,
                values = values.len(),
                columns = schema.columns.len(),
                "row arity does not match declared columns"
            );
        }
        let mut row: Record = schema
            .column_names()
            .map(str::to_string)
            .zip(values)
            .collect();
        row.insert(FILE_COLUMN.to_string(), Value::from(file_id));
        rows.push(row);
    }
    Ok(Some(TabularOutput { header, rows }))
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "none",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}
