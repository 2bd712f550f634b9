//! Bulk-copy text format: serialization and the reverse parser.
//!
//! COPY text format rules:
//! - one row per line, cells tab-separated in column order
//! - NULL: `\N`
//! - strings: backslash-escape `\`, tab, newline, carriage return; strip NUL
//!   bytes
//! - booleans: `t` / `f`
//! - numbers: plain decimal, no locale separators
//!
//! `decode` reverses `encode` exactly for aligned payloads; the round trip is
//! part of the sink's contract and is covered by tests here.

use std::io::Write;

use adsync_types::{EtlError, Frame, SemanticType, TableSchema, Value};

use crate::error::SinkError;

pub const DELIMITER: u8 = b'\t';
pub const NULL_SENTINEL: &[u8] = b"\\N";

/// Format one value for COPY text format.
pub fn format_copy_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.extend_from_slice(NULL_SENTINEL),
        Value::Bool(b) => buf.push(if *b { b't' } else { b'f' }),
        Value::Int(v) => {
            let _ = write!(buf, "{v}");
        }
        Value::Float(v) => {
            if v.is_nan() {
                buf.extend_from_slice(b"NaN");
            } else if v.is_infinite() {
                if *v > 0.0 {
                    buf.extend_from_slice(b"Infinity");
                } else {
                    buf.extend_from_slice(b"-Infinity");
                }
            } else {
                let _ = write!(buf, "{v}");
            }
        }
        Value::Str(s) => {
            for byte in s.bytes() {
                match byte {
                    b'\\' => buf.extend_from_slice(b"\\\\"),
                    b'\t' => buf.extend_from_slice(b"\\t"),
                    b'\n' => buf.extend_from_slice(b"\\n"),
                    b'\r' => buf.extend_from_slice(b"\\r"),
                    0 => {}
                    _ => buf.push(byte),
                }
            }
        }
        Value::Date(d) => {
            let _ = write!(buf, "{}", d.format("%Y-%m-%d"));
        }
        Value::Timestamp(t) => {
            let _ = write!(buf, "{}", t.format("%Y-%m-%d %H:%M:%S%.f"));
        }
    }
}

/// Serialize an entire frame to COPY text format.
///
/// A pure function of the payload: cells are emitted in the frame's column
/// order, which the caller has already aligned to the target schema.
#[must_use]
pub fn encode(frame: &Frame) -> Vec<u8> {
    // Rough pre-size: 16 bytes per cell.
    let mut buf = Vec::with_capacity(frame.num_rows() * frame.num_columns() * 16);
    for row_idx in 0..frame.num_rows() {
        for (pos, col) in frame.columns().iter().enumerate() {
            if pos > 0 {
                buf.push(DELIMITER);
            }
            format_copy_value(&mut buf, &col.values[row_idx]);
        }
        buf.push(b'\n');
    }
    buf
}

/// Split one encoded line into raw cells, undoing the escape sequences.
/// `None` marks the null sentinel.
///
/// Raw tab bytes never occur inside an escaped cell (the writer emits them
/// as `\t`), so splitting on the delimiter before unescaping is safe.
fn split_line(line: &str) -> Vec<Option<String>> {
    line.split('\t')
        .map(|raw| {
            if raw == "\\N" {
                return None;
            }
            let mut cell = String::with_capacity(raw.len());
            let mut chars = raw.chars();
            while let Some(ch) = chars.next() {
                if ch == '\\' {
                    match chars.next() {
                        Some('t') => cell.push('\t'),
                        Some('n') => cell.push('\n'),
                        Some('r') => cell.push('\r'),
                        Some('\\') => cell.push('\\'),
                        Some(other) => cell.push(other),
                        None => {}
                    }
                } else {
                    cell.push(ch);
                }
            }
            Some(cell)
        })
        .collect()
}

fn decode_cell(text: Option<String>, ty: SemanticType) -> Result<Value, SinkError> {
    let Some(text) = text else {
        return Ok(Value::Null);
    };
    let parse_err = |detail: String| SinkError::Query(detail);
    match ty {
        SemanticType::String | SemanticType::Null => Ok(Value::Str(text)),
        SemanticType::Integer => text
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| parse_err(format!("bad integer cell '{text}': {e}"))),
        SemanticType::Float => match text.as_str() {
            "NaN" => Ok(Value::Float(f64::NAN)),
            "Infinity" => Ok(Value::Float(f64::INFINITY)),
            "-Infinity" => Ok(Value::Float(f64::NEG_INFINITY)),
            _ => text
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| parse_err(format!("bad float cell '{text}': {e}"))),
        },
        SemanticType::Boolean => match text.as_str() {
            "t" => Ok(Value::Bool(true)),
            "f" => Ok(Value::Bool(false)),
            _ => Err(parse_err(format!("bad boolean cell '{text}'"))),
        },
        SemanticType::Date => adsync_types::value::parse_date(&text)
            .map(Value::Date)
            .ok_or_else(|| parse_err(format!("bad date cell '{text}'"))),
        SemanticType::Timestamp => adsync_types::value::parse_timestamp(&text)
            .map(Value::Timestamp)
            .ok_or_else(|| parse_err(format!("bad timestamp cell '{text}'"))),
    }
}

/// Parse COPY text-format bytes back into a frame using the target schema
/// for cell types. Inverse of [`encode`] for aligned payloads.
///
/// # Errors
///
/// Returns a query error when a line's width or a cell's text does not match
/// the schema.
pub fn decode(bytes: &[u8], schema: &TableSchema) -> Result<Frame, SinkError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| SinkError::Query(format!("copy data is not UTF-8: {e}")))?;
    let mut rows = Vec::new();
    for line in text.split('\n') {
        if line.is_empty() {
            continue;
        }
        let cells = split_line(line);
        if cells.len() != schema.columns.len() {
            return Err(SinkError::Query(format!(
                "row has {} cells, schema has {} columns",
                cells.len(),
                schema.columns.len()
            )));
        }
        let mut row = Vec::with_capacity(cells.len());
        for (cell, col) in cells.into_iter().zip(&schema.columns) {
            row.push(decode_cell(cell, col.semantic_type)?);
        }
        rows.push(row);
    }
    Frame::from_rows(schema.columns.iter().map(|c| c.name.clone()), rows)
        .map_err(|e: EtlError| SinkError::Query(e.to_string()))
}
