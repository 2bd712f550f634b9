//! Payload type alignment against the warehouse schema.
//!
//! Runs before every load. Payload columns absent from the schema are
//! dropped with a warning; schema columns absent from the payload are
//! appended with typed defaults; every cell is coerced to the column's
//! declared semantic type; the result is in schema column order.
//!
//! Alignment is a pure function of `(payload, schema)` and is idempotent:
//! `align(align(f)) == align(f)`.

use adsync_types::value::{parse_date, parse_timestamp};
use adsync_types::{Frame, SemanticType, TableSchema, Value};
use chrono::Utc;
use tracing::warn;

use crate::error::SinkError;

/// Column appended with the load wall time when the schema carries it and
/// the payload does not.
const ROW_LOADED_DATE: &str = "row_loaded_date";

/// Align a payload to the target schema.
///
/// # Errors
///
/// Returns [`SinkError::SchemaMismatch`] on the first cell that cannot be
/// coerced; nothing has been written at that point.
pub fn align(frame: &Frame, table: &str, schema: &TableSchema) -> Result<Frame, SinkError> {
    for col in frame.columns() {
        if schema.column(&col.name).is_none() {
            warn!(table, column = %col.name, "payload column not in schema, dropping");
        }
    }

    let rows = frame.num_rows();
    let mut aligned = Frame::new();
    for target in &schema.columns {
        let values = match frame.column(&target.name) {
            Some(col) => {
                let mut out = Vec::with_capacity(rows);
                for value in &col.values {
                    out.push(coerce(value, target.semantic_type).map_err(|detail| {
                        SinkError::SchemaMismatch {
                            table: table.to_string(),
                            column: target.name.clone(),
                            expected: target.semantic_type,
                            detail,
                        }
                    })?);
                }
                out
            }
            None => vec![default_value(&target.name, target.semantic_type); rows],
        };
        aligned
            .push_column(target.name.clone(), values)
            .expect("schema column names are unique");
    }
    Ok(aligned)
}

/// Default cell for a schema column missing from the payload: 0 for
/// numerics, the load wall time for `row_loaded_date`, null otherwise.
fn default_value(name: &str, ty: SemanticType) -> Value {
    match ty {
        SemanticType::Integer => Value::Int(0),
        SemanticType::Float => Value::Float(0.0),
        SemanticType::Timestamp if name == ROW_LOADED_DATE => {
            Value::Timestamp(Utc::now().naive_utc())
        }
        _ => Value::Null,
    }
}

/// Coerce one value to a semantic type. `Err` carries the human-readable
/// detail for the schema-mismatch error.
fn coerce(value: &Value, target: SemanticType) -> Result<Value, String> {
    match target {
        SemanticType::Integer => coerce_integer(value),
        SemanticType::Float => coerce_float(value),
        SemanticType::Boolean => coerce_boolean(value),
        SemanticType::Date => Ok(coerce_date(value)),
        SemanticType::Timestamp => Ok(coerce_timestamp(value)),
        SemanticType::String | SemanticType::Null => Ok(match value {
            Value::Null => Value::Null,
            Value::Str(s) => Value::Str(s.clone()),
            other => Value::Str(other.render()),
        }),
    }
}

fn coerce_integer(value: &Value) -> Result<Value, String> {
    if value.is_nan_like() {
        return Ok(Value::Int(0));
    }
    match value {
        Value::Int(v) => Ok(Value::Int(*v)),
        Value::Float(v) => Ok(Value::Int(*v as i64)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Str(s) => {
            let t = s.trim();
            if let Ok(v) = t.parse::<i64>() {
                Ok(Value::Int(v))
            } else if let Ok(v) = t.parse::<f64>() {
                Ok(Value::Int(v as i64))
            } else {
                Err(format!("cannot parse '{s}' as integer"))
            }
        }
        other => Err(format!("cannot coerce {} to integer", other.semantic_type())),
    }
}

fn coerce_float(value: &Value) -> Result<Value, String> {
    if value.is_nan_like() {
        return Ok(Value::Float(0.0));
    }
    match value {
        Value::Float(v) => Ok(Value::Float(*v)),
        Value::Int(v) => Ok(Value::Float(*v as f64)),
        Value::Bool(b) => Ok(Value::Float(f64::from(u8::from(*b)))),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| format!("cannot parse '{s}' as float")),
        other => Err(format!("cannot coerce {} to float", other.semantic_type())),
    }
}

fn coerce_boolean(value: &Value) -> Result<Value, String> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::Int(0) => Ok(Value::Bool(false)),
        Value::Int(1) => Ok(Value::Bool(true)),
        Value::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "f" | "0" | "no" => Ok(Value::Bool(false)),
            _ => Err(format!("cannot parse '{s}' as boolean")),
        },
        other => Err(format!("cannot coerce {} to boolean", other.semantic_type())),
    }
}

/// Invalid date inputs become null rather than failing the load.
fn coerce_date(value: &Value) -> Value {
    match value {
        Value::Date(d) => Value::Date(*d),
        Value::Timestamp(t) => Value::Date(t.date()),
        Value::Str(s) => parse_date(s).map_or(Value::Null, Value::Date),
        _ => Value::Null,
    }
}

fn coerce_timestamp(value: &Value) -> Value {
    match value {
        Value::Timestamp(t) => Value::Timestamp(*t),
        Value::Date(d) => d.and_hms_opt(0, 0, 0).map_or(Value::Null, Value::Timestamp),
        Value::Str(s) => parse_timestamp(s).map_or(Value::Null, Value::Timestamp),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adsync_types::ColumnSchema;
    use chrono::NaiveDate;

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnSchema::new("id", SemanticType::Integer).primary_key(),
            ColumnSchema::new("name", SemanticType::String),
            ColumnSchema::new("spend", SemanticType::Float),
            ColumnSchema::new("day", SemanticType::Date),
        ])
    }

    #[test]
    fn reorders_to_schema_order_and_drops_unknown_columns() {
        let frame = Frame::from_rows(
            ["name", "id", "extra"],
            vec![vec![Value::from("a"), Value::from("7"), Value::from("x")]],
        )
        .unwrap();
        let aligned = align(&frame, "t", &schema()).unwrap();
        assert_eq!(aligned.column_names(), vec!["id", "name", "spend", "day"]);
        assert_eq!(aligned.column("id").unwrap().values, vec![Value::Int(7)]);
    }

    #[test]
    fn missing_numeric_columns_default_to_zero_and_others_to_null() {
        let frame = Frame::from_rows(["id"], vec![vec![Value::Int(1)]]).unwrap();
        let aligned = align(&frame, "t", &schema()).unwrap();
        assert_eq!(aligned.column("spend").unwrap().values, vec![Value::Float(0.0)]);
        assert_eq!(aligned.column("name").unwrap().values, vec![Value::Null]);
        assert_eq!(aligned.column("day").unwrap().values, vec![Value::Null]);
    }

    #[test]
    fn nan_like_inputs_map_to_zero_for_numeric_targets() {
        let frame = Frame::from_rows(
            ["id", "spend"],
            vec![
                vec![Value::Null, Value::Str("nan".into())],
                vec![Value::Str("NaN".into()), Value::Float(f64::NAN)],
                vec![Value::Str(String::new()), Value::Null],
            ],
        )
        .unwrap();
        let aligned = align(&frame, "t", &schema()).unwrap();
        assert_eq!(
            aligned.column("id").unwrap().values,
            vec![Value::Int(0), Value::Int(0), Value::Int(0)]
        );
        assert_eq!(
            aligned.column("spend").unwrap().values,
            vec![Value::Float(0.0), Value::Float(0.0), Value::Float(0.0)]
        );
    }

    #[test]
    fn invalid_dates_become_null() {
        let frame = Frame::from_rows(
            ["id", "day"],
            vec![
                vec![Value::Int(1), Value::Str("2026-01-20".into())],
                vec![Value::Int(2), Value::Str("yesterday-ish".into())],
            ],
        )
        .unwrap();
        let aligned = align(&frame, "t", &schema()).unwrap();
        assert_eq!(
            aligned.column("day").unwrap().values,
            vec![
                Value::Date(NaiveDate::from_ymd_opt(2026, 1, 20).unwrap()),
                Value::Null,
            ]
        );
    }

    #[test]
    fn uncoercible_integer_fails_before_any_write() {
        let frame = Frame::from_rows(["id"], vec![vec![Value::Str("not-a-number".into())]]).unwrap();
        let err = align(&frame, "t", &schema()).unwrap_err();
        assert!(matches!(err, SinkError::SchemaMismatch { ref column, .. } if column == "id"));
    }

    #[test]
    fn align_is_idempotent() {
        let frame = Frame::from_rows(
            ["id", "name", "spend", "day"],
            vec![vec![
                Value::from("3"),
                Value::Int(42),
                Value::from("1.5"),
                Value::Str("2026-02-02 10:00:00".into()),
            ]],
        )
        .unwrap();
        let once = align(&frame, "t", &schema()).unwrap();
        let twice = align(&once, "t", &schema()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn row_loaded_date_defaults_to_wall_time() {
        let schema = TableSchema::new(vec![
            ColumnSchema::new("id", SemanticType::Integer),
            ColumnSchema::new("row_loaded_date", SemanticType::Timestamp),
        ]);
        let frame = Frame::from_rows(["id"], vec![vec![Value::Int(1)]]).unwrap();
        let aligned = align(&frame, "t", &schema).unwrap();
        assert!(matches!(
            aligned.column("row_loaded_date").unwrap().values[0],
            Value::Timestamp(_)
        ));
    }
}
