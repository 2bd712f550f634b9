//! Pure key-set helpers shared by the warehouse and in-memory sinks:
//! anti-join dedupe for append mode and duplicate collapsing for increment
//! mode.

use std::collections::{HashMap, HashSet};

use adsync_types::{Frame, Value};

use crate::error::SinkError;

/// Resolve pk column names to indices in `frame`.
///
/// # Errors
///
/// Returns an integrity error naming the first pk column missing from the
/// payload.
pub fn key_indices(frame: &Frame, pk_columns: &[String]) -> Result<Vec<usize>, SinkError> {
    pk_columns
        .iter()
        .map(|name| {
            frame.column_index(name).ok_or_else(|| {
                SinkError::Integrity(format!("pk column '{name}' missing from payload"))
            })
        })
        .collect()
}

/// Collect the set of key tuples present in a frame.
#[must_use]
pub fn key_set(frame: &Frame, key_idx: &[usize]) -> HashSet<Vec<Value>> {
    (0..frame.num_rows())
        .map(|row| frame.key_at(row, key_idx))
        .collect()
}

/// Anti-join: drop payload rows whose key tuple already exists.
pub fn filter_new_rows(frame: &mut Frame, key_idx: &[usize], existing: &HashSet<Vec<Value>>) {
    let keep: Vec<bool> = (0..frame.num_rows())
        .map(|row| !existing.contains(&frame.key_at(row, key_idx)))
        .collect();
    frame.retain_rows(|i| keep[i]);
}

/// Collapse duplicate key tuples within one payload for increment mode:
/// increment columns are summed, every other column keeps the last seen
/// value. Keeps first-occurrence row order.
///
/// The batched UPDATE applies one delta per key, so the payload must carry
/// at most one row per key when it reaches the warehouse.
#[must_use]
pub fn collapse_increment_duplicates(
    frame: &Frame,
    key_idx: &[usize],
    increment_idx: &[usize],
) -> Frame {
    let mut order: Vec<Vec<Value>> = Vec::new();
    let mut merged: HashMap<Vec<Value>, Vec<Value>> = HashMap::new();

    for row in 0..frame.num_rows() {
        let key = frame.key_at(row, key_idx);
        match merged.get_mut(&key) {
            None => {
                order.push(key.clone());
                merged.insert(key, frame.row_owned(row));
            }
            Some(acc) => {
                for (col, cell) in frame.row_owned(row).into_iter().enumerate() {
                    if increment_idx.contains(&col) {
                        acc[col] = add_values(&acc[col], &cell);
                    } else {
                        acc[col] = cell;
                    }
                }
            }
        }
    }

    let rows: Vec<Vec<Value>> = order
        .into_iter()
        .map(|key| merged.remove(&key).expect("key recorded on first sight"))
        .collect();
    Frame::from_rows(frame.column_names().iter().map(ToString::to_string), rows)
        .expect("collapsed rows keep the source frame's width")
}

/// Numeric addition with null treated as zero; integer pairs stay integer.
fn add_values(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(x + y),
        (Value::Null, other) | (other, Value::Null) => other.clone(),
        _ => Value::Float(a.as_float().unwrap_or(0.0) + b.as_float().unwrap_or(0.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insights() -> Frame {
        Frame::from_rows(
            ["creative_id", "impressions", "clicks"],
            vec![
                vec![Value::Int(1), Value::Int(100), Value::Int(5)],
                vec![Value::Int(2), Value::Int(50), Value::Int(2)],
                vec![Value::Int(1), Value::Int(200), Value::Int(10)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn key_indices_reports_missing_pk_column() {
        let frame = insights();
        let err = key_indices(&frame, &["missing".into()]).unwrap_err();
        assert!(matches!(err, SinkError::Integrity(_)));
        let ok = key_indices(&frame, &["creative_id".into()]).unwrap();
        assert_eq!(ok, vec![0]);
    }

    #[test]
    fn filter_new_rows_drops_existing_keys() {
        let mut frame = insights();
        let existing: HashSet<Vec<Value>> = [vec![Value::Int(1)]].into_iter().collect();
        filter_new_rows(&mut frame, &[0], &existing);
        assert_eq!(frame.num_rows(), 1);
        assert_eq!(frame.column("creative_id").unwrap().values, vec![Value::Int(2)]);
    }

    #[test]
    fn collapse_sums_increment_columns_per_key() {
        let frame = insights();
        let collapsed = collapse_increment_duplicates(&frame, &[0], &[1, 2]);
        assert_eq!(collapsed.num_rows(), 2);
        assert_eq!(
            collapsed.column("impressions").unwrap().values,
            vec![Value::Int(300), Value::Int(50)]
        );
        assert_eq!(
            collapsed.column("clicks").unwrap().values,
            vec![Value::Int(15), Value::Int(2)]
        );
    }

    #[test]
    fn collapse_treats_null_as_zero() {
        let frame = Frame::from_rows(
            ["id", "spend"],
            vec![
                vec![Value::Int(1), Value::Null],
                vec![Value::Int(1), Value::Float(2.5)],
            ],
        )
        .unwrap();
        let collapsed = collapse_increment_duplicates(&frame, &[0], &[1]);
        assert_eq!(collapsed.column("spend").unwrap().values, vec![Value::Float(2.5)]);
    }
}
