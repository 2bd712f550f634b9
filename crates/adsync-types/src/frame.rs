//! Tabular payload passed between extraction, processing, and the sink.
//!
//! A [`Frame`] is an ordered sequence of named columns with positional rows.
//! Column order is preserved end-to-end because the bulk-copy writer emits
//! cells in column order. All mutating operations go through `&mut self`;
//! processing steps take the frame by value and return the new one.

use std::collections::HashSet;

use crate::error::EtlError;
use crate::value::Value;

/// A named column of values.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

/// An ordered collection of equal-length named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<Column>,
    rows: usize,
}

impl Frame {
    /// An empty frame with no columns and no rows.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a frame from `(name, values)` pairs.
    ///
    /// # Errors
    ///
    /// Returns a data error if column lengths differ or a name repeats.
    pub fn from_columns(
        columns: impl IntoIterator<Item = (String, Vec<Value>)>,
    ) -> Result<Self, EtlError> {
        let mut frame = Self::new();
        for (name, values) in columns {
            frame.push_column(name, values)?;
        }
        Ok(frame)
    }

    /// Build a frame from column names and row-major data.
    ///
    /// # Errors
    ///
    /// Returns a data error if any row's width differs from the header.
    pub fn from_rows(
        names: impl IntoIterator<Item = impl Into<String>>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self, EtlError> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut columns: Vec<Vec<Value>> = names.iter().map(|_| Vec::with_capacity(rows.len())).collect();
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != names.len() {
                return Err(EtlError::data(
                    "ROW_WIDTH",
                    format!("row {i} has {} cells, expected {}", row.len(), names.len()),
                ));
            }
            for (col, cell) in columns.iter_mut().zip(row) {
                col.push(cell);
            }
        }
        Self::from_columns(names.into_iter().zip(columns))
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// True when the frame holds no rows (it may still carry columns).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Append a column on the right.
    ///
    /// # Errors
    ///
    /// Returns a data error if the name already exists or the length does
    /// not match the frame's row count (a column added to an empty frame
    /// sets the row count).
    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<Value>,
    ) -> Result<(), EtlError> {
        let name = name.into();
        if self.has_column(&name) {
            return Err(EtlError::data(
                "DUPLICATE_COLUMN",
                format!("column '{name}' already present"),
            ));
        }
        if self.columns.is_empty() {
            self.rows = values.len();
        } else if values.len() != self.rows {
            return Err(EtlError::data(
                "COLUMN_LENGTH",
                format!(
                    "column '{name}' has {} values, frame has {} rows",
                    values.len(),
                    self.rows
                ),
            ));
        }
        self.columns.push(Column { name, values });
        Ok(())
    }

    /// Append a column filled with a single repeated value.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Frame::push_column`].
    pub fn push_const_column(
        &mut self,
        name: impl Into<String>,
        value: Value,
    ) -> Result<(), EtlError> {
        let values = vec![value; self.rows];
        self.push_column(name, values)
    }

    /// Remove a column by name; missing columns are ignored.
    pub fn drop_column(&mut self, name: &str) {
        if let Some(idx) = self.column_index(name) {
            self.columns.remove(idx);
            if self.columns.is_empty() {
                self.rows = 0;
            }
        }
    }

    /// Rename a column in place; a missing old name is ignored.
    pub fn rename_column(&mut self, old: &str, new: &str) {
        if let Some(idx) = self.column_index(old) {
            self.columns[idx].name = new.to_string();
        }
    }

    /// Replace every value in a column through `f`; missing columns are a
    /// no-op so steps can be configured loosely across platforms.
    pub fn map_column(&mut self, name: &str, mut f: impl FnMut(&Value) -> Value) {
        if let Some(idx) = self.column_index(name) {
            for v in &mut self.columns[idx].values {
                *v = f(v);
            }
        }
    }

    /// Overwrite a single cell.
    ///
    /// # Panics
    ///
    /// Panics when the column or row index is out of bounds, matching slice
    /// indexing semantics.
    pub fn set_value(&mut self, col: usize, row: usize, value: Value) {
        self.columns[col].values[row] = value;
    }

    /// One row as a vector of value references, in column order.
    #[must_use]
    pub fn row(&self, idx: usize) -> Vec<&Value> {
        self.columns.iter().map(|c| &c.values[idx]).collect()
    }

    /// Owned copy of one row.
    #[must_use]
    pub fn row_owned(&self, idx: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.values[idx].clone()).collect()
    }

    /// Key tuple for a row over the given column indices.
    #[must_use]
    pub fn key_at(&self, row: usize, key_columns: &[usize]) -> Vec<Value> {
        key_columns
            .iter()
            .map(|&c| self.columns[c].values[row].clone())
            .collect()
    }

    /// Keep only rows whose index passes the predicate.
    pub fn retain_rows(&mut self, mut keep: impl FnMut(usize) -> bool) {
        let mask: Vec<bool> = (0..self.rows).map(|i| keep(i)).collect();
        for col in &mut self.columns {
            let mut idx = 0;
            col.values.retain(|_| {
                let kept = mask[idx];
                idx += 1;
                kept
            });
        }
        self.rows = mask.iter().filter(|&&k| k).count();
    }

    /// Drop exact duplicate rows, keeping the first occurrence.
    pub fn dedup_rows(&mut self) {
        let mut seen: HashSet<Vec<Value>> = HashSet::with_capacity(self.rows);
        let keep: Vec<bool> = (0..self.rows)
            .map(|i| seen.insert(self.row_owned(i)))
            .collect();
        self.retain_rows(|i| keep[i]);
    }

    /// Reorder and subset columns to the given name order. Names absent from
    /// the frame are skipped.
    pub fn select_columns(&mut self, order: &[String]) {
        let mut reordered = Vec::with_capacity(order.len());
        for name in order {
            if let Some(idx) = self.column_index(name) {
                reordered.push(self.columns[idx].clone());
            }
        }
        self.columns = reordered;
        if self.columns.is_empty() {
            self.rows = 0;
        }
    }

    /// Append another frame's rows. Column sets and order must match.
    ///
    /// # Errors
    ///
    /// Returns a data error on column mismatch.
    pub fn concat(&mut self, other: Frame) -> Result<(), EtlError> {
        if self.columns.is_empty() {
            *self = other;
            return Ok(());
        }
        if self.column_names() != other.column_names() {
            return Err(EtlError::data(
                "COLUMN_MISMATCH",
                format!(
                    "cannot concat frames with columns {:?} and {:?}",
                    self.column_names(),
                    other.column_names()
                ),
            ));
        }
        for (dst, src) in self.columns.iter_mut().zip(other.columns) {
            dst.values.extend(src.values);
        }
        self.rows += other.rows;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        Frame::from_rows(
            ["id", "name", "clicks"],
            vec![
                vec![Value::Int(1), Value::from("a"), Value::Int(10)],
                vec![Value::Int(2), Value::from("b"), Value::Int(20)],
                vec![Value::Int(1), Value::from("a"), Value::Int(10)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn from_rows_preserves_column_order() {
        let f = sample();
        assert_eq!(f.column_names(), vec!["id", "name", "clicks"]);
        assert_eq!(f.num_rows(), 3);
    }

    #[test]
    fn mismatched_row_width_is_rejected() {
        let err = Frame::from_rows(["a", "b"], vec![vec![Value::Int(1)]]).unwrap_err();
        assert_eq!(err.code, "ROW_WIDTH");
    }

    #[test]
    fn push_column_length_check() {
        let mut f = sample();
        let err = f.push_column("extra", vec![Value::Int(1)]).unwrap_err();
        assert_eq!(err.code, "COLUMN_LENGTH");
    }

    #[test]
    fn dedup_rows_keeps_first_occurrence() {
        let mut f = sample();
        f.dedup_rows();
        assert_eq!(f.num_rows(), 2);
        assert_eq!(f.column("id").unwrap().values, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn retain_rows_filters_all_columns() {
        let mut f = sample();
        f.retain_rows(|i| i != 1);
        assert_eq!(f.num_rows(), 2);
        assert_eq!(
            f.column("name").unwrap().values,
            vec![Value::from("a"), Value::from("a")]
        );
    }

    #[test]
    fn select_columns_reorders_and_drops_unknown() {
        let mut f = sample();
        f.select_columns(&["clicks".into(), "id".into(), "missing".into()]);
        assert_eq!(f.column_names(), vec!["clicks", "id"]);
        assert_eq!(f.num_rows(), 3);
    }

    #[test]
    fn concat_requires_matching_columns() {
        let mut f = sample();
        let other = Frame::from_rows(
            ["id", "name", "clicks"],
            vec![vec![Value::Int(9), Value::from("z"), Value::Int(1)]],
        )
        .unwrap();
        f.concat(other).unwrap();
        assert_eq!(f.num_rows(), 4);

        let bad = Frame::from_rows(["id"], vec![vec![Value::Int(1)]]).unwrap();
        assert!(f.concat(bad).is_err());
    }

    #[test]
    fn map_column_on_missing_column_is_noop() {
        let mut f = sample();
        f.map_column("nope", |_| Value::Null);
        assert_eq!(f.num_rows(), 3);
    }
}
