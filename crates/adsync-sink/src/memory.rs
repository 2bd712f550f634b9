//! In-memory [`DataSink`] with full load-mode semantics.
//!
//! Backs the engine's integration tests and local fixture runs with the
//! same append/replace/upsert/increment behavior the warehouse sink
//! provides, minus the SQL engine: driver-key queries are answered from
//! registered canned results matched by substring.

use std::collections::BTreeMap;

use adsync_types::{Frame, LoadMode, SemanticType, TableSchema, Value};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;

use crate::align::align;
use crate::dedupe::{collapse_increment_duplicates, filter_new_rows, key_indices, key_set};
use crate::error::SinkError;
use crate::DataSink;

const LAST_UPDATED_COLUMN: &str = "last_updated_date";

#[derive(Debug, Clone)]
struct MemTable {
    schema: TableSchema,
    frame: Frame,
}

#[derive(Default)]
struct MemoryState {
    tables: BTreeMap<String, MemTable>,
    canned_queries: Vec<(String, Frame)>,
    closed: bool,
}

/// In-memory sink. Tables must be registered with a schema before loading,
/// mirroring the warehouse rule that schemas come from the catalog;
/// [`MemorySink::with_auto_create`] relaxes that for local fixture runs.
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
    test_mode: bool,
    test_suffix: String,
    auto_create: bool,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            test_mode: false,
            test_suffix: "_test".to_string(),
            auto_create: false,
        }
    }

    /// Sink that enforces test-table isolation: only `*{suffix}` targets may
    /// be written.
    #[must_use]
    pub fn with_test_mode(suffix: &str) -> Self {
        Self {
            test_mode: true,
            test_suffix: suffix.to_string(),
            ..Self::new()
        }
    }

    /// Sink that creates missing tables from the first payload's shape.
    #[must_use]
    pub fn with_auto_create() -> Self {
        Self {
            auto_create: true,
            ..Self::new()
        }
    }

    /// Register a table and its catalog schema.
    pub async fn create_table(&self, name: &str, schema: TableSchema) {
        let empty = empty_frame(&schema);
        self.state.lock().await.tables.insert(
            name.to_string(),
            MemTable {
                schema,
                frame: empty,
            },
        );
    }

    /// Register a canned result for `query`: the first entry whose pattern
    /// is a substring of the SQL wins.
    pub async fn register_query(&self, pattern: &str, result: Frame) {
        self.state
            .lock()
            .await
            .canned_queries
            .push((pattern.to_string(), result));
    }

    /// Snapshot of a table's current rows.
    pub async fn table(&self, name: &str) -> Option<Frame> {
        self.state.lock().await.tables.get(name).map(|t| t.frame.clone())
    }

    fn target_table(&self, table: &str) -> Result<String, SinkError> {
        if !self.test_mode {
            return Ok(table.to_string());
        }
        if table.ends_with(&self.test_suffix) {
            Ok(table.to_string())
        } else {
            Ok(format!("{table}{}", self.test_suffix))
        }
    }
}

/// Schema from a payload's shape: each column typed by its first non-null
/// value, everything nullable, no keys.
fn infer_schema(frame: &Frame) -> TableSchema {
    use adsync_types::ColumnSchema;
    TableSchema::new(
        frame
            .columns()
            .iter()
            .map(|col| {
                let ty = col
                    .values
                    .iter()
                    .find(|v| !v.is_null())
                    .map_or(SemanticType::String, |v| match v.semantic_type() {
                        SemanticType::Null => SemanticType::String,
                        other => other,
                    });
                ColumnSchema::new(col.name.clone(), ty)
            })
            .collect(),
    )
}

fn empty_frame(schema: &TableSchema) -> Frame {
    let mut frame = Frame::new();
    for col in &schema.columns {
        frame
            .push_column(col.name.clone(), Vec::new())
            .expect("schema column names are unique");
    }
    frame
}

fn resolve_pk(
    mode: LoadMode,
    pk_columns: Option<&[String]>,
    schema: &TableSchema,
    table: &str,
) -> Result<Vec<String>, SinkError> {
    let configured: Vec<String> = pk_columns.map(<[String]>::to_vec).unwrap_or_default();
    if !configured.is_empty() {
        return Ok(configured);
    }
    if !mode.requires_primary_key() {
        return Ok(configured);
    }
    let detected = schema.primary_key_columns(mode == LoadMode::Increment);
    if detected.is_empty() {
        return Err(SinkError::Integrity(format!(
            "{mode} load on {table} requires pk columns, none configured or in catalog"
        )));
    }
    Ok(detected)
}

fn add_values(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(x + y),
        (Value::Null, other) | (other, Value::Null) => other.clone(),
        _ => Value::Float(a.as_float().unwrap_or(0.0) + b.as_float().unwrap_or(0.0)),
    }
}

#[async_trait]
impl DataSink for MemorySink {
    async fn load(
        &self,
        frame: Frame,
        table: &str,
        mode: LoadMode,
        pk_columns: Option<&[String]>,
        increment_columns: &[String],
    ) -> Result<u64, SinkError> {
        if frame.is_empty() {
            info!(table, "payload empty, skipping load");
            return Ok(0);
        }
        let table_name = self.target_table(table)?;

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SinkError::Closed);
        }
        if self.auto_create && !state.tables.contains_key(&table_name) {
            let schema = infer_schema(&frame);
            let empty = empty_frame(&schema);
            state.tables.insert(
                table_name.clone(),
                MemTable {
                    schema,
                    frame: empty,
                },
            );
        }
        let mem = state
            .tables
            .get_mut(&table_name)
            .ok_or_else(|| SinkError::MissingTable(table_name.clone()))?;

        let mut aligned = align(&frame, &table_name, &mem.schema)?;
        aligned.dedup_rows();
        let pk = resolve_pk(mode, pk_columns, &mem.schema, &table_name)?;

        match mode {
            LoadMode::Append => {
                if pk.is_empty() {
                    let rows = aligned.num_rows() as u64;
                    mem.frame.concat(aligned).map_err(|e| SinkError::Query(e.to_string()))?;
                    return Ok(rows);
                }
                let pk_idx = key_indices(&aligned, &pk)?;
                let existing = key_set(&mem.frame, &pk_idx);
                filter_new_rows(&mut aligned, &pk_idx, &existing);
                let rows = aligned.num_rows() as u64;
                if rows > 0 {
                    mem.frame.concat(aligned).map_err(|e| SinkError::Query(e.to_string()))?;
                }
                Ok(rows)
            }
            LoadMode::Replace => {
                let rows = aligned.num_rows() as u64;
                mem.frame = aligned;
                Ok(rows)
            }
            LoadMode::Upsert => {
                let pk_idx = key_indices(&aligned, &pk)?;
                let mut affected = 0u64;
                for row in 0..aligned.num_rows() {
                    let key = aligned.key_at(row, &pk_idx);
                    let incoming = aligned.row_owned(row);
                    let target = &mut mem.frame;
                    let found = (0..target.num_rows())
                        .find(|&r| target.key_at(r, &pk_idx) == key);
                    match found {
                        // Matched: every non-pk column replaced from the payload.
                        Some(r) => {
                            for (col, cell) in incoming.into_iter().enumerate() {
                                target.set_value(col, r, cell);
                            }
                        }
                        None => append_row(target, incoming),
                    }
                    affected += 1;
                }
                Ok(affected)
            }
            LoadMode::Increment => {
                if increment_columns.is_empty() {
                    return Err(SinkError::Integrity(format!(
                        "increment load on {table_name} requires increment_columns"
                    )));
                }
                let pk_idx = key_indices(&aligned, &pk)?;
                let inc_idx: Vec<usize> = increment_columns
                    .iter()
                    .filter_map(|c| aligned.column_index(c))
                    .collect();
                let collapsed = collapse_increment_duplicates(&aligned, &pk_idx, &inc_idx);

                let last_updated_idx = mem
                    .schema
                    .column(LAST_UPDATED_COLUMN)
                    .filter(|c| c.semantic_type == SemanticType::Timestamp)
                    .and_then(|_| collapsed.column_index(LAST_UPDATED_COLUMN));
                let now = Value::Timestamp(Utc::now().naive_utc());

                let mut affected = 0u64;
                for row in 0..collapsed.num_rows() {
                    let key = collapsed.key_at(row, &pk_idx);
                    let incoming = collapsed.row_owned(row);
                    let target = &mut mem.frame;
                    let found = (0..target.num_rows())
                        .find(|&r| target.key_at(r, &pk_idx) == key);
                    match found {
                        Some(r) => {
                            for &col in &inc_idx {
                                let current = target.columns()[col].values[r].clone();
                                target.set_value(col, r, add_values(&current, &incoming[col]));
                            }
                            if let Some(col) = last_updated_idx {
                                target.set_value(col, r, now.clone());
                            }
                        }
                        None => {
                            let mut row_values = incoming;
                            if let Some(col) = last_updated_idx {
                                row_values[col] = now.clone();
                            }
                            append_row(target, row_values);
                        }
                    }
                    affected += 1;
                }
                Ok(affected)
            }
        }
    }

    async fn query(&self, sql: &str) -> Result<Frame, SinkError> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(SinkError::Closed);
        }
        for (pattern, result) in &state.canned_queries {
            if sql.contains(pattern.as_str()) {
                return Ok(result.clone());
            }
        }
        Ok(Frame::new())
    }

    async fn table_exists(&self, table: &str) -> Result<bool, SinkError> {
        let table_name = self.target_table(table)?;
        Ok(self.state.lock().await.tables.contains_key(&table_name))
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.state.lock().await.closed = true;
        Ok(())
    }
}

fn append_row(frame: &mut Frame, row: Vec<Value>) {
    let names: Vec<String> = frame.column_names().iter().map(ToString::to_string).collect();
    let single = Frame::from_rows(names, vec![row]).expect("row width matches frame");
    frame.concat(single).expect("columns match");
}

#[cfg(test)]
mod tests {
    use super::*;
    use adsync_types::ColumnSchema;

    fn insights_schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnSchema::new("creative_id", SemanticType::Integer).primary_key(),
            ColumnSchema::new("impressions", SemanticType::Integer),
            ColumnSchema::new("clicks", SemanticType::Integer),
            ColumnSchema::new("last_updated_date", SemanticType::Timestamp),
        ])
    }

    fn insights_frame(rows: Vec<(i64, i64, i64)>) -> Frame {
        Frame::from_rows(
            ["creative_id", "impressions", "clicks"],
            rows.into_iter()
                .map(|(id, imp, clk)| vec![Value::Int(id), Value::Int(imp), Value::Int(clk)])
                .collect(),
        )
        .unwrap()
    }

    async fn column_ints(sink: &MemorySink, table: &str, column: &str) -> Vec<i64> {
        sink.table(table)
            .await
            .unwrap()
            .column(column)
            .unwrap()
            .values
            .iter()
            .map(|v| v.as_int().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn increment_adds_onto_existing_keys_and_inserts_new_ones() {
        let sink = MemorySink::new();
        sink.create_table("insights", insights_schema()).await;
        let inc = vec!["impressions".to_string(), "clicks".to_string()];
        let pk = vec!["creative_id".to_string()];

        let a = insights_frame(vec![(1, 100, 5), (2, 50, 2)]);
        let n = sink
            .load(a, "insights", LoadMode::Increment, Some(&pk), &inc)
            .await
            .unwrap();
        assert_eq!(n, 2);

        let b = insights_frame(vec![(1, 200, 10), (3, 30, 1)]);
        let n = sink
            .load(b, "insights", LoadMode::Increment, Some(&pk), &inc)
            .await
            .unwrap();
        assert_eq!(n, 2);

        assert_eq!(column_ints(&sink, "insights", "creative_id").await, vec![1, 2, 3]);
        assert_eq!(column_ints(&sink, "insights", "impressions").await, vec![300, 50, 30]);
        assert_eq!(column_ints(&sink, "insights", "clicks").await, vec![15, 2, 1]);
    }

    #[tokio::test]
    async fn increment_additivity_over_repeated_identical_loads() {
        let sink = MemorySink::new();
        sink.create_table("insights", insights_schema()).await;
        let inc = vec!["impressions".to_string()];
        let pk = vec!["creative_id".to_string()];

        for _ in 0..3 {
            sink.load(
                insights_frame(vec![(7, 10, 0)]),
                "insights",
                LoadMode::Increment,
                Some(&pk),
                &inc,
            )
            .await
            .unwrap();
        }
        assert_eq!(column_ints(&sink, "insights", "impressions").await, vec![30]);
    }

    #[tokio::test]
    async fn increment_entirely_new_keys_is_all_inserts() {
        let sink = MemorySink::new();
        sink.create_table("insights", insights_schema()).await;
        let n = sink
            .load(
                insights_frame(vec![(1, 10, 1), (2, 20, 2)]),
                "insights",
                LoadMode::Increment,
                Some(&["creative_id".to_string()]),
                &["impressions".to_string(), "clicks".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(column_ints(&sink, "insights", "impressions").await, vec![10, 20]);
    }

    #[tokio::test]
    async fn upsert_replaces_non_pk_columns_without_history() {
        let sink = MemorySink::new();
        let schema = TableSchema::new(vec![
            ColumnSchema::new("id", SemanticType::Integer).primary_key(),
            ColumnSchema::new("status", SemanticType::String),
            ColumnSchema::new("budget", SemanticType::Integer),
        ]);
        sink.create_table("campaign", schema).await;
        let pk = vec!["id".to_string()];

        let first = Frame::from_rows(
            ["id", "status", "budget"],
            vec![vec![Value::Int(1), Value::from("ACTIVE"), Value::Int(1000)]],
        )
        .unwrap();
        sink.load(first, "campaign", LoadMode::Upsert, Some(&pk), &[])
            .await
            .unwrap();

        let second = Frame::from_rows(
            ["id", "status", "budget"],
            vec![vec![Value::Int(1), Value::from("PAUSED"), Value::Int(1500)]],
        )
        .unwrap();
        sink.load(second, "campaign", LoadMode::Upsert, Some(&pk), &[])
            .await
            .unwrap();

        let table = sink.table("campaign").await.unwrap();
        assert_eq!(table.num_rows(), 1);
        assert_eq!(table.column("status").unwrap().values, vec![Value::from("PAUSED")]);
        assert_eq!(table.column("budget").unwrap().values, vec![Value::Int(1500)]);
    }

    #[tokio::test]
    async fn append_with_pk_dedupes_against_existing_rows() {
        let sink = MemorySink::new();
        let schema = TableSchema::new(vec![
            ColumnSchema::new("id", SemanticType::String).primary_key(),
            ColumnSchema::new("name", SemanticType::String),
        ]);
        sink.create_table("audience", schema).await;
        let pk = vec!["id".to_string()];

        let pre = Frame::from_rows(
            ["id", "name"],
            vec![vec![Value::from("a"), Value::from("x")]],
        )
        .unwrap();
        sink.load(pre, "audience", LoadMode::Append, Some(&pk), &[])
            .await
            .unwrap();

        let payload = Frame::from_rows(
            ["id", "name"],
            vec![
                vec![Value::from("a"), Value::from("x")],
                vec![Value::from("b"), Value::from("y")],
            ],
        )
        .unwrap();
        let inserted = sink
            .load(payload, "audience", LoadMode::Append, Some(&pk), &[])
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        let table = sink.table("audience").await.unwrap();
        assert_eq!(table.num_rows(), 2);
    }

    #[tokio::test]
    async fn replace_leaves_exactly_the_payload() {
        let sink = MemorySink::new();
        let schema = TableSchema::new(vec![ColumnSchema::new("id", SemanticType::Integer)]);
        sink.create_table("t", schema).await;

        let first = Frame::from_rows(["id"], vec![vec![Value::Int(1)], vec![Value::Int(2)]]).unwrap();
        sink.load(first, "t", LoadMode::Replace, None, &[]).await.unwrap();
        let second = Frame::from_rows(["id"], vec![vec![Value::Int(9)]]).unwrap();
        let rows = sink.load(second, "t", LoadMode::Replace, None, &[]).await.unwrap();
        assert_eq!(rows, 1);
        assert_eq!(column_ints(&sink, "t", "id").await, vec![9]);
    }

    #[tokio::test]
    async fn empty_payload_is_a_no_op() {
        let sink = MemorySink::new();
        sink.create_table("insights", insights_schema()).await;
        let rows = sink
            .load(Frame::new(), "insights", LoadMode::Append, None, &[])
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn missing_table_is_reported() {
        let sink = MemorySink::new();
        let err = sink
            .load(
                insights_frame(vec![(1, 1, 1)]),
                "nope",
                LoadMode::Append,
                None,
                &[],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::MissingTable(_)));
    }

    #[tokio::test]
    async fn pk_detection_from_catalog_excludes_dates_for_increment() {
        let sink = MemorySink::new();
        let schema = TableSchema::new(vec![
            ColumnSchema::new("creative_id", SemanticType::Integer).primary_key(),
            ColumnSchema::new("date", SemanticType::Date).primary_key(),
            ColumnSchema::new("impressions", SemanticType::Integer),
        ]);
        sink.create_table("insights", schema).await;

        // No configured pk: detection keeps creative_id only.
        let frame = Frame::from_rows(
            ["creative_id", "impressions"],
            vec![vec![Value::Int(1), Value::Int(10)]],
        )
        .unwrap();
        sink.load(frame.clone(), "insights", LoadMode::Increment, None, &["impressions".to_string()])
            .await
            .unwrap();
        sink.load(frame, "insights", LoadMode::Increment, None, &["impressions".to_string()])
            .await
            .unwrap();
        assert_eq!(column_ints(&sink, "insights", "impressions").await, vec![20]);
    }

    #[tokio::test]
    async fn test_mode_only_writes_suffixed_tables() {
        let sink = MemorySink::with_test_mode("_test");
        sink.create_table(
            "campaign_test",
            TableSchema::new(vec![ColumnSchema::new("id", SemanticType::Integer)]),
        )
        .await;
        let frame = Frame::from_rows(["id"], vec![vec![Value::Int(1)]]).unwrap();
        sink.load(frame, "campaign", LoadMode::Append, None, &[]).await.unwrap();
        assert!(sink.table("campaign").await.is_none());
        assert_eq!(sink.table("campaign_test").await.unwrap().num_rows(), 1);
    }

    #[tokio::test]
    async fn auto_create_infers_a_schema_from_the_first_payload() {
        let sink = MemorySink::with_auto_create();
        let frame = Frame::from_rows(
            ["id", "name"],
            vec![vec![Value::Int(1), Value::from("a")]],
        )
        .unwrap();
        let rows = sink.load(frame, "fresh", LoadMode::Append, None, &[]).await.unwrap();
        assert_eq!(rows, 1);
        let stored = sink.table("fresh").await.unwrap();
        assert_eq!(stored.column_names(), vec!["id", "name"]);

        // Without auto-create the same load is a missing-table error.
        let strict = MemorySink::new();
        let frame = Frame::from_rows(["id"], vec![vec![Value::Int(1)]]).unwrap();
        let err = strict.load(frame, "fresh", LoadMode::Append, None, &[]).await.unwrap_err();
        assert!(matches!(err, SinkError::MissingTable(_)));
    }

    #[tokio::test]
    async fn closed_sink_refuses_work() {
        let sink = MemorySink::new();
        sink.close().await.unwrap();
        let err = sink.query("SELECT 1").await.unwrap_err();
        assert!(matches!(err, SinkError::Closed));
    }
}
