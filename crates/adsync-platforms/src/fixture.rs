//! Fixture-backed platform adapter.
//!
//! Reads extraction payloads from `<dir>/<table>.json` (an array of flat
//! JSON objects). Stands in for the out-of-scope HTTP adapters in local
//! runs, dry runs, and tests; a table without a fixture file extracts as
//! empty.

use std::path::PathBuf;

use adsync_engine::pipeline::{PlatformAdapter, TableRequest};
use adsync_types::{DateRange, EtlError, Frame, Value};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Adapter producing frames from JSON fixture files.
pub struct FixtureAdapter {
    dir: PathBuf,
}

impl FixtureAdapter {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl PlatformAdapter for FixtureAdapter {
    async fn extract(
        &self,
        request: &TableRequest<'_>,
        range: DateRange,
        driver_keys: &[Value],
    ) -> Result<Frame, EtlError> {
        let path = self.dir.join(format!("{}.json", request.table));
        debug!(
            table = request.table,
            path = %path.display(),
            start = %range.start,
            end = %range.end,
            driver_keys = driver_keys.len(),
            "extracting from fixture"
        );
        if !path.exists() {
            warn!(table = request.table, path = %path.display(), "no fixture file, extracting empty payload");
            return Ok(Frame::new());
        }
        let text = std::fs::read_to_string(&path).map_err(|e| {
            EtlError::data(
                "FIXTURE_READ",
                format!("failed to read fixture {}: {e}", path.display()),
            )
        })?;
        let json: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
            EtlError::data(
                "FIXTURE_PARSE",
                format!("fixture {} is not valid JSON: {e}", path.display()),
            )
        })?;
        frame_from_json(&json)
    }
}

/// Convert a JSON array of flat objects into a frame. Column order is the
/// first-seen key order; objects may omit keys (missing cells become null);
/// nested values are carried as JSON text for downstream flattening steps.
///
/// # Errors
///
/// Returns a data error when the document is not an array of objects.
pub fn frame_from_json(json: &serde_json::Value) -> Result<Frame, EtlError> {
    let serde_json::Value::Array(records) = json else {
        return Err(EtlError::data(
            "FIXTURE_SHAPE",
            "fixture payload must be a JSON array of objects",
        ));
    };

    let mut columns: Vec<String> = Vec::new();
    for record in records {
        let serde_json::Value::Object(map) = record else {
            return Err(EtlError::data(
                "FIXTURE_SHAPE",
                "fixture payload rows must be JSON objects",
            ));
        };
        for key in map.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }

    let rows: Vec<Vec<Value>> = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|col| json_to_value(record.get(col).unwrap_or(&serde_json::Value::Null)))
                .collect()
        })
        .collect();

    Frame::from_rows(columns, rows)
}

fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map_or_else(|| Value::Float(n.as_f64().unwrap_or(0.0)), Value::Int),
        serde_json::Value::String(s) => Value::Str(s.clone()),
        nested => Value::Str(nested.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn json_array_becomes_a_frame() {
        let json = serde_json::json!([
            {"id": 1, "name": "first", "spend": 1.5},
            {"id": 2, "name": null, "active": true}
        ]);
        let frame = frame_from_json(&json).unwrap();
        assert_eq!(frame.num_rows(), 2);
        assert!(frame.has_column("active"));
        assert_eq!(frame.column("id").unwrap().values, vec![Value::Int(1), Value::Int(2)]);
        // Missing cells are null.
        assert_eq!(
            frame.column("active").unwrap().values,
            vec![Value::Null, Value::Bool(true)]
        );
    }

    #[test]
    fn nested_values_are_carried_as_json_text() {
        let json = serde_json::json!([
            {"id": 1, "actions": [{"action_type": "like", "value": 3}]}
        ]);
        let frame = frame_from_json(&json).unwrap();
        let cell = &frame.column("actions").unwrap().values[0];
        let Value::Str(text) = cell else {
            panic!("expected JSON text, got {cell:?}");
        };
        assert!(text.contains("action_type"));
    }

    #[test]
    fn non_array_payload_is_rejected() {
        let err = frame_from_json(&serde_json::json!({"id": 1})).unwrap_err();
        assert_eq!(err.code, "FIXTURE_SHAPE");
    }

    #[tokio::test]
    async fn missing_fixture_extracts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FixtureAdapter::new(dir.path());
        let request = TableRequest {
            table: "no_such_table",
            request: None,
            fields: &[],
            page_size: None,
            token: None,
        };
        let frame = adapter.extract(&request, range(), &[]).await.unwrap();
        assert!(frame.is_empty());
    }

    #[tokio::test]
    async fn fixture_file_round_trips_through_the_adapter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("campaign.json"),
            r#"[{"id": 7, "status": "ACTIVE"}]"#,
        )
        .unwrap();
        let adapter = FixtureAdapter::new(dir.path());
        let request = TableRequest {
            table: "campaign",
            request: Some("campaigns"),
            fields: &[],
            page_size: None,
            token: None,
        };
        let frame = adapter.extract(&request, range(), &[]).await.unwrap();
        assert_eq!(frame.num_rows(), 1);
        assert_eq!(frame.column("status").unwrap().values, vec![Value::Str("ACTIVE".into())]);
    }
}
