//! Warehouse catalog inspection: column order, types, and primary keys.

use adsync_types::{ColumnSchema, SemanticType, TableSchema};
use tokio_postgres::Client;

use crate::error::SinkError;

/// Map a catalog `data_type` to the sink's semantic type set. Precision
/// qualifiers (`numeric(18,2)`) are stripped before matching.
#[must_use]
pub fn semantic_type_from_catalog(data_type: &str) -> SemanticType {
    let base = data_type
        .split('(')
        .next()
        .unwrap_or(data_type)
        .trim()
        .to_ascii_lowercase();
    match base.as_str() {
        "smallint" | "int" | "integer" | "bigint" | "int2" | "int4" | "int8" => {
            SemanticType::Integer
        }
        "real" | "float" | "float4" | "float8" | "double precision" | "numeric" | "decimal" => {
            SemanticType::Float
        }
        "boolean" | "bool" => SemanticType::Boolean,
        "date" => SemanticType::Date,
        s if s.starts_with("timestamp") => SemanticType::Timestamp,
        _ => SemanticType::String,
    }
}

/// Resolve a table's schema from the catalog, columns in ordinal position.
/// Returns `None` when the table does not exist.
///
/// # Errors
///
/// Returns a query error if the catalog cannot be read.
pub async fn table_schema(
    client: &Client,
    schema_name: &str,
    table: &str,
) -> Result<Option<TableSchema>, SinkError> {
    let rows = client
        .query(
            "SELECT column_name, data_type, is_nullable \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
            &[&schema_name, &table],
        )
        .await
        .map_err(|e| SinkError::Query(format!("catalog column lookup failed: {e}")))?;

    if rows.is_empty() {
        return Ok(None);
    }

    let pk_rows = client
        .query(
            "SELECT kcu.column_name \
             FROM information_schema.table_constraints tc \
             JOIN information_schema.key_column_usage kcu \
               ON tc.constraint_name = kcu.constraint_name \
              AND tc.table_schema = kcu.table_schema \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
               AND tc.table_schema = $1 AND tc.table_name = $2 \
             ORDER BY kcu.ordinal_position",
            &[&schema_name, &table],
        )
        .await
        .map_err(|e| SinkError::Query(format!("catalog pk lookup failed: {e}")))?;
    let pk_columns: Vec<String> = pk_rows.iter().map(|r| r.get(0)).collect();

    let columns = rows
        .iter()
        .map(|row| {
            let name: String = row.get(0);
            let data_type: String = row.get(1);
            let is_nullable: String = row.get(2);
            ColumnSchema {
                semantic_type: semantic_type_from_catalog(&data_type),
                nullable: is_nullable.eq_ignore_ascii_case("yes"),
                primary_key: pk_columns.contains(&name),
                name,
            }
        })
        .collect();

    Ok(Some(TableSchema::new(columns)))
}
