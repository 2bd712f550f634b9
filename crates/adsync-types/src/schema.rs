//! Warehouse table schemas as resolved from the catalog.
//!
//! Schemas are authoritative: the sink aligns every payload to the target
//! table's schema before writing. They are resolved from catalog metadata at
//! load time, never declared in source.

use serde::{Deserialize, Serialize};

use crate::value::SemanticType;

/// One column of a warehouse table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub semantic_type: SemanticType,
    pub nullable: bool,
    /// Part of the table's primary key per catalog metadata.
    pub primary_key: bool,
}

impl ColumnSchema {
    #[must_use]
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            nullable: true,
            primary_key: false,
        }
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
}

/// Ordered column schemas for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    #[must_use]
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        Self { columns }
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Primary-key column names in catalog order, optionally excluding
    /// date-typed columns (increment mode keys cumulative rows per entity,
    /// not per day).
    #[must_use]
    pub fn primary_key_columns(&self, exclude_dates: bool) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .filter(|c| {
                !(exclude_dates
                    && matches!(c.semantic_type, SemanticType::Date | SemanticType::Timestamp))
            })
            .map(|c| c.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            ColumnSchema::new("creative_id", SemanticType::Integer).primary_key(),
            ColumnSchema::new("date", SemanticType::Date).primary_key(),
            ColumnSchema::new("impressions", SemanticType::Integer),
        ])
    }

    #[test]
    fn pk_lookup_excludes_date_columns_when_asked() {
        let s = schema();
        assert_eq!(s.primary_key_columns(false), vec!["creative_id", "date"]);
        assert_eq!(s.primary_key_columns(true), vec!["creative_id"]);
    }

    #[test]
    fn column_lookup_by_name() {
        let s = schema();
        assert_eq!(s.column("impressions").unwrap().semantic_type, SemanticType::Integer);
        assert!(s.column("missing").is_none());
    }
}
