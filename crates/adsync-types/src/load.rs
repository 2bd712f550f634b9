//! Load modes and extraction date ranges.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EtlError;

/// Strategy for combining a payload into a warehouse target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Insert rows, optionally deduping against existing pk tuples.
    Append,
    /// Truncate the target, then insert every payload row.
    Replace,
    /// Insert new keys; replace every non-pk column on matched keys.
    Upsert,
    /// Insert new keys; add increment columns onto matched keys.
    Increment,
}

impl LoadMode {
    /// Modes that require pk columns (configured or catalog-detected).
    #[must_use]
    pub fn requires_primary_key(self) -> bool {
        matches!(self, Self::Upsert | Self::Increment)
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Append => "append",
            Self::Replace => "replace",
            Self::Upsert => "upsert",
            Self::Increment => "increment",
        };
        f.write_str(s)
    }
}

impl FromStr for LoadMode {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "append" => Ok(Self::Append),
            "replace" => Ok(Self::Replace),
            "upsert" => Ok(Self::Upsert),
            "increment" => Ok(Self::Increment),
            other => Err(EtlError::config(
                "UNKNOWN_LOAD_MODE",
                format!("unknown load mode '{other}' (expected append, replace, upsert, increment)"),
            )),
        }
    }
}

/// Inclusive date range driving an extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// # Errors
    ///
    /// Returns a config error when `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, EtlError> {
        if start > end {
            return Err(EtlError::config(
                "INVALID_DATE_RANGE",
                format!("start date {start} is after end date {end}"),
            ));
        }
        Ok(Self { start, end })
    }

    /// The last `days` days up to today (UTC).
    #[must_use]
    pub fn lookback(days: i64) -> Self {
        let end = Utc::now().date_naive();
        Self {
            start: end - Duration::days(days.max(0)),
            end,
        }
    }

    #[must_use]
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}
