//! Scalar values and their semantic types.
//!
//! Every cell in a [`crate::Frame`] is a [`Value`]. The semantic type set is
//! the contract between extraction, processing, and the warehouse sink:
//! {string, integer, floating, boolean, date, timestamp, null}.

use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Semantic column type as seen by the warehouse sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Timestamp,
    /// Column whose type could not be resolved; treated as string.
    Null,
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::Null => "null",
        };
        f.write_str(s)
    }
}

/// A single cell value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The semantic type this value inhabits.
    #[must_use]
    pub fn semantic_type(&self) -> SemanticType {
        match self {
            Self::Null => SemanticType::Null,
            Self::Bool(_) => SemanticType::Boolean,
            Self::Int(_) => SemanticType::Integer,
            Self::Float(_) => SemanticType::Float,
            Self::Str(_) => SemanticType::String,
            Self::Date(_) => SemanticType::Date,
            Self::Timestamp(_) => SemanticType::Timestamp,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// True for numeric values (integer or floating).
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    /// True when the value reads as "not a number": null, a NaN float, or
    /// the textual `nan`/`NaN` sentinels some APIs emit.
    #[must_use]
    pub fn is_nan_like(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Float(f) => f.is_nan(),
            Self::Str(s) => s.is_empty() || s.eq_ignore_ascii_case("nan"),
            _ => false,
        }
    }

    /// Render the value as the string the warehouse would store.
    ///
    /// Nulls render as the empty string; callers that need a null sentinel
    /// handle [`Value::Null`] before calling this.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Str(s) => s.clone(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::Timestamp(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => {
                (*a as f64).to_bits() == b.to_bits()
            }
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            // Int and Float hash through f64 bits so that Int(3) and
            // Float(3.0) collide, matching PartialEq above.
            Self::Int(v) => {
                2u8.hash(state);
                (*v as f64).to_bits().hash(state);
            }
            Self::Float(v) => {
                2u8.hash(state);
                v.to_bits().hash(state);
            }
            Self::Str(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Self::Date(d) => {
                4u8.hash(state);
                d.hash(state);
            }
            Self::Timestamp(t) => {
                5u8.hash(state);
                t.hash(state);
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Parse an ISO-8601 date or date-time string, keeping only the date part.
#[must_use]
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    parse_timestamp(s).map(|t| t.date())
}

/// Parse an ISO-8601 date-time string (space or `T` separator, optional
/// fractional seconds), or a bare date at midnight.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(t);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_and_float_compare_equal_when_numerically_equal() {
        assert_eq!(Value::Int(3), Value::Float(3.0));
        assert_ne!(Value::Int(3), Value::Float(3.5));
    }

    #[test]
    fn nan_like_detection() {
        assert!(Value::Null.is_nan_like());
        assert!(Value::Float(f64::NAN).is_nan_like());
        assert!(Value::Str("NaN".into()).is_nan_like());
        assert!(Value::Str(String::new()).is_nan_like());
        assert!(!Value::Int(0).is_nan_like());
        assert!(!Value::Str("0".into()).is_nan_like());
    }

    #[test]
    fn parse_date_accepts_datetime_input() {
        assert_eq!(
            parse_date("2026-03-01 12:30:00"),
            NaiveDate::from_ymd_opt(2026, 3, 1)
        );
        assert_eq!(parse_date("2026-03-01"), NaiveDate::from_ymd_opt(2026, 3, 1));
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn parse_timestamp_accepts_t_separator_and_fractions() {
        let t = parse_timestamp("2026-03-01T12:30:00.250").unwrap();
        assert_eq!(t.date(), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        let midnight = parse_timestamp("2026-03-01").unwrap();
        assert_eq!(midnight.time(), chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap());
    }

    #[test]
    fn render_is_locale_free() {
        assert_eq!(Value::Int(1_234_567).render(), "1234567");
        assert_eq!(Value::Float(1234.5).render(), "1234.5");
    }
}
