//! Typed configuration documents.
//!
//! Two YAML documents drive a run: the orchestrator config (platform set,
//! dependencies, retry and timeout policy) and one table config per platform
//! (tables, processing chains, load modes).

use std::time::Duration;

use adsync_types::{EtlError, LoadMode};
use serde::Deserialize;

/// Top-level orchestrator configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    pub platforms: Vec<PlatformEntry>,
    /// Optional manual partition of platforms into parallel groups; must be
    /// a valid refinement of the dependency order.
    #[serde(default)]
    pub parallel_groups: Option<Vec<Vec<String>>>,
}

impl OrchestratorConfig {
    #[must_use]
    pub fn enabled_platforms(&self) -> Vec<&PlatformEntry> {
        self.platforms.iter().filter(|p| p.enabled).collect()
    }

    #[must_use]
    pub fn platform(&self, name: &str) -> Option<&PlatformEntry> {
        self.platforms.iter().find(|p| p.name == name)
    }
}

/// Execution policy knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// When false, execute strictly sequentially regardless of groups.
    pub parallel_execution: bool,
    /// Upper bound on concurrent platforms within a group.
    pub max_parallel: usize,
    /// On a platform failure, proceed with platforms whose dependencies are
    /// still satisfied; the failed platform's dependents are skipped.
    pub continue_on_failure: bool,
    /// Wall-clock budget in seconds for the entire run.
    pub global_timeout: Option<u64>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            parallel_execution: true,
            max_parallel: 4,
            continue_on_failure: true,
            global_timeout: None,
        }
    }
}

/// One platform's scheduling entry.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformEntry {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower values run first within a group (tie-break only).
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Per-platform timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl PlatformEntry {
    #[must_use]
    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_priority() -> i32 {
    100
}

/// Exponential retry policy with cap.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_seconds: f64,
    pub backoff_multiplier: f64,
    pub max_backoff_seconds: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_seconds: 60.0,
            backoff_multiplier: 2.0,
            max_backoff_seconds: 3600.0,
        }
    }
}

/// Load-mode declaration for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSpec {
    pub mode: LoadMode,
    pub pk_columns: Vec<String>,
    pub increment_columns: Vec<String>,
}

impl Default for LoadSpec {
    fn default() -> Self {
        Self {
            mode: LoadMode::Append,
            pk_columns: Vec::new(),
            increment_columns: Vec::new(),
        }
    }
}

/// One named processing step with its parameters, in declared order.
#[derive(Debug, Clone)]
pub struct ProcessingStepConfig {
    pub name: String,
    pub params: serde_json::Value,
}

/// Settings for one logical table.
#[derive(Debug, Clone, Default)]
pub struct TableSettings {
    /// API request name the adapter should issue for this table.
    pub request: Option<String>,
    pub page_size: Option<u32>,
    pub fields: Vec<String>,
    /// Lookback window in days overriding the run's date range.
    pub day: Option<i64>,
    pub processing: Vec<ProcessingStepConfig>,
    pub load: LoadSpec,
    /// A failure on this table aborts the whole platform.
    pub stop_on_failure: bool,
    /// When false, this table is not written at all in test mode.
    pub test_mode_suffix: bool,
}

/// Table settings for one platform, in document order.
#[derive(Debug, Clone, Default)]
pub struct PlatformTables {
    pub tables: Vec<(String, TableSettings)>,
}

impl PlatformTables {
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSettings> {
        self.tables.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Convert a parsed YAML document (mapping of table name to settings)
    /// into typed table settings.
    ///
    /// # Errors
    ///
    /// Returns a config error on a non-mapping document or malformed table
    /// entry.
    pub fn from_yaml(doc: &serde_yaml::Value) -> Result<Self, EtlError> {
        let mapping = doc.as_mapping().ok_or_else(|| {
            EtlError::config("BAD_TABLE_CONFIG", "platform table config must be a mapping")
        })?;

        let mut tables = Vec::new();
        for (key, value) in mapping {
            let name = key
                .as_str()
                .ok_or_else(|| {
                    EtlError::config("BAD_TABLE_CONFIG", "table names must be strings")
                })?
                .to_string();
            if name == "platform" {
                continue;
            }
            tables.push((name.clone(), TableSettings::from_yaml(&name, value)?));
        }
        Ok(Self { tables })
    }
}

impl TableSettings {
    /// Parse one table's settings from its YAML mapping.
    ///
    /// The load mode is declared either as a `load_mode: <name>` scalar or,
    /// matching the legacy layout, as a mode-named key carrying
    /// `pk_columns`/`increment_columns`.
    ///
    /// # Errors
    ///
    /// Returns a config error for malformed entries or an unknown load mode.
    pub fn from_yaml(table: &str, value: &serde_yaml::Value) -> Result<Self, EtlError> {
        let mapping = match value {
            serde_yaml::Value::Null => return Ok(Self::default_settings()),
            serde_yaml::Value::Mapping(m) => m,
            _ => {
                return Err(EtlError::config(
                    "BAD_TABLE_CONFIG",
                    format!("table '{table}' settings must be a mapping"),
                ))
            }
        };

        let mut settings = Self::default_settings();
        for (key, entry) in mapping {
            let Some(key) = key.as_str() else {
                continue;
            };
            match key {
                "request" | "type" => {
                    settings.request = entry.as_str().map(ToString::to_string);
                }
                "page_size" => {
                    settings.page_size = entry.as_u64().and_then(|v| u32::try_from(v).ok());
                }
                "fields" => {
                    settings.fields = string_list(entry);
                }
                "day" => {
                    settings.day = entry.as_i64();
                }
                "stop_on_failure" => {
                    settings.stop_on_failure = entry.as_bool().unwrap_or(false);
                }
                "test_mode_suffix" => {
                    settings.test_mode_suffix = entry.as_bool().unwrap_or(true);
                }
                "processing" => {
                    settings.processing = parse_processing(table, entry)?;
                }
                "load_mode" => {
                    let mode_name = entry.as_str().ok_or_else(|| {
                        EtlError::config(
                            "BAD_TABLE_CONFIG",
                            format!("table '{table}' load_mode must be a string"),
                        )
                    })?;
                    settings.load.mode = mode_name.parse()?;
                }
                "append" | "replace" | "upsert" | "increment" => {
                    settings.load.mode = key.parse().expect("key is a known mode name");
                    if let Some(params) = entry.as_mapping() {
                        for (pk, pv) in params {
                            match pk.as_str() {
                                Some("pk_columns") => settings.load.pk_columns = string_list(pv),
                                Some("increment_columns") => {
                                    settings.load.increment_columns = string_list(pv);
                                }
                                _ => {}
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(settings)
    }

    fn default_settings() -> Self {
        Self {
            test_mode_suffix: true,
            ..Self::default()
        }
    }
}

/// Parse the ordered `processing` mapping (`step_name: params`).
fn parse_processing(
    table: &str,
    entry: &serde_yaml::Value,
) -> Result<Vec<ProcessingStepConfig>, EtlError> {
    let mapping = match entry {
        serde_yaml::Value::Null => return Ok(Vec::new()),
        serde_yaml::Value::Mapping(m) => m,
        _ => {
            return Err(EtlError::config(
                "BAD_TABLE_CONFIG",
                format!("table '{table}' processing must be a mapping of step name to params"),
            ))
        }
    };

    let mut steps = Vec::new();
    for (key, params) in mapping {
        let name = key
            .as_str()
            .ok_or_else(|| {
                EtlError::config(
                    "BAD_TABLE_CONFIG",
                    format!("table '{table}' has a non-string processing step name"),
                )
            })?
            .to_string();
        let params = serde_json::to_value(params).map_err(|e| {
            EtlError::config(
                "BAD_TABLE_CONFIG",
                format!("table '{table}' step '{name}' params are not representable: {e}"),
            )
        })?;
        steps.push(ProcessingStepConfig { name, params });
    }
    Ok(steps)
}

fn string_list(value: &serde_yaml::Value) -> Vec<String> {
    match value {
        serde_yaml::Value::Sequence(seq) => seq
            .iter()
            .filter_map(|v| v.as_str().map(ToString::to_string))
            .collect(),
        serde_yaml::Value::String(s) => {
            s.split(',').map(|p| p.trim().to_string()).filter(|p| !p.is_empty()).collect()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let settings = OrchestratorSettings::default();
        assert!(settings.parallel_execution);
        assert_eq!(settings.max_parallel, 4);
        assert!(settings.continue_on_failure);
        assert!(settings.global_timeout.is_none());

        let retry = RetryPolicy::default();
        assert_eq!(retry.max_attempts, 3);
        assert!((retry.backoff_multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn table_settings_parse_legacy_mode_keys() {
        let yaml: serde_yaml::Value = serde_yaml::from_str(
            r"
increment:
  pk_columns: [creative_id]
  increment_columns: [impressions]
",
        )
        .unwrap();
        let settings = TableSettings::from_yaml("insights", &yaml).unwrap();
        assert_eq!(settings.load.mode, LoadMode::Increment);
        assert_eq!(settings.load.pk_columns, vec!["creative_id"]);
    }

    #[test]
    fn table_settings_parse_scalar_load_mode() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("load_mode: replace").unwrap();
        let settings = TableSettings::from_yaml("t", &yaml).unwrap();
        assert_eq!(settings.load.mode, LoadMode::Replace);
    }

    #[test]
    fn unknown_load_mode_is_a_config_error() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("load_mode: merge").unwrap();
        let err = TableSettings::from_yaml("t", &yaml).unwrap_err();
        assert_eq!(err.code, "UNKNOWN_LOAD_MODE");
    }

    #[test]
    fn processing_steps_keep_document_order() {
        let yaml: serde_yaml::Value = serde_yaml::from_str(
            r"
processing:
  rename_column:
    renaming: {old: new}
  replace_nan_with_zero:
    columns: [clicks]
  add_row_loaded_date: ~
",
        )
        .unwrap();
        let settings = TableSettings::from_yaml("t", &yaml).unwrap();
        let names: Vec<&str> = settings.processing.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["rename_column", "replace_nan_with_zero", "add_row_loaded_date"]
        );
    }

    #[test]
    fn fields_accept_list_or_comma_string() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("fields: 'id, name ,status'").unwrap();
        let settings = TableSettings::from_yaml("t", &yaml).unwrap();
        assert_eq!(settings.fields, vec!["id", "name", "status"]);
    }
}
