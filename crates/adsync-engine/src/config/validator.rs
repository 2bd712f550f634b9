//! Semantic validation for parsed configuration values.
//!
//! Collects every problem before failing so the operator sees the full list
//! at once. Runs at startup; anything caught here exits with the
//! configuration error code before any platform starts.

use std::collections::{HashMap, HashSet};

use adsync_types::{EtlError, LoadMode};

use crate::config::types::{OrchestratorConfig, PlatformTables};
use crate::processing::StepRegistry;

/// Validate an orchestrator configuration document.
///
/// # Errors
///
/// Returns a config error listing every validation failure found.
pub fn validate_orchestrator(config: &OrchestratorConfig) -> Result<(), EtlError> {
    let mut errors = Vec::new();

    if config.platforms.is_empty() {
        errors.push("at least one platform must be configured".to_string());
    }

    let mut seen = HashSet::new();
    for platform in &config.platforms {
        if platform.name.trim().is_empty() {
            errors.push("platform with empty name".to_string());
        }
        if !seen.insert(platform.name.clone()) {
            errors.push(format!("duplicate platform name '{}'", platform.name));
        }
    }

    let names: HashSet<&str> = config.platforms.iter().map(|p| p.name.as_str()).collect();
    for platform in &config.platforms {
        for dep in &platform.depends_on {
            if !names.contains(dep.as_str()) {
                errors.push(format!(
                    "platform '{}' depends on unknown platform '{dep}'",
                    platform.name
                ));
            }
            if dep == &platform.name {
                errors.push(format!("platform '{}' depends on itself", platform.name));
            }
        }
        if platform.retry.max_attempts == 0 {
            errors.push(format!(
                "platform '{}': retry.max_attempts must be at least 1",
                platform.name
            ));
        }
        if platform.retry.backoff_seconds < 0.0 || platform.retry.max_backoff_seconds < 0.0 {
            errors.push(format!(
                "platform '{}': retry backoff values must be non-negative",
                platform.name
            ));
        }
        if platform.retry.backoff_multiplier < 1.0 {
            errors.push(format!(
                "platform '{}': retry.backoff_multiplier must be at least 1",
                platform.name
            ));
        }
        if platform.timeout == Some(0) {
            errors.push(format!("platform '{}': timeout must be > 0", platform.name));
        }
    }

    if config.orchestrator.max_parallel == 0 {
        errors.push("orchestrator.max_parallel must be at least 1".to_string());
    }
    if config.orchestrator.global_timeout == Some(0) {
        errors.push("orchestrator.global_timeout must be > 0".to_string());
    }

    if let Some(groups) = &config.parallel_groups {
        validate_parallel_groups(config, groups, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(EtlError::config(
            "INVALID_CONFIG",
            format!("configuration validation failed:\n  - {}", errors.join("\n  - ")),
        ))
    }
}

/// A manual grouping must cover every enabled platform exactly once and be a
/// refinement of the dependency order: each platform's dependencies appear
/// in strictly earlier groups. A dependency landing in the same or a later
/// group conflicts with `depends_on` and rejects the configuration.
fn validate_parallel_groups(
    config: &OrchestratorConfig,
    groups: &[Vec<String>],
    errors: &mut Vec<String>,
) {
    let mut group_of: HashMap<&str, usize> = HashMap::new();
    for (idx, group) in groups.iter().enumerate() {
        for name in group {
            if group_of.insert(name.as_str(), idx).is_some() {
                errors.push(format!("parallel_groups: platform '{name}' appears twice"));
            }
            if config.platform(name).is_none() {
                errors.push(format!("parallel_groups: unknown platform '{name}'"));
            }
        }
    }

    for platform in config.enabled_platforms() {
        let Some(&own_group) = group_of.get(platform.name.as_str()) else {
            errors.push(format!(
                "parallel_groups: enabled platform '{}' is not in any group",
                platform.name
            ));
            continue;
        };
        for dep in &platform.depends_on {
            match group_of.get(dep.as_str()) {
                Some(&dep_group) if dep_group >= own_group => {
                    errors.push(format!(
                        "parallel_groups conflicts with depends_on: '{}' depends on '{dep}' \
                         which is not in an earlier group",
                        platform.name
                    ));
                }
                Some(_) => {}
                None => {}
            }
        }
    }
}

/// Validate one platform's table configuration against the step registry.
///
/// # Errors
///
/// Returns a config error listing every undeclared step, malformed load
/// declaration, or increment key problem.
pub fn validate_tables(
    platform: &str,
    tables: &PlatformTables,
    registry: &StepRegistry,
) -> Result<(), EtlError> {
    let mut errors = Vec::new();

    for (table, settings) in &tables.tables {
        for step in &settings.processing {
            if !registry.contains(&step.name) {
                errors.push(format!(
                    "{platform}.{table}: unknown processing step '{}'",
                    step.name
                ));
            }
        }

        match settings.load.mode {
            LoadMode::Upsert => {
                if settings.load.pk_columns.is_empty() {
                    errors.push(format!("{platform}.{table}: upsert requires pk_columns"));
                }
            }
            LoadMode::Increment => {
                if settings.load.pk_columns.is_empty() {
                    errors.push(format!("{platform}.{table}: increment requires pk_columns"));
                }
                if settings.load.increment_columns.is_empty() {
                    errors.push(format!(
                        "{platform}.{table}: increment requires increment_columns"
                    ));
                }
                for pk in &settings.load.pk_columns {
                    if pk == "date" || pk.ends_with("_date") {
                        errors.push(format!(
                            "{platform}.{table}: increment pk column '{pk}' looks date-typed; \
                             cumulative keys must not include dates"
                        ));
                    }
                }
            }
            LoadMode::Append | LoadMode::Replace => {}
        }

        if settings.day.is_some_and(|d| d < 0) {
            errors.push(format!("{platform}.{table}: day lookback must be non-negative"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(EtlError::config(
            "INVALID_TABLE_CONFIG",
            format!(
                "table configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::{parse_orchestrator_str, parse_platform_tables_str};

    fn valid_yaml() -> &'static str {
        r"
orchestrator:
  max_parallel: 2
platforms:
  - name: microsoft
  - name: linkedin
  - name: facebook
  - name: google
    depends_on: [microsoft]
"
    }

    #[test]
    fn valid_config_passes() {
        let config = parse_orchestrator_str(valid_yaml()).unwrap();
        assert!(validate_orchestrator(&config).is_ok());
    }

    #[test]
    fn unknown_dependency_fails() {
        let yaml = valid_yaml().replace("[microsoft]", "[twitter]");
        let config = parse_orchestrator_str(&yaml).unwrap();
        let err = validate_orchestrator(&config).unwrap_err();
        assert!(err.message.contains("unknown platform 'twitter'"));
    }

    #[test]
    fn zero_retry_attempts_fails() {
        let yaml = format!("{}    retry:\n      max_attempts: 0\n", valid_yaml());
        let config = parse_orchestrator_str(&yaml).unwrap();
        let err = validate_orchestrator(&config).unwrap_err();
        assert!(err.message.contains("max_attempts"));
    }

    #[test]
    fn conflicting_parallel_groups_are_rejected() {
        let yaml = format!(
            "{}parallel_groups:\n  - [microsoft, google]\n  - [linkedin, facebook]\n",
            valid_yaml()
        );
        let config = parse_orchestrator_str(&yaml).unwrap();
        let err = validate_orchestrator(&config).unwrap_err();
        assert!(err.message.contains("conflicts with depends_on"));
    }

    #[test]
    fn refining_parallel_groups_pass() {
        let yaml = format!(
            "{}parallel_groups:\n  - [microsoft, linkedin]\n  - [facebook, google]\n",
            valid_yaml()
        );
        let config = parse_orchestrator_str(&yaml).unwrap();
        assert!(validate_orchestrator(&config).is_ok());
    }

    #[test]
    fn table_validation_flags_unknown_steps_and_date_pks() {
        let registry = StepRegistry::with_default_steps();
        let tables = parse_platform_tables_str(
            r"
insights:
  processing:
    frobnicate: ~
  increment:
    pk_columns: [creative_id, date]
    increment_columns: [impressions]
",
        )
        .unwrap();
        let err = validate_tables("linkedin", &tables, &registry).unwrap_err();
        assert!(err.message.contains("unknown processing step 'frobnicate'"));
        assert!(err.message.contains("pk column 'date'"));
    }

    #[test]
    fn increment_without_metrics_fails() {
        let registry = StepRegistry::with_default_steps();
        let tables = parse_platform_tables_str(
            r"
insights:
  increment:
    pk_columns: [creative_id]
",
        )
        .unwrap();
        let err = validate_tables("linkedin", &tables, &registry).unwrap_err();
        assert!(err.message.contains("requires increment_columns"));
    }
}
