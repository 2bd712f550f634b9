//! Config YAML parsing with environment variable substitution.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::config::types::{OrchestratorConfig, PlatformTables};

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error listing every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let mut missing = Vec::new();

    for cap in ENV_VAR_RE.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(val) => {
                result = result.replace(&cap[0], &val);
            }
            Err(_) => missing.push(var_name.to_string()),
        }
    }

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result)
}

/// Parse an orchestrator YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if substitution fails or the YAML is invalid.
pub fn parse_orchestrator_str(yaml_str: &str) -> Result<OrchestratorConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: OrchestratorConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse orchestrator YAML")?;
    Ok(config)
}

/// Parse an orchestrator YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_orchestrator(path: &Path) -> Result<OrchestratorConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read orchestrator config: {}", path.display()))?;
    parse_orchestrator_str(&content)
}

/// Parse a platform table-config YAML string.
///
/// # Errors
///
/// Returns an error if substitution fails or the document is not a mapping
/// of table names to table settings.
pub fn parse_platform_tables_str(yaml_str: &str) -> Result<PlatformTables> {
    let substituted = substitute_env_vars(yaml_str)?;
    let doc: serde_yaml::Value =
        serde_yaml::from_str(&substituted).context("Failed to parse platform table YAML")?;
    PlatformTables::from_yaml(&doc).map_err(|e| anyhow::anyhow!(e))
}

/// Parse a platform table-config YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn parse_platform_tables(path: &Path) -> Result<PlatformTables> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read platform config: {}", path.display()))?;
    parse_platform_tables_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_substitution() {
        std::env::set_var("ADSYNC_TEST_HOST", "warehouse.example.com");
        let input = "host: ${ADSYNC_TEST_HOST}\nport: 5433";
        let result = substitute_env_vars(input).unwrap();
        assert!(result.contains("warehouse.example.com"));
        assert!(!result.contains("${ADSYNC_TEST_HOST}"));
        std::env::remove_var("ADSYNC_TEST_HOST");
    }

    #[test]
    fn no_env_vars_is_passthrough() {
        let input = "host: localhost";
        assert_eq!(substitute_env_vars(input).unwrap(), input);
    }

    #[test]
    fn all_missing_env_vars_are_reported() {
        let input = "${ADSYNC_MISSING_X} and ${ADSYNC_MISSING_Y}";
        let err = substitute_env_vars(input).unwrap_err().to_string();
        assert!(err.contains("ADSYNC_MISSING_X"));
        assert!(err.contains("ADSYNC_MISSING_Y"));
    }

    #[test]
    fn parse_orchestrator_from_string() {
        let yaml = r"
orchestrator:
  parallel_execution: true
  max_parallel: 2
  continue_on_failure: true
  global_timeout: 3600
platforms:
  - name: microsoft
    priority: 10
  - name: linkedin
    depends_on: [microsoft]
    retry:
      max_attempts: 5
";
        let config = parse_orchestrator_str(yaml).unwrap();
        assert_eq!(config.orchestrator.max_parallel, 2);
        assert_eq!(config.platforms.len(), 2);
        assert_eq!(config.platforms[1].depends_on, vec!["microsoft"]);
        assert_eq!(config.platforms[1].retry.max_attempts, 5);
        // Defaults fill in what the document omits.
        assert!(config.platforms[0].enabled);
        assert_eq!(config.platforms[0].retry.max_attempts, 3);
    }

    #[test]
    fn parse_invalid_yaml_errors() {
        assert!(parse_orchestrator_str("platforms: [{{{").is_err());
    }

    #[test]
    fn parse_orchestrator_file_not_found() {
        let err = parse_orchestrator(Path::new("/nonexistent/orchestrator.yml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read orchestrator config"));
    }

    #[test]
    fn parse_platform_tables_from_string() {
        let yaml = r"
linkedin_ads_campaign:
  request: campaigns
  page_size: 1000
  fields: [id, name, status]
  processing:
    extract_id_from_urn:
      columns: [account]
    add_row_loaded_date: ~
  upsert:
    pk_columns: [id]
linkedin_ads_insights:
  day: 150
  processing:
    aggregate_by_entity: ~
  increment:
    pk_columns: [creative_id]
    increment_columns: [impressions, clicks]
";
        let tables = parse_platform_tables_str(yaml).unwrap();
        assert_eq!(tables.tables.len(), 2);
        let campaign = tables.table("linkedin_ads_campaign").unwrap();
        assert_eq!(campaign.load.mode, adsync_types::LoadMode::Upsert);
        assert_eq!(campaign.load.pk_columns, vec!["id"]);
        assert_eq!(campaign.processing.len(), 2);
        assert_eq!(campaign.processing[0].name, "extract_id_from_urn");

        let insights = tables.table("linkedin_ads_insights").unwrap();
        assert_eq!(insights.load.mode, adsync_types::LoadMode::Increment);
        assert_eq!(insights.load.increment_columns, vec!["impressions", "clicks"]);
        assert_eq!(insights.day, Some(150));
    }
}
