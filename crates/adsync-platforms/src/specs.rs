//! Declarative platform specs: table sets, table-level dependencies, and
//! driver-key queries for the four shipped platforms.
//!
//! Table settings (fields, processing chains, load modes) live in the YAML
//! documents under `config/`; this module adds what YAML cannot express —
//! which tables depend on which, and the SQL that turns a loaded table into
//! driver keys for a dependent extraction.

use adsync_engine::config::{parse_platform_tables_str, PlatformTables};
use adsync_engine::pipeline::{DriverQuery, PlatformSpec, TableJob};
use adsync_types::EtlError;

pub const LINKEDIN: &str = "linkedin";
pub const FACEBOOK: &str = "facebook";
pub const GOOGLE: &str = "google";
pub const MICROSOFT: &str = "microsoft";

const LINKEDIN_TABLES: &str = include_str!("../config/linkedin_ads.yml");
const FACEBOOK_TABLES: &str = include_str!("../config/facebook_ads.yml");
const GOOGLE_TABLES: &str = include_str!("../config/google_ads.yml");
const MICROSOFT_TABLES: &str = include_str!("../config/microsoft_ads.yml");

fn parse_tables(platform: &str, yaml: &str) -> Result<PlatformTables, EtlError> {
    parse_platform_tables_str(yaml).map_err(|e| {
        EtlError::config(
            "BAD_TABLE_CONFIG",
            format!("embedded table config for '{platform}' failed to parse: {e}"),
        )
    })
}

fn build_spec(
    platform: &str,
    tables: PlatformTables,
    mut decorate: impl FnMut(&str) -> (Vec<String>, Option<DriverQuery>),
) -> PlatformSpec {
    let jobs = tables
        .tables
        .into_iter()
        .map(|(name, settings)| {
            let (depends_on, driver_query) = decorate(&name);
            TableJob {
                name,
                settings,
                depends_on,
                driver_query,
            }
        })
        .collect();
    PlatformSpec {
        platform: platform.to_string(),
        tables: jobs,
    }
}

/// LinkedIn Ads: account, campaign, audience, and cumulative insights.
/// Insights extraction is driven by recently loaded campaign ids.
///
/// # Errors
///
/// Returns a config error if the embedded table config is malformed.
pub fn linkedin() -> Result<PlatformSpec, EtlError> {
    let tables = parse_tables(LINKEDIN, LINKEDIN_TABLES)?;
    let lookback = tables
        .table("linkedin_ads_insights")
        .and_then(|t| t.day)
        .unwrap_or(150);
    Ok(build_spec(LINKEDIN, tables, |name| match name {
        "linkedin_ads_campaign" => (vec!["linkedin_ads_account".to_string()], None),
        "linkedin_ads_insights" => (
            vec!["linkedin_ads_campaign".to_string()],
            Some(DriverQuery {
                sql: format!(
                    "SELECT DISTINCT id FROM linkedin_ads_campaign \
                     WHERE row_loaded_date >= CURRENT_DATE - {lookback}"
                ),
                key_column: "id".to_string(),
            }),
        ),
        _ => (Vec::new(), None),
    }))
}

/// Facebook Ads: campaign, audience, and per-action insights driven by
/// campaign ids.
///
/// # Errors
///
/// Returns a config error if the embedded table config is malformed.
pub fn facebook() -> Result<PlatformSpec, EtlError> {
    let tables = parse_tables(FACEBOOK, FACEBOOK_TABLES)?;
    Ok(build_spec(FACEBOOK, tables, |name| match name {
        "facebook_ads_insights" => (
            vec!["facebook_ads_campaign".to_string()],
            Some(DriverQuery {
                sql: "SELECT DISTINCT id FROM facebook_ads_campaign".to_string(),
                key_column: "id".to_string(),
            }),
        ),
        _ => (Vec::new(), None),
    }))
}

/// Google Ads: campaign, cumulative ad report, and placement view. The ad
/// report is driven by campaign ids.
///
/// # Errors
///
/// Returns a config error if the embedded table config is malformed.
pub fn google() -> Result<PlatformSpec, EtlError> {
    let tables = parse_tables(GOOGLE, GOOGLE_TABLES)?;
    Ok(build_spec(GOOGLE, tables, |name| match name {
        "google_ads_ad_report" => (
            vec!["google_ads_campaign".to_string()],
            Some(DriverQuery {
                sql: "SELECT DISTINCT campaign_id FROM google_ads_campaign".to_string(),
                key_column: "campaign_id".to_string(),
            }),
        ),
        "google_ads_placement" => (vec!["google_ads_campaign".to_string()], None),
        _ => (Vec::new(), None),
    }))
}

/// Microsoft Ads: campaign and ad performance reports.
///
/// # Errors
///
/// Returns a config error if the embedded table config is malformed.
pub fn microsoft() -> Result<PlatformSpec, EtlError> {
    let tables = parse_tables(MICROSOFT, MICROSOFT_TABLES)?;
    Ok(build_spec(MICROSOFT, tables, |_| (Vec::new(), None)))
}

/// Spec for a platform by name.
///
/// # Errors
///
/// Returns a config error for unknown platform names.
pub fn spec_for(platform: &str) -> Result<PlatformSpec, EtlError> {
    match platform {
        LINKEDIN => linkedin(),
        FACEBOOK => facebook(),
        GOOGLE => google(),
        MICROSOFT => microsoft(),
        other => Err(EtlError::config(
            "UNKNOWN_PLATFORM",
            format!("no platform spec for '{other}'"),
        )),
    }
}

/// All shipped platform names.
#[must_use]
pub fn platform_names() -> Vec<&'static str> {
    vec![LINKEDIN, FACEBOOK, GOOGLE, MICROSOFT]
}

#[cfg(test)]
mod tests {
    use super::*;
    use adsync_engine::config::validate_tables;
    use adsync_engine::StepRegistry;
    use adsync_types::LoadMode;

    #[test]
    fn every_shipped_spec_parses_and_orders() {
        for name in platform_names() {
            let spec = spec_for(name).unwrap();
            assert!(!spec.tables.is_empty(), "{name} has no tables");
            let ordered = spec.topological_tables().unwrap();
            assert_eq!(ordered.len(), spec.tables.len());
        }
    }

    #[test]
    fn every_shipped_table_config_validates_against_the_registry() {
        let registry = StepRegistry::with_default_steps();
        for (name, yaml) in [
            (LINKEDIN, LINKEDIN_TABLES),
            (FACEBOOK, FACEBOOK_TABLES),
            (GOOGLE, GOOGLE_TABLES),
            (MICROSOFT, MICROSOFT_TABLES),
        ] {
            let tables = parse_tables(name, yaml).unwrap();
            validate_tables(name, &tables, &registry).unwrap();
        }
    }

    #[test]
    fn linkedin_insights_follow_campaign_with_driver_keys() {
        let spec = linkedin().unwrap();
        let insights = spec
            .tables
            .iter()
            .find(|t| t.name == "linkedin_ads_insights")
            .unwrap();
        assert_eq!(insights.depends_on, vec!["linkedin_ads_campaign"]);
        let query = insights.driver_query.as_ref().unwrap();
        assert!(query.sql.contains("linkedin_ads_campaign"));
        assert_eq!(query.key_column, "id");
        assert_eq!(insights.settings.load.mode, LoadMode::Increment);
        assert_eq!(insights.settings.load.pk_columns, vec!["creative_id"]);
    }

    #[test]
    fn cumulative_tables_use_increment_without_date_keys() {
        for name in platform_names() {
            let spec = spec_for(name).unwrap();
            for table in &spec.tables {
                if table.settings.load.mode == LoadMode::Increment {
                    assert!(
                        !table.settings.load.pk_columns.iter().any(|c| c.contains("date")),
                        "{}.{} keys a date column in increment mode",
                        name,
                        table.name
                    );
                    assert!(!table.settings.load.increment_columns.is_empty());
                }
            }
        }
    }

    #[test]
    fn unknown_platform_is_a_config_error() {
        let err = spec_for("twitter").unwrap_err();
        assert_eq!(err.code, "UNKNOWN_PLATFORM");
    }
}
