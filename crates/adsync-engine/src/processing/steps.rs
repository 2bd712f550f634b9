//! Built-in processing steps.
//!
//! Step semantics are part of the external contract: platform table configs
//! reference these names. Steps that name columns skip missing ones with a
//! warning so one chain can serve several table variants.

use std::collections::HashSet;
use std::sync::LazyLock;

use adsync_types::{EtlError, Frame, Value};
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use tracing::warn;

use super::{StepParams, StepRegistry};

static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid digits regex"));

const MICROS_PER_UNIT: f64 = 1_000_000.0;

/// Register every built-in step.
pub fn register_default_steps(registry: &mut StepRegistry) {
    registry.register("add_company", add_company);
    registry.register("add_row_loaded_date", add_row_loaded_date);
    registry.register("extract_id_from_urn", extract_id_from_urn);
    registry.register("build_date_field", build_date_field);
    registry.register("convert_unix_timestamp", convert_unix_timestamp);
    registry.register("rename_column", rename_column);
    registry.register("replace_nan_with_zero", replace_nan_with_zero);
    registry.register("convert_nat_to_null", convert_nat_to_null);
    registry.register("modify_urn_account", modify_urn_account);
    registry.register("response_decoration", response_decoration);
    registry.register("aggregate_by_entity", aggregate_by_entity);
    registry.register("convert_costs", convert_costs);
    registry.register("extract_nested_actions", extract_nested_actions);
    registry.register("modify_name", modify_name);
    registry.register("convert_string", convert_string);
}

/// Add a `companyid` column mapped from the account column.
fn add_company(mut frame: Frame, params: &StepParams) -> Result<Frame, EtlError> {
    let account_column = params.string("account_column").unwrap_or_else(|| "id".to_string());
    let mapping = params.string_map("mapping");
    let default_id = params.integer("default_company_id").unwrap_or(1);

    let Some(col) = frame.column(&account_column) else {
        return Err(EtlError::data(
            "MISSING_COLUMN",
            format!("account column '{account_column}' not found"),
        ));
    };
    let companies: Vec<Value> = col
        .values
        .iter()
        .map(|v| {
            let account = v.render();
            mapping
                .iter()
                .find(|(k, _)| *k == account)
                .and_then(|(_, company)| company.parse::<i64>().ok())
                .map_or(Value::Int(default_id), Value::Int)
        })
        .collect();
    frame.push_column("companyid", companies)?;
    Ok(frame)
}

/// Append a `row_loaded_date` timestamp column with the current wall time.
fn add_row_loaded_date(mut frame: Frame, _params: &StepParams) -> Result<Frame, EtlError> {
    if frame.has_column("row_loaded_date") {
        return Ok(frame);
    }
    frame.push_const_column("row_loaded_date", Value::Timestamp(Utc::now().naive_utc()))?;
    Ok(frame)
}

/// For each named column, replace `ns:a:b:c:N` with `N`.
fn extract_id_from_urn(mut frame: Frame, params: &StepParams) -> Result<Frame, EtlError> {
    for column in params.string_list("columns") {
        if !frame.has_column(&column) {
            warn!(column, "column not found, skipping urn extraction");
            continue;
        }
        frame.map_column(&column, |v| match v {
            Value::Str(s) if s.contains(':') => {
                Value::Str(s.rsplit(':').next().unwrap_or(s).to_string())
            }
            other => other.clone(),
        });
    }
    Ok(frame)
}

/// Combine `dateRange_{start,end}_{year,month,day}` component columns into
/// date columns; by default keep only the start date as `date`.
fn build_date_field(mut frame: Frame, params: &StepParams) -> Result<Frame, EtlError> {
    let begin_end = {
        let configured = params.string_list("begin_end");
        if configured.is_empty() {
            vec!["start".to_string(), "end".to_string()]
        } else {
            configured
        }
    };
    let exclude = params.boolean("exclude").unwrap_or(true);

    for timerange in &begin_end {
        let component_names: Vec<String> = ["year", "month", "day"]
            .iter()
            .map(|f| format!("dateRange_{timerange}_{f}"))
            .collect();
        let missing: Vec<&String> = component_names
            .iter()
            .filter(|c| !frame.has_column(c))
            .collect();
        if !missing.is_empty() {
            warn!(?missing, "missing date component columns, skipping date building");
            continue;
        }

        let indices: Vec<usize> = component_names
            .iter()
            .map(|c| frame.column_index(c).expect("presence checked above"))
            .collect();
        let dates: Vec<Value> = (0..frame.num_rows())
            .map(|row| {
                let parts: Vec<Option<i64>> = indices
                    .iter()
                    .map(|&idx| component_int(&frame.columns()[idx].values[row]))
                    .collect();
                match (parts[0], parts[1], parts[2]) {
                    (Some(y), Some(m), Some(d)) => i32::try_from(y)
                        .ok()
                        .and_then(|y| {
                            NaiveDate::from_ymd_opt(y, u32::try_from(m).ok()?, u32::try_from(d).ok()?)
                        })
                        .map_or(Value::Null, Value::Date),
                    _ => Value::Null,
                }
            })
            .collect();

        frame.push_column(format!("date_{timerange}"), dates)?;
        for component in &component_names {
            frame.drop_column(component);
        }
    }

    if exclude && frame.has_column("date_start") {
        frame.drop_column("date_end");
        frame.rename_column("date_start", "date");
    }
    Ok(frame)
}

fn component_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(v) => Some(*v),
        Value::Float(v) if v.fract() == 0.0 => Some(*v as i64),
        Value::Str(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Convert named millisecond-epoch columns to timestamps.
fn convert_unix_timestamp(mut frame: Frame, params: &StepParams) -> Result<Frame, EtlError> {
    for column in params.string_list("columns") {
        if !frame.has_column(&column) {
            warn!(column, "column not found, skipping timestamp conversion");
            continue;
        }
        frame.map_column(&column, |v| {
            let millis = match v {
                Value::Int(ms) => Some(*ms),
                Value::Float(ms) => Some(*ms as i64),
                Value::Str(s) => s.trim().parse().ok(),
                _ => None,
            };
            millis
                .and_then(DateTime::from_timestamp_millis)
                .map_or(Value::Null, |dt| Value::Timestamp(dt.naive_utc()))
        });
    }
    Ok(frame)
}

/// Rename columns per an `{old: new}` mapping; missing old names are skipped.
fn rename_column(mut frame: Frame, params: &StepParams) -> Result<Frame, EtlError> {
    for (old, new) in params.string_map("renaming") {
        frame.rename_column(&old, &new);
    }
    Ok(frame)
}

/// For named numeric columns, null/NaN become 0.
fn replace_nan_with_zero(mut frame: Frame, params: &StepParams) -> Result<Frame, EtlError> {
    for column in params.string_list("columns") {
        frame.map_column(&column, |v| {
            if v.is_nan_like() {
                Value::Int(0)
            } else {
                v.clone()
            }
        });
    }
    Ok(frame)
}

/// For named timestamp columns, unset sentinels become null.
fn convert_nat_to_null(mut frame: Frame, params: &StepParams) -> Result<Frame, EtlError> {
    for column in params.string_list("columns") {
        frame.map_column(&column, |v| match v {
            Value::Str(s) if s.is_empty() || s == "NaT" => Value::Null,
            other => other.clone(),
        });
    }
    Ok(frame)
}

/// Extract the numeric account id from a sponsored-account URN column.
fn modify_urn_account(mut frame: Frame, params: &StepParams) -> Result<Frame, EtlError> {
    let column = params.string("column").unwrap_or_else(|| "account".to_string());
    if !frame.has_column(&column) {
        warn!(column, "column not found, skipping urn account extraction");
        return Ok(frame);
    }
    frame.map_column(&column, |v| match v {
        Value::Str(s) => match s.rsplit_once("urn:li:sponsoredAccount:") {
            Some((_, id)) => Value::Str(id.to_string()),
            None => Value::Str(s.clone()),
        },
        other => other.clone(),
    });
    Ok(frame)
}

/// Lift a numeric id out of a URN field, optionally into a new column.
fn response_decoration(mut frame: Frame, params: &StepParams) -> Result<Frame, EtlError> {
    let Some(field) = params.string("field") else {
        return Err(EtlError::data("MISSING_PARAM", "response_decoration requires 'field'"));
    };
    if !frame.has_column(&field) {
        warn!(field, "column not found, skipping response decoration");
        return Ok(frame);
    }

    let extract = |v: &Value| match v {
        Value::Str(s) => DIGITS_RE
            .find(s)
            .map_or(Value::Str(s.clone()), |m| Value::Str(m.as_str().to_string())),
        other => other.clone(),
    };

    match params.string("new_col_name") {
        Some(new_name) => {
            let extracted: Vec<Value> = frame
                .column(&field)
                .expect("presence checked above")
                .values
                .iter()
                .map(extract)
                .collect();
            frame.push_column(new_name, extracted)?;
            frame.drop_column(&field);
        }
        None => frame.map_column(&field, extract),
    }
    Ok(frame)
}

/// Group by entity columns and sum metric columns, reducing many rows per
/// entity to one. Entity columns default to id-like names; metric columns
/// default to the numeric remainder. Date and text columns are dropped: the
/// output keys cumulative lifetime metrics per entity, not per day.
fn aggregate_by_entity(frame: Frame, params: &StepParams) -> Result<Frame, EtlError> {
    if frame.is_empty() {
        return Ok(frame);
    }

    let configured_entities = params.string_list("entity_columns");
    let entity_columns: Vec<String> = if configured_entities.is_empty() {
        frame
            .column_names()
            .iter()
            .filter(|n| **n == "id" || n.ends_with("_id"))
            .map(ToString::to_string)
            .collect()
    } else {
        configured_entities
    };
    if entity_columns.is_empty() {
        return Err(EtlError::data(
            "NO_ENTITY_COLUMNS",
            "aggregate_by_entity found no entity columns (configure entity_columns or add *_id columns)",
        ));
    }

    let configured_metrics = params.string_list("metric_columns");
    let entity_set: HashSet<&str> = entity_columns.iter().map(String::as_str).collect();
    let metric_columns: Vec<String> = if configured_metrics.is_empty() {
        frame
            .columns()
            .iter()
            .filter(|c| !entity_set.contains(c.name.as_str()))
            .filter(|c| c.values.iter().any(Value::is_numeric))
            .filter(|c| {
                c.values
                    .iter()
                    .all(|v| v.is_numeric() || v.is_null())
            })
            .map(|c| c.name.clone())
            .collect()
    } else {
        configured_metrics
    };

    let entity_idx: Vec<usize> = entity_columns
        .iter()
        .filter_map(|n| frame.column_index(n))
        .collect();
    if entity_idx.len() != entity_columns.len() {
        return Err(EtlError::data(
            "MISSING_COLUMN",
            format!("entity columns {entity_columns:?} not all present in payload"),
        ));
    }
    let metric_idx: Vec<usize> = metric_columns
        .iter()
        .filter_map(|n| frame.column_index(n))
        .collect();

    let mut order: Vec<Vec<Value>> = Vec::new();
    let mut sums: std::collections::HashMap<Vec<Value>, Vec<Value>> =
        std::collections::HashMap::new();
    for row in 0..frame.num_rows() {
        let key = frame.key_at(row, &entity_idx);
        let metrics: Vec<Value> = metric_idx
            .iter()
            .map(|&idx| frame.columns()[idx].values[row].clone())
            .collect();
        match sums.get_mut(&key) {
            None => {
                order.push(key.clone());
                sums.insert(key, metrics);
            }
            Some(acc) => {
                for (a, m) in acc.iter_mut().zip(metrics) {
                    *a = sum_values(a, &m);
                }
            }
        }
    }

    let names = entity_columns.iter().chain(metric_columns.iter()).cloned();
    let rows: Vec<Vec<Value>> = order
        .into_iter()
        .map(|key| {
            let metrics = sums.remove(&key).expect("key recorded on first sight");
            key.into_iter().chain(metrics).collect()
        })
        .collect();
    Frame::from_rows(names, rows)
}

fn sum_values(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(x + y),
        (Value::Null, other) | (other, Value::Null) => other.clone(),
        _ => Value::Float(a.as_float().unwrap_or(0.0) + b.as_float().unwrap_or(0.0)),
    }
}

/// Divide named micros columns by 1,000,000.
fn convert_costs(mut frame: Frame, params: &StepParams) -> Result<Frame, EtlError> {
    for column in params.string_list("columns") {
        if !frame.has_column(&column) {
            warn!(column, "column not found, skipping micros conversion");
            continue;
        }
        frame.map_column(&column, |v| match v {
            Value::Int(micros) => Value::Float(*micros as f64 / MICROS_PER_UNIT),
            Value::Float(micros) => Value::Float(micros / MICROS_PER_UNIT),
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map_or(Value::Null, |micros| Value::Float(micros / MICROS_PER_UNIT)),
            _ => Value::Null,
        });
    }
    Ok(frame)
}

/// Flatten an array-of-objects column (JSON text) into a long-form table
/// with one row per action type.
fn extract_nested_actions(frame: Frame, params: &StepParams) -> Result<Frame, EtlError> {
    let column = params.string("column").unwrap_or_else(|| "actions".to_string());
    let type_field = params.string("type_field").unwrap_or_else(|| "action_type".to_string());
    let value_field = params.string("value_field").unwrap_or_else(|| "value".to_string());

    let Some(actions_idx) = frame.column_index(&column) else {
        warn!(column, "column not found, skipping action extraction");
        return Ok(frame);
    };

    let kept: Vec<usize> = (0..frame.num_columns()).filter(|&i| i != actions_idx).collect();
    let mut names: Vec<String> = kept
        .iter()
        .map(|&i| frame.columns()[i].name.clone())
        .collect();
    names.push(type_field.clone());
    names.push(value_field.clone());

    let mut rows = Vec::new();
    for row in 0..frame.num_rows() {
        let cell = &frame.columns()[actions_idx].values[row];
        let Value::Str(json_text) = cell else {
            continue;
        };
        let Ok(serde_json::Value::Array(actions)) =
            serde_json::from_str::<serde_json::Value>(json_text)
        else {
            warn!(column, row, "cell is not a JSON array, skipping");
            continue;
        };
        for action in actions {
            let action_type = action
                .get(&type_field)
                .and_then(|v| v.as_str())
                .map_or(Value::Null, |s| Value::Str(s.to_string()));
            let action_value = match action.get(&value_field) {
                Some(serde_json::Value::Number(n)) if n.is_i64() => {
                    Value::Int(n.as_i64().expect("checked i64"))
                }
                Some(serde_json::Value::Number(n)) => Value::Float(n.as_f64().unwrap_or(0.0)),
                Some(serde_json::Value::String(s)) => Value::Str(s.clone()),
                _ => Value::Null,
            };
            let mut out_row: Vec<Value> = kept
                .iter()
                .map(|&i| frame.columns()[i].values[row].clone())
                .collect();
            out_row.push(action_type);
            out_row.push(action_value);
            rows.push(out_row);
        }
    }
    Frame::from_rows(names, rows)
}

/// Replace the bulk-format delimiter in named text columns.
fn modify_name(mut frame: Frame, params: &StepParams) -> Result<Frame, EtlError> {
    for column in params.string_list("columns") {
        frame.map_column(&column, |v| match v {
            Value::Str(s) if s.contains('|') => Value::Str(s.replace('|', "-")),
            other => other.clone(),
        });
    }
    Ok(frame)
}

/// Stringify named columns, leaving nulls in place.
fn convert_string(mut frame: Frame, params: &StepParams) -> Result<Frame, EtlError> {
    for column in params.string_list("columns") {
        frame.map_column(&column, |v| match v {
            Value::Null => Value::Null,
            Value::Str(s) => Value::Str(s.clone()),
            other => Value::Str(other.render()),
        });
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(json: serde_json::Value) -> StepParams {
        StepParams(json)
    }

    #[test]
    fn urn_extraction_takes_trailing_id() {
        let frame = Frame::from_rows(
            ["campaign"],
            vec![
                vec![Value::Str("urn:li:sponsoredCampaign:123456".into())],
                vec![Value::Str("already-plain".into())],
                vec![Value::Null],
            ],
        )
        .unwrap();
        let out = extract_id_from_urn(frame, &params(serde_json::json!({"columns": ["campaign"]})))
            .unwrap();
        assert_eq!(
            out.column("campaign").unwrap().values,
            vec![
                Value::Str("123456".into()),
                Value::Str("already-plain".into()),
                Value::Null
            ]
        );
    }

    #[test]
    fn build_date_field_combines_components() {
        let frame = Frame::from_rows(
            [
                "dateRange_start_year",
                "dateRange_start_month",
                "dateRange_start_day",
                "dateRange_end_year",
                "dateRange_end_month",
                "dateRange_end_day",
                "impressions",
            ],
            vec![vec![
                Value::Int(2026),
                Value::Int(1),
                Value::Int(20),
                Value::Int(2026),
                Value::Int(1),
                Value::Int(21),
                Value::Int(100),
            ]],
        )
        .unwrap();
        let out = build_date_field(frame, &params(serde_json::Value::Null)).unwrap();
        assert_eq!(out.column_names(), vec!["impressions", "date"]);
        assert_eq!(
            out.column("date").unwrap().values,
            vec![Value::Date(NaiveDate::from_ymd_opt(2026, 1, 20).unwrap())]
        );
    }

    #[test]
    fn unix_timestamp_conversion_handles_bad_cells() {
        let frame = Frame::from_rows(
            ["created"],
            vec![
                vec![Value::Int(1_737_369_000_000)],
                vec![Value::Str("garbage".into())],
            ],
        )
        .unwrap();
        let out =
            convert_unix_timestamp(frame, &params(serde_json::json!({"columns": ["created"]})))
                .unwrap();
        let values = &out.column("created").unwrap().values;
        assert!(matches!(values[0], Value::Timestamp(_)));
        assert_eq!(values[1], Value::Null);
    }

    #[test]
    fn aggregate_by_entity_sums_metrics_and_drops_dates() {
        let frame = Frame::from_rows(
            ["creative_id", "date", "impressions", "clicks"],
            vec![
                vec![Value::Int(123), Value::Str("2026-01-20".into()), Value::Int(100), Value::Int(5)],
                vec![Value::Int(123), Value::Str("2026-01-21".into()), Value::Int(150), Value::Int(8)],
                vec![Value::Int(123), Value::Str("2026-01-22".into()), Value::Int(120), Value::Int(6)],
                vec![Value::Int(456), Value::Str("2026-01-20".into()), Value::Int(50), Value::Int(2)],
                vec![Value::Int(456), Value::Str("2026-01-21".into()), Value::Int(80), Value::Int(4)],
            ],
        )
        .unwrap();
        let out = aggregate_by_entity(frame, &params(serde_json::Value::Null)).unwrap();
        assert_eq!(out.num_rows(), 2);
        assert!(!out.has_column("date"));
        assert_eq!(
            out.column("impressions").unwrap().values,
            vec![Value::Int(370), Value::Int(130)]
        );
        assert_eq!(
            out.column("clicks").unwrap().values,
            vec![Value::Int(19), Value::Int(6)]
        );
    }

    #[test]
    fn aggregate_honors_configured_columns() {
        let frame = Frame::from_rows(
            ["campaign_id", "creative_id", "spend"],
            vec![
                vec![Value::Int(1), Value::Int(10), Value::Float(1.5)],
                vec![Value::Int(1), Value::Int(11), Value::Float(2.5)],
            ],
        )
        .unwrap();
        let out = aggregate_by_entity(
            frame,
            &params(serde_json::json!({
                "entity_columns": ["campaign_id"],
                "metric_columns": ["spend"]
            })),
        )
        .unwrap();
        assert_eq!(out.column_names(), vec!["campaign_id", "spend"]);
        assert_eq!(out.column("spend").unwrap().values, vec![Value::Float(4.0)]);
    }

    #[test]
    fn convert_costs_divides_micros() {
        let frame = Frame::from_rows(
            ["cost_micros"],
            vec![vec![Value::Int(2_500_000)], vec![Value::Str("1000000".into())]],
        )
        .unwrap();
        let out =
            convert_costs(frame, &params(serde_json::json!({"columns": ["cost_micros"]}))).unwrap();
        assert_eq!(
            out.column("cost_micros").unwrap().values,
            vec![Value::Float(2.5), Value::Float(1.0)]
        );
    }

    #[test]
    fn response_decoration_lifts_id_into_new_column() {
        let frame = Frame::from_rows(
            ["creative"],
            vec![vec![Value::Str("urn:li:sponsoredCreative:987".into())]],
        )
        .unwrap();
        let out = response_decoration(
            frame,
            &params(serde_json::json!({"field": "creative", "new_col_name": "creative_id"})),
        )
        .unwrap();
        assert!(!out.has_column("creative"));
        assert_eq!(
            out.column("creative_id").unwrap().values,
            vec![Value::Str("987".into())]
        );
    }

    #[test]
    fn extract_nested_actions_builds_long_form_rows() {
        let actions = r#"[{"action_type": "link_click", "value": 12}, {"action_type": "like", "value": 3}]"#;
        let frame = Frame::from_rows(
            ["ad_id", "actions"],
            vec![
                vec![Value::Int(1), Value::Str(actions.into())],
                vec![Value::Int(2), Value::Null],
            ],
        )
        .unwrap();
        let out = extract_nested_actions(frame, &params(serde_json::Value::Null)).unwrap();
        assert_eq!(out.column_names(), vec!["ad_id", "action_type", "value"]);
        assert_eq!(out.num_rows(), 2);
        assert_eq!(
            out.column("action_type").unwrap().values,
            vec![Value::Str("link_click".into()), Value::Str("like".into())]
        );
        assert_eq!(out.column("value").unwrap().values, vec![Value::Int(12), Value::Int(3)]);
    }

    #[test]
    fn add_company_maps_known_accounts_and_defaults_the_rest() {
        let frame = Frame::from_rows(
            ["id"],
            vec![vec![Value::Str("512345".into())], vec![Value::Str("999".into())]],
        )
        .unwrap();
        let out = add_company(
            frame,
            &params(serde_json::json!({"mapping": {"512345": 7}, "default_company_id": 1})),
        )
        .unwrap();
        assert_eq!(
            out.column("companyid").unwrap().values,
            vec![Value::Int(7), Value::Int(1)]
        );
    }

    #[test]
    fn modify_urn_account_strips_prefix() {
        let frame = Frame::from_rows(
            ["account"],
            vec![vec![Value::Str("urn:li:sponsoredAccount:512345".into())]],
        )
        .unwrap();
        let out = modify_urn_account(frame, &params(serde_json::Value::Null)).unwrap();
        assert_eq!(
            out.column("account").unwrap().values,
            vec![Value::Str("512345".into())]
        );
    }

    #[test]
    fn nan_replacement_and_nat_conversion() {
        let frame = Frame::from_rows(
            ["clicks", "seen_at"],
            vec![vec![Value::Null, Value::Str("NaT".into())]],
        )
        .unwrap();
        let out = replace_nan_with_zero(frame, &params(serde_json::json!({"columns": ["clicks"]})))
            .unwrap();
        let out =
            convert_nat_to_null(out, &params(serde_json::json!({"columns": ["seen_at"]}))).unwrap();
        assert_eq!(out.column("clicks").unwrap().values, vec![Value::Int(0)]);
        assert_eq!(out.column("seen_at").unwrap().values, vec![Value::Null]);
    }

    #[test]
    fn modify_name_replaces_delimiter() {
        let frame =
            Frame::from_rows(["name"], vec![vec![Value::Str("brand|campaign".into())]]).unwrap();
        let out = modify_name(frame, &params(serde_json::json!({"columns": ["name"]}))).unwrap();
        assert_eq!(
            out.column("name").unwrap().values,
            vec![Value::Str("brand-campaign".into())]
        );
    }
}
