//! Execution report document and JSON/CSV export.

use std::path::Path;

use adsync_types::EtlError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::monitor::ExecutionStatus;

/// Run-level rollup.
#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub total_platforms: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Percentage of platforms that completed.
    pub success_rate: f64,
    pub total_rows_processed: u64,
    pub total_duration_seconds: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// One platform's line in the report.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformReport {
    pub platform_name: String,
    pub status: ExecutionStatus,
    pub duration_seconds: f64,
    pub rows_processed: u64,
    pub tables_processed: u64,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// The full report: a summary plus one entry per platform. CSV export is a
/// flat projection of the platform entries.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub summary: ReportSummary,
    pub platforms: Vec<PlatformReport>,
}

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Csv,
}

impl std::str::FromStr for ReportFormat {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(EtlError::config(
                "UNKNOWN_REPORT_FORMAT",
                format!("unknown report format '{other}' (expected json or csv)"),
            )),
        }
    }
}

impl ExecutionReport {
    /// Write the report to disk in the requested format.
    ///
    /// # Errors
    ///
    /// Returns an internal error when serialization or the write fails.
    pub fn export(&self, format: ReportFormat, path: &Path) -> Result<(), EtlError> {
        match format {
            ReportFormat::Json => self.write_json(path),
            ReportFormat::Csv => self.write_csv(path),
        }?;
        info!(path = %path.display(), format = ?format, "execution report exported");
        Ok(())
    }

    fn write_json(&self, path: &Path) -> Result<(), EtlError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            EtlError::internal("REPORT_SERIALIZE", format!("report serialization failed: {e}"))
        })?;
        std::fs::write(path, json).map_err(|e| {
            EtlError::internal(
                "REPORT_WRITE",
                format!("failed to write report to {}: {e}", path.display()),
            )
        })
    }

    fn write_csv(&self, path: &Path) -> Result<(), EtlError> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| {
            EtlError::internal(
                "REPORT_WRITE",
                format!("failed to open report at {}: {e}", path.display()),
            )
        })?;
        writer
            .write_record([
                "platform_name",
                "status",
                "duration_seconds",
                "rows_processed",
                "tables_processed",
                "retry_count",
                "error_message",
            ])
            .and_then(|()| {
                for p in &self.platforms {
                    writer.write_record([
                        p.platform_name.as_str(),
                        &p.status.to_string(),
                        &format!("{:.2}", p.duration_seconds),
                        &p.rows_processed.to_string(),
                        &p.tables_processed.to_string(),
                        &p.retry_count.to_string(),
                        p.error_message.as_deref().unwrap_or(""),
                    ])?;
                }
                writer.flush()?;
                Ok(())
            })
            .map_err(|e: csv::Error| {
                EtlError::internal("REPORT_WRITE", format!("csv export failed: {e}"))
            })
    }
}
