//! Execution monitor: per-platform status, timing, and counters.
//!
//! Updates arrive concurrently from parallel platform tasks and are
//! serialized behind a single writer lock; writes are short. Status
//! transitions are monotonic: a terminal state is never revisited, and
//! retries keep a platform in `Running` across attempts.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::report::{ExecutionReport, PlatformReport, ReportSummary};

/// Lifecycle state of one platform within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl ExecutionStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Monotonic transition rule.
    fn may_become(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(
                next,
                Self::Running | Self::Skipped | Self::Cancelled | Self::Failed
            ),
            Self::Running => matches!(
                next,
                Self::Running | Self::Completed | Self::Failed | Self::Cancelled
            ),
            _ => false,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Execution record for a single platform.
#[derive(Debug, Clone)]
pub struct PlatformExecution {
    pub platform_name: String,
    pub status: ExecutionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub rows_processed: u64,
    pub tables_processed: u64,
    pub retry_count: u32,
    pub error_message: Option<String>,
}

impl PlatformExecution {
    fn new(platform_name: String) -> Self {
        Self {
            platform_name,
            status: ExecutionStatus::Pending,
            start_time: None,
            end_time: None,
            rows_processed: 0,
            tables_processed: 0,
            retry_count: 0,
            error_message: None,
        }
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => (end - start).as_seconds_f64().max(0.0),
            _ => 0.0,
        }
    }
}

#[derive(Default)]
struct MonitorState {
    executions: BTreeMap<String, PlatformExecution>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

/// Thread-safe tracker for one orchestrator run.
#[derive(Default)]
pub struct ExecutionMonitor {
    state: RwLock<MonitorState>,
}

impl ExecutionMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_run(&self) {
        let mut state = self.write();
        state.started_at = Some(Utc::now());
        info!("orchestrator run started");
    }

    pub fn end_run(&self) {
        let mut state = self.write();
        state.ended_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (state.started_at, state.ended_at) {
            info!(duration_secs = (end - start).as_seconds_f64(), "orchestrator run ended");
        }
    }

    pub fn register_platform(&self, name: &str) {
        let mut state = self.write();
        state
            .executions
            .entry(name.to_string())
            .or_insert_with(|| PlatformExecution::new(name.to_string()));
    }

    /// Mark a platform running. The first call stamps the start time;
    /// retries keep the state at `Running`.
    pub fn start_platform(&self, name: &str) {
        self.transition(name, ExecutionStatus::Running, |exec| {
            if exec.start_time.is_none() {
                exec.start_time = Some(Utc::now());
            }
        });
    }

    pub fn complete_platform(&self, name: &str, rows_processed: u64, tables_processed: u64) {
        self.transition(name, ExecutionStatus::Completed, |exec| {
            exec.end_time = Some(Utc::now());
            exec.rows_processed = rows_processed;
            exec.tables_processed = tables_processed;
        });
    }

    pub fn fail_platform(&self, name: &str, error: &str) {
        self.transition(name, ExecutionStatus::Failed, |exec| {
            exec.end_time = Some(Utc::now());
            exec.error_message = Some(error.to_string());
        });
    }

    pub fn cancel_platform(&self, name: &str) {
        self.transition(name, ExecutionStatus::Cancelled, |exec| {
            exec.end_time = Some(Utc::now());
        });
    }

    pub fn skip_platform(&self, name: &str, reason: &str) {
        self.transition(name, ExecutionStatus::Skipped, |exec| {
            exec.error_message = Some(reason.to_string());
        });
    }

    pub fn increment_retry(&self, name: &str) {
        let mut state = self.write();
        if let Some(exec) = state.executions.get_mut(name) {
            exec.retry_count += 1;
        }
    }

    #[must_use]
    pub fn execution(&self, name: &str) -> Option<PlatformExecution> {
        self.read().executions.get(name).cloned()
    }

    #[must_use]
    pub fn all_executions(&self) -> Vec<PlatformExecution> {
        self.read().executions.values().cloned().collect()
    }

    /// Platforms currently in the given status.
    #[must_use]
    pub fn platforms_in(&self, status: ExecutionStatus) -> Vec<String> {
        self.read()
            .executions
            .values()
            .filter(|e| e.status == status)
            .map(|e| e.platform_name.clone())
            .collect()
    }

    /// Build the §6.6 report document for the run so far.
    #[must_use]
    pub fn report(&self) -> ExecutionReport {
        let state = self.read();
        let executions: Vec<&PlatformExecution> = state.executions.values().collect();
        let total = executions.len();
        let completed = executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Completed)
            .count();
        let failed = executions
            .iter()
            .filter(|e| matches!(e.status, ExecutionStatus::Failed | ExecutionStatus::Cancelled))
            .count();
        let skipped = executions
            .iter()
            .filter(|e| e.status == ExecutionStatus::Skipped)
            .count();
        let total_rows: u64 = executions.iter().map(|e| e.rows_processed).sum();
        let duration = match (state.started_at, state.ended_at.or(Some(Utc::now()))) {
            (Some(start), Some(end)) => (end - start).as_seconds_f64().max(0.0),
            _ => 0.0,
        };
        let success_rate = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        };

        ExecutionReport {
            summary: ReportSummary {
                total_platforms: total,
                completed,
                failed,
                skipped,
                success_rate,
                total_rows_processed: total_rows,
                total_duration_seconds: duration,
                started_at: state.started_at,
                ended_at: state.ended_at,
            },
            platforms: executions
                .iter()
                .map(|e| PlatformReport {
                    platform_name: e.platform_name.clone(),
                    status: e.status,
                    duration_seconds: e.duration_seconds(),
                    rows_processed: e.rows_processed,
                    tables_processed: e.tables_processed,
                    retry_count: e.retry_count,
                    error_message: e.error_message.clone(),
                })
                .collect(),
        }
    }

    /// Log the run summary at info level.
    pub fn log_summary(&self) {
        let report = self.report();
        info!(
            total = report.summary.total_platforms,
            completed = report.summary.completed,
            failed = report.summary.failed,
            skipped = report.summary.skipped,
            success_rate = format!("{:.1}%", report.summary.success_rate),
            total_rows = report.summary.total_rows_processed,
            duration_secs = format!("{:.2}", report.summary.total_duration_seconds),
            "run summary"
        );
        for platform in &report.platforms {
            info!(
                platform = %platform.platform_name,
                status = %platform.status,
                rows = platform.rows_processed,
                tables = platform.tables_processed,
                retries = platform.retry_count,
                error = platform.error_message.as_deref().unwrap_or(""),
                "platform outcome"
            );
        }
    }

    fn transition(
        &self,
        name: &str,
        next: ExecutionStatus,
        update: impl FnOnce(&mut PlatformExecution),
    ) {
        let mut state = self.write();
        let exec = state
            .executions
            .entry(name.to_string())
            .or_insert_with(|| PlatformExecution::new(name.to_string()));
        if !exec.status.may_become(next) {
            warn!(
                platform = name,
                from = %exec.status,
                to = %next,
                "ignoring non-monotonic status transition"
            );
            return;
        }
        debug!(platform = name, from = %exec.status, to = %next, "status transition");
        exec.status = next;
        update(exec);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MonitorState> {
        self.state.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MonitorState> {
        self.state.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
