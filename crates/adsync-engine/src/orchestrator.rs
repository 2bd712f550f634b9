//! Orchestrator: executes platform pipelines in scheduled groups under a
//! concurrency budget, with per-platform retry/timeout policies, a global
//! wall-clock budget, cooperative cancellation, and continue-on-failure
//! dependent skipping.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use adsync_types::EtlError;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::types::{OrchestratorConfig, PlatformEntry};
use crate::config::validator::validate_orchestrator;
use crate::monitor::ExecutionMonitor;
use crate::pipeline::{PlatformPipeline, PlatformRunResult, RunContext};
use crate::retry::{compute_backoff, should_retry};
use crate::scheduler::PlatformScheduler;

/// Final outcome of one platform's attempts.
enum PlatformOutcome {
    Completed(PlatformRunResult),
    Failed(EtlError),
    Cancelled,
}

/// Rollup of one orchestrator run.
#[derive(Debug, Default)]
pub struct OrchestratorResult {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    pub cancelled: Vec<String>,
    pub total_rows_processed: u64,
    pub total_duration_seconds: f64,
    /// Platform name to first-line error message.
    pub error_summary: Vec<(String, String)>,
    /// The run was stopped by an external interrupt (SIGINT).
    pub interrupted: bool,
}

impl OrchestratorResult {
    #[must_use]
    pub fn success(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty() && self.skipped.is_empty()
    }

    /// Process exit code per the operational contract: 0 success, 2 partial
    /// failure, 3 total failure, 130 user interruption. (Config errors and
    /// internal errors map to 1 and 4 before a result exists.)
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            return 130;
        }
        if self.failed.is_empty() && self.cancelled.is_empty() && self.skipped.is_empty() {
            return 0;
        }
        if self.completed.is_empty() {
            3
        } else {
            2
        }
    }
}

/// Coordinates every configured platform pipeline for a run.
pub struct Orchestrator {
    config: OrchestratorConfig,
    pipelines: HashMap<String, Arc<dyn PlatformPipeline>>,
    monitor: Arc<ExecutionMonitor>,
}

impl Orchestrator {
    /// Validate the configuration and pair each enabled platform with its
    /// pipeline.
    ///
    /// # Errors
    ///
    /// Returns a config error for invalid configuration or an enabled
    /// platform without a registered pipeline.
    pub fn new(
        config: OrchestratorConfig,
        pipelines: HashMap<String, Arc<dyn PlatformPipeline>>,
    ) -> Result<Self, EtlError> {
        validate_orchestrator(&config)?;
        for platform in config.enabled_platforms() {
            if !pipelines.contains_key(&platform.name) {
                return Err(EtlError::config(
                    "UNKNOWN_PLATFORM",
                    format!("no pipeline registered for platform '{}'", platform.name),
                ));
            }
        }
        Ok(Self {
            config,
            pipelines,
            monitor: Arc::new(ExecutionMonitor::new()),
        })
    }

    #[must_use]
    pub fn monitor(&self) -> Arc<ExecutionMonitor> {
        Arc::clone(&self.monitor)
    }

    /// Run every enabled platform in scheduled groups.
    ///
    /// # Errors
    ///
    /// Returns a config error (cycle, invalid grouping) before any platform
    /// has started; execution failures are reported in the result instead.
    pub async fn run_all(&self, ctx: &RunContext) -> Result<OrchestratorResult, EtlError> {
        let enabled: Vec<&PlatformEntry> = self.config.enabled_platforms();
        if enabled.is_empty() {
            warn!("no enabled platforms configured");
            return Ok(OrchestratorResult::default());
        }

        let scheduler = PlatformScheduler::new(&enabled);
        // Natural frontier groups also verify acyclicity when a manual
        // partition is supplied.
        let natural_groups = scheduler.schedule()?;
        let groups = match &self.config.parallel_groups {
            Some(manual) => manual.clone(),
            None => natural_groups,
        };

        info!(
            platforms = enabled.len(),
            groups = groups.len(),
            "starting orchestrator run"
        );
        for (i, group) in groups.iter().enumerate() {
            info!(group = i + 1, members = %group.join(", "), "execution group");
        }

        self.monitor.start_run();
        let start = Instant::now();
        for platform in &enabled {
            self.monitor.register_platform(&platform.name);
        }

        // Global wall-clock budget delivers cancellation to in-flight
        // platforms through a child token.
        let run_ctx = RunContext {
            cancel: ctx.cancel.child_token(),
            ..ctx.clone()
        };
        let watchdog = self.config.orchestrator.global_timeout.map(|secs| {
            let cancel = run_ctx.cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                warn!(global_timeout_secs = secs, "global timeout reached, cancelling run");
                cancel.cancel();
            })
        });

        let mut completed: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut skipped: HashSet<String> = HashSet::new();
        let mut cancelled: HashSet<String> = HashSet::new();
        let mut total_rows = 0u64;

        for group in &groups {
            let members: Vec<&PlatformEntry> = group
                .iter()
                .filter_map(|name| enabled.iter().find(|p| p.name == *name).copied())
                .filter(|p| !skipped.contains(&p.name))
                .collect();
            if members.is_empty() {
                continue;
            }

            if run_ctx.cancel.is_cancelled() {
                for platform in &members {
                    skipped.insert(platform.name.clone());
                    self.monitor.skip_platform(&platform.name, "run cancelled before start");
                }
                continue;
            }

            let outcomes = self.run_group(&members, &run_ctx).await;

            for (name, outcome) in outcomes {
                match outcome {
                    PlatformOutcome::Completed(result) => {
                        total_rows += result.rows_processed();
                        self.monitor.complete_platform(
                            &name,
                            result.rows_processed(),
                            result.tables_processed(),
                        );
                        completed.insert(name);
                    }
                    PlatformOutcome::Failed(err) => {
                        self.monitor.fail_platform(&name, &err.to_string());
                        failed.insert(name);
                    }
                    PlatformOutcome::Cancelled => {
                        self.monitor.cancel_platform(&name);
                        cancelled.insert(name);
                    }
                }
            }

            // Before the next group: dependents of anything failed or
            // cancelled are skipped, never started.
            for broken in failed.iter().chain(cancelled.iter()) {
                for dependent in scheduler.transitive_dependents(broken) {
                    if !completed.contains(&dependent)
                        && !failed.contains(&dependent)
                        && skipped.insert(dependent.clone())
                    {
                        self.monitor.skip_platform(
                            &dependent,
                            &format!("dependency '{broken}' did not complete"),
                        );
                    }
                }
            }

            if !self.config.orchestrator.continue_on_failure
                && (!failed.is_empty() || !cancelled.is_empty())
            {
                error!("continue_on_failure is false, stopping after failed group");
                for platform in &enabled {
                    let name = &platform.name;
                    if !completed.contains(name)
                        && !failed.contains(name)
                        && !cancelled.contains(name)
                        && skipped.insert(name.clone())
                    {
                        self.monitor.skip_platform(name, "earlier platform failed");
                    }
                }
                break;
            }
        }

        if let Some(handle) = watchdog {
            handle.abort();
        }
        self.monitor.end_run();
        self.monitor.log_summary();

        let error_summary = self
            .monitor
            .all_executions()
            .into_iter()
            .filter(|e| e.status == crate::monitor::ExecutionStatus::Failed)
            .filter_map(|e| {
                e.error_message
                    .as_ref()
                    .map(|m| (e.platform_name.clone(), m.lines().next().unwrap_or("").to_string()))
            })
            .collect();

        Ok(OrchestratorResult {
            completed: sorted(completed),
            failed: sorted(failed),
            skipped: sorted(skipped),
            cancelled: sorted(cancelled),
            total_rows_processed: total_rows,
            total_duration_seconds: start.elapsed().as_secs_f64(),
            error_summary,
            interrupted: ctx.cancel.is_cancelled(),
        })
    }

    /// Run a single platform by name, ignoring its dependencies.
    ///
    /// # Errors
    ///
    /// Returns a config error for unknown or disabled platforms.
    pub async fn run_platform(
        &self,
        name: &str,
        ctx: &RunContext,
    ) -> Result<PlatformRunResult, EtlError> {
        let entry = self.config.platform(name).ok_or_else(|| {
            EtlError::config("UNKNOWN_PLATFORM", format!("platform '{name}' not configured"))
        })?;
        if !entry.enabled {
            return Err(EtlError::config(
                "PLATFORM_DISABLED",
                format!("platform '{name}' is not enabled"),
            ));
        }
        let pipeline = Arc::clone(self.pipelines.get(name).ok_or_else(|| {
            EtlError::config("UNKNOWN_PLATFORM", format!("no pipeline for platform '{name}'"))
        })?);

        self.monitor.register_platform(name);
        let outcome = run_platform_attempts(
            entry.clone(),
            pipeline,
            ctx.clone(),
            Arc::clone(&self.monitor),
        )
        .await;
        match outcome {
            PlatformOutcome::Completed(result) => {
                self.monitor
                    .complete_platform(name, result.rows_processed(), result.tables_processed());
                Ok(result)
            }
            PlatformOutcome::Failed(err) => {
                self.monitor.fail_platform(name, &err.to_string());
                Err(err)
            }
            PlatformOutcome::Cancelled => {
                self.monitor.cancel_platform(name);
                Err(EtlError::internal("CANCELLED", format!("platform '{name}' cancelled")))
            }
        }
    }

    /// Execute one group, bounded by `max_parallel`.
    async fn run_group(
        &self,
        members: &[&PlatformEntry],
        ctx: &RunContext,
    ) -> Vec<(String, PlatformOutcome)> {
        let parallel = self.config.orchestrator.parallel_execution && members.len() > 1;
        if !parallel {
            let mut outcomes = Vec::with_capacity(members.len());
            for entry in members {
                let outcome = run_platform_attempts(
                    (*entry).clone(),
                    Arc::clone(&self.pipelines[&entry.name]),
                    ctx.clone(),
                    Arc::clone(&self.monitor),
                )
                .await;
                outcomes.push((entry.name.clone(), outcome));
            }
            return outcomes;
        }

        let max_parallel = self.config.orchestrator.max_parallel.max(1);
        info!(
            members = members.len(),
            max_parallel, "executing group in parallel"
        );
        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let mut join_set: JoinSet<(String, PlatformOutcome)> = JoinSet::new();

        for entry in members {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let entry = (*entry).clone();
            let pipeline = Arc::clone(&self.pipelines[&entry.name]);
            let ctx = ctx.clone();
            let monitor = Arc::clone(&self.monitor);
            join_set.spawn(async move {
                let _permit = permit;
                let name = entry.name.clone();
                let outcome = run_platform_attempts(entry, pipeline, ctx, monitor).await;
                (name, outcome)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_err) => {
                    error!(error = %join_err, "platform task panicked");
                }
            }
        }
        outcomes
    }

    /// Export the current execution report.
    ///
    /// # Errors
    ///
    /// Returns an internal error when the write fails.
    pub fn export_report(
        &self,
        format: crate::report::ReportFormat,
        path: &std::path::Path,
    ) -> Result<(), EtlError> {
        self.monitor.report().export(format, path)
    }
}

fn sorted(set: HashSet<String>) -> Vec<String> {
    let mut names: Vec<String> = set.into_iter().collect();
    names.sort();
    names
}

/// Run one platform under its retry policy and timeout.
async fn run_platform_attempts(
    entry: PlatformEntry,
    pipeline: Arc<dyn PlatformPipeline>,
    ctx: RunContext,
    monitor: Arc<ExecutionMonitor>,
) -> PlatformOutcome {
    let max_attempts = entry.retry.max_attempts.max(1);
    let mut last_err: Option<EtlError> = None;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            let delay = compute_backoff(&entry.retry, attempt - 1, last_err.as_ref());
            info!(
                platform = %entry.name,
                attempt,
                max_attempts,
                delay_secs = delay.as_secs_f64(),
                "retrying after backoff"
            );
            monitor.increment_retry(&entry.name);
            tokio::select! {
                () = ctx.cancel.cancelled() => return PlatformOutcome::Cancelled,
                () = tokio::time::sleep(delay) => {}
            }
        }

        monitor.start_platform(&entry.name);
        info!(platform = %entry.name, attempt, "starting platform");

        let result = match entry.timeout_duration() {
            Some(limit) => match tokio::time::timeout(limit, pipeline.run(&ctx)).await {
                Ok(result) => result,
                Err(_) => {
                    let err = EtlError::transient_network(
                        "PLATFORM_TIMEOUT",
                        format!(
                            "platform '{}' exceeded its {}s timeout",
                            entry.name,
                            limit.as_secs()
                        ),
                    );
                    warn!(platform = %entry.name, attempt, "platform timed out");
                    last_err = Some(err);
                    continue;
                }
            },
            None => pipeline.run(&ctx).await,
        };

        if result.cancelled || ctx.cancel.is_cancelled() {
            return PlatformOutcome::Cancelled;
        }

        match result.failure() {
            None => {
                info!(
                    platform = %entry.name,
                    rows = result.rows_processed(),
                    tables = result.tables_processed(),
                    "platform completed"
                );
                return PlatformOutcome::Completed(result);
            }
            Some(err) => {
                warn!(
                    platform = %entry.name,
                    attempt,
                    max_attempts,
                    error = %err,
                    "platform attempt failed"
                );
                let terminal = !should_retry(err);
                last_err = Some(err.clone());
                if terminal {
                    break;
                }
            }
        }
    }

    PlatformOutcome::Failed(last_err.unwrap_or_else(|| {
        EtlError::internal("NO_ATTEMPTS", "platform produced no attempt outcome")
    }))
}
