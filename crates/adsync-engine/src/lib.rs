//! Orchestration engine for the adsync ETL core.
//!
//! Pieces, bottom up: typed YAML [`config`] with env substitution and
//! validation; the [`processing`] step registry and pipeline; the
//! dependency-aware [`scheduler`]; the per-platform [`pipeline`] runner
//! (extract → transform → load); the [`orchestrator`] executing platforms
//! in groups with retry, timeouts, and cancellation; and the [`monitor`]
//! with its JSON/CSV [`report`].

pub mod config;
pub mod monitor;
pub mod orchestrator;
pub mod pipeline;
pub mod processing;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod token;

pub use config::{OrchestratorConfig, PlatformTables, TableSettings};
pub use monitor::{ExecutionMonitor, ExecutionStatus};
pub use orchestrator::{Orchestrator, OrchestratorResult};
pub use pipeline::{
    DriverQuery, PlatformAdapter, PlatformPipeline, PlatformRunResult, PlatformSpec, RunContext,
    TableJob, TableOutcome, TableRequest, TableRunner,
};
pub use processing::{ProcessingPipeline, StepParams, StepRegistry};
pub use report::{ExecutionReport, ReportFormat};
pub use scheduler::PlatformScheduler;
pub use token::{CachedTokenProvider, EnvTokenProvider, Token, TokenProvider};
