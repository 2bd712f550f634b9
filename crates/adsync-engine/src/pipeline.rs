//! Platform pipeline: extract → transform → load for one platform's tables.
//!
//! [`PlatformAdapter`] is the extraction contract toward the external
//! platform APIs; implementations live outside the core. [`TableRunner`]
//! drives a declarative [`PlatformSpec`] through the adapter, the processing
//! pipeline, and the sink, honoring table-level dependency order and
//! value-level driver keys.

use std::collections::HashMap;
use std::sync::Arc;

use adsync_sink::DataSink;
use adsync_types::{DateRange, EtlError, Frame, Value};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::types::TableSettings;
use crate::processing::{ProcessingPipeline, StepRegistry};
use crate::token::{Token, TokenProvider};

/// What the adapter needs to know to extract one table.
pub struct TableRequest<'a> {
    pub table: &'a str,
    /// API request name from the table config.
    pub request: Option<&'a str>,
    pub fields: &'a [String],
    pub page_size: Option<u32>,
    pub token: Option<&'a Token>,
}

/// Extraction contract implemented by per-platform adapters (HTTP/SDK
/// clients, fixtures). Failures signal retryability through the error's
/// own metadata.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    async fn extract(
        &self,
        request: &TableRequest<'_>,
        range: DateRange,
        driver_keys: &[Value],
    ) -> Result<Frame, EtlError>;
}

/// Cross-table value dependency: run `sql` against the sink and feed the
/// `key_column` values to the extractor as driver keys.
#[derive(Debug, Clone)]
pub struct DriverQuery {
    pub sql: String,
    pub key_column: String,
}

/// One table in a platform's declarative spec.
#[derive(Debug, Clone)]
pub struct TableJob {
    pub name: String,
    pub settings: TableSettings,
    /// Tables that must load before this one.
    pub depends_on: Vec<String>,
    pub driver_query: Option<DriverQuery>,
}

/// A platform's complete table set.
#[derive(Debug, Clone)]
pub struct PlatformSpec {
    pub platform: String,
    pub tables: Vec<TableJob>,
}

impl PlatformSpec {
    /// Tables in dependency order (stable within a frontier).
    ///
    /// # Errors
    ///
    /// Returns a config error on a table-dependency cycle.
    pub fn topological_tables(&self) -> Result<Vec<&TableJob>, EtlError> {
        let index: HashMap<&str, usize> = self
            .tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.as_str(), i))
            .collect();
        let mut in_degree: Vec<usize> = self
            .tables
            .iter()
            .map(|t| {
                t.depends_on
                    .iter()
                    .filter(|d| index.contains_key(d.as_str()))
                    .count()
            })
            .collect();

        let mut ordered = Vec::with_capacity(self.tables.len());
        let mut frontier: Vec<usize> = (0..self.tables.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();

        while let Some(i) = frontier.first().copied() {
            frontier.remove(0);
            ordered.push(&self.tables[i]);
            for (j, table) in self.tables.iter().enumerate() {
                if table
                    .depends_on
                    .iter()
                    .any(|d| d == &self.tables[i].name)
                {
                    in_degree[j] -= 1;
                    if in_degree[j] == 0 {
                        frontier.push(j);
                    }
                }
            }
        }

        if ordered.len() != self.tables.len() {
            return Err(EtlError::config(
                "CIRCULAR_DEPENDENCY",
                format!("circular table dependency in platform '{}'", self.platform),
            ));
        }
        Ok(ordered)
    }
}

/// Per-run options handed down from the orchestrator and CLI.
#[derive(Clone)]
pub struct RunContext {
    pub date_range: DateRange,
    /// Restrict to these tables when set.
    pub tables: Option<Vec<String>>,
    /// Extract and transform, but skip all sink writes.
    pub dry_run: bool,
    pub test_mode: bool,
    pub cancel: CancellationToken,
}

impl RunContext {
    #[must_use]
    pub fn new(date_range: DateRange) -> Self {
        Self {
            date_range,
            tables: None,
            dry_run: false,
            test_mode: false,
            cancel: CancellationToken::new(),
        }
    }

    fn wants_table(&self, name: &str) -> bool {
        self.tables.as_ref().is_none_or(|t| t.iter().any(|n| n == name))
    }
}

/// Outcome for one table.
#[derive(Debug)]
pub struct TableOutcome {
    pub table: String,
    pub rows_loaded: u64,
    pub error: Option<EtlError>,
}

/// Outcome for one platform run.
#[derive(Debug, Default)]
pub struct PlatformRunResult {
    pub platform: String,
    pub tables: Vec<TableOutcome>,
    /// Error that aborted the platform before its table list completed.
    pub aborted: Option<EtlError>,
    /// The run observed cancellation and stopped early.
    pub cancelled: bool,
}

impl PlatformRunResult {
    #[must_use]
    pub fn rows_processed(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_loaded).sum()
    }

    /// Tables that loaded without error.
    #[must_use]
    pub fn tables_processed(&self) -> u64 {
        self.tables.iter().filter(|t| t.error.is_none()).count() as u64
    }

    /// The platform-level failure, if this run counts as failed: an abort,
    /// or every attempted table failing. Per-table errors with surviving
    /// siblings leave the platform completed (they are reported per table).
    #[must_use]
    pub fn failure(&self) -> Option<&EtlError> {
        if let Some(err) = &self.aborted {
            return Some(err);
        }
        let errors: Vec<&EtlError> = self.tables.iter().filter_map(|t| t.error.as_ref()).collect();
        if !self.tables.is_empty() && errors.len() == self.tables.len() {
            errors.into_iter().next()
        } else {
            None
        }
    }
}

/// A runnable platform pipeline as the orchestrator sees it.
#[async_trait]
pub trait PlatformPipeline: Send + Sync {
    fn platform(&self) -> &str;
    fn table_names(&self) -> Vec<String>;
    fn table_dependencies(&self, table: &str) -> Vec<String>;
    async fn run(&self, ctx: &RunContext) -> PlatformRunResult;
}

impl std::fmt::Debug for dyn PlatformPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformPipeline")
            .field("platform", &self.platform())
            .finish_non_exhaustive()
    }
}

/// Generic platform pipeline over a declarative spec.
pub struct TableRunner {
    spec: PlatformSpec,
    adapter: Arc<dyn PlatformAdapter>,
    sink: Arc<dyn DataSink>,
    pipelines: HashMap<String, ProcessingPipeline>,
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl TableRunner {
    /// Build the runner, constructing every table's processing pipeline up
    /// front so unknown step names fail before any extraction.
    ///
    /// # Errors
    ///
    /// Returns a config error for unknown steps or cyclic table deps.
    pub fn new(
        spec: PlatformSpec,
        adapter: Arc<dyn PlatformAdapter>,
        sink: Arc<dyn DataSink>,
        registry: &StepRegistry,
        token_provider: Option<Arc<dyn TokenProvider>>,
    ) -> Result<Self, EtlError> {
        spec.topological_tables()?;
        let mut pipelines = HashMap::new();
        for table in &spec.tables {
            pipelines.insert(
                table.name.clone(),
                registry.build_pipeline(&table.settings.processing)?,
            );
        }
        Ok(Self {
            spec,
            adapter,
            sink,
            pipelines,
            token_provider,
        })
    }

    /// Fetch driver keys for a table with a value-level dependency.
    async fn driver_keys(&self, query: &DriverQuery) -> Result<Vec<Value>, EtlError> {
        let frame = self.sink.query(&query.sql).await.map_err(EtlError::from)?;
        let keys: Vec<Value> = frame
            .column(&query.key_column)
            .map(|col| col.values.iter().filter(|v| !v.is_null()).cloned().collect())
            .unwrap_or_default();
        Ok(keys)
    }

    async fn run_table(
        &self,
        job: &TableJob,
        ctx: &RunContext,
        token: Option<&Token>,
    ) -> Result<u64, EtlError> {
        let driver_keys = match &job.driver_query {
            Some(query) => {
                let keys = self.driver_keys(query).await?;
                if keys.is_empty() {
                    return Err(EtlError::dependency(
                        "NO_DRIVER_KEYS",
                        format!(
                            "driver-key query for table '{}' returned no rows",
                            job.name
                        ),
                    ));
                }
                keys
            }
            None => Vec::new(),
        };

        let range = job
            .settings
            .day
            .map_or(ctx.date_range, DateRange::lookback);
        let request = TableRequest {
            table: &job.name,
            request: job.settings.request.as_deref(),
            fields: &job.settings.fields,
            page_size: job.settings.page_size,
            token,
        };

        let raw = self.adapter.extract(&request, range, &driver_keys).await?;
        let pipeline = self
            .pipelines
            .get(&job.name)
            .expect("pipeline built for every table");
        let processed = pipeline.process(raw)?;

        if ctx.dry_run {
            info!(
                platform = %self.spec.platform,
                table = %job.name,
                rows = processed.num_rows(),
                "dry run, skipping sink write"
            );
            return Ok(processed.num_rows() as u64);
        }
        if ctx.test_mode && !job.settings.test_mode_suffix {
            warn!(
                platform = %self.spec.platform,
                table = %job.name,
                "table opts out of the test suffix, not written in test mode"
            );
            return Ok(0);
        }

        let load = &job.settings.load;
        let pk = if load.pk_columns.is_empty() {
            None
        } else {
            Some(load.pk_columns.as_slice())
        };
        let rows = self
            .sink
            .load(processed, &job.name, load.mode, pk, &load.increment_columns)
            .await
            .map_err(EtlError::from)?;
        Ok(rows)
    }

}

#[async_trait]
impl PlatformPipeline for TableRunner {
    fn platform(&self) -> &str {
        &self.spec.platform
    }

    fn table_names(&self) -> Vec<String> {
        self.spec.tables.iter().map(|t| t.name.clone()).collect()
    }

    fn table_dependencies(&self, table: &str) -> Vec<String> {
        self.spec
            .tables
            .iter()
            .find(|t| t.name == table)
            .map(|t| t.depends_on.clone())
            .unwrap_or_default()
    }

    /// Run the platform: tables in dependency order, per-table errors
    /// recorded, `stop_on_failure` tables aborting the rest.
    async fn run(&self, ctx: &RunContext) -> PlatformRunResult {
        let mut result = PlatformRunResult {
            platform: self.spec.platform.clone(),
            ..Default::default()
        };

        let token = if let Some(provider) = &self.token_provider {
            match provider.get_token(&self.spec.platform).await {
                Ok(token) => Some(token),
                Err(err) => {
                    result.aborted = Some(err);
                    return result;
                }
            }
        } else {
            None
        };

        let ordered = match self.spec.topological_tables() {
            Ok(ordered) => ordered,
            Err(err) => {
                result.aborted = Some(err);
                return result;
            }
        };

        for job in ordered {
            if !ctx.wants_table(&job.name) {
                continue;
            }
            // Cancellation is honored between tables; an in-flight sink
            // load always completes first.
            if ctx.cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }

            info!(platform = %self.spec.platform, table = %job.name, "processing table");
            match self.run_table(job, ctx, token.as_ref()).await {
                Ok(rows) => {
                    info!(platform = %self.spec.platform, table = %job.name, rows, "table loaded");
                    result.tables.push(TableOutcome {
                        table: job.name.clone(),
                        rows_loaded: rows,
                        error: None,
                    });
                }
                Err(err) => {
                    warn!(
                        platform = %self.spec.platform,
                        table = %job.name,
                        error = %err,
                        "table failed"
                    );
                    let stop = job.settings.stop_on_failure;
                    result.tables.push(TableOutcome {
                        table: job.name.clone(),
                        rows_loaded: 0,
                        error: Some(err.clone()),
                    });
                    if stop {
                        result.aborted = Some(err);
                        break;
                    }
                }
            }
        }
        result
    }
}
