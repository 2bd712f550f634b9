//! PostgreSQL warehouse sink.
//!
//! Sessions are created lazily, pooled, and bounded; bulk-format writes for
//! one target table never interleave (per-table mutex, acquired after a
//! session lease). Append streams COPY directly into the target; upsert and
//! increment stage the payload in a transaction-scoped temp table and merge
//! from there, so a failed load rolls back to the pre-state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use adsync_types::{EtlError, Frame, LoadMode, SemanticType, TableSchema, Value};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::SinkExt;
use pg_escape::quote_identifier;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_postgres::types::Type;
use tokio_postgres::{Client, NoTls, Row, Transaction};
use tracing::{debug, info, warn};

use crate::align::align;
use crate::catalog;
use crate::copy_format;
use crate::dedupe::{collapse_increment_duplicates, filter_new_rows, key_indices, key_set};
use crate::error::SinkError;
use crate::DataSink;

/// Flush COPY data to the wire in chunks of this size.
const COPY_CHUNK_BYTES: usize = 4 * 1024 * 1024;

/// Timestamp column touched by increment updates when the target carries it.
const LAST_UPDATED_COLUMN: &str = "last_updated_date";

/// Connection and behavior settings for [`PostgresSink`].
#[derive(Debug, Clone)]
pub struct PostgresSinkConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Warehouse schema holding the target tables.
    pub schema: String,
    /// Append the test suffix to every target table name.
    pub test_mode: bool,
    pub test_suffix: String,
    /// Existing-key tuples read into memory for append dedupe before
    /// falling back to a staged anti-join in the warehouse.
    pub dedupe_scan_limit: i64,
    /// Upper bound on concurrently leased warehouse sessions.
    pub pool_size: usize,
}

impl PostgresSinkConfig {
    /// Read connection settings from `WAREHOUSE_*` environment variables
    /// plus the `TEST_MODE` flag.
    ///
    /// # Errors
    ///
    /// Returns a config error listing every missing variable.
    pub fn from_env() -> Result<Self, EtlError> {
        let mut missing = Vec::new();
        let mut var = |name: &str| match std::env::var(name) {
            Ok(v) => v,
            Err(_) => {
                missing.push(name.to_string());
                String::new()
            }
        };

        let host = var("WAREHOUSE_HOST");
        let port = std::env::var("WAREHOUSE_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5432);
        let database = var("WAREHOUSE_DATABASE");
        let user = var("WAREHOUSE_USER");
        let password = var("WAREHOUSE_PASSWORD");
        let schema = std::env::var("WAREHOUSE_SCHEMA").unwrap_or_else(|_| "public".to_string());

        if !missing.is_empty() {
            return Err(EtlError::config(
                "MISSING_ENV",
                format!("missing environment variable(s): {}", missing.join(", ")),
            ));
        }

        let test_mode = std::env::var("TEST_MODE")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            host,
            port,
            database,
            user,
            password,
            schema,
            test_mode,
            test_suffix: "_test".to_string(),
            dedupe_scan_limit: 500_000,
            pool_size: 8,
        })
    }
}

/// One leased warehouse session. The permit returns pool capacity on drop;
/// the client is handed back explicitly on clean completion and dropped
/// (closing the connection) on error.
struct Session {
    client: Client,
    _permit: OwnedSemaphorePermit,
}

struct SessionPool {
    pg_config: tokio_postgres::Config,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<Client>>,
    closed: AtomicBool,
}

impl SessionPool {
    fn new(config: &PostgresSinkConfig) -> Self {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.user);
        if !config.password.is_empty() {
            pg_config.password(&config.password);
        }
        Self {
            pg_config,
            semaphore: Arc::new(Semaphore::new(config.pool_size.max(1))),
            idle: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    async fn lease(&self) -> Result<Session, SinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SinkError::Closed)?;

        if let Some(client) = self.idle.lock().await.pop() {
            return Ok(Session {
                client,
                _permit: permit,
            });
        }

        let (client, connection) = self
            .pg_config
            .connect(NoTls)
            .await
            .map_err(|e| SinkError::Connection(format!("connect failed: {e}")))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "warehouse connection task ended with error");
            }
        });
        debug!("opened new warehouse session");
        Ok(Session {
            client,
            _permit: permit,
        })
    }

    async fn release(&self, session: Session) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.idle.lock().await.push(session.client);
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.idle.lock().await.clear();
        self.semaphore.close();
    }
}

/// PostgreSQL implementation of [`DataSink`].
pub struct PostgresSink {
    config: PostgresSinkConfig,
    pool: SessionPool,
    table_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PostgresSink {
    #[must_use]
    pub fn new(config: PostgresSinkConfig) -> Self {
        let pool = SessionPool::new(&config);
        Self {
            config,
            pool,
            table_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Target table name with the test suffix applied in test mode.
    fn target_table(&self, table: &str) -> String {
        if self.config.test_mode && !table.ends_with(&self.config.test_suffix) {
            format!("{table}{}", self.config.test_suffix)
        } else {
            table.to_string()
        }
    }

    fn qualified(&self, table: &str) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.config.schema),
            quote_identifier(table)
        )
    }

    fn table_lock(&self, table: &str) -> Arc<Mutex<()>> {
        let mut locks = self.table_locks.lock().expect("table lock registry poisoned");
        locks.entry(table.to_string()).or_default().clone()
    }

    /// Resolve the pk columns to use for this load, detecting from catalog
    /// metadata when the mode requires keys and none were configured.
    fn resolve_pk(
        mode: LoadMode,
        pk_columns: Option<&[String]>,
        schema: &TableSchema,
        table: &str,
    ) -> Result<Vec<String>, SinkError> {
        let configured: Vec<String> = pk_columns.map(<[String]>::to_vec).unwrap_or_default();
        if !configured.is_empty() {
            if mode == LoadMode::Increment {
                for name in &configured {
                    if let Some(col) = schema.column(name) {
                        if matches!(col.semantic_type, SemanticType::Date | SemanticType::Timestamp)
                        {
                            return Err(SinkError::Integrity(format!(
                                "increment pk column '{name}' on {table} is date-typed; \
                                 cumulative keys must not include dates"
                            )));
                        }
                    }
                }
            }
            return Ok(configured);
        }
        if !mode.requires_primary_key() {
            return Ok(configured);
        }
        let detected = schema.primary_key_columns(mode == LoadMode::Increment);
        if detected.is_empty() {
            return Err(SinkError::Integrity(format!(
                "{mode} load on {table} requires pk columns, none configured or in catalog"
            )));
        }
        Ok(detected)
    }

    async fn copy_into(
        client: &dyn CopySession,
        qualified: &str,
        frame: &Frame,
    ) -> Result<u64, SinkError> {
        let col_list = frame
            .columns()
            .iter()
            .map(|c| quote_identifier(&c.name).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        let stmt = format!("COPY {qualified} ({col_list}) FROM STDIN WITH (FORMAT text)");

        let sink = client
            .copy_in_stmt(&stmt)
            .await
            .map_err(|e| map_db_error("COPY start", &e))?;
        let mut sink = Box::pin(sink);

        let data = copy_format::encode(frame);
        for chunk in data.chunks(COPY_CHUNK_BYTES) {
            sink.send(Bytes::copy_from_slice(chunk))
                .await
                .map_err(|e| SinkError::Connection(format!("COPY send failed: {e}")))?;
        }
        let rows = sink
            .as_mut()
            .finish()
            .await
            .map_err(|e| map_db_error("COPY finish", &e))?;
        Ok(rows)
    }

    /// Create the transaction-scoped staging table and COPY the payload in.
    async fn stage_payload(
        tx: &Transaction<'_>,
        qualified: &str,
        table: &str,
        frame: &Frame,
    ) -> Result<String, SinkError> {
        let stage_name = format!("{table}__stage");
        let stage = quote_identifier(&stage_name).into_owned();
        tx.execute(
            &format!("CREATE TEMP TABLE {stage} (LIKE {qualified} INCLUDING DEFAULTS) ON COMMIT DROP"),
            &[],
        )
        .await
        .map_err(|e| map_db_error("staging table create", &e))?;
        Self::copy_into(tx, &stage, frame).await?;
        Ok(stage)
    }

    async fn load_append(
        &self,
        session: &mut Session,
        qualified: &str,
        table: &str,
        mut frame: Frame,
        pk: &[String],
    ) -> Result<u64, SinkError> {
        if pk.is_empty() {
            return Self::copy_into(&session.client, qualified, &frame).await;
        }

        let pk_idx = key_indices(&frame, pk)?;
        let pk_list = pk
            .iter()
            .map(|c| quote_identifier(c).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        let limit = self.config.dedupe_scan_limit;
        let scan_sql =
            format!("SELECT DISTINCT {pk_list} FROM {qualified} LIMIT {}", limit + 1);
        let rows = session
            .client
            .query(&scan_sql, &[])
            .await
            .map_err(|e| map_db_error("dedupe scan", &e))?;

        if rows.len() as i64 > limit {
            // Target too large for an in-memory key set: push the anti-join
            // down to the warehouse through a staged insert.
            debug!(table, "dedupe key set above scan limit, using staged anti-join");
            let tx = session
                .client
                .transaction()
                .await
                .map_err(|e| map_db_error("begin", &e))?;
            let stage = Self::stage_payload(&tx, qualified, table, &frame).await?;
            let match_clause = pk_match_clause(pk, "t", "s");
            let col_list = column_list(&frame);
            let inserted = tx
                .execute(
                    &format!(
                        "INSERT INTO {qualified} ({col_list}) \
                         SELECT {col_list} FROM {stage} s \
                         WHERE NOT EXISTS (SELECT 1 FROM {qualified} t WHERE {match_clause})"
                    ),
                    &[],
                )
                .await
                .map_err(|e| map_db_error("anti-join insert", &e))?;
            tx.commit().await.map_err(|e| map_db_error("commit", &e))?;
            return Ok(inserted);
        }

        let existing_frame = decode_rows(&rows)?;
        let existing = if existing_frame.num_columns() == pk_idx.len() {
            key_set(&existing_frame, &(0..pk_idx.len()).collect::<Vec<_>>())
        } else {
            Default::default()
        };
        filter_new_rows(&mut frame, &pk_idx, &existing);
        if frame.is_empty() {
            info!(table, "no new rows after dedupe");
            return Ok(0);
        }
        Self::copy_into(&session.client, qualified, &frame).await
    }

    async fn load_replace(
        session: &mut Session,
        qualified: &str,
        frame: &Frame,
    ) -> Result<u64, SinkError> {
        let tx = session
            .client
            .transaction()
            .await
            .map_err(|e| map_db_error("begin", &e))?;
        tx.execute(&format!("TRUNCATE TABLE {qualified}"), &[])
            .await
            .map_err(|e| map_db_error("truncate", &e))?;
        let rows = Self::copy_into(&tx, qualified, frame).await?;
        tx.commit().await.map_err(|e| map_db_error("commit", &e))?;
        Ok(rows)
    }

    async fn load_upsert(
        session: &mut Session,
        qualified: &str,
        table: &str,
        frame: &Frame,
        pk: &[String],
    ) -> Result<u64, SinkError> {
        key_indices(frame, pk)?;
        let tx = session
            .client
            .transaction()
            .await
            .map_err(|e| map_db_error("begin", &e))?;
        let stage = Self::stage_payload(&tx, qualified, table, frame).await?;
        let sql = build_upsert_sql(qualified, &stage, &frame.column_names(), pk);
        let affected = tx
            .execute(&sql, &[])
            .await
            .map_err(|e| map_db_error("upsert merge", &e))?;
        tx.commit().await.map_err(|e| map_db_error("commit", &e))?;
        Ok(affected)
    }

    async fn load_increment(
        session: &mut Session,
        qualified: &str,
        table: &str,
        schema: &TableSchema,
        frame: &Frame,
        pk: &[String],
        increment_columns: &[String],
    ) -> Result<u64, SinkError> {
        if increment_columns.is_empty() {
            return Err(SinkError::Integrity(format!(
                "increment load on {table} requires increment_columns"
            )));
        }
        for name in increment_columns {
            match schema.column(name) {
                None => {
                    return Err(SinkError::Integrity(format!(
                        "increment column '{name}' not in {table} schema"
                    )))
                }
                Some(col)
                    if !matches!(
                        col.semantic_type,
                        SemanticType::Integer | SemanticType::Float
                    ) =>
                {
                    return Err(SinkError::Integrity(format!(
                        "increment column '{name}' on {table} is {}, expected numeric",
                        col.semantic_type
                    )))
                }
                Some(_) => {}
            }
        }

        let pk_idx = key_indices(frame, pk)?;
        let inc_idx: Vec<usize> = increment_columns
            .iter()
            .filter_map(|c| frame.column_index(c))
            .collect();
        // One delta per key: the batched UPDATE would otherwise apply an
        // arbitrary single row for a duplicated key.
        let collapsed = collapse_increment_duplicates(frame, &pk_idx, &inc_idx);

        let touch_last_updated = schema
            .column(LAST_UPDATED_COLUMN)
            .is_some_and(|c| !increment_columns.iter().any(|i| i == LAST_UPDATED_COLUMN) && c.semantic_type == SemanticType::Timestamp);

        let tx = session
            .client
            .transaction()
            .await
            .map_err(|e| map_db_error("begin", &e))?;
        let stage = Self::stage_payload(&tx, qualified, table, &collapsed).await?;

        let update_sql = build_increment_update_sql(
            qualified,
            &stage,
            pk,
            increment_columns,
            touch_last_updated,
        );
        let updated = tx
            .execute(&update_sql, &[])
            .await
            .map_err(|e| map_db_error("increment update", &e))?;

        let match_clause = pk_match_clause(pk, "t", "s");
        let col_list = column_list(&collapsed);
        let inserted = tx
            .execute(
                &format!(
                    "INSERT INTO {qualified} ({col_list}) \
                     SELECT {col_list} FROM {stage} s \
                     WHERE NOT EXISTS (SELECT 1 FROM {qualified} t WHERE {match_clause})"
                ),
                &[],
            )
            .await
            .map_err(|e| map_db_error("increment insert", &e))?;
        tx.commit().await.map_err(|e| map_db_error("commit", &e))?;
        debug!(table, updated, inserted, "increment load applied");
        Ok(updated + inserted)
    }
}

#[async_trait]
impl DataSink for PostgresSink {
    async fn load(
        &self,
        frame: Frame,
        table: &str,
        mode: LoadMode,
        pk_columns: Option<&[String]>,
        increment_columns: &[String],
    ) -> Result<u64, SinkError> {
        if frame.is_empty() {
            info!(table, "payload empty, skipping load");
            return Ok(0);
        }

        let table_name = self.target_table(table);
        let qualified = self.qualified(&table_name);

        let mut session = self.pool.lease().await?;
        // Lock ordering: session lease first, then the target-table mutex.
        let lock = self.table_lock(&table_name);
        let _guard = lock.lock().await;

        let result = async {
            let schema = catalog::table_schema(&session.client, &self.config.schema, &table_name)
                .await?
                .ok_or_else(|| SinkError::MissingTable(qualified.clone()))?;

            let mut aligned = align(&frame, &table_name, &schema)?;
            aligned.dedup_rows();

            let pk = Self::resolve_pk(mode, pk_columns, &schema, &table_name)?;

            match mode {
                LoadMode::Append => {
                    self.load_append(&mut session, &qualified, &table_name, aligned, &pk)
                        .await
                }
                LoadMode::Replace => Self::load_replace(&mut session, &qualified, &aligned).await,
                LoadMode::Upsert => {
                    Self::load_upsert(&mut session, &qualified, &table_name, &aligned, &pk).await
                }
                LoadMode::Increment => {
                    Self::load_increment(
                        &mut session,
                        &qualified,
                        &table_name,
                        &schema,
                        &aligned,
                        &pk,
                        increment_columns,
                    )
                    .await
                }
            }
        }
        .await;

        match result {
            Ok(rows) => {
                info!(table = %table_name, rows, %mode, "load complete");
                self.pool.release(session).await;
                Ok(rows)
            }
            // The session may hold a broken connection or an aborted
            // transaction; drop it instead of returning it to the pool.
            Err(e) => Err(e),
        }
    }

    async fn query(&self, sql: &str) -> Result<Frame, SinkError> {
        let session = self.pool.lease().await?;
        let rows = session
            .client
            .query(sql, &[])
            .await
            .map_err(|e| map_db_error("query", &e))?;
        let frame = decode_rows(&rows)?;
        self.pool.release(session).await;
        Ok(frame)
    }

    async fn table_exists(&self, table: &str) -> Result<bool, SinkError> {
        let table_name = self.target_table(table);
        let session = self.pool.lease().await?;
        let row = session
            .client
            .query_one(
                "SELECT COUNT(*)::BIGINT FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2",
                &[&self.config.schema, &table_name],
            )
            .await
            .map_err(|e| map_db_error("table_exists", &e))?;
        let count: i64 = row.get(0);
        self.pool.release(session).await;
        Ok(count > 0)
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.pool.close().await;
        Ok(())
    }
}

/// Minimal COPY-capable session surface, implemented for both plain clients
/// (append path) and transactions (staged paths).
#[async_trait]
trait CopySession: Sync {
    async fn copy_in_stmt(
        &self,
        stmt: &str,
    ) -> Result<tokio_postgres::CopyInSink<Bytes>, tokio_postgres::Error>;
}

#[async_trait]
impl CopySession for Client {
    async fn copy_in_stmt(
        &self,
        stmt: &str,
    ) -> Result<tokio_postgres::CopyInSink<Bytes>, tokio_postgres::Error> {
        self.copy_in(stmt).await
    }
}

#[async_trait]
impl CopySession for Transaction<'_> {
    async fn copy_in_stmt(
        &self,
        stmt: &str,
    ) -> Result<tokio_postgres::CopyInSink<Bytes>, tokio_postgres::Error> {
        self.copy_in(stmt).await
    }
}

fn column_list(frame: &Frame) -> String {
    frame
        .columns()
        .iter()
        .map(|c| quote_identifier(&c.name).into_owned())
        .collect::<Vec<_>>()
        .join(", ")
}

fn pk_match_clause(pk: &[String], left: &str, right: &str) -> String {
    pk.iter()
        .map(|c| {
            let q = quote_identifier(c);
            format!("{left}.{q} = {right}.{q}")
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// `INSERT … SELECT … ON CONFLICT (pk) DO UPDATE` replacing every non-pk
/// column from the staged payload.
fn build_upsert_sql(qualified: &str, stage: &str, columns: &[&str], pk: &[String]) -> String {
    let col_list = columns
        .iter()
        .map(|c| quote_identifier(c).into_owned())
        .collect::<Vec<_>>()
        .join(", ");
    let pk_list = pk
        .iter()
        .map(|c| quote_identifier(c).into_owned())
        .collect::<Vec<_>>()
        .join(", ");
    let update_cols: Vec<String> = columns
        .iter()
        .filter(|c| !pk.iter().any(|p| p == *c))
        .map(|c| {
            let q = quote_identifier(c);
            format!("{q} = EXCLUDED.{q}")
        })
        .collect();
    if update_cols.is_empty() {
        format!(
            "INSERT INTO {qualified} ({col_list}) SELECT {col_list} FROM {stage} \
             ON CONFLICT ({pk_list}) DO NOTHING"
        )
    } else {
        format!(
            "INSERT INTO {qualified} ({col_list}) SELECT {col_list} FROM {stage} \
             ON CONFLICT ({pk_list}) DO UPDATE SET {}",
            update_cols.join(", ")
        )
    }
}

/// Batched cumulative UPDATE adding each staged increment column onto the
/// stored value.
fn build_increment_update_sql(
    qualified: &str,
    stage: &str,
    pk: &[String],
    increment_columns: &[String],
    touch_last_updated: bool,
) -> String {
    let mut sets: Vec<String> = increment_columns
        .iter()
        .map(|c| {
            let q = quote_identifier(c);
            format!("{q} = t.{q} + s.{q}")
        })
        .collect();
    if touch_last_updated {
        sets.push(format!("{LAST_UPDATED_COLUMN} = now()"));
    }
    let match_clause = pk_match_clause(pk, "t", "s");
    format!(
        "UPDATE {qualified} t SET {} FROM {stage} s WHERE {match_clause}",
        sets.join(", ")
    )
}

/// Classify a driver error: unique/check violations are constraint errors,
/// closed connections are transient, the rest surface as query failures.
fn map_db_error(context: &str, e: &tokio_postgres::Error) -> SinkError {
    if let Some(state) = e.code() {
        if state.code().starts_with("23") {
            return SinkError::ConstraintViolation(format!("{context}: {e}"));
        }
    }
    if e.is_closed() {
        return SinkError::Connection(format!("{context}: {e}"));
    }
    SinkError::Query(format!("{context}: {e}"))
}

/// Decode driver rows into a frame using the statement's column types.
fn decode_rows(rows: &[Row]) -> Result<Frame, SinkError> {
    let Some(first) = rows.first() else {
        return Ok(Frame::new());
    };
    let columns = first.columns();
    let mut data: Vec<(String, Vec<Value>)> = columns
        .iter()
        .map(|c| (c.name().to_string(), Vec::with_capacity(rows.len())))
        .collect();

    for row in rows {
        for (idx, col) in columns.iter().enumerate() {
            let value = decode_cell(row, idx, col.type_())?;
            data[idx].1.push(value);
        }
    }
    Frame::from_columns(data).map_err(|e| SinkError::Query(e.to_string()))
}

fn decode_cell(row: &Row, idx: usize, ty: &Type) -> Result<Value, SinkError> {
    let null_safe = |v: Option<Value>| v.unwrap_or(Value::Null);
    let err = |e: tokio_postgres::Error| SinkError::Query(format!("row decode failed: {e}"));
    match ty.name() {
        "int2" => Ok(null_safe(
            row.try_get::<_, Option<i16>>(idx).map_err(err)?.map(|v| Value::Int(v.into())),
        )),
        "int4" => Ok(null_safe(
            row.try_get::<_, Option<i32>>(idx).map_err(err)?.map(|v| Value::Int(v.into())),
        )),
        "int8" => Ok(null_safe(
            row.try_get::<_, Option<i64>>(idx).map_err(err)?.map(Value::Int),
        )),
        "float4" => Ok(null_safe(
            row.try_get::<_, Option<f32>>(idx)
                .map_err(err)?
                .map(|v| Value::Float(v.into())),
        )),
        "float8" => Ok(null_safe(
            row.try_get::<_, Option<f64>>(idx).map_err(err)?.map(Value::Float),
        )),
        "bool" => Ok(null_safe(
            row.try_get::<_, Option<bool>>(idx).map_err(err)?.map(Value::Bool),
        )),
        "date" => Ok(null_safe(
            row.try_get::<_, Option<chrono::NaiveDate>>(idx)
                .map_err(err)?
                .map(Value::Date),
        )),
        "timestamp" => Ok(null_safe(
            row.try_get::<_, Option<chrono::NaiveDateTime>>(idx)
                .map_err(err)?
                .map(Value::Timestamp),
        )),
        "timestamptz" => Ok(null_safe(
            row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
                .map_err(err)?
                .map(|v| Value::Timestamp(v.naive_utc())),
        )),
        "text" | "varchar" | "bpchar" | "name" => Ok(null_safe(
            row.try_get::<_, Option<String>>(idx).map_err(err)?.map(Value::Str),
        )),
        other => Err(SinkError::Query(format!(
            "unsupported column type in query result: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_sql_replaces_every_non_pk_column() {
        let sql = build_upsert_sql(
            "public.campaign",
            "campaign__stage",
            &["id", "status", "budget"],
            &["id".to_string()],
        );
        assert!(sql.contains("ON CONFLICT (id) DO UPDATE SET"));
        assert!(sql.contains("status = EXCLUDED.status"));
        assert!(sql.contains("budget = EXCLUDED.budget"));
        assert!(!sql.contains("id = EXCLUDED.id"));
    }

    #[test]
    fn upsert_sql_with_only_pk_columns_does_nothing_on_conflict() {
        let sql = build_upsert_sql("public.t", "t__stage", &["id"], &["id".to_string()]);
        assert!(sql.contains("DO NOTHING"));
    }

    #[test]
    fn increment_sql_adds_stage_values_and_touches_last_updated() {
        let sql = build_increment_update_sql(
            "public.insights",
            "insights__stage",
            &["creative_id".to_string()],
            &["impressions".to_string(), "clicks".to_string()],
            true,
        );
        assert!(sql.contains("impressions = t.impressions + s.impressions"));
        assert!(sql.contains("clicks = t.clicks + s.clicks"));
        assert!(sql.contains("last_updated_date = now()"));
        assert!(sql.contains("WHERE t.creative_id = s.creative_id"));
    }

    #[test]
    fn pk_match_clause_joins_composite_keys() {
        let clause = pk_match_clause(&["a".to_string(), "b".to_string()], "t", "s");
        assert_eq!(clause, "t.a = s.a AND t.b = s.b");
    }

    #[test]
    fn resolve_pk_rejects_date_keys_for_increment() {
        use adsync_types::ColumnSchema;
        let schema = TableSchema::new(vec![
            ColumnSchema::new("id", SemanticType::Integer).primary_key(),
            ColumnSchema::new("date", SemanticType::Date).primary_key(),
        ]);
        let err = PostgresSink::resolve_pk(
            LoadMode::Increment,
            Some(&["date".to_string()]),
            &schema,
            "t",
        )
        .unwrap_err();
        assert!(matches!(err, SinkError::Integrity(_)));

        // Detection path drops the date column instead.
        let detected =
            PostgresSink::resolve_pk(LoadMode::Increment, None, &schema, "t").unwrap();
        assert_eq!(detected, vec!["id"]);
    }

    #[test]
    fn resolve_pk_requires_keys_for_upsert() {
        let schema = TableSchema::new(vec![adsync_types::ColumnSchema::new(
            "v",
            SemanticType::Integer,
        )]);
        let err = PostgresSink::resolve_pk(LoadMode::Upsert, None, &schema, "t").unwrap_err();
        assert!(matches!(err, SinkError::Integrity(_)));
        // Append without keys is fine.
        let none = PostgresSink::resolve_pk(LoadMode::Append, None, &schema, "t").unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn target_table_suffixing_in_test_mode() {
        let mut config = PostgresSinkConfig {
            host: "localhost".into(),
            port: 5432,
            database: "dw".into(),
            user: "etl".into(),
            password: String::new(),
            schema: "public".into(),
            test_mode: true,
            test_suffix: "_test".into(),
            dedupe_scan_limit: 1000,
            pool_size: 2,
        };
        let sink = PostgresSink::new(config.clone());
        assert_eq!(sink.target_table("campaign"), "campaign_test");
        assert_eq!(sink.target_table("campaign_test"), "campaign_test");

        config.test_mode = false;
        let sink = PostgresSink::new(config);
        assert_eq!(sink.target_table("campaign"), "campaign");
    }
}
