//! Staging database target.
//!
//! [`StagingTarget`] is the seam between the import pipeline and PostgreSQL:
//! it resets the staging table and hands out [`LoadSession`]s, each bound to
//! one pooled connection for the lifetime of a single feed file.

pub mod tls;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::SinkExt;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use crate::config::{DatabaseConfig, LoadMode};
use crate::error::{ImportError, Result};
use crate::loader::{copy_statement, EncodedBatch};
use crate::schema::StagingTable;
use tls::{SslMode, TlsBuilder};

/// Connect timeout for new pool connections.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Destination of an import run.
#[async_trait]
pub trait StagingTarget: Send + Sync {
    /// Drop and recreate the staging table with its indexes, atomically.
    async fn reset_table(&self, table: &StagingTable) -> Result<()>;

    /// Open a load session for one file.
    ///
    /// In [`LoadMode::PerFile`] the session's transaction starts here.
    async fn open_session(
        &self,
        table: &StagingTable,
        mode: LoadMode,
    ) -> Result<Box<dyn LoadSession>>;

    /// Number of rows currently in the staging table.
    async fn row_count(&self, table: &StagingTable) -> Result<i64>;

    /// Round-trip a trivial query and return its latency.
    async fn health_check(&self) -> Result<Duration>;
}

/// A single connection loading the batches of one file, in order.
#[async_trait]
pub trait LoadSession: Send {
    /// COPY one encoded batch. Returns the number of rows the server accepted.
    ///
    /// In [`LoadMode::BestEffort`] the batch is committed before returning.
    async fn copy_batch(&mut self, batch: &EncodedBatch) -> Result<u64>;

    /// Commit the file's transaction. A no-op in best-effort mode.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the file's transaction. A no-op in best-effort mode.
    async fn rollback(&mut self) -> Result<()>;

    /// Close the connection instead of returning it to the pool.
    ///
    /// Used after a COPY was interrupted, when the protocol state of the
    /// connection is unknown.
    fn abort(&mut self);
}

/// PostgreSQL staging target backed by a deadpool connection pool.
pub struct PgTarget {
    pool: Pool,
}

impl PgTarget {
    /// Create the pool and test one connection.
    pub async fn new(config: &DatabaseConfig, max_conns: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.application_name("catalog-import");

        // Connection options for reliability
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(CONNECT_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode = SslMode::parse(&config.ssl_mode)?;
        let pool = match TlsBuilder::new(ssl_mode).build()? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns)
                    .build()
                    .map_err(|e| ImportError::pool(e, "creating PostgreSQL pool"))?
            }
            Some(tls_connector) => {
                pg_config.ssl_mode(tokio_postgres::config::SslMode::Require);
                let mgr = Manager::from_config(pg_config, tls_connector, mgr_config);
                Pool::builder(mgr)
                    .max_size(max_conns)
                    .build()
                    .map_err(|e| ImportError::pool(e, "creating PostgreSQL pool"))?
            }
        };

        let target = Self { pool };
        target.health_check().await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(target)
    }

    async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| ImportError::pool(e, context))
    }
}

#[async_trait]
impl StagingTarget for PgTarget {
    async fn reset_table(&self, table: &StagingTable) -> Result<()> {
        let mut client = self.client("resetting staging table").await?;

        let schema_error = |e: tokio_postgres::Error| {
            if e.is_closed() {
                ImportError::Database(e)
            } else {
                ImportError::SchemaReset {
                    table: table.full_name(),
                    message: e.to_string(),
                }
            }
        };

        let tx = client.transaction().await.map_err(schema_error)?;
        tx.batch_execute(&table.reset_ddl())
            .await
            .map_err(schema_error)?;
        tx.commit().await.map_err(schema_error)?;

        debug!("Recreated table {} with {} indexes", table.full_name(), table.indexes.len());
        Ok(())
    }

    async fn open_session(
        &self,
        table: &StagingTable,
        mode: LoadMode,
    ) -> Result<Box<dyn LoadSession>> {
        let client = self.client("opening load session").await?;

        let mut session = PgLoadSession {
            client: Some(client),
            schema: table.schema.clone(),
            table: table.name.clone(),
            mode,
            in_transaction: false,
        };
        if mode == LoadMode::PerFile {
            session.begin().await?;
        }

        Ok(Box::new(session))
    }

    async fn row_count(&self, table: &StagingTable) -> Result<i64> {
        let client = self.client("counting staging rows").await?;

        let sql = format!("SELECT COUNT(*) FROM {}", table.qualified());
        let row = client.query_one(&sql, &[]).await?;

        Ok(row.get(0))
    }

    async fn health_check(&self) -> Result<Duration> {
        let start = Instant::now();
        let client = self.client("testing PostgreSQL connection").await?;
        client.simple_query("SELECT 1").await?;
        Ok(start.elapsed())
    }
}

/// Load session over one pooled connection.
struct PgLoadSession {
    client: Option<Object>,
    schema: String,
    table: String,
    mode: LoadMode,
    in_transaction: bool,
}

impl PgLoadSession {
    fn client(&self) -> Result<&Object> {
        self.client
            .as_ref()
            .ok_or_else(|| ImportError::pool("connection was discarded", "using load session"))
    }

    async fn begin(&mut self) -> Result<()> {
        self.client()?;
        // Set before awaiting so a BEGIN dropped mid-flight still discards
        // the connection.
        self.in_transaction = true;
        let result = self.client()?.batch_execute("BEGIN").await;
        if result.is_err() {
            self.in_transaction = false;
        }
        result.map_err(ImportError::from)
    }

    async fn end(&mut self, statement: &str) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        let result = self.client()?.batch_execute(statement).await;
        self.in_transaction = false;
        result.map_err(ImportError::from)
    }

    async fn copy(&self, batch: &EncodedBatch) -> Result<u64> {
        if batch.row_count == 0 {
            return Ok(0);
        }

        let client = self.client()?;
        let sql = copy_statement(&self.schema, &self.table, &batch.header);
        let sink = client.copy_in(&sql).await?;
        futures::pin_mut!(sink);

        sink.send(batch.payload.clone()).await?;
        let copied = sink.finish().await?;
        Ok(copied)
    }
}

#[async_trait]
impl LoadSession for PgLoadSession {
    async fn copy_batch(&mut self, batch: &EncodedBatch) -> Result<u64> {
        if self.mode == LoadMode::PerFile {
            return self.copy(batch).await;
        }

        self.begin().await?;
        match self.copy(batch).await {
            Ok(copied) => {
                self.end("COMMIT").await?;
                Ok(copied)
            }
            Err(e) => {
                if let Err(rollback_err) = self.end("ROLLBACK").await {
                    debug!("Rollback after failed batch also failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn commit(&mut self) -> Result<()> {
        self.end("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.end("ROLLBACK").await
    }

    fn abort(&mut self) {
        if let Some(client) = self.client.take() {
            drop(Object::take(client));
        }
        self.in_transaction = false;
    }
}

impl Drop for PgLoadSession {
    fn drop(&mut self) {
        // An open transaction must not leak back into the pool.
        if self.in_transaction {
            self.abort();
        }
    }
}
