use crate::allocation::Allocation;
use crate::config::{redact_dsn, PostgresSettings};
use async_trait::async_trait;
use snip_core::{
    LoadedUrl, Result, ShortCode, Shortened, Store, StoreError, UserUrlEntry,
    MAX_ALLOCATION_ATTEMPTS,
};
use snip_generator::{AlphanumericGenerator, Generator};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::Row;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Schema applied by [`Store::bootstrap`].
pub const SCHEMA: &str = include_str!("../ddl/postgres/short_urls.sql");

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// PostgreSQL implementation of the store contract.
///
/// Soft delete is implemented with `is_deleted`/`deleted_at`; rows are never
/// removed, so codes are never reused. Inserts use `ON CONFLICT DO NOTHING`
/// against both unique constraints, so a collision never raises an error and
/// never aborts an enclosing transaction. Which constraint fired is decided
/// by a follow-up lookup on the URL.
///
/// Every operation is bounded by an operation timeout. When it elapses the
/// in-flight future is dropped, which returns the connection and rolls back
/// any open transaction.
#[derive(Debug, Clone)]
pub struct PostgresStore<G = AlphanumericGenerator> {
    pool: PgPool,
    generator: G,
    operation_timeout: Duration,
}

impl PostgresStore<AlphanumericGenerator> {
    /// Creates a store from an existing connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self::with_generator(pool, AlphanumericGenerator::new())
    }

    /// Opens a pool and checks that the database answers.
    ///
    /// Failing to connect is fatal: the error is [`StoreError::Unavailable`].
    pub async fn connect(settings: &PostgresSettings) -> Result<Self> {
        let dsn = redact_dsn(&settings.dsn);

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(&settings.dsn)
            .await
            .map_err(|e| {
                error!(dsn = %dsn, error = %e, "Failed to connect to PostgreSQL");
                StoreError::Unavailable(e.to_string())
            })?;
        info!(dsn = %dsn, "Connected to PostgreSQL");

        let store = Self::new(pool).with_operation_timeout(settings.operation_timeout);
        store.ping().await?;
        Ok(store)
    }
}

impl<G: Generator> PostgresStore<G> {
    /// Creates a store with a custom code generator.
    pub fn with_generator(pool: PgPool, generator: G) -> Self {
        Self {
            pool,
            generator,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout = ?self.operation_timeout, "Storage operation timed out");
                Err(StoreError::Timeout(format!(
                    "{operation} exceeded {:?}",
                    self.operation_timeout
                )))
            }
        }
    }

    /// Inserts `url` under a fresh code on `conn`, retrying on code collision.
    async fn insert_with_retry(
        &self,
        conn: &mut PgConnection,
        owner_id: &str,
        url: &str,
    ) -> Result<Allocation> {
        for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
            let code = self.generator.generate()?;

            let inserted: Option<String> = sqlx::query_scalar(
                r#"
                INSERT INTO short_urls (short_id, original_url, user_id)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                RETURNING short_id
                "#,
            )
            .bind(code.as_str())
            .bind(url)
            .bind(owner_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

            if inserted.is_some() {
                return Ok(Allocation::Created(code));
            }

            let existing: Option<String> = sqlx::query_scalar(
                r#"
                SELECT short_id
                FROM short_urls
                WHERE original_url = $1
                "#,
            )
            .bind(url)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

            if let Some(existing) = existing {
                warn!(code = %existing, url, "URL already shortened, returning existing code");
                return Ok(Allocation::Existing(ShortCode::new_unchecked(existing)));
            }

            debug!(code = %code, attempt, "Short code collision, retrying");
        }

        warn!(url, "Failed to allocate a unique short code");
        Err(StoreError::AllocationExhausted {
            attempts: MAX_ALLOCATION_ATTEMPTS,
        })
    }
}

fn is_unavailable(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
    )
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    let message = err.to_string();

    if is_unavailable(&err) {
        error!(error = %message, "PostgreSQL unavailable");
    } else {
        error!(error = %message, "PostgreSQL query failed");
    }

    match err {
        sqlx::Error::PoolTimedOut => StoreError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StoreError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StoreError::InvalidData(message),
        _ => StoreError::Query(message),
    }
}

#[async_trait]
impl<G: Generator> Store for PostgresStore<G> {
    async fn save(&self, owner_id: &str, url: &str, base_url: &str) -> Result<Shortened> {
        self.timed("save", async {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
            let allocation = self.insert_with_retry(&mut conn, owner_id, url).await?;
            Ok::<_, StoreError>(allocation.into_shortened(base_url))
        })
        .await
    }

    async fn save_batch(
        &self,
        owner_id: &str,
        urls: &[String],
        base_url: &str,
    ) -> Result<Vec<Shortened>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        self.timed("save_batch", async {
            // Dropping `tx` on any early return rolls the whole batch back.
            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
            let mut results = Vec::with_capacity(urls.len());

            for url in urls {
                let allocation = self
                    .insert_with_retry(&mut tx, owner_id, url)
                    .await
                    .inspect_err(|e| {
                        warn!(error = %e, url = %url, "Batch save failed, rolling back");
                    })?;
                results.push(allocation.into_shortened(base_url));
            }

            tx.commit().await.map_err(map_sqlx_error)?;
            Ok::<_, StoreError>(results)
        })
        .await
    }

    async fn load_full(&self, code: &ShortCode) -> Result<LoadedUrl> {
        self.timed("load_full", async {
            let row = sqlx::query(
                r#"
                SELECT original_url, is_deleted
                FROM short_urls
                WHERE short_id = $1
                "#,
            )
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            let Some(row) = row else {
                return Err(StoreError::NotFound(code.to_string()));
            };

            Ok(LoadedUrl {
                original_url: row.try_get("original_url").map_err(map_sqlx_error)?,
                is_deleted: row.try_get("is_deleted").map_err(map_sqlx_error)?,
            })
        })
        .await
    }

    async fn load_user_urls(&self, owner_id: &str, base_url: &str) -> Result<Vec<UserUrlEntry>> {
        if owner_id.is_empty() {
            return Ok(Vec::new());
        }

        self.timed("load_user_urls", async {
            let rows = sqlx::query(
                r#"
                SELECT short_id, original_url
                FROM short_urls
                WHERE user_id = $1
                  AND is_deleted = FALSE
                ORDER BY id
                "#,
            )
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            rows.iter()
                .map(|row| {
                    let short_id: String = row.try_get("short_id").map_err(map_sqlx_error)?;
                    Ok(UserUrlEntry {
                        short_url: ShortCode::new_unchecked(short_id).to_url(base_url),
                        original_url: row.try_get("original_url").map_err(map_sqlx_error)?,
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
        .await
    }

    async fn delete_batch(&self, owner_id: &str, codes: &[ShortCode]) -> Result<u64> {
        if owner_id.is_empty() || codes.is_empty() {
            return Ok(0);
        }
        let codes: Vec<String> = codes.iter().map(ToString::to_string).collect();

        self.timed("delete_batch", async {
            let result = sqlx::query(
                r#"
                UPDATE short_urls
                SET is_deleted = TRUE,
                    deleted_at = NOW()
                WHERE user_id = $1
                  AND short_id = ANY($2)
                  AND is_deleted = FALSE
                "#,
            )
            .bind(owner_id)
            .bind(&codes[..])
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            Ok::<_, StoreError>(result.rows_affected())
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        self.timed("ping", async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    error!(error = %e, "PostgreSQL ping failed");
                    StoreError::Unavailable(e.to_string())
                })?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }

    async fn bootstrap(&self) -> Result<()> {
        self.timed("bootstrap", async {
            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
            sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(SCHEMA))
                .await
                .map_err(map_sqlx_error)?;
            tx.commit().await.map_err(map_sqlx_error)?;
            info!("PostgreSQL schema ready");
            Ok::<_, StoreError>(())
        })
        .await
    }
}
