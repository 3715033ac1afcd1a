//! PostgreSQL storage backend.
//!
//! Production backend with connection pooling. Tables and indexes are
//! created on connect if missing.
//!
//! # Feature Flag
//! Requires the `postgres` feature:
//! ```toml
//! chainsync-storage = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! # Schema
//! - `transfers` — one row per `(tx_hash, log_index)`
//! - `sync_progress` — last synced block per contract

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use chainsync_core::{
    BatchAck, Page, PageRequest, Pagination, SyncCheckpoint, SyncError, TransferEvent,
    TransferQuery, TransferRecord, TransferStore,
};

use crate::sql::{db_err, from_db, to_db};

// ─── Connection options ────────────────────────────────────────────────────────

/// Pool options for the Postgres backend.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    /// Maximum number of connections in the pool (default: 10)
    pub max_connections: u32,
    /// Minimum number of idle connections to keep open (default: 1)
    pub min_connections: u32,
    /// How long to wait for a free connection (default: 30s)
    pub acquire_timeout: Duration,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

// ─── PostgresStore ────────────────────────────────────────────────────────────

/// PostgreSQL-backed transfer store. Cheap to clone.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect with default pool options and initialize the schema.
    ///
    /// `database_url` follows libpq convention:
    /// `postgresql://[user[:password]@][host][:port][/dbname]`
    pub async fn connect(database_url: &str) -> Result<Self, SyncError> {
        Self::connect_with_options(database_url, PostgresOptions::default()).await
    }

    pub async fn connect_with_options(
        database_url: &str,
        opts: PostgresOptions,
    ) -> Result<Self, SyncError> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .min_connections(opts.min_connections)
            .acquire_timeout(opts.acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| SyncError::Persistence(format!("postgres connect: {e}")))?;

        let store = Self { pool };
        store.init_schema().await?;
        info!(max_connections = opts.max_connections, "postgres store ready");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), SyncError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transfers (
                tx_hash         TEXT        NOT NULL,
                log_index       INTEGER     NOT NULL,
                from_address    TEXT        NOT NULL,
                to_address      TEXT        NOT NULL,
                amount          TEXT        NOT NULL,
                block_number    BIGINT      NOT NULL,
                block_hash      TEXT        NOT NULL,
                block_timestamp BIGINT      NOT NULL,
                created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (tx_hash, log_index)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers (from_address)",
            "CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers (to_address)",
            "CREATE INDEX IF NOT EXISTS idx_transfers_block
                ON transfers (block_number DESC, log_index DESC)",
        ] {
            sqlx::query(ddl).execute(&self.pool).await.map_err(db_err)?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_progress (
                contract_address  TEXT        PRIMARY KEY,
                last_synced_block BIGINT      NOT NULL,
                updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

fn record_from_row(row: &PgRow) -> Result<TransferRecord, SyncError> {
    let log_index: i32 = row.try_get("log_index").map_err(db_err)?;
    Ok(TransferRecord {
        event: TransferEvent {
            tx_hash: row.try_get("tx_hash").map_err(db_err)?,
            log_index: u32::try_from(log_index)
                .map_err(|_| SyncError::Persistence(format!("bad log_index {log_index}")))?,
            from_address: row.try_get("from_address").map_err(db_err)?,
            to_address: row.try_get("to_address").map_err(db_err)?,
            amount: row.try_get("amount").map_err(db_err)?,
            block_number: from_db(row.try_get("block_number").map_err(db_err)?, "block_number")?,
            block_hash: row.try_get("block_hash").map_err(db_err)?,
            block_timestamp: from_db(
                row.try_get("block_timestamp").map_err(db_err)?,
                "block_timestamp",
            )?,
        },
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(db_err)?,
    })
}

#[async_trait]
impl TransferStore for PostgresStore {
    async fn persist_batch(
        &self,
        events: &[TransferEvent],
        checkpoint_block: u64,
        contract: &str,
    ) -> Result<BatchAck, SyncError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut inserted = 0u64;
        for event in events {
            let log_index = i32::try_from(event.log_index).map_err(|_| {
                SyncError::Persistence(format!("log_index {} out of range", event.log_index))
            })?;
            let result = sqlx::query(
                "INSERT INTO transfers
                    (tx_hash, log_index, from_address, to_address, amount,
                     block_number, block_hash, block_timestamp, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                 ON CONFLICT (tx_hash, log_index) DO NOTHING",
            )
            .bind(&event.tx_hash)
            .bind(log_index)
            .bind(&event.from_address)
            .bind(&event.to_address)
            .bind(&event.amount)
            .bind(to_db(event.block_number, "block_number")?)
            .bind(&event.block_hash)
            .bind(to_db(event.block_timestamp, "block_timestamp")?)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            inserted += result.rows_affected();
        }

        let row = sqlx::query(
            "INSERT INTO sync_progress (contract_address, last_synced_block, updated_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (contract_address) DO UPDATE SET
                last_synced_block = GREATEST(sync_progress.last_synced_block,
                                             EXCLUDED.last_synced_block),
                updated_at        = EXCLUDED.updated_at
             RETURNING last_synced_block",
        )
        .bind(contract.to_ascii_lowercase())
        .bind(to_db(checkpoint_block, "checkpoint_block")?)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        let checkpoint = from_db(
            row.try_get("last_synced_block").map_err(db_err)?,
            "last_synced_block",
        )?;

        tx.commit().await.map_err(db_err)?;

        debug!(inserted, checkpoint, "postgres batch committed");
        Ok(BatchAck {
            inserted,
            duplicates: events.len() as u64 - inserted,
            checkpoint,
        })
    }

    async fn read_checkpoint(&self, contract: &str) -> Result<Option<u64>, SyncError> {
        let row = sqlx::query(
            "SELECT last_synced_block FROM sync_progress WHERE contract_address = $1",
        )
        .bind(contract.to_ascii_lowercase())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|r| from_db(r.try_get("last_synced_block").map_err(db_err)?, "last_synced_block"))
            .transpose()
    }
}

#[async_trait]
impl TransferQuery for PostgresStore {
    async fn transfers_for_address(
        &self,
        address: &str,
        page: PageRequest,
    ) -> Result<Page<TransferRecord>, SyncError> {
        let address = address.to_ascii_lowercase();

        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM transfers WHERE from_address = $1 OR to_address = $1",
        )
        .bind(&address)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?
        .try_get("cnt")
        .map_err(db_err)?;

        let rows = sqlx::query(
            "SELECT * FROM transfers
             WHERE from_address = $1 OR to_address = $1
             ORDER BY block_number DESC, log_index DESC
             LIMIT $2 OFFSET $3",
        )
        .bind(&address)
        .bind(page.limit() as i64)
        .bind(to_db(page.offset(), "offset")?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let data = rows.iter().map(record_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            data,
            pagination: Pagination::new(page, from_db(total, "count")?),
        })
    }

    async fn sync_status(&self) -> Result<Vec<SyncCheckpoint>, SyncError> {
        let rows = sqlx::query(
            "SELECT contract_address, last_synced_block FROM sync_progress ORDER BY contract_address",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| -> Result<SyncCheckpoint, SyncError> {
                Ok(SyncCheckpoint {
                    contract_address: row.try_get("contract_address").map_err(db_err)?,
                    last_synced_block: from_db(
                        row.try_get("last_synced_block").map_err(db_err)?,
                        "last_synced_block",
                    )?,
                })
            })
            .collect()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
//
// These need a running PostgreSQL instance. Example:
// DATABASE_URL=postgresql://localhost/chainsync_test cargo test --features postgres -- --ignored
