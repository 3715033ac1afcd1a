//! SQLite storage backend.
//!
//! Keeps transfers and sync progress in a single SQLite file (or an
//! in-memory database for tests). Each batch runs in one transaction.
//!
//! # Usage
//! ```rust,no_run
//! use chainsync_storage::sqlite::SqliteStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStore::open("sqlite:./transfers.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainsync_core::{
    BatchAck, Page, PageRequest, Pagination, SyncCheckpoint, SyncError, TransferEvent,
    TransferQuery, TransferRecord, TransferStore,
};

use crate::sql::{db_err, from_db, to_db};

/// SQLite-backed transfer store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Accepts a plain file path (`"./transfers.db"`) or a SQLite URL
    /// (`"sqlite:./transfers.db"`, `"sqlite::memory:"`).
    pub async fn open(path: &str) -> Result<Self, SyncError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}")
        };
        if url.contains(":memory:") {
            return Self::in_memory().await;
        }

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(db_err)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open a private in-memory database.
    ///
    /// The pool holds exactly one long-lived connection: every new SQLite
    /// connection to `:memory:` would see a different, empty database.
    pub async fn in_memory() -> Result<Self, SyncError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(db_err)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), SyncError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transfers (
                tx_hash         TEXT    NOT NULL,
                log_index       INTEGER NOT NULL,
                from_address    TEXT    NOT NULL,
                to_address      TEXT    NOT NULL,
                amount          TEXT    NOT NULL,
                block_number    INTEGER NOT NULL,
                block_hash      TEXT    NOT NULL,
                block_timestamp INTEGER NOT NULL,
                created_at      TEXT    NOT NULL,
                PRIMARY KEY (tx_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers (from_address);",
            "CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers (to_address);",
            "CREATE INDEX IF NOT EXISTS idx_transfers_block
                ON transfers (block_number DESC, log_index DESC);",
        ] {
            sqlx::query(ddl).execute(&self.pool).await.map_err(db_err)?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_progress (
                contract_address  TEXT    PRIMARY KEY,
                last_synced_block INTEGER NOT NULL,
                updated_at        TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

fn record_from_row(row: &SqliteRow) -> Result<TransferRecord, SyncError> {
    let log_index: i64 = row.try_get("log_index").map_err(db_err)?;
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
impl TransferStore for SqliteStore {
    async fn persist_batch(
        &self,
        events: &[TransferEvent],
        checkpoint_block: u64,
        contract: &str,
    ) -> Result<BatchAck, SyncError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // An early return drops `tx`, which rolls the whole batch back.
        let mut inserted = 0u64;
        for event in events {
            let result = sqlx::query(
                "INSERT INTO transfers
                    (tx_hash, log_index, from_address, to_address, amount,
                     block_number, block_hash, block_timestamp, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (tx_hash, log_index) DO NOTHING",
            )
            .bind(&event.tx_hash)
            .bind(event.log_index as i64)
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
             VALUES (?, ?, ?)
             ON CONFLICT (contract_address) DO UPDATE SET
                last_synced_block = MAX(last_synced_block, excluded.last_synced_block),
                updated_at        = excluded.updated_at
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

        let ack = BatchAck {
            inserted,
            duplicates: events.len() as u64 - inserted,
            checkpoint,
        };
        debug!(inserted = ack.inserted, duplicates = ack.duplicates, checkpoint, "sqlite batch committed");
        Ok(ack)
    }

    async fn read_checkpoint(&self, contract: &str) -> Result<Option<u64>, SyncError> {
        let row = sqlx::query("SELECT last_synced_block FROM sync_progress WHERE contract_address = ?")
            .bind(contract.to_ascii_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some(row) => Ok(Some(from_db(
                row.try_get("last_synced_block").map_err(db_err)?,
                "last_synced_block",
            )?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TransferQuery for SqliteStore {
    async fn transfers_for_address(
        &self,
        address: &str,
        page: PageRequest,
    ) -> Result<Page<TransferRecord>, SyncError> {
        let address = address.to_ascii_lowercase();

        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM transfers WHERE from_address = ? OR to_address = ?",
        )
        .bind(&address)
        .bind(&address)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?
        .try_get("cnt")
        .map_err(db_err)?;

        let rows = sqlx::query(
            "SELECT * FROM transfers
             WHERE from_address = ? OR to_address = ?
             ORDER BY block_number DESC, log_index DESC
             LIMIT ? OFFSET ?",
        )
        .bind(&address)
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

#[cfg(test)]
mod tests {
    use super::*;

    const CONTRACT: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
    const ALICE: &str = "0x1111111111111111111111111111111111111111";

    fn ev(tx: u8, log_index: u32, block: u64) -> TransferEvent {
        TransferEvent {
            tx_hash: format!("0x{}", format!("{tx:02x}").repeat(32)),
            log_index,
            from_address: ALICE.into(),
            to_address: "0x2222222222222222222222222222222222222222".into(),
            amount: "115792089237316195423570985008687907853269984665640564039457584007913129639935"
                .into(),
            block_number: block,
            block_hash: "0xbb".into(),
            block_timestamp: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn batch_roundtrip_preserves_fields() {
        let store = SqliteStore::in_memory().await.unwrap();
        let ack = store.persist_batch(&[ev(1, 7, 100)], 109, CONTRACT).await.unwrap();
        assert_eq!((ack.inserted, ack.duplicates, ack.checkpoint), (1, 0, 109));

        let page = store
            .transfers_for_address(ALICE, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].event, ev(1, 7, 100));
    }

    #[tokio::test]
    async fn redelivery_is_a_noop() {
        let store = SqliteStore::in_memory().await.unwrap();
        let batch = [ev(1, 0, 100), ev(2, 0, 100)];
        store.persist_batch(&batch, 100, CONTRACT).await.unwrap();
        let ack = store.persist_batch(&batch, 100, CONTRACT).await.unwrap();
        assert_eq!((ack.inserted, ack.duplicates), (0, 2));
    }

    #[tokio::test]
    async fn failed_batch_rolls_back() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.persist_batch(&[], 50, CONTRACT).await.unwrap();

        // Second row cannot be stored; the first must not survive either.
        let err = store
            .persist_batch(&[ev(1, 0, 100), ev(2, 0, u64::MAX)], 100, CONTRACT)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Persistence(_)));

        let page = store.transfers_for_address(ALICE, PageRequest::default()).await.unwrap();
        assert!(page.data.is_empty());
        assert_eq!(store.read_checkpoint(CONTRACT).await.unwrap(), Some(50));
    }

    #[tokio::test]
    async fn checkpoint_keeps_maximum() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.persist_batch(&[], 300, CONTRACT).await.unwrap();
        let ack = store.persist_batch(&[], 200, CONTRACT).await.unwrap();
        assert_eq!(ack.checkpoint, 300);

        let status = store.sync_status().await.unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].last_synced_block, 300);
    }

    #[tokio::test]
    async fn pagination_pages_descending() {
        let store = SqliteStore::in_memory().await.unwrap();
        let events: Vec<_> = (0..45u64).map(|i| ev(i as u8 + 1, 0, 1_000 + i)).collect();
        store.persist_batch(&events, 1_044, CONTRACT).await.unwrap();

        let page = store
            .transfers_for_address(ALICE, PageRequest::clamped(Some(2), Some(20)))
            .await
            .unwrap();
        assert_eq!(page.data.len(), 20);
        assert_eq!(page.data[0].event.block_number, 1_024);
        assert_eq!(page.data[19].event.block_number, 1_005);
        assert_eq!(page.pagination.total_items, 45);
        assert_eq!(page.pagination.total_pages, 3);
    }
}
