//! chainsync-storage — storage backends for transfers and sync checkpoints.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - `sqlite` — SQLite via `sqlx` (feature `sqlite`)
//! - `postgres` — PostgreSQL via `sqlx` (feature `postgres`)
//!
//! Every backend implements both [`TransferStore`](chainsync_core::TransferStore)
//! and [`TransferQuery`](chainsync_core::TransferQuery).

use std::sync::Arc;

use chainsync_core::{SyncError, SyncStorage};

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(any(feature = "sqlite", feature = "postgres"))]
mod sql;

pub use memory::InMemoryStore;

/// Open the backend named by `url`'s scheme.
///
/// - `postgres://…` / `postgresql://…` → Postgres (feature `postgres`)
/// - `sqlite:…` → SQLite (feature `sqlite`)
/// - `memory:` → [`InMemoryStore`]
pub async fn open_storage(url: &str) -> Result<Arc<dyn SyncStorage>, SyncError> {
    let scheme = url.split(':').next().unwrap_or_default();
    match scheme {
        "memory" => Ok(Arc::new(InMemoryStore::new())),

        #[cfg(feature = "sqlite")]
        "sqlite" => Ok(Arc::new(sqlite::SqliteStore::open(url).await?)),

        #[cfg(feature = "postgres")]
        "postgres" | "postgresql" => Ok(Arc::new(postgres::PostgresStore::connect(url).await?)),

        other => Err(SyncError::Config(format!(
            "unsupported database url scheme {other:?} (is the backend feature enabled?)"
        ))),
    }
}
