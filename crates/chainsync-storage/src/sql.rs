//! Helpers shared by the SQL backends.

use chainsync_core::SyncError;

/// SQL integers are signed 64-bit; refuse values that would wrap.
pub(crate) fn to_db(value: u64, column: &str) -> Result<i64, SyncError> {
    i64::try_from(value)
        .map_err(|_| SyncError::Persistence(format!("{column} {value} out of range for BIGINT")))
}

pub(crate) fn from_db(value: i64, column: &str) -> Result<u64, SyncError> {
    u64::try_from(value)
        .map_err(|_| SyncError::Persistence(format!("negative {column} {value} in database")))
}

pub(crate) fn db_err(e: sqlx::Error) -> SyncError {
    SyncError::Persistence(e.to_string())
}
