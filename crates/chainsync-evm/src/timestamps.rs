//! Block timestamp resolution.
//!
//! Logs carry no timestamp, so every distinct block in a batch needs one
//! `get_block_timestamp` call. Lookups run concurrently within a chunk and
//! chunks are separated by a pacing delay to stay under provider rate limits.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use futures::future::try_join_all;
use tracing::debug;

use chainsync_core::{ChainDataSource, RawLog, SyncError};

/// Resolves `block → timestamp` for a batch of logs.
#[derive(Debug, Clone)]
pub struct BlockTimestampResolver {
    chunk_size: usize,
    pacing: Duration,
}

impl Default for BlockTimestampResolver {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(100))
    }
}

impl BlockTimestampResolver {
    pub fn new(chunk_size: usize, pacing: Duration) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            pacing,
        }
    }

    /// Timestamps for exactly the distinct blocks referenced by `logs`.
    ///
    /// All-or-nothing: the first failed lookup fails the whole call.
    pub async fn resolve<S>(&self, source: &S, logs: &[RawLog]) -> Result<BTreeMap<u64, u64>, SyncError>
    where
        S: ChainDataSource + ?Sized,
    {
        let blocks: Vec<u64> = logs
            .iter()
            .map(|l| l.block_number)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut resolved = BTreeMap::new();
        let chunks: Vec<&[u64]> = blocks.chunks(self.chunk_size).collect();
        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.pacing).await;
            }
            let stamps = try_join_all(chunk.iter().map(|&b| source.get_block_timestamp(b))).await?;
            resolved.extend(chunk.iter().copied().zip(stamps));
        }

        if !blocks.is_empty() {
            debug!(blocks = blocks.len(), chunks = chunks.len(), "block timestamps resolved");
        }
        Ok(resolved)
    }
}
