//! chainsync-evm — JSON-RPC data source, timestamp resolution and the sync
//! state machine for a single ERC-20 contract.

pub mod builder;
pub mod poll;
pub mod rpc;
pub mod source;
pub mod sync_loop;
pub mod timestamps;
pub mod ws;

#[cfg(test)]
mod test_node;

pub use builder::SyncBuilder;
pub use rpc::{HttpRpcClient, RpcError};
pub use source::{EvmDataSource, EvmSourceConfig};
pub use sync_loop::{SyncOrchestrator, SyncProgress};
pub use timestamps::BlockTimestampResolver;
