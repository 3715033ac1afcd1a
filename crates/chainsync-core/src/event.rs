//! ERC-20 `Transfer` event signature and decoding.
//!
//! ```text
//! event Transfer(address indexed from, address indexed to, uint256 value)
//!
//! topics[0] = keccak256("Transfer(address,address,uint256)")
//! topics[1] = from  (left-padded to 32 bytes)
//! topics[2] = to    (left-padded to 32 bytes)
//! data      = value (32-byte big-endian uint256)
//! ```

use alloy_primitives::{keccak256, Address, B256, U256};

use crate::error::SyncError;
use crate::types::{lower_hex, RawLog, TransferEvent};

/// Canonical signature of the tracked event.
pub const TRANSFER_EVENT_SIGNATURE: &str = "Transfer(address,address,uint256)";

/// `topics[0]` of every `Transfer` log.
pub fn transfer_topic() -> B256 {
    keccak256(TRANSFER_EVENT_SIGNATURE.as_bytes())
}

/// Decode a raw `Transfer` log into a storable [`TransferEvent`].
///
/// `block_timestamp` comes from the timestamp resolver; logs do not carry it.
pub fn decode_transfer(log: &RawLog, block_timestamp: u64) -> Result<TransferEvent, SyncError> {
    let fail = |reason: String| SyncError::Decode {
        tx_hash: lower_hex(log.tx_hash.as_slice()),
        log_index: log.log_index,
        reason,
    };

    if log.topics.len() != 3 {
        return Err(fail(format!("expected 3 topics, got {}", log.topics.len())));
    }
    if log.topics[0] != transfer_topic() {
        return Err(fail(format!("unexpected topic0 {}", log.topics[0])));
    }
    if log.data.len() != 32 {
        return Err(fail(format!("expected 32 data bytes, got {}", log.data.len())));
    }

    let from = topic_address(&log.topics[1]);
    let to = topic_address(&log.topics[2]);
    let amount = U256::from_be_slice(&log.data);

    Ok(TransferEvent {
        tx_hash: lower_hex(log.tx_hash.as_slice()),
        log_index: log.log_index,
        from_address: lower_hex(from.as_slice()),
        to_address: lower_hex(to.as_slice()),
        amount: amount.to_string(),
        block_number: log.block_number,
        block_hash: lower_hex(log.block_hash.as_slice()),
        block_timestamp,
    })
}

/// An indexed address occupies the low 20 bytes of its topic.
fn topic_address(topic: &B256) -> Address {
    Address::from_slice(&topic[12..])
}
