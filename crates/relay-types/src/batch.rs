//! Batch values observed from the ledger.

use alloy_primitives::{keccak256, Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which `NewBatch` event layout a subscription or log filter targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchEventVersion {
    V2,
    /// V3 events additionally carry the batch's `respondToTaskFeeLimit`.
    V3,
}

impl fmt::Display for BatchEventVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchEventVersion::V2 => write!(f, "NewBatchV2"),
            BatchEventVersion::V3 => write!(f, "NewBatchV3"),
        }
    }
}

/// A `NewBatch` log emitted by the service manager contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEvent {
    pub version: BatchEventVersion,
    pub merkle_root: B256,
    pub sender: Address,
    pub task_created_block: u32,
    pub data_pointer: String,
    /// Only present on V3 events.
    pub respond_to_task_fee_limit: Option<U256>,
    /// Block the log was included in.
    pub block_number: u64,
    /// Position of the log within its block.
    pub log_index: u64,
}

impl BatchEvent {
    /// Dedup and state-lookup key for this batch.
    pub fn identifier(&self) -> BatchIdentifier {
        BatchIdentifier::new(&self.merkle_root, &self.sender)
    }
}

/// `keccak256(merkle_root ‖ sender)`.
///
/// Two events with the same merkle root and sender are the same logical batch,
/// whether they arrived on a live subscription or from a historical scan.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BatchIdentifier(pub B256);

impl BatchIdentifier {
    pub fn new(merkle_root: &B256, sender: &Address) -> Self {
        let mut preimage = [0u8; 52];
        preimage[..32].copy_from_slice(merkle_root.as_slice());
        preimage[32..].copy_from_slice(sender.as_slice());
        Self(keccak256(preimage))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0 .0
    }
}

impl fmt::Display for BatchIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// On-chain `batchesState(identifier)` record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchState {
    pub task_created_block: u32,
    pub responded: bool,
    pub respond_to_task_fee_limit: U256,
}
