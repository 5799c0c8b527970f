//! Transaction options and handles exchanged with the ledger client.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// Options supplied by the signer for a response transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOptions {
    /// Account that signs and pays gas (the aggregator).
    pub from: Address,
    pub gas_price: U256,
    /// `None` lets the node estimate.
    pub gas_limit: Option<u64>,
    /// When set, the call is simulated and never broadcast.
    pub no_send: bool,
}

impl TxOptions {
    pub fn new(from: Address, gas_price: U256) -> Self {
        Self {
            from,
            gas_price,
            gas_limit: None,
            no_send: false,
        }
    }
}

/// Arguments of `respondToTaskV2`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RespondToTaskCall {
    pub merkle_root: B256,
    pub sender: Address,
    /// ABI-encoded non-signer stakes and aggregated signature, opaque here.
    pub signature_proof: Bytes,
}

/// Result of a simulated or broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxHandle {
    pub hash: B256,
    pub gas: u64,
    pub gas_price: U256,
}

impl TxHandle {
    /// `gas * gas_price`.
    pub fn cost(&self) -> U256 {
        U256::from(self.gas).saturating_mul(self.gas_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_is_gas_times_price() {
        let tx = TxHandle {
            hash: B256::ZERO,
            gas: 21_000,
            gas_price: U256::from(30u64),
        };
        assert_eq!(tx.cost(), U256::from(630_000u64));
    }
}
