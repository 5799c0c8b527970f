//! Response submission with economic safety checks.
//!
//! A response is simulated first, its cost checked against the batch's
//! `respondToTaskFeeLimit` and against the aggregator's and batcher's live
//! balances, and only then broadcast with 10% gas headroom.
//!
//! Reads that only guard the submission (fee limit, balances) degrade to
//! permissive when both endpoints are down: the ledger still rejects a
//! transaction that truly cannot be paid for.

use anyhow::Result;
use relay_transport::{FallbackClient, LedgerClient};
use relay_types::{
    Address, BatchIdentifier, BatchState, Bytes, RespondToTaskCall, TxHandle, TxOptions, B256,
    U256,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::retry::{retry, RetryConfig};

/// Upper bound on the aggregator balance read, retries included.
const BALANCE_READ_TIMEOUT: Duration = Duration::from_secs(10);


/// Provides signing account and gas price for response transactions.
pub trait TxSigner: Send + Sync {
    fn tx_options(&self) -> TxOptions;
}

/// A signer whose options never change.
#[derive(Debug, Clone)]
pub struct StaticSigner {
    opts: TxOptions,
}

impl StaticSigner {
    pub fn new(from: Address, gas_price: U256) -> Self {
        Self {
            opts: TxOptions::new(from, gas_price),
        }
    }
}

impl TxSigner for StaticSigner {
    fn tx_options(&self) -> TxOptions {
        self.opts.clone()
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("failed to simulate respondToTask: {0:#}")]
    Simulation(anyhow::Error),
    #[error("cost of transaction ({cost}) is higher than Batch.RespondToTaskFeeLimit ({limit})")]
    FeeLimitExceeded { cost: U256, limit: U256 },
    #[error("cost ({required}) is higher than aggregator balance ({balance})")]
    InsufficientAggregatorBalance { balance: U256, required: U256 },
    #[error("cost ({required}) is higher than batcher balance ({balance})")]
    InsufficientBatcherBalance { balance: U256, required: U256 },
    #[error("failed to broadcast respondToTask: {0:#}")]
    Broadcast(anyhow::Error),
}

impl SubmitError {
    /// Whether the submission was refused on economic grounds rather than
    /// because the ledger could not be reached.
    pub fn is_economic(&self) -> bool {
        matches!(
            self,
            SubmitError::FeeLimitExceeded { .. }
                | SubmitError::InsufficientAggregatorBalance { .. }
                | SubmitError::InsufficientBatcherBalance { .. }
        )
    }
}

/// Outcome of the pre-broadcast checks for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionPlan {
    pub simulated_gas: u64,
    pub gas_price: U256,
    pub simulated_cost: U256,
    /// `None` when the fee limit could not be read.
    pub fee_limit: Option<U256>,
    /// What the balances were required to cover.
    pub checked_amount: U256,
}

/// Broadcast gas limit for a simulation that used `simulated_gas`.
///
/// This is 110% of the simulation, rounded down and saturating at `u64::MAX`.
pub fn broadcast_gas_limit(simulated_gas: u64) -> u64 {
    simulated_gas.saturating_add(simulated_gas / 10)
}

pub struct ResponseWriter {
    client: FallbackClient,
    signer: Arc<dyn TxSigner>,
    retry: RetryConfig,
}

impl ResponseWriter {
    pub fn new(client: FallbackClient, signer: Arc<dyn TxSigner>, retry: RetryConfig) -> Self {
        Self {
            client,
            signer,
            retry,
        }
    }

    /// Simulate, check, and broadcast `respondToTaskV2`. Returns the transaction hash.
    pub async fn send_aggregated_response(
        &self,
        batch_identifier: BatchIdentifier,
        merkle_root: B256,
        sender: Address,
        signature_proof: Bytes,
    ) -> Result<B256, SubmitError> {
        let call = RespondToTaskCall {
            merkle_root,
            sender,
            signature_proof,
        };

        let mut opts = self.signer.tx_options();
        opts.no_send = true;
        let simulated = self
            .respond_to_task_retryable(&opts, &call)
            .await
            .map_err(SubmitError::Simulation)?;

        let plan = self
            .check_respond_to_task_fee_limit(&simulated, &opts, batch_identifier, sender)
            .await?;

        opts.no_send = false;
        opts.gas_limit = Some(broadcast_gas_limit(plan.simulated_gas));
        let tx = self
            .respond_to_task_retryable(&opts, &call)
            .await
            .map_err(SubmitError::Broadcast)?;

        info!(
            batch_identifier = %batch_identifier,
            tx_hash = %tx.hash,
            gas_limit = opts.gas_limit,
            "Sent aggregated response"
        );
        Ok(tx.hash)
    }

    /// Check the simulated cost against the batch's fee limit and both balances.
    ///
    /// When the fee limit is readable, balances must cover the limit itself,
    /// the most the aggregator can be reimbursed. When it is not, they are
    /// checked against the simulated cost.
    pub async fn check_respond_to_task_fee_limit(
        &self,
        tx: &TxHandle,
        opts: &TxOptions,
        batch_identifier: BatchIdentifier,
        sender: Address,
    ) -> Result<SubmissionPlan, SubmitError> {
        let simulated_cost = tx.cost();
        info!(cost = %simulated_cost, "Simulated cost");

        let fee_limit = match self.batch_state_retryable(batch_identifier).await {
            Ok(state) => {
                let limit = state.respond_to_task_fee_limit;
                info!(respond_to_task_fee_limit = %limit, "Batch RespondToTaskFeeLimit");
                if limit < simulated_cost {
                    return Err(SubmitError::FeeLimitExceeded {
                        cost: simulated_cost,
                        limit,
                    });
                }
                Some(limit)
            }
            Err(e) => {
                error!(error = %format!("{:#}", e), "Failed to get batch state");
                info!("Proceeding with simulated cost checks");
                None
            }
        };

        let checked_amount = fee_limit.unwrap_or(simulated_cost);
        self.compare_balances(checked_amount, opts.from, sender).await?;

        Ok(SubmissionPlan {
            simulated_gas: tx.gas,
            gas_price: tx.gas_price,
            simulated_cost,
            fee_limit,
            checked_amount,
        })
    }

    async fn compare_balances(
        &self,
        amount: U256,
        aggregator: Address,
        sender: Address,
    ) -> Result<(), SubmitError> {
        self.compare_aggregator_balance(amount, aggregator).await?;
        self.compare_batcher_balance(amount, sender).await
    }

    async fn compare_aggregator_balance(
        &self,
        amount: U256,
        aggregator: Address,
    ) -> Result<(), SubmitError> {
        let read = tokio::time::timeout(
            BALANCE_READ_TIMEOUT,
            retry(self.retry, || self.client.balance_at(aggregator)),
        )
        .await;

        let balance = match read {
            Ok(Ok(balance)) => balance,
            Ok(Err(e)) => {
                error!(error = %format!("{:#}", e), "Failed to get aggregator balance");
                return Ok(());
            }
            Err(_) => {
                error!(
                    timeout_secs = BALANCE_READ_TIMEOUT.as_secs(),
                    "Timed out getting aggregator balance"
                );
                return Ok(());
            }
        };

        info!(balance = %balance, "Aggregator balance");
        if balance < amount {
            return Err(SubmitError::InsufficientAggregatorBalance {
                balance,
                required: amount,
            });
        }
        Ok(())
    }

    async fn compare_batcher_balance(
        &self,
        amount: U256,
        sender: Address,
    ) -> Result<(), SubmitError> {
        let balance = match retry(self.retry, || self.client.batcher_balance(sender)).await {
            Ok(balance) => balance,
            Err(e) => {
                error!(error = %format!("{:#}", e), "Failed to get batcher balance");
                return Ok(());
            }
        };

        info!(balance = %balance, "Batcher balance");
        if balance < amount {
            return Err(SubmitError::InsufficientBatcherBalance {
                balance,
                required: amount,
            });
        }
        Ok(())
    }

    async fn respond_to_task_retryable(
        &self,
        opts: &TxOptions,
        call: &RespondToTaskCall,
    ) -> Result<TxHandle> {
        retry(self.retry, || self.client.respond_to_task(opts, call)).await
    }

    async fn batch_state_retryable(&self, id: BatchIdentifier) -> Result<BatchState> {
        retry(self.retry, || self.client.batch_state(id)).await
    }
}
