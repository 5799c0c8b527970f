//! Bounded exponential-backoff retry for remote calls.
//!
//! Every ledger call the relay makes goes through [`retry`]. The wrapped
//! operation is invoked again after each failure, so it must be safe to repeat:
//! reads, simulations (`no_send`), or transactions the ledger deduplicates.

use anyhow::Result;
use std::future::Future;
use tracing::debug;

pub use relay_types::RetryConfig;

/// Run `f` until it succeeds or `config.retries` retries have been spent.
///
/// Between attempts the task sleeps, starting at `config.initial_backoff` and
/// growing by `config.factor` up to `config.max_backoff`. On exhaustion the
/// last error is returned with the attempt count attached.
pub async fn retry<T, F, Fut>(config: RetryConfig, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    let mut backoff = config.initial_backoff;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= config.retries {
                    return Err(e.context(format!("gave up after {} attempts", attempt + 1)));
                }
                attempt += 1;
                debug!(attempt, backoff_ms = backoff.as_millis() as u64, error = %e, "retrying");
                tokio::time::sleep(backoff).await;
                backoff = config.next_backoff(backoff);
            }
        }
    }
}
