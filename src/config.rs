//! Relay configuration: defaults, an optional JSON file, then environment overrides.

use anyhow::{bail, Context, Result};
use relay_transport::{FallbackClient, LedgerClient};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::dedup::DEFAULT_RETENTION;
use crate::poller::{DEFAULT_LOOKBACK_BLOCKS, DEFAULT_POLL_INTERVAL};
use crate::retry::RetryConfig;
use crate::subscriber::{EndpointRole, SubscriberConfig};
use crate::writer::{ResponseWriter, TxSigner};

pub const ENV_PRIMARY_RPC_URL: &str = "BATCH_RELAY_PRIMARY_RPC_URL";
pub const ENV_FALLBACK_RPC_URL: &str = "BATCH_RELAY_FALLBACK_RPC_URL";
pub const ENV_POLL_INTERVAL_SECS: &str = "BATCH_RELAY_POLL_INTERVAL_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub primary_rpc_url: String,
    pub fallback_rpc_url: String,
    pub poll_interval_secs: u64,
    pub lookback_blocks: u64,
    pub retention_secs: u64,
    pub resubscribe_cooldown_ms: u64,
    /// Contract reads and transaction calls.
    pub chain_retry: RetryConfig,
    /// Subscriptions and gap-recovery reads.
    pub network_retry: RetryConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        let subscriber = SubscriberConfig::default();
        Self {
            primary_rpc_url: "ws://localhost:8546".to_string(),
            fallback_rpc_url: "ws://localhost:8547".to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            lookback_blocks: DEFAULT_LOOKBACK_BLOCKS,
            retention_secs: DEFAULT_RETENTION.as_secs(),
            resubscribe_cooldown_ms: subscriber.resubscribe_cooldown.as_millis() as u64,
            chain_retry: RetryConfig::chain(),
            network_retry: RetryConfig::network(),
        }
    }
}

impl RelayConfig {
    /// Defaults, overlaid with `path` when given, then with the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
    }

    /// Apply the `BATCH_RELAY_*` overrides found through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_PRIMARY_RPC_URL) {
            self.primary_rpc_url = url;
        }
        if let Some(url) = lookup(ENV_FALLBACK_RPC_URL) {
            self.fallback_rpc_url = url;
        }
        if let Some(secs) = lookup(ENV_POLL_INTERVAL_SECS) {
            self.poll_interval_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("{ENV_POLL_INTERVAL_SECS}={secs:?} is not a number"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be at least 1");
        }
        if self.retention_secs == 0 {
            bail!("retention_secs must be at least 1");
        }
        let retries = [
            ("chain_retry", &self.chain_retry),
            ("network_retry", &self.network_retry),
        ];
        for (name, retry) in retries {
            if !retry.factor.is_finite() || retry.factor < 1.0 {
                bail!(
                    "{name}.factor must be a finite number of at least 1.0, got {}",
                    retry.factor
                );
            }
        }
        Ok(())
    }

    /// Open both endpoints through `connect`, primary first.
    ///
    /// `connect` receives each role with its configured URL and returns the
    /// client for it.
    pub fn connect<F>(
        &self,
        mut connect: F,
    ) -> Result<(Arc<dyn LedgerClient>, Arc<dyn LedgerClient>)>
    where
        F: FnMut(EndpointRole, &str) -> Result<Arc<dyn LedgerClient>>,
    {
        let primary = connect(EndpointRole::Primary, &self.primary_rpc_url)
            .with_context(|| format!("connect primary endpoint {}", self.primary_rpc_url))?;
        let fallback = connect(EndpointRole::Fallback, &self.fallback_rpc_url)
            .with_context(|| format!("connect fallback endpoint {}", self.fallback_rpc_url))?;
        Ok((primary, fallback))
    }

    /// Response writer over both endpoints, retrying with `chain_retry`.
    pub fn response_writer(
        &self,
        primary: Arc<dyn LedgerClient>,
        fallback: Arc<dyn LedgerClient>,
        signer: Arc<dyn TxSigner>,
    ) -> ResponseWriter {
        ResponseWriter::new(FallbackClient::new(primary, fallback), signer, self.chain_retry)
    }

    pub fn subscriber_config(&self) -> SubscriberConfig {
        SubscriberConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            lookback_blocks: self.lookback_blocks,
            retention: Duration::from_secs(self.retention_secs),
            resubscribe_cooldown: Duration::from_millis(self.resubscribe_cooldown_ms),
            network_retry: self.network_retry,
            ..SubscriberConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::{StaticSigner, SubmitError};
    use relay_transport::{MockLedger, MockMethod};
    use relay_types::{Address, BatchIdentifier, Bytes, B256, U256};
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = RelayConfig::default();
        config.validate().unwrap();
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.lookback_blocks, 1000);
        assert_eq!(config.retention_secs, 300);
        assert_eq!(config.network_retry.retries, 5);
        assert_eq!(config.chain_retry.retries, 3);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"primary_rpc_url": "wss://a.example", "chain_retry": {{"retries": 7}}}}"#
        )
        .unwrap();

        let config = RelayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.primary_rpc_url, "wss://a.example");
        assert_eq!(config.fallback_rpc_url, RelayConfig::default().fallback_rpc_url);
        assert_eq!(config.chain_retry.retries, 7);
        assert_eq!(config.chain_retry.initial_backoff, Duration::from_secs(1));
        assert_eq!(config.poll_interval_secs, 5);
    }

    #[test]
    fn test_malformed_file_names_the_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = RelayConfig::from_file(file.path()).unwrap_err();
        assert!(format!("{err}").contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_env_overrides_win_over_file_values() {
        let mut config = RelayConfig {
            primary_rpc_url: "wss://file".to_string(),
            ..RelayConfig::default()
        };
        config
            .apply_env_overrides(env(&[
                (ENV_PRIMARY_RPC_URL, "wss://env"),
                (ENV_POLL_INTERVAL_SECS, "12"),
            ]))
            .unwrap();
        assert_eq!(config.primary_rpc_url, "wss://env");
        assert_eq!(config.poll_interval_secs, 12);
        assert_eq!(config.fallback_rpc_url, RelayConfig::default().fallback_rpc_url);
    }

    #[test]
    fn test_non_numeric_poll_interval_is_rejected() {
        let mut config = RelayConfig::default();
        let err = config
            .apply_env_overrides(env(&[(ENV_POLL_INTERVAL_SECS, "soon")]))
            .unwrap_err();
        assert!(format!("{err}").contains(ENV_POLL_INTERVAL_SECS));
    }

    #[test]
    fn test_validate_rejects_degenerate_values() {
        let zero_poll = RelayConfig {
            poll_interval_secs: 0,
            ..RelayConfig::default()
        };
        assert!(zero_poll.validate().is_err());

        let zero_retention = RelayConfig {
            retention_secs: 0,
            ..RelayConfig::default()
        };
        assert!(zero_retention.validate().is_err());

        let mut shrinking = RelayConfig::default();
        shrinking.network_retry.factor = 0.5;
        let err = shrinking.validate().unwrap_err();
        assert!(format!("{err}").contains("network_retry"));
    }

    #[test]
    fn test_subscriber_config_conversion() {
        let config = RelayConfig {
            poll_interval_secs: 9,
            lookback_blocks: 50,
            retention_secs: 60,
            resubscribe_cooldown_ms: 250,
            ..RelayConfig::default()
        };
        let sub = config.subscriber_config();
        assert_eq!(sub.poll_interval, Duration::from_secs(9));
        assert_eq!(sub.lookback_blocks, 50);
        assert_eq!(sub.retention, Duration::from_secs(60));
        assert_eq!(sub.resubscribe_cooldown, Duration::from_millis(250));
        assert_eq!(sub.network_retry, config.network_retry);
    }

    #[test]
    fn test_validate_rejects_infinite_factor() {
        let mut config = RelayConfig::default();
        config.chain_retry.factor = f64::INFINITY;
        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("chain_retry"));
    }

    #[test]
    fn test_connect_passes_configured_urls_in_role_order() {
        let config = RelayConfig {
            primary_rpc_url: "wss://one.example".to_string(),
            fallback_rpc_url: "wss://two.example".to_string(),
            ..RelayConfig::default()
        };
        let mut seen = Vec::new();
        config
            .connect(|role, url| {
                seen.push((role, url.to_string()));
                Ok(Arc::new(MockLedger::new()) as Arc<dyn LedgerClient>)
            })
            .unwrap();
        assert_eq!(
            seen,
            vec![
                (EndpointRole::Primary, "wss://one.example".to_string()),
                (EndpointRole::Fallback, "wss://two.example".to_string()),
            ]
        );
    }

    #[test]
    fn test_connect_failure_names_the_endpoint() {
        let config = RelayConfig {
            fallback_rpc_url: "wss://down.example".to_string(),
            ..RelayConfig::default()
        };
        let err = config
            .connect(|role, _| match role {
                EndpointRole::Primary => Ok(Arc::new(MockLedger::new()) as Arc<dyn LedgerClient>),
                EndpointRole::Fallback => Err(anyhow::anyhow!("refused")),
            })
            .err()
            .unwrap();
        let msg = format!("{err:#}");
        assert!(msg.contains("fallback endpoint wss://down.example"), "{msg}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_writer_retries_with_chain_retry() {
        let mut config = RelayConfig::default();
        config.chain_retry = RetryConfig::new(2, 10, 100, 2.0);

        let primary = MockLedger::new();
        let fallback = MockLedger::new();
        for ledger in [&primary, &fallback] {
            ledger.fail_next(MockMethod::RespondToTask, 100);
        }
        let writer = config.response_writer(
            Arc::new(primary.clone()),
            Arc::new(fallback.clone()),
            Arc::new(StaticSigner::new(Address::repeat_byte(1), U256::from(1u64))),
        );

        let err = writer
            .send_aggregated_response(
                BatchIdentifier(B256::ZERO),
                B256::ZERO,
                Address::repeat_byte(2),
                Bytes::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Simulation(_)), "{err}");
        // retries + 1 attempts, each trying primary then fallback once.
        assert_eq!(primary.call_count(MockMethod::RespondToTask), 3);
        assert_eq!(fallback.call_count(MockMethod::RespondToTask), 3);
    }
}
