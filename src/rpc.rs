use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy_primitives::{Address, B256, Bytes};
use anyhow::Result;
use regex::Regex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::{Retry, RetryIf};
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: usize = 5;

/// JSON-RPC client over one or more endpoints. Every request runs under a
/// per-attempt timeout with jittered exponential backoff; a failed attempt
/// rotates to the next configured provider before the retry.
#[derive(Clone)]
pub struct RpcClient {
    providers: Vec<DynProvider>,
    urls: Vec<String>,
    current_provider: Arc<AtomicUsize>,
}

impl RpcClient {
    pub fn new(rpc_urls: &[String]) -> Result<Self> {
        if rpc_urls.is_empty() {
            return Err(anyhow::anyhow!("At least one RPC URL must be provided"));
        }

        let mut providers = Vec::new();
        for url in rpc_urls {
            let parsed = url
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {url}"))?;
            providers.push(ProviderBuilder::new().connect_http(parsed).erased());
        }

        Ok(RpcClient {
            providers,
            urls: rpc_urls.to_vec(),
            current_provider: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn provider(&self) -> &DynProvider {
        let index = self.current_provider.load(Ordering::Relaxed) % self.providers.len();
        &self.providers[index]
    }

    fn current_url(&self) -> &str {
        let index = self.current_provider.load(Ordering::Relaxed) % self.urls.len();
        &self.urls[index]
    }

    fn rotate_provider(&self) {
        let next = (self.current_provider.load(Ordering::Relaxed) + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);

        if self.providers.len() > 1 {
            debug!("Rotating to RPC provider #{next}");
        }
    }

    fn retry_strategy() -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(MAX_RETRIES)
    }

    fn handle_error(&self, label: &str, error_str: &str) {
        warn!(
            "{label} failed on {}: {error_str}, rotating provider",
            self.current_url()
        );
        self.rotate_provider();
    }

    fn handle_timeout(&self, label: &str) -> anyhow::Error {
        warn!(
            "{label} timed out after {}s on {}, rotating provider",
            REQUEST_TIMEOUT.as_secs(),
            self.current_url()
        );
        self.rotate_provider();
        anyhow::anyhow!("{label} timed out after {}s", REQUEST_TIMEOUT.as_secs())
    }

    pub async fn get_latest_block(&self) -> Result<u64> {
        let client = self.clone();
        Retry::spawn(Self::retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.provider();
                match timeout(REQUEST_TIMEOUT, provider.get_block_number()).await {
                    Ok(Ok(block_number)) => Ok(block_number),
                    Ok(Err(e)) => {
                        client.handle_error("eth_blockNumber", &e.to_string());
                        Err(anyhow::anyhow!("{e}"))
                    }
                    Err(_) => Err(client.handle_timeout("eth_blockNumber")),
                }
            }
        })
        .await
    }

    /// Read-only contract call against the latest block.
    pub async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let client = self.clone();
        Retry::spawn(Self::retry_strategy(), move || {
            let client = client.clone();
            let request = TransactionRequest::default().to(to).input(data.clone().into());
            async move {
                let provider = client.provider();
                match timeout(REQUEST_TIMEOUT, provider.call(request)).await {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(e)) => {
                        client.handle_error("eth_call", &e.to_string());
                        Err(anyhow::anyhow!("{e}"))
                    }
                    Err(_) => Err(client.handle_timeout("eth_call")),
                }
            }
        })
        .await
    }

    /// One log query over `[from_block, to_block]`. Result-limit refusals are
    /// deterministic and are not retried; the caller answers them by
    /// splitting the range.
    async fn get_logs_internal(
        &self,
        from_block: u64,
        to_block: u64,
        contract_address: Address,
        topic0: B256,
    ) -> Result<Vec<Log>> {
        let client = self.clone();
        RetryIf::spawn(
            Self::retry_strategy(),
            move || {
                let client = client.clone();
                async move {
                    let provider = client.provider();
                    let filter = Filter::new()
                        .address(contract_address)
                        .event_signature(topic0)
                        .from_block(from_block)
                        .to_block(to_block);

                    match timeout(REQUEST_TIMEOUT, provider.get_logs(&filter)).await {
                        Ok(Ok(logs)) => Ok(logs),
                        Ok(Err(e)) => {
                            let error_str = e.to_string();
                            if !is_result_limit_error(&error_str) {
                                client.handle_error("eth_getLogs", &error_str);
                            }
                            Err(anyhow::anyhow!("{e}"))
                        }
                        Err(_) => Err(client.handle_timeout("eth_getLogs")),
                    }
                }
            },
            |error: &anyhow::Error| !is_result_limit_error(&error.to_string()),
        )
        .await
    }

    /// The range a node suggests after refusing a query for matching too many
    /// results.
    fn parse_suggested_range(error_str: &str) -> Option<(u64, u64)> {
        let re = Regex::new(r"retry with the range (\d+)-(\d+)").ok()?;
        let captures = re.captures(error_str)?;

        let from = captures.get(1)?.as_str().parse().ok()?;
        let to = captures.get(2)?.as_str().parse().ok()?;

        Some((from, to))
    }

    /// Fetches logs over `[from_block, to_block]`, splitting whenever the
    /// node refuses a sub-range as too large. The node's suggested range is
    /// used when present; otherwise the remaining window is halved.
    pub async fn get_logs(
        &self,
        from_block: u64,
        to_block: u64,
        contract_address: Address,
        topic0: B256,
    ) -> Result<Vec<Log>> {
        let mut all_logs = Vec::new();
        let mut current_from = from_block;

        while current_from <= to_block {
            match self
                .get_logs_internal(current_from, to_block, contract_address, topic0)
                .await
            {
                Ok(logs) => {
                    all_logs.extend(logs);
                    break;
                }
                Err(e) if is_result_limit_error(&e.to_string()) => {
                    let (split_from, split_to) = Self::parse_suggested_range(&e.to_string())
                        .unwrap_or((current_from, current_from + (to_block - current_from) / 2));
                    info!(
                        "Log query for blocks {current_from}-{to_block} hit the node's result limit, retrying {split_from}-{split_to}"
                    );

                    let logs = self
                        .get_logs_internal(split_from, split_to, contract_address, topic0)
                        .await?;
                    all_logs.extend(logs);
                    current_from = split_to + 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(all_logs)
    }
}

/// Whether a node rejected a log query for matching too many results. The
/// exact wording varies by implementation.
fn is_result_limit_error(message: &str) -> bool {
    let message = message.to_lowercase();
    [
        "exceeds max results",
        "query returned more than",
        "response size exceeded",
        "too many results",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_suggested_retry_range() {
        assert_eq!(
            RpcClient::parse_suggested_range(
                "query exceeds max results 10000, retry with the range 100-562"
            ),
            Some((100, 562))
        );
        assert_eq!(
            RpcClient::parse_suggested_range("query returned more than 10000 results"),
            None
        );
    }

    #[test]
    fn recognizes_result_limit_refusals() {
        assert!(is_result_limit_error(
            "query exceeds max results 10000, retry with the range 100-562"
        ));
        assert!(is_result_limit_error(
            "query returned more than 10000 results"
        ));
        assert!(!is_result_limit_error("connection reset by peer"));
        assert!(!is_result_limit_error("eth_getLogs timed out after 30s"));
    }

    #[test]
    fn rejects_an_unparseable_url() {
        assert!(RpcClient::new(&["not a url".to_string()]).is_err());
    }

    #[test]
    fn requires_at_least_one_url() {
        assert!(RpcClient::new(&[]).is_err());
    }
}
