use super::TransferActivity;
use crate::source::TokenDataSource;
use alloy_primitives::{Address, U256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::str::FromStr;
use tracing::info;

/// One page of results per `tokentx` request, the documented maximum.
const PAGE_SIZE: usize = 10_000;

/// Etherscan-family transaction-history backend. Scans are paged `tokentx`
/// queries; balances come from `tokenbalance`; the head block from the
/// `eth_blockNumber` proxy action.
pub struct HistoryApiSource {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    token_address: Address,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    message: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenTx {
    block_number: String,
    from: String,
    to: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct ProxyEnvelope {
    result: Option<String>,
}

impl HistoryApiSource {
    pub fn new(api_url: String, api_key: String, token_address: Address) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url,
            api_key,
            token_address,
        }
    }

    async fn fetch_page(&self, from_block: u64, to_block: u64, page: usize) -> Result<Envelope> {
        let params = [
            ("module", "account".to_string()),
            ("action", "tokentx".to_string()),
            ("contractaddress", format!("{:?}", self.token_address)),
            ("startblock", from_block.to_string()),
            ("endblock", to_block.to_string()),
            ("page", page.to_string()),
            ("offset", PAGE_SIZE.to_string()),
            ("sort", "asc".to_string()),
            ("apikey", self.api_key.clone()),
        ];

        let response = self
            .http
            .get(&self.api_url)
            .query(&params)
            .send()
            .await
            .context("tokentx request failed")?
            .error_for_status()
            .context("tokentx request rejected")?;

        response
            .json::<Envelope>()
            .await
            .context("tokentx response is not valid JSON")
    }
}

/// Turns one `tokentx` envelope into transfer activity. An envelope whose
/// `result` is not an array (rate-limit notices, invalid key, etc.) is a hard
/// failure: the caller cannot tell a broken page from an empty one.
fn decode_transfer_page(envelope: Envelope) -> Result<Vec<TransferActivity>> {
    let rows = match envelope.result {
        serde_json::Value::Array(rows) => rows,
        other => anyhow::bail!(
            "history API error (status {}): {} ({})",
            envelope.status,
            envelope.message,
            other
        ),
    };

    let mut transfers = Vec::with_capacity(rows.len());
    for row in rows {
        let tx: TokenTx =
            serde_json::from_value(row).context("malformed tokentx entry in history response")?;

        let block_number = tx
            .block_number
            .parse::<u64>()
            .with_context(|| format!("invalid block number: {}", tx.block_number))?;
        let from = Address::from_str(&tx.from)
            .map_err(|_| anyhow::anyhow!("invalid from address: {}", tx.from))?;
        let to = Address::from_str(&tx.to)
            .map_err(|_| anyhow::anyhow!("invalid to address: {}", tx.to))?;
        let value = U256::from_str(&tx.value)
            .map_err(|_| anyhow::anyhow!("invalid transfer value: {}", tx.value))?;

        transfers.push(TransferActivity {
            from,
            to,
            value,
            block_number,
        });
    }

    Ok(transfers)
}

#[async_trait]
impl TokenDataSource for HistoryApiSource {
    async fn head_block(&self) -> Result<u64> {
        let params = [
            ("module", "proxy".to_string()),
            ("action", "eth_blockNumber".to_string()),
            ("apikey", self.api_key.clone()),
        ];

        let response = self
            .http
            .get(&self.api_url)
            .query(&params)
            .send()
            .await
            .context("eth_blockNumber request failed")?
            .error_for_status()
            .context("eth_blockNumber request rejected")?;

        let envelope: ProxyEnvelope = response
            .json()
            .await
            .context("eth_blockNumber response is not valid JSON")?;

        let hex = envelope
            .result
            .context("eth_blockNumber response has no result")?;
        let trimmed = hex.strip_prefix("0x").unwrap_or(&hex);
        u64::from_str_radix(trimmed, 16)
            .with_context(|| format!("invalid block number in response: {hex}"))
    }

    async fn fetch_range(&self, from_block: u64, to_block: u64) -> Result<Vec<TransferActivity>> {
        let mut all = Vec::new();
        let mut page = 1;

        loop {
            let envelope = self.fetch_page(from_block, to_block, page).await?;
            let transfers = decode_transfer_page(envelope)?;
            let page_len = transfers.len();
            all.extend(transfers);

            if page_len < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        if !all.is_empty() {
            info!(
                "Fetched {} transfers for blocks {} to {}",
                all.len(),
                from_block,
                to_block
            );
        }

        Ok(all)
    }

    async fn balance_of(&self, address: Address) -> Result<U256> {
        let params = [
            ("module", "account".to_string()),
            ("action", "tokenbalance".to_string()),
            ("contractaddress", format!("{:?}", self.token_address)),
            ("address", format!("{address:?}")),
            ("tag", "latest".to_string()),
            ("apikey", self.api_key.clone()),
        ];

        let response = self
            .http
            .get(&self.api_url)
            .query(&params)
            .send()
            .await
            .context("tokenbalance request failed")?
            .error_for_status()
            .context("tokenbalance request rejected")?;

        let envelope: Envelope = response
            .json()
            .await
            .context("tokenbalance response is not valid JSON")?;

        if envelope.status != "1" {
            anyhow::bail!(
                "tokenbalance failed for {:?}: {} ({})",
                address,
                envelope.message,
                envelope.result
            );
        }

        let balance_str = envelope
            .result
            .as_str()
            .context("tokenbalance result is not a string")?;
        U256::from_str(balance_str)
            .map_err(|_| anyhow::anyhow!("invalid balance in response: {balance_str}"))
    }
}
