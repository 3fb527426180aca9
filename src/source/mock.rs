use super::{TokenDataSource, TransferActivity};
use alloy_primitives::{Address, U256};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Scripted chain backend for engine and resolver tests.
#[derive(Default)]
pub struct MockSource {
    pub head: u64,
    /// Artificial delay before answering `head_block`, to hold a pass open.
    pub latency: Duration,
    pub transfers: Vec<TransferActivity>,
    pub balances: HashMap<Address, U256>,
    /// Ranges the engine asked for, in call order.
    pub fetched_ranges: Mutex<Vec<(u64, u64)>>,
    /// Addresses whose balance was queried, in call order.
    pub queried: Mutex<Vec<Address>>,
    /// `fetch_range` fails for any range starting past this block.
    pub fail_ranges_after: Option<u64>,
    /// `balance_of` fails for this address.
    pub fail_balance_for: Option<Address>,
}

impl MockSource {
    pub fn with_head(head: u64) -> Self {
        Self {
            head,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TokenDataSource for MockSource {
    async fn head_block(&self) -> Result<u64> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.head)
    }

    async fn fetch_range(&self, from_block: u64, to_block: u64) -> Result<Vec<TransferActivity>> {
        if let Some(limit) = self.fail_ranges_after {
            if from_block > limit {
                anyhow::bail!("injected fetch failure for blocks {from_block}-{to_block}");
            }
        }

        self.fetched_ranges
            .lock()
            .unwrap()
            .push((from_block, to_block));

        Ok(self
            .transfers
            .iter()
            .filter(|t| t.block_number >= from_block && t.block_number <= to_block)
            .cloned()
            .collect())
    }

    async fn balance_of(&self, address: Address) -> Result<U256> {
        if self.fail_balance_for == Some(address) {
            anyhow::bail!("injected balance failure for {address:?}");
        }

        self.queried.lock().unwrap().push(address);
        Ok(self
            .balances
            .get(&address)
            .copied()
            .unwrap_or(U256::ZERO))
    }
}
