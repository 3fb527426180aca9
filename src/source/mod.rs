pub mod history;
pub mod node;

#[cfg(test)]
pub mod mock;

use crate::config::{Config, SourceKind};
use crate::rpc::RpcClient;
use alloy_primitives::{Address, U256};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub use history::HistoryApiSource;
pub use node::NodeRpcSource;

/// The burn/mint sentinel. Transfers from it are mints, transfers to it are
/// burns; it is never stored as a holder.
pub const ZERO_ADDRESS: Address = Address::ZERO;

/// One decoded transfer of the tracked token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferActivity {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub block_number: u64,
}

/// Chain data access for a single token, behind one capability so the rest of
/// the engine is agnostic to whether it talks to a history API or a node.
#[async_trait]
pub trait TokenDataSource: Send + Sync {
    /// Current chain head height as reported by the backend.
    async fn head_block(&self) -> Result<u64>;

    /// All transfer activity of the token in `[from_block, to_block]`,
    /// ordered by block. A malformed upstream response is an error, never an
    /// empty result.
    async fn fetch_range(&self, from_block: u64, to_block: u64) -> Result<Vec<TransferActivity>>;

    /// Current balance of `address` for the tracked token.
    async fn balance_of(&self, address: Address) -> Result<U256>;
}

/// Builds the backend the configuration selected.
pub fn from_config(config: &Config) -> Result<Arc<dyn TokenDataSource>> {
    match config.source_kind {
        SourceKind::History => Ok(Arc::new(HistoryApiSource::new(
            config.history_api_url.clone(),
            config.history_api_key.clone(),
            config.token_address,
        ))),
        SourceKind::Node => {
            let client = RpcClient::new(&config.json_rpc_urls)?;
            Ok(Arc::new(NodeRpcSource::new(client, config.token_address)))
        }
    }
}
