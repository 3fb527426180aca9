use crate::source::TokenDataSource;
use alloy_primitives::{Address, U256};
use anyhow::Result;
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Addresses per batch.
    pub batch_size: usize,
    /// Batches resolved concurrently per wave.
    pub max_in_flight: usize,
    /// Pause between waves, for upstream rate limits.
    pub wave_delay: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_in_flight: 5,
            wave_delay: Duration::from_millis(200),
        }
    }
}

/// Resolves current on-chain balances for a set of addresses under the
/// upstream's rate limits. A failure for any address fails the whole call:
/// a partial map would be indistinguishable from "queried and zero" to the
/// caller. Retrying is the caller's decision.
pub struct BalanceResolver {
    source: Arc<dyn TokenDataSource>,
    settings: ResolverSettings,
}

impl BalanceResolver {
    pub fn new(source: Arc<dyn TokenDataSource>, settings: ResolverSettings) -> Self {
        Self { source, settings }
    }

    /// Balances for `addresses`, with zero-balance addresses absent from the
    /// result.
    pub async fn resolve(&self, addresses: &[Address]) -> Result<HashMap<Address, U256>> {
        let mut balances = HashMap::with_capacity(addresses.len());
        if addresses.is_empty() {
            return Ok(balances);
        }

        let batches: Vec<&[Address]> = addresses.chunks(self.settings.batch_size).collect();
        info!(
            "Resolving balances for {} addresses in {} batches",
            addresses.len(),
            batches.len()
        );

        for (wave_index, wave) in batches.chunks(self.settings.max_in_flight).enumerate() {
            if wave_index > 0 {
                sleep(self.settings.wave_delay).await;
            }

            let resolved = try_join_all(wave.iter().map(|batch| self.resolve_batch(batch))).await?;
            for batch in resolved {
                for (address, balance) in batch {
                    if balance > U256::ZERO {
                        balances.insert(address, balance);
                    }
                }
            }
        }

        Ok(balances)
    }

    async fn resolve_batch(&self, batch: &[Address]) -> Result<Vec<(Address, U256)>> {
        try_join_all(batch.iter().map(|address| async move {
            let balance = self.source.balance_of(*address).await?;
            Ok::<_, anyhow::Error>((*address, balance))
        }))
        .await
    }
}
