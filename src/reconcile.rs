use crate::gate::SyncGate;
use crate::repository::{Database, HolderRepository};
use crate::resolver::BalanceResolver;
use alloy_primitives::{Address, U256};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileSummary {
    /// Addresses audited against the chain.
    pub audited: usize,
    /// Whether drift was found and the holder table replaced.
    pub replaced: bool,
}

/// Periodic full audit: re-resolves on-chain balances for every stored
/// address and replaces the holder table when the result differs from what is
/// persisted. Incremental scanning can drift (missed activity, an upstream
/// that lied once); this pass is the authoritative correction.
pub struct Reconciler {
    resolver: BalanceResolver,
    db: Database,
    gate: Arc<SyncGate>,
}

impl Reconciler {
    pub fn new(resolver: BalanceResolver, db: Database, gate: Arc<SyncGate>) -> Self {
        Self { resolver, db, gate }
    }

    /// Runs one reconciliation pass, waiting for any in-flight sync pass to
    /// finish first.
    pub async fn run(&self) -> Result<ReconcileSummary> {
        let _permit = self.gate.begin_reconcile().await;

        let stored: HashMap<Address, U256> = {
            let conn = self.db.lock();
            HolderRepository::new(&conn)
                .load_all()?
                .into_iter()
                .map(|h| (h.address, h.balance))
                .collect()
        };

        let mut summary = ReconcileSummary {
            audited: stored.len(),
            replaced: false,
        };

        if stored.is_empty() {
            return Ok(summary);
        }

        let addresses: Vec<Address> = stored.keys().copied().collect();
        let resolved = self.resolver.resolve(&addresses).await?;

        if resolved == stored {
            info!("Reconciliation found no drift across {} holders", stored.len());
            return Ok(summary);
        }

        let rows: Vec<(Address, U256)> = resolved.into_iter().collect();
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || replace_holders(&db, &rows)).await??;

        summary.replaced = true;
        info!(
            "Reconciliation corrected drift: {} holders audited",
            summary.audited
        );
        Ok(summary)
    }
}

/// Full atomic replace of the holder table. The cursor is untouched: this
/// pass audits balances, it does not advance the scan.
fn replace_holders(db: &Database, rows: &[(Address, U256)]) -> Result<()> {
    let conn = db.lock();
    let tx = conn.unchecked_transaction()?;
    {
        let holders = HolderRepository::new(&tx);
        holders.clear()?;
        holders.insert_all(rows.iter().map(|(address, balance)| (address, balance)))?;
    }
    tx.commit()?;
    Ok(())
}
