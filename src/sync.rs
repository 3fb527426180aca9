use crate::gate::SyncGate;
use crate::repository::{CursorRepository, Database, HolderRepository};
use crate::source::{TokenDataSource, TransferActivity, ZERO_ADDRESS};
use alloy_primitives::{Address, U256};
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// First block to scan when no cursor exists yet. Must be at or before
    /// the token's deployment block, or delta accounting will see senders it
    /// has no prior balance for.
    pub start_block: u64,
    /// Blocks per chunk; bounds upstream response size and the candidate set
    /// held in memory per chunk.
    pub block_chunk_size: u64,
    /// Courtesy pause between chunks, not a correctness requirement.
    pub chunk_delay: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            start_block: 0,
            block_chunk_size: 100_000,
            chunk_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A pass was already active. A status for the caller, not a failure.
    #[error("a synchronization pass is already running")]
    Conflict,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PassSummary {
    pub from_block: u64,
    pub to_block: u64,
    pub chunks: usize,
    pub transfers: usize,
    pub holders: usize,
}

/// One synchronization pass: reads the resume point, walks `[resume, head]`
/// in chunks, folds each chunk's transfers into the balance snapshot and
/// commits holders plus the advanced cursor as one transaction per chunk.
///
/// Balances are derived by delta accounting over the previously persisted
/// set; the chain is only consulted for transfer activity. The reconciler is
/// the authoritative path that re-resolves balances directly.
pub struct SyncEngine {
    source: Arc<dyn TokenDataSource>,
    db: Database,
    gate: Arc<SyncGate>,
    settings: SyncSettings,
}

enum ChunkMutation {
    Upsert {
        updates: Vec<(Address, U256)>,
        removals: Vec<Address>,
    },
    Replace {
        holders: Vec<(Address, U256)>,
    },
    CursorOnly,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn TokenDataSource>,
        db: Database,
        gate: Arc<SyncGate>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            source,
            db,
            gate,
            settings,
        }
    }

    /// Runs one full pass, or reports a conflict when one is already active.
    pub async fn run_pass(&self) -> Result<PassSummary, SyncError> {
        let Some(_permit) = self.gate.try_start_sync() else {
            return Err(SyncError::Conflict);
        };
        self.sync_to_head().await.map_err(SyncError::Failed)
    }

    async fn sync_to_head(&self) -> Result<PassSummary> {
        let resume = {
            let conn = self.db.lock();
            CursorRepository::new(&conn).resume_block(self.settings.start_block)?
        };
        let head = self.source.head_block().await?;

        let mut summary = PassSummary {
            from_block: resume,
            to_block: head,
            ..Default::default()
        };

        if resume > head {
            debug!("Already caught up to head block {}", head);
            return Ok(summary);
        }

        // Seed the snapshot from the persisted set; deltas fold into it for
        // the rest of the pass.
        let mut snapshot: HashMap<Address, U256> = {
            let conn = self.db.lock();
            HolderRepository::new(&conn)
                .load_all()?
                .into_iter()
                .map(|h| (h.address, h.balance))
                .collect()
        };

        info!(
            "Syncing blocks {} to {} ({} known holders)",
            resume,
            head,
            snapshot.len()
        );

        let chunk_span = self.settings.block_chunk_size.max(1);
        let mut chunk_start = resume;
        let mut dirty = false;

        while chunk_start <= head {
            let chunk_end = chunk_start.saturating_add(chunk_span - 1).min(head);

            debug!(phase = "scanning", "Fetching blocks {} to {}", chunk_start, chunk_end);
            let transfers = self.source.fetch_range(chunk_start, chunk_end).await?;

            debug!(phase = "resolving", "Applying {} transfers", transfers.len());
            let touched = apply_deltas(&mut snapshot, &transfers)?;
            dirty |= !transfers.is_empty();

            let is_final = chunk_end == head;
            let mutation = if is_final && dirty {
                // Final chunk: full replace, dropping addresses that fell to
                // zero over the whole pass.
                ChunkMutation::Replace {
                    holders: snapshot
                        .iter()
                        .filter(|(_, balance)| **balance > U256::ZERO)
                        .map(|(address, balance)| (*address, *balance))
                        .collect(),
                }
            } else if touched.is_empty() {
                ChunkMutation::CursorOnly
            } else {
                let mut updates = Vec::new();
                let mut removals = Vec::new();
                for address in &touched {
                    match snapshot.get(address) {
                        Some(balance) if *balance > U256::ZERO => {
                            updates.push((*address, *balance));
                        }
                        _ => removals.push(*address),
                    }
                }
                ChunkMutation::Upsert { updates, removals }
            };

            debug!(phase = "committing", "Committing chunk up to block {}", chunk_end);
            let db = self.db.clone();
            tokio::task::spawn_blocking(move || commit_chunk(&db, mutation, chunk_end)).await??;

            summary.chunks += 1;
            summary.transfers += transfers.len();
            summary.holders = snapshot
                .values()
                .filter(|balance| **balance > U256::ZERO)
                .count();

            info!(
                "Committed blocks {} to {}: {} transfers, {} holders",
                chunk_start,
                chunk_end,
                transfers.len(),
                summary.holders
            );

            chunk_start = chunk_end + 1;
            if !is_final {
                sleep(self.settings.chunk_delay).await;
            }
        }

        info!(
            "Synchronization completed: blocks {} to {}",
            resume, head
        );
        Ok(summary)
    }
}

/// Folds a chunk's transfers into the snapshot and reports which addresses
/// changed. The zero address is the burn/mint sentinel and is skipped on
/// whichever side it appears. A sender driven below zero means the scanned
/// history and the persisted set disagree; that is surfaced, not clamped.
fn apply_deltas(
    snapshot: &mut HashMap<Address, U256>,
    transfers: &[TransferActivity],
) -> Result<HashSet<Address>> {
    let mut touched = HashSet::new();

    for transfer in transfers {
        if transfer.value.is_zero() {
            continue;
        }

        if transfer.from != ZERO_ADDRESS {
            let balance = snapshot.entry(transfer.from).or_insert(U256::ZERO);
            *balance = balance.checked_sub(transfer.value).ok_or_else(|| {
                anyhow::anyhow!(
                    "balance underflow for sender {:?} at block {}",
                    transfer.from,
                    transfer.block_number
                )
            })?;
            touched.insert(transfer.from);
        }

        if transfer.to != ZERO_ADDRESS {
            let balance = snapshot.entry(transfer.to).or_insert(U256::ZERO);
            *balance = balance.checked_add(transfer.value).ok_or_else(|| {
                anyhow::anyhow!(
                    "balance overflow for recipient {:?} at block {}",
                    transfer.to,
                    transfer.block_number
                )
            })?;
            touched.insert(transfer.to);
        }
    }

    Ok(touched)
}

fn commit_chunk(db: &Database, mutation: ChunkMutation, cursor_block: u64) -> Result<()> {
    let conn = db.lock();
    let tx = conn.unchecked_transaction()?;
    {
        let holders = HolderRepository::new(&tx);
        match &mutation {
            ChunkMutation::Upsert { updates, removals } => {
                for (address, balance) in updates {
                    holders.upsert(address, balance)?;
                }
                for address in removals {
                    holders.delete(address)?;
                }
            }
            ChunkMutation::Replace { holders: rows } => {
                holders.clear()?;
                holders.insert_all(rows.iter().map(|(address, balance)| (address, balance)))?;
            }
            ChunkMutation::CursorOnly => {}
        }

        // Cursor goes last within the transaction: a split between these
        // writes may only ever cost redundant reprocessing, never a skipped
        // range.
        CursorRepository::new(&tx).set_last_processed_block(cursor_block)?;
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mock::MockSource;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn transfer(from: Address, to: Address, value: u64, block: u64) -> TransferActivity {
        TransferActivity {
            from,
            to,
            value: U256::from(value),
            block_number: block,
        }
    }

    fn settings(start_block: u64, chunk_size: u64) -> SyncSettings {
        SyncSettings {
            start_block,
            block_chunk_size: chunk_size,
            chunk_delay: Duration::ZERO,
        }
    }

    fn engine(source: MockSource, db: &Database, s: SyncSettings) -> SyncEngine {
        SyncEngine::new(
            Arc::new(source),
            db.clone(),
            Arc::new(SyncGate::new()),
            s,
        )
    }

    fn stored_balances(db: &Database) -> HashMap<Address, U256> {
        let conn = db.lock();
        HolderRepository::new(&conn)
            .load_all()
            .unwrap()
            .into_iter()
            .map(|h| (h.address, h.balance))
            .collect()
    }

    fn cursor(db: &Database) -> Option<u64> {
        let conn = db.lock();
        CursorRepository::new(&conn).last_processed_block().unwrap()
    }

    fn seed(db: &Database, holders: &[(Address, u64)], cursor_block: u64) {
        let conn = db.lock();
        let repo = HolderRepository::new(&conn);
        for (address, balance) in holders {
            repo.upsert(address, &U256::from(*balance)).unwrap();
        }
        CursorRepository::new(&conn)
            .set_last_processed_block(cursor_block)
            .unwrap();
    }

    #[tokio::test]
    async fn new_transfer_moves_balance_and_advances_cursor() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, &[(addr(0xAA), 500), (addr(0xBB), 300)], 10);

        let mut source = MockSource::with_head(12);
        source.transfers = vec![transfer(addr(0xAA), addr(0xCC), 100, 12)];
        let engine = engine(source, &db, settings(0, 100_000));

        let summary = engine.run_pass().await.unwrap();

        let balances = stored_balances(&db);
        assert_eq!(balances.len(), 3);
        assert_eq!(balances[&addr(0xAA)], U256::from(400u64));
        assert_eq!(balances[&addr(0xBB)], U256::from(300u64));
        assert_eq!(balances[&addr(0xCC)], U256::from(100u64));
        assert_eq!(cursor(&db), Some(12));
        assert_eq!(summary.transfers, 1);
        assert_eq!(summary.holders, 3);
    }

    #[tokio::test]
    async fn pass_with_nothing_new_is_a_noop() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, &[(addr(0xAA), 500)], 20);

        let engine = engine(MockSource::with_head(15), &db, settings(0, 100_000));
        let summary = engine.run_pass().await.unwrap();

        assert_eq!(summary.chunks, 0);
        assert_eq!(stored_balances(&db)[&addr(0xAA)], U256::from(500u64));
        assert_eq!(cursor(&db), Some(20));
    }

    #[tokio::test]
    async fn second_pass_without_new_activity_changes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let mut source = MockSource::with_head(5);
        source.transfers = vec![transfer(ZERO_ADDRESS, addr(0xAA), 100, 3)];

        let engine1 = engine(source, &db, settings(0, 100_000));
        engine1.run_pass().await.unwrap();
        let after_first = stored_balances(&db);
        let cursor_first = cursor(&db);

        let mut source = MockSource::with_head(5);
        source.transfers = vec![transfer(ZERO_ADDRESS, addr(0xAA), 100, 3)];
        let engine2 = engine(source, &db, settings(0, 100_000));
        engine2.run_pass().await.unwrap();

        assert_eq!(stored_balances(&db), after_first);
        assert_eq!(cursor(&db), cursor_first);
    }

    #[tokio::test]
    async fn sentinel_is_excluded_from_the_holder_set() {
        let db = Database::open_in_memory().unwrap();
        let mut source = MockSource::with_head(5);
        source.transfers = vec![
            transfer(ZERO_ADDRESS, addr(0xAA), 100, 1),
            transfer(addr(0xAA), ZERO_ADDRESS, 30, 2),
            transfer(addr(0xAA), addr(0xBB), 20, 3),
        ];

        let engine = engine(source, &db, settings(0, 100_000));
        engine.run_pass().await.unwrap();

        let balances = stored_balances(&db);
        assert_eq!(balances.len(), 2);
        assert_eq!(balances[&addr(0xAA)], U256::from(50u64));
        assert_eq!(balances[&addr(0xBB)], U256::from(20u64));
        assert!(!balances.contains_key(&ZERO_ADDRESS));
    }

    #[tokio::test]
    async fn address_spending_to_zero_is_removed() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, &[(addr(0xAA), 100)], 10);

        let mut source = MockSource::with_head(11);
        source.transfers = vec![transfer(addr(0xAA), addr(0xBB), 100, 11)];
        let engine = engine(source, &db, settings(0, 100_000));
        engine.run_pass().await.unwrap();

        let balances = stored_balances(&db);
        assert!(!balances.contains_key(&addr(0xAA)));
        assert_eq!(balances[&addr(0xBB)], U256::from(100u64));
    }

    #[tokio::test]
    async fn sender_underflow_aborts_without_commit() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, &[(addr(0xAA), 100)], 10);

        let mut source = MockSource::with_head(11);
        source.transfers = vec![transfer(addr(0xAA), addr(0xBB), 150, 11)];
        let engine = engine(source, &db, settings(0, 100_000));

        let err = engine.run_pass().await.unwrap_err();
        assert!(matches!(err, SyncError::Failed(_)));
        assert!(err.to_string().contains("underflow"));

        assert_eq!(stored_balances(&db)[&addr(0xAA)], U256::from(100u64));
        assert_eq!(cursor(&db), Some(10));
    }

    #[tokio::test]
    async fn aborted_pass_resumes_from_last_committed_chunk() {
        let db = Database::open_in_memory().unwrap();

        let mut source = MockSource::with_head(25);
        source.transfers = vec![transfer(ZERO_ADDRESS, addr(0xAA), 100, 5)];
        source.fail_ranges_after = Some(9);
        let engine1 = engine(source, &db, settings(0, 10));

        // Chunk 0-9 commits, chunk 10-19 fails.
        assert!(engine1.run_pass().await.is_err());
        assert_eq!(cursor(&db), Some(9));
        assert_eq!(stored_balances(&db)[&addr(0xAA)], U256::from(100u64));

        // A later pass picks up exactly where the failed one stopped.
        let mut source = MockSource::with_head(25);
        source.transfers = vec![transfer(ZERO_ADDRESS, addr(0xAA), 100, 5)];
        let engine2 = engine(source, &db, settings(0, 10));
        engine2.run_pass().await.unwrap();

        assert_eq!(cursor(&db), Some(25));
        assert_eq!(stored_balances(&db)[&addr(0xAA)], U256::from(100u64));
    }

    #[tokio::test]
    async fn chunks_walk_the_range_in_order() {
        let db = Database::open_in_memory().unwrap();
        let source = Arc::new(MockSource::with_head(25));
        let engine = SyncEngine::new(
            Arc::clone(&source) as _,
            db.clone(),
            Arc::new(SyncGate::new()),
            settings(0, 10),
        );

        engine.run_pass().await.unwrap();

        let ranges = source.fetched_ranges.lock().unwrap().clone();
        assert_eq!(ranges, vec![(0, 9), (10, 19), (20, 25)]);
        assert_eq!(cursor(&db), Some(25));
    }

    #[tokio::test]
    async fn commit_failure_rolls_back_holders_with_cursor() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, &[(addr(0xAA), 500)], 10);

        // Break the cursor write: the holder writes already issued in the
        // same transaction must roll back with it.
        db.lock()
            .execute(
                "CREATE TRIGGER block_cursor_writes BEFORE INSERT ON block_state
                 BEGIN SELECT RAISE(ABORT, 'injected cursor failure'); END",
                [],
            )
            .unwrap();

        let mut source = MockSource::with_head(12);
        source.transfers = vec![transfer(addr(0xAA), addr(0xBB), 100, 12)];
        let engine1 = engine(source, &db, settings(0, 100_000));
        let err = engine1.run_pass().await.unwrap_err();
        assert!(err.to_string().contains("injected cursor failure"));

        assert_eq!(
            stored_balances(&db),
            HashMap::from([(addr(0xAA), U256::from(500u64))])
        );
        assert_eq!(cursor(&db), Some(10));

        // With the fault gone the next pass resumes from the old cursor and
        // re-derives the state the failed commit was about to write.
        db.lock()
            .execute("DROP TRIGGER block_cursor_writes", [])
            .unwrap();
        let mut source = MockSource::with_head(12);
        source.transfers = vec![transfer(addr(0xAA), addr(0xBB), 100, 12)];
        let engine = engine(source, &db, settings(0, 100_000));
        engine.run_pass().await.unwrap();

        let balances = stored_balances(&db);
        assert_eq!(balances[&addr(0xAA)], U256::from(400u64));
        assert_eq!(balances[&addr(0xBB)], U256::from(100u64));
        assert_eq!(cursor(&db), Some(12));
    }

    #[tokio::test]
    async fn concurrent_trigger_gets_a_conflict() {
        let db = Database::open_in_memory().unwrap();
        let gate = Arc::new(SyncGate::new());
        let engine = SyncEngine::new(
            Arc::new(MockSource::with_head(5)),
            db.clone(),
            Arc::clone(&gate),
            settings(0, 100_000),
        );

        let _permit = gate.try_start_sync().unwrap();
        let err = engine.run_pass().await.unwrap_err();
        assert!(matches!(err, SyncError::Conflict));
    }

    #[tokio::test]
    async fn two_simultaneous_triggers_run_exactly_one_pass() {
        let db = Database::open_in_memory().unwrap();
        let mut source = MockSource::with_head(5);
        source.latency = Duration::from_millis(100);
        let engine = Arc::new(engine(source, &db, settings(0, 100_000)));

        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.run_pass().await }
        });
        let second = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.run_pass().await }
        });

        let results = [first.await.unwrap(), second.await.unwrap()];
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(SyncError::Conflict)))
            .count();
        let completed = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(conflicts, 1);
        assert_eq!(completed, 1);
    }
}
