use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Default)]
struct GateState {
    syncing: bool,
    reconciling: bool,
}

/// Process-local serialization of sync and reconciliation passes. A sync pass
/// fails fast with a conflict when either kind of pass is active; a
/// reconciliation pass waits for idleness instead. Waiters are woken through
/// a notification rather than polled, with the same ordering semantics:
/// reconciliation starts strictly after the in-flight sync pass ends.
///
/// The flags only guard this process. Running several engine instances
/// against one store needs a lock in the store itself and is out of scope.
#[derive(Default)]
pub struct SyncGate {
    state: Mutex<GateState>,
    idle: Notify,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the sync slot, or returns `None` when a sync or reconciliation
    /// pass is already running. The slot is released when the permit drops.
    pub fn try_start_sync(&self) -> Option<SyncPermit<'_>> {
        let mut state = self.state.lock().expect("gate mutex poisoned");
        if state.syncing || state.reconciling {
            return None;
        }
        state.syncing = true;
        Some(SyncPermit { gate: self })
    }

    /// Claims the reconciliation slot, waiting for any active pass to finish
    /// first.
    pub async fn begin_reconcile(&self) -> ReconcilePermit<'_> {
        loop {
            // Enabled before the state check so a notification landing
            // between the check and the await is not lost.
            let mut notified = std::pin::pin!(self.idle.notified());
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().expect("gate mutex poisoned");
                if !state.syncing && !state.reconciling {
                    state.reconciling = true;
                    return ReconcilePermit { gate: self };
                }
            }
            notified.await;
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.state.lock().expect("gate mutex poisoned").syncing
    }

    fn end_sync(&self) {
        self.state.lock().expect("gate mutex poisoned").syncing = false;
        self.idle.notify_waiters();
    }

    fn end_reconcile(&self) {
        self.state.lock().expect("gate mutex poisoned").reconciling = false;
        self.idle.notify_waiters();
    }
}

pub struct SyncPermit<'a> {
    gate: &'a SyncGate,
}

impl Drop for SyncPermit<'_> {
    fn drop(&mut self) {
        self.gate.end_sync();
    }
}

pub struct ReconcilePermit<'a> {
    gate: &'a SyncGate,
}

impl Drop for ReconcilePermit<'_> {
    fn drop(&mut self) {
        self.gate.end_reconcile();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn second_sync_attempt_conflicts() {
        let gate = SyncGate::new();

        let permit = gate.try_start_sync();
        assert!(permit.is_some());
        assert!(gate.is_syncing());
        assert!(gate.try_start_sync().is_none());

        drop(permit);
        assert!(!gate.is_syncing());
        assert!(gate.try_start_sync().is_some());
    }

    #[tokio::test]
    async fn reconcile_waits_for_sync_to_finish() {
        let gate = Arc::new(SyncGate::new());
        let permit = gate.try_start_sync().unwrap();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                let _permit = gate.begin_reconcile().await;
            })
        };

        // The reconciler must still be parked while the sync permit lives.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(permit);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("reconciler never woke up")
            .unwrap();
    }

    #[tokio::test]
    async fn sync_conflicts_while_reconciling() {
        let gate = SyncGate::new();
        let permit = gate.begin_reconcile().await;

        assert!(gate.try_start_sync().is_none());
        assert!(!gate.is_syncing());

        drop(permit);
        assert!(gate.try_start_sync().is_some());
    }
}
