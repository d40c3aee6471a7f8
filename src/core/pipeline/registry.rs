use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::core::{domain::TestCaseId, traits::runner::KillSignal};

/// Kill switches of the processes in flight for one batch, keyed by test case.
///
/// Every insertion, removal and kill goes through the same lock. Once closed
/// by `kill_all` the registry refuses new registrations, so no process can be
/// started after a cancellation has been acknowledged.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    inner: Mutex<RegistryState>,
}

#[derive(Debug, Default)]
struct RegistryState {
    closed: bool,
    handles: HashMap<TestCaseId, oneshot::Sender<()>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns `None` when the batch has been cancelled.
    pub fn register(&self, id: TestCaseId) -> Option<KillSignal> {
        let mut state = self.lock();
        if state.closed {
            return None;
        }
        let (tx, kill) = KillSignal::pair();
        if state.handles.insert(id, tx).is_some() {
            tracing::warn!(id, "replaced a tracked process handle");
        }
        Some(kill)
    }

    pub fn release(&self, id: TestCaseId) {
        self.lock().handles.remove(&id);
    }

    /// Closes the registry and signals every tracked process. Returns how many were signalled.
    pub fn kill_all(&self) -> usize {
        let mut state = self.lock();
        state.closed = true;
        // A failed send means the runner already dropped its signal.
        state
            .handles
            .drain()
            .filter_map(|(_, tx)| tx.send(()).ok())
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_kill_all_signals_registered() {
        let registry = ProcessRegistry::new();
        let mut first = registry.register(1).unwrap();
        let mut second = registry.register(2).unwrap();
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.kill_all(), 2);
        assert!(registry.is_empty());
        assert!(registry.is_closed());

        tokio::time::timeout(Duration::from_secs(1), first.triggered())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), second.triggered())
            .await
            .unwrap();
    }

    #[test]
    fn test_register_after_close() {
        let registry = ProcessRegistry::new();
        registry.kill_all();
        assert!(registry.register(1).is_none());
    }

    #[test]
    fn test_release_untracks() {
        let registry = ProcessRegistry::new();
        let _kill = registry.register(7).unwrap();
        registry.release(7);
        assert!(registry.is_empty());
        assert_eq!(registry.kill_all(), 0);
    }
}
