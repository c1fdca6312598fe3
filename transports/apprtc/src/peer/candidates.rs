//! Local ICE candidate collection

use crate::signaling::Candidate;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

enum Gathering {
    Collecting(Vec<Candidate>),
    Complete(Arc<[Candidate]>),
}

/// Accumulates local candidates until gathering completes
///
/// Completion freezes the buffer into an immutable snapshot; candidates
/// arriving afterwards are dropped.
pub struct CandidateCollector {
    state: Mutex<Gathering>,
    complete: watch::Sender<bool>,
}

impl CandidateCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        let (complete, _) = watch::channel(false);
        Self {
            state: Mutex::new(Gathering::Collecting(Vec::new())),
            complete,
        }
    }

    /// Append a candidate; returns false if gathering already completed
    pub fn push(&self, candidate: Candidate) -> bool {
        match &mut *self.state.lock() {
            Gathering::Collecting(buffer) => {
                debug!("Local candidate #{}: {}", buffer.len(), candidate.candidate);
                buffer.push(candidate);
                true
            }
            Gathering::Complete(_) => {
                warn!(
                    "Dropping candidate received after gathering completed: {}",
                    candidate.candidate
                );
                false
            }
        }
    }

    /// Mark gathering complete; returns true only on the first call
    pub fn complete(&self) -> bool {
        {
            let mut state = self.state.lock();
            let buffer = match &mut *state {
                Gathering::Collecting(buffer) => std::mem::take(buffer),
                Gathering::Complete(_) => return false,
            };
            debug!("Candidate gathering complete with {} candidates", buffer.len());
            *state = Gathering::Complete(buffer.into());
        }

        self.complete.send_replace(true);
        true
    }

    /// Whether gathering has completed
    pub fn is_complete(&self) -> bool {
        matches!(*self.state.lock(), Gathering::Complete(_))
    }

    /// Snapshot if gathering has completed
    pub fn snapshot(&self) -> Option<Arc<[Candidate]>> {
        match &*self.state.lock() {
            Gathering::Complete(candidates) => Some(Arc::clone(candidates)),
            Gathering::Collecting(_) => None,
        }
    }

    /// Wait until gathering completes and return the snapshot
    pub async fn wait(&self) -> Result<Arc<[Candidate]>> {
        let mut complete = self.complete.subscribe();
        complete
            .wait_for(|done| *done)
            .await
            .map_err(|_| Error::StateError("candidate collector dropped".to_string()))?;

        self.snapshot()
            .ok_or_else(|| Error::StateError("gathering signalled but not complete".to_string()))
    }
}

impl Default for CandidateCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn candidate(n: u16) -> Candidate {
        Candidate {
            label: 0,
            id: "0".to_string(),
            candidate: format!("candidate:{} 1 udp 2122260223 10.0.0.{} 5000{} typ host", n, n, n),
        }
    }

    #[test]
    fn test_preserves_arrival_order() {
        let collector = CandidateCollector::new();
        for n in 0..5 {
            assert!(collector.push(candidate(n)));
        }
        assert!(collector.snapshot().is_none());

        assert!(collector.complete());
        let snapshot = collector.snapshot().unwrap();
        let expected: Vec<Candidate> = (0..5).map(candidate).collect();
        assert_eq!(&snapshot[..], &expected[..]);
    }

    #[test]
    fn test_late_candidates_are_dropped() {
        let collector = CandidateCollector::new();
        collector.push(candidate(1));
        collector.complete();
        let before = collector.snapshot().unwrap();

        assert!(!collector.push(candidate(2)));
        assert!(!collector.complete());

        let after = collector.snapshot().unwrap();
        assert_eq!(after.len(), 1);
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn test_wait_blocks_until_complete() {
        let collector = Arc::new(CandidateCollector::new());

        let waiter = {
            let collector = Arc::clone(&collector);
            tokio::spawn(async move { collector.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        collector.push(candidate(7));
        collector.complete();

        let snapshot = waiter.await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0], candidate(7));
    }

    #[tokio::test]
    async fn test_wait_after_complete_returns_immediately() {
        let collector = CandidateCollector::new();
        collector.complete();
        let snapshot = tokio::time::timeout(Duration::from_secs(1), collector.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(snapshot.is_empty());
    }
}
