//! One-shot latch

use std::sync::atomic::{AtomicU8, Ordering};

/// State of a [`OneShotLatch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LatchState {
    /// Not fired yet
    Armed = 0,
    /// Fired; stays fired
    Fired = 1,
}

/// Fires at most once across all callers
///
/// `try_fire` is a single compare-exchange, so exactly one caller wins no
/// matter how many race.
#[derive(Debug)]
pub struct OneShotLatch {
    state: AtomicU8,
}

impl OneShotLatch {
    /// Create an armed latch
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(LatchState::Armed as u8),
        }
    }

    /// Fire the latch; returns true only for the caller that fired it
    pub fn try_fire(&self) -> bool {
        self.state
            .compare_exchange(
                LatchState::Armed as u8,
                LatchState::Fired as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Current state
    pub fn state(&self) -> LatchState {
        if self.state.load(Ordering::Acquire) == LatchState::Fired as u8 {
            LatchState::Fired
        } else {
            LatchState::Armed
        }
    }

    /// Whether the latch has fired
    pub fn is_fired(&self) -> bool {
        self.state() == LatchState::Fired
    }
}

impl Default for OneShotLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_fires_once() {
        let latch = OneShotLatch::new();
        assert_eq!(latch.state(), LatchState::Armed);
        assert!(latch.try_fire());
        assert!(!latch.try_fire());
        assert!(latch.is_fired());
    }

    #[test]
    fn test_exactly_one_winner_under_contention() {
        let latch = Arc::new(OneShotLatch::new());
        let winners = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..16)
            .map(|_| {
                let latch = Arc::clone(&latch);
                let winners = Arc::clone(&winners);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if latch.try_fire() {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
