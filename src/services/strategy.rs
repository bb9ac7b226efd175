//! Load-balancing strategies.
//!
//! A strategy is a pure selection over a candidate list. It knows nothing
//! about health, weights or sessions; callers are expected to hand it a
//! stable ordering (the healthy subset of a route).

use std::sync::atomic::{AtomicU32, Ordering};

use crate::core::error::{AppError, Result};
use crate::services::registry::Backend;

/// Pluggable backend selection.
pub trait LoadBalancingStrategy: Send + Sync {
    /// Pick the next backend from `candidates`.
    ///
    /// Fails with [`AppError::NoBackends`] when the list is empty.
    fn next_backend<'a>(&self, candidates: &'a [Backend]) -> Result<&'a Backend>;
}

/// Classic round-robin backed by an atomic monotonically increasing counter.
///
/// The counter is 32-bit and wraps on overflow; the wrap is harmless because
/// the index is always taken modulo the candidate count.
#[derive(Default)]
pub struct RoundRobin {
    current: AtomicU32,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn starting_at(value: u32) -> Self {
        Self {
            current: AtomicU32::new(value),
        }
    }
}

impl LoadBalancingStrategy for RoundRobin {
    fn next_backend<'a>(&self, candidates: &'a [Backend]) -> Result<&'a Backend> {
        if candidates.is_empty() {
            return Err(AppError::NoBackends);
        }
        let index = self.current.fetch_add(1, Ordering::Relaxed);
        Ok(&candidates[index as usize % candidates.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn candidates(n: usize) -> Vec<Backend> {
        (0..n)
            .map(|i| Backend::new(format!("http://localhost:{}", 9000 + i), "/health"))
            .collect()
    }

    #[test]
    fn test_empty_candidates_fails() {
        let strategy = RoundRobin::new();
        let err = strategy.next_backend(&[]).unwrap_err();
        assert!(matches!(err, AppError::NoBackends));
    }

    #[test]
    fn test_round_robin_cycles_in_order() {
        let strategy = RoundRobin::new();
        let backends = candidates(3);

        let picks: Vec<u64> = (0..6)
            .map(|_| strategy.next_backend(&backends).unwrap().id)
            .collect();

        assert_eq!(
            picks,
            vec![
                backends[0].id,
                backends[1].id,
                backends[2].id,
                backends[0].id,
                backends[1].id,
                backends[2].id,
            ]
        );
    }

    #[test]
    fn test_single_candidate_always_selected() {
        let strategy = RoundRobin::new();
        let backends = candidates(1);

        for _ in 0..10 {
            assert_eq!(strategy.next_backend(&backends).unwrap().id, backends[0].id);
        }
    }

    #[test]
    fn test_counter_wraps_at_u32_max() {
        let strategy = RoundRobin::starting_at(u32::MAX);
        let backends = candidates(3);

        // u32::MAX % 3 == 0, then the counter wraps to 0.
        assert_eq!(strategy.next_backend(&backends).unwrap().id, backends[0].id);
        assert_eq!(strategy.next_backend(&backends).unwrap().id, backends[0].id);
        assert_eq!(strategy.next_backend(&backends).unwrap().id, backends[1].id);
    }

    #[test]
    fn test_balanced_multiset_over_full_cycles() {
        let strategy = RoundRobin::new();
        let backends = candidates(4);

        let mut counts: HashMap<u64, usize> = HashMap::new();
        for _ in 0..40 {
            *counts
                .entry(strategy.next_backend(&backends).unwrap().id)
                .or_default() += 1;
        }

        for backend in &backends {
            assert_eq!(counts[&backend.id], 10);
        }
    }

    #[test]
    fn test_concurrent_selection_is_balanced() {
        let strategy = Arc::new(RoundRobin::new());
        let backends = Arc::new(candidates(2));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let strategy = Arc::clone(&strategy);
                let backends = Arc::clone(&backends);
                std::thread::spawn(move || {
                    let mut picks = Vec::with_capacity(100);
                    for _ in 0..100 {
                        picks.push(strategy.next_backend(&backends).unwrap().id);
                    }
                    picks
                })
            })
            .collect();

        let mut counts: HashMap<u64, usize> = HashMap::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                *counts.entry(id).or_default() += 1;
            }
        }

        // 800 atomic increments over 2 candidates: an exact 400/400 split
        // regardless of interleaving.
        assert_eq!(counts[&backends[0].id], 400);
        assert_eq!(counts[&backends[1].id], 400);
    }
}
