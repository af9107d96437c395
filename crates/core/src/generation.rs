//! Generation tracking for deferred reclamation.
//!
//! Readers take a [`GenerationGuard`] before touching the graph and drop it when
//! done. The writer tags everything it retires with the current generation,
//! bumps the generation, and only reclaims storage retired before the
//! [`oldest_used_generation`](GenerationHandler::oldest_used_generation).
//!
//! Taking a guard is lock-free: the current hold object is published through
//! an [`ArcSwap`] and the guard is simply a strong reference to it. A hold is
//! in use exactly as long as someone other than the handler references it.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;

/// Logical timestamp of writer mutations.
pub type Generation = u64;

#[derive(Debug)]
struct GenerationHold {
    generation: Generation,
}

/// Keeps everything retired at or after its generation alive while held.
#[derive(Debug, Clone)]
pub struct GenerationGuard {
    hold: Arc<GenerationHold>,
}

impl GenerationGuard {
    /// The generation that was current when this guard was taken.
    pub fn generation(&self) -> Generation {
        self.hold.generation
    }
}

/// Tracks the current generation and the oldest generation still observed by
/// a reader.
#[derive(Debug)]
pub struct GenerationHandler {
    current: ArcSwap<GenerationHold>,
    generation: AtomicU64,
    /// Holds of previous generations, oldest first. Writer side only.
    retired_holds: Mutex<VecDeque<Arc<GenerationHold>>>,
}

impl GenerationHandler {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(GenerationHold { generation: 0 }),
            generation: AtomicU64::new(0),
            retired_holds: Mutex::new(VecDeque::new()),
        }
    }

    /// Take a guard on the current generation.
    pub fn take_guard(&self) -> GenerationGuard {
        GenerationGuard {
            hold: self.current.load_full(),
        }
    }

    pub fn current_generation(&self) -> Generation {
        self.generation.load(Ordering::Acquire)
    }

    /// Publish a new generation. New guards observe it; existing guards keep
    /// pinning the generation they were taken on.
    pub fn increment_generation(&self) {
        let next = self.current_generation() + 1;
        let previous = self
            .current
            .swap(Arc::new(GenerationHold { generation: next }));
        self.retired_holds.lock().push_back(previous);
        self.generation.store(next, Ordering::Release);
    }

    /// The oldest generation any live guard still pins, or the current
    /// generation when no older guard exists.
    pub fn oldest_used_generation(&self) -> Generation {
        let mut holds = self.retired_holds.lock();
        while let Some(oldest) = holds.front() {
            if Arc::strong_count(oldest) > 1 {
                return oldest.generation;
            }
            holds.pop_front();
        }
        // Pairs with the release decrement of the last dropped guard.
        fence(Ordering::Acquire);
        self.current_generation()
    }

    /// Number of guards currently held on generations older than the current one.
    pub fn stale_guard_count(&self) -> usize {
        self.retired_holds
            .lock()
            .iter()
            .map(|hold| Arc::strong_count(hold) - 1)
            .sum()
    }
}

impl Default for GenerationHandler {
    fn default() -> Self {
        Self::new()
    }
}
