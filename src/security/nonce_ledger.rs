//! Process-wide record of nonces already used for encryption.
//!
//! The ledger is bounded: once `capacity` nonces are recorded, the oldest is
//! evicted for each new one (FIFO). Nonces are random 96-bit values, so
//! eviction only loses reuse detection against very old entries.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;

use super::encryption::NONCE_SIZE;

/// Default number of nonces remembered.
pub const DEFAULT_LEDGER_CAPACITY: usize = 10_000;

type NonceBytes = [u8; NONCE_SIZE];

struct LedgerState {
    seen: HashSet<NonceBytes>,
    order: VecDeque<NonceBytes>,
}

/// Bounded FIFO set of used nonces, shared by every encryption engine.
pub struct NonceLedger {
    state: Mutex<LedgerState>,
    capacity: usize,
}

impl NonceLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(LedgerState {
                seen: HashSet::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
            capacity,
        }
    }

    /// Record `nonce` if unseen.
    ///
    /// Returns `true` when the nonce was fresh and is now recorded, `false`
    /// when it is a duplicate. The membership test and the insert happen
    /// under one lock acquisition.
    pub fn check_and_insert(&self, nonce: &NonceBytes) -> bool {
        let mut state = self.state.lock();
        if !state.seen.insert(*nonce) {
            return false;
        }
        state.order.push_back(*nonce);
        while state.order.len() > self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.seen.remove(&oldest);
            }
        }
        true
    }

    /// Whether `nonce` is currently recorded.
    pub fn contains(&self, nonce: &NonceBytes) -> bool {
        self.state.lock().seen.contains(nonce)
    }

    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for NonceLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY)
    }
}
