use std::collections::HashMap;
use std::sync::Mutex;

/// Idempotency gate over webhook delivery ids.
///
/// A delivery moves absent -> pending on `reserve`, pending -> committed on
/// `commit`, and pending -> absent on `release`. Committed entries are
/// terminal, so re-deliveries of an already-processed webhook are rejected
/// by `reserve` forever.
pub trait DeliveryStore: Send + Sync {
    /// Returns true iff the id was absent; transitions it to pending.
    fn reserve(&self, id: &str) -> bool;
    /// Marks a pending reservation committed. No-op for absent ids.
    fn commit(&self, id: &str);
    /// Drops a pending reservation. Committed entries are untouched.
    fn release(&self, id: &str);
    /// True for both pending and committed ids.
    fn seen(&self, id: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryState {
    Pending,
    Committed,
}

#[derive(Default)]
pub struct MemoryDeliveryStore {
    state: Mutex<HashMap<String, DeliveryState>>,
}

impl MemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeliveryStore for MemoryDeliveryStore {
    fn reserve(&self, id: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.contains_key(id) {
            return false;
        }
        state.insert(id.to_string(), DeliveryState::Pending);
        true
    }

    fn commit(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.get_mut(id) {
            *entry = DeliveryState::Committed;
        }
    }

    fn release(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        if state.get(id) == Some(&DeliveryState::Pending) {
            state.remove(id);
        }
    }

    fn seen(&self, id: &str) -> bool {
        self.state.lock().unwrap().contains_key(id)
    }
}
