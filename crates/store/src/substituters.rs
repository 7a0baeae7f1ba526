//! The configured substituter stores, opened once.

use crate::cache::Store;
use crate::error::StoreResult;
use crate::registry::StoreRegistry;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Default)]
struct State {
    done: bool,
    stores: Vec<Arc<Store>>,
}

/// Lazily opened substituters in priority order.
///
/// The first successful [`get`](Self::get) opens every configured URI and
/// later calls return the same stores. A failed open leaves the set
/// unopened so a later call retries.
#[derive(Default)]
pub struct SubstituterSet {
    state: Mutex<State>,
}

impl SubstituterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, registry: &StoreRegistry) -> StoreResult<Vec<Arc<Store>>> {
        let mut state = self.state.lock();
        if state.done {
            return Ok(state.stores.clone());
        }

        let mut seen = HashSet::new();
        let mut stores = Vec::new();
        for uri in registry.config().substituters.uris() {
            if !seen.insert(uri) {
                continue;
            }
            stores.push(registry.open_store_at(uri)?);
        }
        tracing::debug!(count = stores.len(), "opened substituters");

        state.stores = stores;
        state.done = true;
        Ok(state.stores.clone())
    }
}
