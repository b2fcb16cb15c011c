//! Process-wide request registry.
//!
//! Maps request ids to the active chain's shared handles so detached call
//! sites (patched log functions, error reporters) can recover the chain
//! they belong to. Entries are inserted at request start and removed by a
//! RAII guard on every exit path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::runtime::cancel::Cancellation;

/// Shared handles of an in-flight chain, recoverable by request id.
#[derive(Debug, Clone, Default)]
pub struct ChainHandle {
    /// Cancellation token of the request tree.
    pub cancellation: Cancellation,
    /// Messages logged through the function context.
    pub messages: Arc<Mutex<Vec<String>>>,
}

/// Registry of in-flight requests, owned by the dispatch layer.
#[derive(Debug, Default)]
pub struct RequestTracker {
    chains: Mutex<HashMap<String, ChainHandle>>,
}

impl RequestTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chain handle, returning a guard that removes it on drop.
    pub fn track(self: &Arc<Self>, request_id: impl Into<String>, handle: ChainHandle) -> TrackerGuard {
        let request_id = request_id.into();
        self.chains
            .lock()
            .expect("tracker lock")
            .insert(request_id.clone(), handle);
        TrackerGuard {
            tracker: Arc::clone(self),
            request_id,
        }
    }

    /// Recover the active chain for a request id.
    pub fn get(&self, request_id: &str) -> Option<ChainHandle> {
        self.chains
            .lock()
            .expect("tracker lock")
            .get(request_id)
            .cloned()
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.chains.lock().expect("tracker lock").len()
    }

    /// Whether no requests are in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, request_id: &str) {
        self.chains.lock().expect("tracker lock").remove(request_id);
        debug!("Removed request '{}' from tracker", request_id);
    }
}

/// Removes the tracked entry when dropped, regardless of how the request
/// handling path exited.
pub struct TrackerGuard {
    tracker: Arc<RequestTracker>,
    request_id: String,
}

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        self.tracker.remove(&self.request_id);
    }
}
