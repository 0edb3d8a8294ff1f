//! Correlation registry: in-flight state keyed by request id.
//!
//! Each dispatcher and each server owns one registry. The dispatcher keeps
//! pending responses, the server keeps request body sinks. Retiring an id is
//! idempotent, so late or duplicate messages for a finished transfer find no
//! entry and are dropped by the caller.

use std::collections::HashMap;

use crate::error::{BridgeError, Result};
use crate::protocol::RequestId;

/// Map from request id to per-transfer state.
#[derive(Debug)]
pub struct Registry<S> {
    next_id: RequestId,
    entries: HashMap<RequestId, S>,
}

impl<S> Registry<S> {
    /// Create an empty registry whose first id is 0.
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: HashMap::new(),
        }
    }

    /// Issue a fresh id, strictly greater than every id issued before.
    pub fn next_id(&mut self) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Register state under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Protocol`] if `id` is still pending.
    pub fn register(&mut self, id: RequestId, state: S) -> Result<()> {
        if self.entries.contains_key(&id) {
            return Err(BridgeError::Protocol(format!("Request id {} is already pending", id)));
        }
        self.entries.insert(id, state);
        Ok(())
    }

    pub fn get(&self, id: RequestId) -> Option<&S> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: RequestId) -> Option<&mut S> {
        self.entries.get_mut(&id)
    }

    /// Remove and return the state for `id`.
    ///
    /// Returns `None` if the id was never registered or has already retired.
    pub fn retire(&mut self, id: RequestId) -> Option<S> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of pending ids.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Retire every pending id at once, e.g. when the channel closes.
    pub fn drain(&mut self) -> Vec<(RequestId, S)> {
        self.entries.drain().collect()
    }
}

impl<S> Default for Registry<S> {
    fn default() -> Self {
        Self::new()
    }
}
