//! Response registry: fan-in correlation state
//!
//! The registry is the only shared mutable structure in the engine. It maps
//! the id of each in-flight request to the channel feeding the one correlator
//! call awaiting its responses, together with the set of targets allowed to
//! answer. The transport pump delivers every inbound response through
//! [`ResponseRegistry::deliver`]; the critical section is a map lookup plus a
//! non-blocking channel send, so the inbound path never waits on application
//! logic. A response for a deregistered or unknown request id is dropped, not
//! an error: a timed-out caller has already stopped waiting and the remote
//! side may legitimately answer late.

use muster_core::{envelope::Response, identity::TargetIdentity};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{Error, Result};

struct PendingEntry {
    expected: HashSet<TargetIdentity>,
    tx: mpsc::UnboundedSender<Response>,
}

/// Thread-safe map from in-flight request id to its awaiting correlator call
#[derive(Default)]
pub struct ResponseRegistry {
    pending: Mutex<HashMap<Uuid, PendingEntry>>,
}

impl ResponseRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-flight request and its expected target set
    ///
    /// Returns the receiving end of the response channel the correlator call
    /// waits on. Fails if the request id is already registered.
    pub fn register(
        &self,
        request_id: Uuid,
        expected: HashSet<TargetIdentity>,
    ) -> Result<mpsc::UnboundedReceiver<Response>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut pending = self.pending.lock();
        if pending.contains_key(&request_id) {
            return Err(Error::DuplicateRequest { id: request_id });
        }
        pending.insert(request_id, PendingEntry { expected, tx });
        debug!("Registered request {}", request_id);
        Ok(rx)
    }

    /// Deliver an inbound response to the call awaiting its request id
    ///
    /// Returns whether the response was handed to a waiter. Responses from
    /// senders outside the expected target set, and responses for unknown or
    /// already deregistered request ids, are dropped.
    pub fn deliver(&self, request_id: Uuid, response: Response) -> bool {
        let pending = self.pending.lock();
        let Some(entry) = pending.get(&request_id) else {
            debug!(
                "Dropping response from {} for unknown request {} (late or never registered)",
                response.sender, request_id
            );
            return false;
        };
        if !entry.expected.contains(&response.sender) {
            warn!(
                "Dropping response from unexpected sender {} for request {}",
                response.sender, request_id
            );
            return false;
        }
        // Send failure means the waiter already gave up; nothing to do.
        entry.tx.send(response).is_ok()
    }

    /// Remove an in-flight request; safe to call after completion or timeout
    pub fn deregister(&self, request_id: &Uuid) -> bool {
        let removed = self.pending.lock().remove(request_id).is_some();
        if removed {
            debug!("Deregistered request {}", request_id);
        }
        removed
    }

    /// Number of requests currently in flight
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }
}
