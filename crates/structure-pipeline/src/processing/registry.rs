//! Correlation registry of live workers
//!
//! Each worker is registered under a name and tracked by an in-flight count
//! held by [`WorkerLease`] values. Cloning a lease (one per dispatched task)
//! increments the count and dropping one decrements it. When the count
//! reaches zero the supervisor is told the worker terminated. The entry
//! stays registered until the [`WorkerRelease`] handed to the worker's
//! finalize task is dropped, so a payload is not admitted again while its
//! previous job still awaits finalization.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::writer::Activity;

/// Number of random bytes in a correlation key
const KEY_BYTES: usize = 10;

/// Events consumed by the supervisor loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// The last lease of a worker was dropped
    Terminated { name: String },
    /// Stop the supervisor loop
    Stop,
}

/// Fresh random correlation key, hex encoded
pub fn new_key() -> String {
    hex::encode(rand::random::<[u8; KEY_BYTES]>())
}

/// Name of the batch worker for a payload
pub fn payload_worker_name(payload_id: Uuid, key: &str) -> String {
    format!("{}:{}", payload_id, key)
}

/// Correlation key embedded in a worker name
pub fn worker_key(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, key)| key).unwrap_or(name)
}

struct WorkerEntry {
    payload_id: Option<Uuid>,
    in_flight: Arc<AtomicUsize>,
}

/// Registry of supervised workers
pub struct CorrelationRegistry {
    workers: DashMap<String, WorkerEntry>,
    /// Payload id to the name of its batch worker
    payloads: DashMap<Uuid, String>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
}

impl CorrelationRegistry {
    pub fn new(events: mpsc::UnboundedSender<SupervisorEvent>) -> Self {
        Self {
            workers: DashMap::new(),
            payloads: DashMap::new(),
            events,
        }
    }

    /// Register a worker with no payload
    pub fn register(&self, name: &str) -> WorkerLease {
        self.insert(name, None)
    }

    /// Register the batch worker of a payload unless one is already live.
    /// The check and the registration happen under the payload's map entry.
    pub fn register_payload(&self, payload_id: Uuid, name: &str) -> Option<WorkerLease> {
        match self.payloads.entry(payload_id) {
            Entry::Occupied(existing) => {
                tracing::debug!(
                    "Payload {} already handled by worker {}",
                    payload_id,
                    existing.get()
                );
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(name.to_string());
                Some(self.insert(name, Some(payload_id)))
            }
        }
    }

    fn insert(&self, name: &str, payload_id: Option<Uuid>) -> WorkerLease {
        let in_flight = Arc::new(AtomicUsize::new(1));
        self.workers.insert(
            name.to_string(),
            WorkerEntry {
                payload_id,
                in_flight: in_flight.clone(),
            },
        );
        tracing::debug!("Watching worker {}", name);
        WorkerLease {
            name: Arc::from(name),
            in_flight,
            events: self.events.clone(),
        }
    }

    /// Forget a terminated worker
    pub fn unwatch(&self, name: &str) {
        if let Some((_, entry)) = self.workers.remove(name) {
            if let Some(payload_id) = entry.payload_id {
                self.payloads.remove_if(&payload_id, |_, owner| owner == name);
            }
            tracing::debug!("Unwatched worker {}", name);
        }
    }

    /// Handle that unwatches `name` and wakes idle waiters when dropped
    pub fn release(self: &Arc<Self>, name: String, activity: Arc<Activity>) -> WorkerRelease {
        WorkerRelease {
            registry: self.clone(),
            name,
            activity,
        }
    }

    /// Registered worker names with their outstanding leases
    pub fn workers(&self) -> Vec<(String, usize)> {
        self.workers
            .iter()
            .map(|entry| (entry.key().clone(), entry.in_flight.load(Ordering::SeqCst)))
            .collect()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    /// Whether a batch worker is live for the payload
    pub fn is_payload_active(&self, payload_id: Uuid) -> bool {
        self.payloads.contains_key(&payload_id)
    }

    /// Outstanding leases of a worker
    pub fn in_flight(&self, name: &str) -> Option<usize> {
        self.workers
            .get(name)
            .map(|entry| entry.in_flight.load(Ordering::SeqCst))
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

/// Share of a worker's in-flight count
pub struct WorkerLease {
    name: Arc<str>,
    in_flight: Arc<AtomicUsize>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
}

impl WorkerLease {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        worker_key(&self.name)
    }
}

impl Clone for WorkerLease {
    fn clone(&self) -> Self {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            name: self.name.clone(),
            in_flight: self.in_flight.clone(),
            events: self.events.clone(),
        }
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            let event = SupervisorEvent::Terminated {
                name: self.name.to_string(),
            };
            if self.events.send(event).is_err() {
                tracing::debug!("Supervisor gone, worker {} terminated unobserved", self.name);
            }
        }
    }
}

/// Pending unwatch of a terminated worker
pub struct WorkerRelease {
    registry: Arc<CorrelationRegistry>,
    name: String,
    activity: Arc<Activity>,
}

impl WorkerRelease {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        worker_key(&self.name)
    }
}

impl Drop for WorkerRelease {
    fn drop(&mut self) {
        self.registry.unwatch(&self.name);
        self.activity.touch();
    }
}

impl std::fmt::Debug for WorkerRelease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRelease").field("name", &self.name).finish()
    }
}

impl std::fmt::Debug for WorkerLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLease")
            .field("name", &self.name)
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .finish()
    }
}
