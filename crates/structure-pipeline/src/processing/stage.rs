//! Staged single-structure state machine
//!
//! A [`StructureTask`] is an immutable value: every transition consumes it
//! and returns the next one. Stages only move forward and the receiver is
//! notified by [`StructureTask::notify`], which consumes the task. A task
//! dropped without being notified (its message discarded by a stopped
//! pipeline, or a panic while persisting) reports FAILED from `Drop`, so the
//! receiver hears back exactly once.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::registry::WorkerLease;
use crate::error::{Error, Result};
use crate::providers::Persistence;
use crate::types::{Molecule, Structure};

/// Worker stage, ordered by progression
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Routing,
    Instrumentation,
    Persisting,
    Done,
}

/// Outcome reported to a receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiverStatus {
    Ok,
    Failed,
}

/// Caller-side endpoint of a single-structure submission
pub trait StructureReceiver: Send + Sync {
    /// Identifier the structure is indexed against
    fn source_identifier(&self) -> String;

    /// Called exactly once when processing finishes
    fn on_complete(&self, status: ReceiverStatus, message: Option<&str>, structure: Option<&Structure>);
}

/// State of one single-structure worker
pub struct StructureTask {
    key: String,
    stage: Stage,
    molecule: Option<Molecule>,
    structure: Option<Structure>,
    status: ReceiverStatus,
    message: Option<String>,
    receiver: Arc<dyn StructureReceiver>,
    notified: bool,
    lease: WorkerLease,
}

impl StructureTask {
    /// New task in the Routing stage
    pub fn new(
        molecule: Option<Molecule>,
        receiver: Arc<dyn StructureReceiver>,
        lease: WorkerLease,
    ) -> Self {
        Self {
            key: lease.key().to_string(),
            stage: Stage::Routing,
            molecule,
            structure: None,
            status: ReceiverStatus::Ok,
            message: None,
            receiver,
            notified: false,
            lease,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn status(&self) -> ReceiverStatus {
        self.status
    }

    pub fn molecule(&self) -> Option<&Molecule> {
        self.molecule.as_ref()
    }

    pub fn structure(&self) -> Option<&Structure> {
        self.structure.as_ref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn advance(mut self, next: Stage) -> Self {
        debug_assert!(next >= self.stage, "stage moved backwards");
        tracing::trace!("Worker {}: {:?} -> {:?}", self.key, self.stage, next);
        self.stage = next.max(self.stage);
        self
    }

    /// A worker slot was obtained
    pub fn routed(self) -> Self {
        self.advance(Stage::Instrumentation)
    }

    /// Apply the normalizer outcome. Success moves to Persisting, failure
    /// jumps to Done.
    pub fn instrumented(self, outcome: Result<Option<Structure>>) -> Self {
        match outcome {
            Ok(structure) => {
                let mut task = self.advance(Stage::Persisting);
                task.structure = structure;
                task
            }
            Err(e) => self.fail(e),
        }
    }

    /// Jump to Done with a FAILED status and no structure
    pub fn fail(self, error: Error) -> Self {
        tracing::warn!("Worker {} failed in {:?}: {}", self.key, self.stage, error);
        let mut task = self.advance(Stage::Done);
        task.status = ReceiverStatus::Failed;
        task.message = Some(error.to_string());
        task.structure = None;
        task
    }

    /// Persist and index the structure. Blocking; runs on the writer.
    pub fn persist(self, persistence: &Persistence) -> Self {
        if self.stage != Stage::Persisting {
            return self;
        }
        let stored = self.structure.as_ref().map(|structure| {
            persistence
                .structures
                .save(structure)
                .and_then(|()| {
                    persistence.index.index(
                        &self.receiver.source_identifier(),
                        &structure.id.to_string(),
                        self.molecule.as_ref(),
                    )
                })
                .map(|()| structure.label())
        });
        match stored {
            None => self.advance(Stage::Done),
            Some(Ok(label)) => {
                tracing::debug!("Worker {} persisted structure {}", self.key, label);
                self.advance(Stage::Done)
            }
            Some(Err(e)) => self.fail(e),
        }
    }

    /// Tell the receiver the outcome and release the worker
    pub fn notify(self) {
        let mut task = if self.stage == Stage::Done {
            self
        } else {
            let stage = self.stage;
            self.fail(Error::internal(format!("worker stopped in stage {:?}", stage)))
        };
        task.complete();
        tracing::debug!("Worker {} done: {:?}", task.key, task.status);
    }

    fn complete(&mut self) {
        if std::mem::replace(&mut self.notified, true) {
            return;
        }
        self.receiver
            .on_complete(self.status, self.message.as_deref(), self.structure.as_ref());
    }
}

impl Drop for StructureTask {
    // The lease is a field, so it is released after the receiver is called
    fn drop(&mut self) {
        if self.notified {
            return;
        }
        tracing::warn!("Worker {} dropped in {:?} before completing", self.key, self.stage);
        self.stage = Stage::Done;
        self.status = ReceiverStatus::Failed;
        self.message = Some(format!("Pipeline stopped before worker {} finished", self.key));
        self.structure = None;
        self.complete();
    }
}

impl std::fmt::Debug for StructureTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructureTask")
            .field("key", &self.key)
            .field("stage", &self.stage)
            .field("status", &self.status)
            .field("message", &self.message)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::registry::CorrelationRegistry;
    use crate::processing::testing::{memory_persistence, RecordingReceiver};
    use crate::chemistry::BasicNormalizer;
    use crate::providers::{StructureNormalizer, StructureStore};
    use tokio::sync::mpsc;

    fn task(molecule: Option<Molecule>) -> (StructureTask, Arc<RecordingReceiver>, CorrelationRegistry) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = CorrelationRegistry::new(tx);
        let receiver = Arc::new(RecordingReceiver::new("upload-1"));
        let lease = registry.register("k1");
        (StructureTask::new(molecule, receiver.clone(), lease), receiver, registry)
    }

    #[test]
    fn test_stages_are_monotone() {
        let (persistence, db, index) = memory_persistence();
        let (task, receiver, _registry) = task(Some(Molecule::smiles("CCO")));
        let structure = BasicNormalizer::new()
            .normalize(&Molecule::smiles("CCO"))
            .unwrap();

        let mut seen = vec![task.stage()];
        let task = task.routed();
        seen.push(task.stage());
        let task = task.instrumented(Ok(Some(structure.clone())));
        seen.push(task.stage());
        let task = task.persist(&persistence);
        seen.push(task.stage());

        assert_eq!(
            seen,
            vec![Stage::Routing, Stage::Instrumentation, Stage::Persisting, Stage::Done]
        );
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));

        task.notify();
        let calls = receiver.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].status, ReceiverStatus::Ok);
        assert_eq!(calls[0].structure.as_ref().map(|s| s.id), Some(structure.id));
        assert_eq!(StructureStore::count(&*db).unwrap(), 1);
        assert_eq!(index.entries_for("upload-1").len(), 1);
    }

    #[test]
    fn test_failure_jumps_to_done() {
        let (persistence, db, _index) = memory_persistence();
        let (task, receiver, _registry) = task(Some(Molecule::smiles("C1CC")));

        let task = task
            .routed()
            .instrumented(Err(Error::normalization("unclosed ring 1")));
        assert_eq!(task.stage(), Stage::Done);
        assert_eq!(task.status(), ReceiverStatus::Failed);

        // Persisting is skipped once Done
        let task = task.persist(&persistence);
        task.notify();

        let calls = receiver.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].status, ReceiverStatus::Failed);
        assert_eq!(calls[0].message.as_deref(), Some("unclosed ring 1"));
        assert!(calls[0].structure.is_none());
        assert_eq!(StructureStore::count(&*db).unwrap(), 0);
    }

    #[test]
    fn test_missing_molecule_completes_without_structure() {
        let (persistence, _db, index) = memory_persistence();
        let (task, receiver, _registry) = task(None);

        task.routed().instrumented(Ok(None)).persist(&persistence).notify();

        let calls = receiver.calls();
        assert_eq!(calls[0].status, ReceiverStatus::Ok);
        assert!(calls[0].structure.is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_dropped_task_reports_failure_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = CorrelationRegistry::new(tx);
        let receiver = Arc::new(RecordingReceiver::new("upload-2"));
        let lease = registry.register("k3");
        let task = StructureTask::new(Some(Molecule::smiles("CCO")), receiver.clone(), lease);

        drop(task.routed().instrumented(Ok(None)));

        let calls = receiver.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].status, ReceiverStatus::Failed);
        assert!(calls[0].message.as_deref().unwrap().contains("Pipeline stopped"));
        assert!(matches!(
            rx.try_recv(),
            Ok(crate::processing::registry::SupervisorEvent::Terminated { .. })
        ));
    }

    #[test]
    fn test_notified_task_is_not_reported_again() {
        let (task, receiver, _registry) = task(None);
        task.routed().instrumented(Ok(None)).notify();
        assert_eq!(receiver.calls().len(), 1);
        assert_eq!(receiver.calls()[0].status, ReceiverStatus::Ok);
    }

    #[test]
    fn test_notify_releases_lease() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let registry = CorrelationRegistry::new(tx);
        let receiver = Arc::new(RecordingReceiver::new("upload-1"));
        let task = StructureTask::new(None, receiver, registry.register("k9"));
        assert_eq!(task.key(), "k9");

        task.fail(Error::spawn("pool closed")).notify();
        assert!(matches!(
            rx.try_recv(),
            Ok(crate::processing::registry::SupervisorEvent::Terminated { .. })
        ));
    }
}
