//! Test doubles shared by the processing tests

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::stage::{ReceiverStatus, StructureReceiver};
use crate::chemistry::BasicNormalizer;
use crate::error::{Error, Result};
use crate::providers::{InMemorySearchIndex, Persistence, SearchIndex, StructureNormalizer};
use crate::storage::PipelineDb;
use crate::types::{Molecule, Structure};

/// Fresh in-memory stores and index
pub(crate) fn memory_persistence() -> (Persistence, Arc<PipelineDb>, Arc<InMemorySearchIndex>) {
    let db = Arc::new(PipelineDb::in_memory().unwrap());
    let index = Arc::new(InMemorySearchIndex::new());
    let persistence = Persistence::with_database(db.clone(), index.clone());
    (persistence, db, index)
}

/// Poll `condition` until it holds or five seconds pass
pub(crate) async fn eventually(condition: impl Fn() -> bool) {
    let wait = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("condition not reached in time");
}

#[derive(Debug, Clone)]
pub(crate) struct Completion {
    pub status: ReceiverStatus,
    pub message: Option<String>,
    pub structure: Option<Structure>,
}

/// Receiver that records every callback
pub(crate) struct RecordingReceiver {
    source: String,
    calls: Mutex<Vec<Completion>>,
}

impl RecordingReceiver {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Completion> {
        self.calls.lock().clone()
    }
}

impl StructureReceiver for RecordingReceiver {
    fn source_identifier(&self) -> String {
        self.source.clone()
    }

    fn on_complete(&self, status: ReceiverStatus, message: Option<&str>, structure: Option<&Structure>) {
        self.calls.lock().push(Completion {
            status,
            message: message.map(str::to_string),
            structure: structure.cloned(),
        });
    }
}

/// Basic normalizer that blocks every call until the gate is opened
pub(crate) struct GatedNormalizer {
    inner: BasicNormalizer,
    open: Mutex<bool>,
    changed: Condvar,
    entered: AtomicUsize,
}

impl GatedNormalizer {
    pub fn closed() -> Self {
        Self {
            inner: BasicNormalizer::new(),
            open: Mutex::new(false),
            changed: Condvar::new(),
            entered: AtomicUsize::new(0),
        }
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.changed.notify_all();
    }

    /// Calls that reached the gate
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

impl StructureNormalizer for GatedNormalizer {
    fn normalize(&self, molecule: &Molecule) -> Result<Structure> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            self.changed.wait(&mut open);
        }
        drop(open);
        self.inner.normalize(molecule)
    }

    fn name(&self) -> &str {
        "gated"
    }
}

/// Normalizer that panics on every input
pub(crate) struct PanickingNormalizer;

impl StructureNormalizer for PanickingNormalizer {
    fn normalize(&self, _molecule: &Molecule) -> Result<Structure> {
        panic!("toolkit crashed")
    }

    fn name(&self) -> &str {
        "panicking"
    }
}

/// Index that rejects every entity
pub(crate) struct FailingIndex;

impl SearchIndex for FailingIndex {
    fn index(&self, _source_id: &str, entity_id: &str, _molecule: Option<&Molecule>) -> Result<()> {
        Err(Error::persistence(format!("index unavailable for {}", entity_id)))
    }

    fn name(&self) -> &str {
        "failing"
    }
}
