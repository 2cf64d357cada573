//! Reporter relay between workers and the persistence writer
//!
//! Workers and the supervisor never touch the stores directly. They send a
//! [`ReporterMessage`], which the relay forwards to the writer at MEDIUM
//! priority. Each message knows how to apply itself to the stores.

use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use super::registry::WorkerRelease;
use super::stage::StructureTask;
use super::writer::{Activity, PersistenceTask, PersistenceWriter, Priority};
use crate::error::{Error, Result};
use crate::providers::Persistence;
use crate::types::{Job, JobStatus, Molecule, Record, Structure, XRef};
use uuid::Uuid;

/// Store operation of a [`PersistModel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOp {
    Save,
    Update,
    Delete,
}

/// Entity carried by a [`PersistModel`]
#[derive(Debug, Clone)]
pub enum Entity {
    Job(Job),
    Record(Record),
    Structure(Structure),
}

impl Entity {
    fn describe(&self) -> String {
        match self {
            Self::Job(job) => format!("job {}", job.id),
            Self::Record(record) => format!("record {}", record.id),
            Self::Structure(structure) => format!("structure {}", structure.id),
        }
    }
}

/// Generic store operation over a list of entities
#[derive(Debug, Clone)]
pub struct PersistModel {
    pub op: PersistOp,
    pub entities: Vec<Entity>,
}

impl PersistModel {
    pub fn save(entities: Vec<Entity>) -> Self {
        Self {
            op: PersistOp::Save,
            entities,
        }
    }

    pub fn update(entities: Vec<Entity>) -> Self {
        Self {
            op: PersistOp::Update,
            entities,
        }
    }

    pub fn delete(entities: Vec<Entity>) -> Self {
        Self {
            op: PersistOp::Delete,
            entities,
        }
    }

    /// Apply each entity in order, stopping at the first error
    fn apply(&self, persistence: &Persistence) -> Result<()> {
        for entity in &self.entities {
            match (self.op, entity) {
                (PersistOp::Save, Entity::Job(job)) => persistence.jobs.create(job)?,
                (PersistOp::Update, Entity::Job(job)) => persistence.jobs.update(job)?,
                (PersistOp::Delete, Entity::Job(job)) => {
                    persistence.jobs.delete(job.id)?;
                }
                (PersistOp::Save, Entity::Record(record)) => persistence.records.save(record)?,
                (PersistOp::Delete, Entity::Record(record)) => {
                    persistence.records.delete(record.id)?;
                }
                (PersistOp::Save, Entity::Structure(structure)) => {
                    persistence.structures.save(structure)?
                }
                (PersistOp::Delete, Entity::Structure(structure)) => {
                    persistence.structures.delete(structure.id)?;
                }
                (PersistOp::Update, Entity::Record(_) | Entity::Structure(_)) => {
                    return Err(Error::persistence(format!(
                        "{} is immutable and cannot be updated",
                        entity.describe()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Message accepted by the reporter
pub enum ReporterMessage {
    /// Generic save/update/delete
    PersistModel(PersistModel),
    /// Outcome of one batch molecule: structure, cross-reference and record
    /// written as one unit, then indexed
    PersistRecord {
        structure: Option<Structure>,
        molecule: Molecule,
        record: Record,
        source: String,
    },
    /// Add a correlation key to an existing job without touching its status
    AddKey { job_id: Uuid, key: String },
    /// Run the Persisting stage of a single-structure worker and notify it
    Advance(StructureTask),
    /// Mark the job of a terminated worker COMPLETE if it is still RUNNING.
    /// The worker is unwatched once this message is dropped.
    Finalize { release: WorkerRelease },
    /// Mark the job of a worker cut off by shutdown STOPPED if it is still
    /// RUNNING
    Stopped { release: WorkerRelease },
}

impl PersistenceTask for ReporterMessage {
    fn describe(&self) -> String {
        match self {
            Self::PersistModel(model) => {
                let entities: Vec<String> = model.entities.iter().map(Entity::describe).collect();
                format!("{:?} [{}]", model.op, entities.join(", "))
            }
            Self::PersistRecord { record, .. } => format!("record {} ({})", record.id, record.name),
            Self::AddKey { job_id, key } => format!("key {} for job {}", key, job_id),
            Self::Advance(task) => format!("worker {} at {:?}", task.key(), task.stage()),
            Self::Finalize { release } => format!("finalize {}", release.key()),
            Self::Stopped { release } => format!("stop {}", release.key()),
        }
    }

    fn run(self: Box<Self>, persistence: &Persistence) -> Result<()> {
        match *self {
            Self::PersistModel(model) => model.apply(persistence),
            Self::PersistRecord {
                structure,
                molecule,
                mut record,
                source,
            } => {
                if let Some(structure) = &structure {
                    record.xref = Some(XRef::structure(structure));
                }
                persistence.records.persist_outcome(structure.as_ref(), &record)?;
                if let Some(structure) = &structure {
                    persistence
                        .index
                        .index(&source, &structure.id.to_string(), Some(&molecule))?;
                }
                Ok(())
            }
            Self::Advance(task) => {
                task.persist(persistence).notify();
                Ok(())
            }
            Self::AddKey { job_id, key } => persistence.jobs.add_key(job_id, &key),
            Self::Finalize { release } => {
                finalize_job(persistence, release.key(), JobStatus::Complete, None)
            }
            Self::Stopped { release } => finalize_job(
                persistence,
                release.key(),
                JobStatus::Stopped,
                Some("Pipeline shut down before the job finished".to_string()),
            ),
        }
    }
}

/// Move a RUNNING job to its final status; any other status is left alone
fn finalize_job(
    persistence: &Persistence,
    key: &str,
    status: JobStatus,
    message: Option<String>,
) -> Result<()> {
    match persistence.jobs.find_by_key(key)? {
        Some(job) if job.status == JobStatus::Running => {
            let message = message.or_else(|| job.message.clone());
            let job = job.with_status(status, message);
            persistence.jobs.update(&job)?;
            tracing::info!(
                "Job {} {} ({} processed, {} failed)",
                job.id,
                job.status,
                job.processed,
                job.failed
            );
        }
        Some(job) => {
            tracing::debug!("Job {} is {}, leaving it as is", job.id, job.status);
        }
        None => {
            tracing::debug!("No job recorded for key {}", key);
        }
    }
    Ok(())
}

/// Sending side of the reporter relay
#[derive(Clone)]
pub struct Reporter {
    sender: mpsc::UnboundedSender<ReporterMessage>,
    activity: Arc<Activity>,
    stop: Arc<Notify>,
}

impl Reporter {
    /// Start the relay in front of a writer
    pub fn start(writer: PersistenceWriter, activity: Arc<Activity>) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stop = Arc::new(Notify::new());
        let handle = tokio::spawn(Self::relay(receiver, writer, activity.clone(), stop.clone()));
        (
            Self {
                sender,
                activity,
                stop,
            },
            handle,
        )
    }

    /// Queue a message; never blocks
    pub fn send(&self, message: ReporterMessage) {
        self.activity.begin();
        if let Err(e) = self.sender.send(message) {
            self.activity.end();
            tracing::warn!("Reporter stopped, dropping {}", e.0.describe());
        }
    }

    /// Forward what is already queued, then stop the relay
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    async fn relay(
        mut receiver: mpsc::UnboundedReceiver<ReporterMessage>,
        writer: PersistenceWriter,
        activity: Arc<Activity>,
        stop: Arc<Notify>,
    ) {
        let forward = |message: ReporterMessage| {
            writer.enqueue(Priority::Medium, Box::new(message));
            activity.end();
        };

        loop {
            tokio::select! {
                message = receiver.recv() => match message {
                    Some(message) => forward(message),
                    None => break,
                },
                _ = stop.notified() => {
                    receiver.close();
                    while let Some(message) = receiver.recv().await {
                        forward(message);
                    }
                    break;
                }
            }
        }
        tracing::info!("Reporter stopped");
    }
}
