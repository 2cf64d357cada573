//! Worker bodies: the single-structure stages and the batch import loop

use std::any::Any;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::registry::WorkerLease;
use super::reporter::{Entity, PersistModel, Reporter, ReporterMessage};
use super::stage::StructureTask;
use crate::error::{Error, Result};
use crate::ingestion::MoleculeReader;
use crate::providers::{Persistence, StructureNormalizer};
use crate::types::{Job, JobStatus, Molecule, Payload, Record, Structure};

/// Everything a worker needs, shared by all workers of a supervisor
pub(crate) struct WorkerContext {
    pub normalizer: Arc<dyn StructureNormalizer>,
    pub reporter: Reporter,
    /// Bounded worker pool
    pub slots: Arc<Semaphore>,
    pub runtime: Handle,
    /// Read-only store access for the batch loop's job lookup
    pub persistence: Persistence,
}

/// Run the normalizer on the blocking pool, turning a panic into an error
pub(crate) async fn normalize(
    normalizer: Arc<dyn StructureNormalizer>,
    molecule: Molecule,
) -> Result<Structure> {
    let name = normalizer.name().to_string();
    match tokio::task::spawn_blocking(move || normalizer.normalize(&molecule)).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(Error::normalization(format!(
            "Normalizer '{}' panicked: {}",
            name,
            panic_message(e.into_panic())
        ))),
        Err(e) => Err(Error::internal(format!("Task join error: {}", e))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Drive a single-structure task through Routing and Instrumentation, then
/// hand it to the reporter for Persisting and Done
pub(crate) async fn run_structure(ctx: Arc<WorkerContext>, task: StructureTask) {
    let permit = match ctx.slots.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            let task = task.fail(Error::spawn("worker pool is closed"));
            ctx.reporter.send(ReporterMessage::Advance(task));
            return;
        }
    };
    let task = task.routed();

    let outcome = match task.molecule().cloned() {
        Some(molecule) => normalize(ctx.normalizer.clone(), molecule).await.map(Some),
        None => Ok(None),
    };
    drop(permit);

    let task = task.instrumented(outcome);
    ctx.reporter.send(ReporterMessage::Advance(task));
}

/// Batch import loop for one payload. Blocking: reads the whole stream on
/// the calling thread and dispatches one record task per molecule.
pub(crate) fn import_payload(ctx: Arc<WorkerContext>, payload: Payload, lease: WorkerLease) {
    let key = lease.key().to_string();

    match ctx.persistence.jobs.find_active_by_payload(payload.id) {
        Ok(Some(job)) => {
            tracing::info!(
                "Payload {} already has active job {}, adding key {}",
                payload.id,
                job.id,
                key
            );
            ctx.reporter.send(ReporterMessage::AddKey { job_id: job.id, key });
            return;
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!("Failed to look up jobs for payload {}: {}", payload.id, e);
            let job = Job::for_payload(&payload, &key)
                .with_status(JobStatus::Failed, Some(e.to_string()));
            ctx.reporter
                .send(ReporterMessage::PersistModel(PersistModel::save(vec![Entity::Job(job)])));
            return;
        }
    }

    let mut job = Job::for_payload(&payload, &key).with_status(JobStatus::Running, None);
    ctx.reporter.send(ReporterMessage::PersistModel(PersistModel::save(vec![
        Entity::Job(job.clone()),
    ])));
    tracing::info!("Job {} running for payload {} ({})", job.id, payload.name, payload.id);

    match read_payload(&ctx, &payload, job.id, &lease) {
        Ok(count) => {
            tracing::info!("Job {}: dispatched {} molecules", job.id, count);
        }
        Err(e) => {
            tracing::error!("Job {} failed: {}", job.id, e);
            job.status = JobStatus::Failed;
            job.message = Some(e.to_string());
        }
    }

    // Always recorded, so a partial failure is never lost
    ctx.reporter
        .send(ReporterMessage::PersistModel(PersistModel::update(vec![Entity::Job(job)])));
    drop(lease);
}

fn read_payload(
    ctx: &Arc<WorkerContext>,
    payload: &Payload,
    job_id: Uuid,
    lease: &WorkerLease,
) -> Result<usize> {
    let reader = MoleculeReader::open(payload)?;
    let source = payload.id.to_string();
    let mut count = 0;

    for molecule in reader {
        let molecule = molecule?;
        count += 1;
        let name = match molecule.display_name() {
            "" => format!("{}#{}", payload.name, count),
            name => name.to_string(),
        };
        tracing::debug!("Job {}: dispatching {}", job_id, name);
        ctx.runtime.spawn(process_record(
            ctx.clone(),
            molecule,
            Record::new(name, job_id),
            source.clone(),
            lease.clone(),
        ));
    }

    Ok(count)
}

/// Normalize one batch molecule and persist its outcome
async fn process_record(
    ctx: Arc<WorkerContext>,
    molecule: Molecule,
    record: Record,
    source: String,
    lease: WorkerLease,
) {
    let outcome = match ctx.slots.clone().acquire_owned().await {
        Ok(_permit) => normalize(ctx.normalizer.clone(), molecule.clone()).await,
        Err(_) => Err(Error::spawn("worker pool is closed")),
    };

    let (structure, record) = match outcome {
        Ok(structure) => (Some(structure), record.ok()),
        Err(e) => {
            tracing::warn!("Record {} failed: {}", record.name, e);
            let message = e.to_string();
            (None, record.failed(message))
        }
    };

    ctx.reporter.send(ReporterMessage::PersistRecord {
        structure,
        molecule,
        record,
        source,
    });
    drop(lease);
}
