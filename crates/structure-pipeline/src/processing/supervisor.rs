//! Pipeline supervisor: intake, worker spawning, deduplication and
//! completion detection

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::registry::{new_key, payload_worker_name, CorrelationRegistry, SupervisorEvent};
use super::reporter::{Entity, PersistModel, Reporter, ReporterMessage};
use super::stage::{StructureReceiver, StructureTask};
use super::worker::{import_payload, run_structure, WorkerContext};
use super::writer::{Activity, PersistenceWriter, Priority};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::providers::{Persistence, StructureNormalizer};
use crate::types::{Job, JobStatus, Molecule, Payload};

/// Live pipeline counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Registered workers, including terminated ones not yet unwatched
    pub workers: usize,
    /// Tasks waiting in the persistence writer
    pub queued_writes: usize,
    /// Messages not yet fully persisted
    pub pending_messages: usize,
    pub pool_size: usize,
    pub available_slots: usize,
}

struct BackgroundTasks {
    supervisor: JoinHandle<()>,
    reporter: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Top-level coordinator of the structure pipeline
pub struct PipelineSupervisor {
    ctx: Arc<WorkerContext>,
    registry: Arc<CorrelationRegistry>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    activity: Arc<Activity>,
    writer: PersistenceWriter,
    pool_size: usize,
    shutdown_timeout: Duration,
    tasks: Mutex<Option<BackgroundTasks>>,
}

impl PipelineSupervisor {
    /// Start the writer, the reporter and the supervisor loop.
    ///
    /// Waits up to `processing.startup_timeout_secs` for the writer to come up.
    pub async fn start(
        config: &PipelineConfig,
        persistence: Persistence,
        normalizer: Arc<dyn StructureNormalizer>,
    ) -> Result<Self> {
        config.validate()?;
        let processing = &config.processing;

        let activity = Arc::new(Activity::default());
        let (writer, writer_task, ready) =
            PersistenceWriter::start(persistence.clone(), activity.clone());

        match timeout(processing.startup_timeout(), ready).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                writer_task.abort();
                return Err(Error::Startup(
                    "persistence writer exited before becoming ready".to_string(),
                ));
            }
            Err(_) => {
                writer.close();
                writer_task.abort();
                return Err(Error::Startup(format!(
                    "persistence writer not ready after {}s",
                    processing.startup_timeout_secs
                )));
            }
        }

        let (reporter, reporter_task) = Reporter::start(writer.clone(), activity.clone());
        let (events, event_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(CorrelationRegistry::new(events.clone()));
        let pool_size = processing.worker_count();

        let ctx = Arc::new(WorkerContext {
            normalizer,
            reporter: reporter.clone(),
            slots: Arc::new(Semaphore::new(pool_size)),
            runtime: Handle::current(),
            persistence,
        });

        let supervisor_task = tokio::spawn(Self::supervise(
            event_rx,
            registry.clone(),
            reporter,
            activity.clone(),
        ));

        tracing::info!(
            "Structure pipeline started: {} worker slots, normalizer '{}'",
            pool_size,
            ctx.normalizer.name()
        );

        Ok(Self {
            ctx,
            registry,
            events,
            activity,
            writer,
            pool_size,
            shutdown_timeout: processing.shutdown_timeout(),
            tasks: Mutex::new(Some(BackgroundTasks {
                supervisor: supervisor_task,
                reporter: reporter_task,
                writer: writer_task,
            })),
        })
    }

    /// React to worker terminations until stopped
    async fn supervise(
        mut events: mpsc::UnboundedReceiver<SupervisorEvent>,
        registry: Arc<CorrelationRegistry>,
        reporter: Reporter,
        activity: Arc<Activity>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                SupervisorEvent::Terminated { name } => {
                    tracing::debug!("Worker {} terminated", name);
                    // Queued behind every write the worker made. The worker
                    // stays registered until this has run.
                    reporter.send(ReporterMessage::Finalize {
                        release: registry.release(name, activity.clone()),
                    });
                }
                SupervisorEvent::Stop => break,
            }
        }
        tracing::info!("Supervisor stopped");
    }

    /// Submit one structure; the receiver is called back exactly once.
    /// Returns the correlation key of the spawned worker.
    pub fn submit_structure(
        &self,
        molecule: Option<Molecule>,
        receiver: Arc<dyn StructureReceiver>,
    ) -> String {
        let key = new_key();
        let lease = self.registry.register(&key);
        let task = StructureTask::new(molecule, receiver, lease);
        tracing::debug!("Spawning structure worker {}", key);
        self.ctx.runtime.spawn(run_structure(self.ctx.clone(), task));
        key
    }

    /// Submit raw SMILES or molfile text. Unparseable text is reported
    /// through the receiver, not here.
    pub fn submit_text(&self, text: &str, receiver: Arc<dyn StructureReceiver>) -> String {
        self.submit_structure(Some(Molecule::from_text(text)), receiver)
    }

    /// Submit a batch payload. At most one worker imports a payload id at a
    /// time; a duplicate submission records a NOT_RUN job instead.
    pub fn submit_payload(&self, payload: Payload) -> String {
        let key = new_key();
        let name = payload_worker_name(payload.id, &key);

        match self.registry.register_payload(payload.id, &name) {
            Some(lease) => {
                tracing::info!("Importing payload {} ({}) as {}", payload.name, payload.id, name);
                let ctx = self.ctx.clone();
                self.ctx
                    .runtime
                    .spawn_blocking(move || import_payload(ctx, payload, lease));
            }
            None => {
                let message = format!("Payload {} is currently being processed", payload.id);
                tracing::info!("{}", message);
                let job = Job::for_payload(&payload, &key)
                    .with_status(JobStatus::NotRun, Some(message));
                self.ctx
                    .reporter
                    .send(ReporterMessage::PersistModel(PersistModel::save(vec![Entity::Job(
                        job,
                    )])));
            }
        }
        key
    }

    /// Resolve once no worker is registered and every queued write ran
    pub async fn wait_idle(&self) {
        let registry = self.registry.clone();
        self.activity.wait_until(move || registry.is_empty()).await;
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            workers: self.registry.len(),
            queued_writes: self.writer.queued(),
            pending_messages: self.activity.pending(),
            pool_size: self.pool_size,
            available_slots: if self.ctx.slots.is_closed() {
                0
            } else {
                self.ctx.slots.available_permits()
            },
        }
    }

    /// Stop handing out worker slots. Later submissions fail in Routing.
    pub fn close(&self) {
        if !self.ctx.slots.is_closed() {
            self.ctx.slots.close();
            tracing::info!("Worker pool closed");
        }
    }

    /// Close the pool, wait (bounded) for in-flight work, then stop the
    /// supervisor loop and drain the reporter and the writer. Jobs of
    /// workers still running at that point are marked STOPPED.
    pub async fn shutdown(&self) -> Result<()> {
        self.close();

        if timeout(self.shutdown_timeout, self.wait_idle()).await.is_err() {
            tracing::warn!(
                "Shutdown timed out after {}s with {} workers registered",
                self.shutdown_timeout.as_secs(),
                self.registry.len()
            );
        }

        let tasks = self.tasks.lock().take();
        let Some(tasks) = tasks else {
            return Ok(());
        };

        let _ = self.events.send(SupervisorEvent::Stop);
        self.ctx.reporter.stop();
        let (supervisor, reporter) = futures::future::join(tasks.supervisor, tasks.reporter).await;
        for (name, result) in [("supervisor", supervisor), ("reporter", reporter)] {
            if let Err(e) = result {
                tracing::warn!("The {} task ended abnormally: {}", name, e);
            }
        }

        // Workers still registered now will never be finalized by the loop.
        // Queued last, behind everything the relay forwarded.
        for (name, in_flight) in self.registry.workers() {
            let release = self.registry.release(name, self.activity.clone());
            let message = if in_flight == 0 {
                ReporterMessage::Finalize { release }
            } else {
                tracing::warn!("Worker {} still running at shutdown", release.name());
                ReporterMessage::Stopped { release }
            };
            self.writer.enqueue(Priority::Low, Box::new(message));
        }

        self.writer.close();
        tasks
            .writer
            .await
            .map_err(|e| Error::internal(format!("Persistence writer failed: {}", e)))?;

        tracing::info!("Structure pipeline stopped");
        Ok(())
    }
}
