//! Concurrent processing core: supervisor, workers and the serialized
//! persistence path

mod registry;
mod reporter;
mod stage;
mod supervisor;
mod worker;
mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use registry::{CorrelationRegistry, SupervisorEvent, WorkerLease, WorkerRelease};
pub use reporter::{Entity, PersistModel, PersistOp, Reporter, ReporterMessage};
pub use stage::{ReceiverStatus, Stage, StructureReceiver, StructureTask};
pub use supervisor::{PipelineStats, PipelineSupervisor};
pub use writer::{task_fn, Activity, PersistenceTask, PersistenceWriter, Priority};
