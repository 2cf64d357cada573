//! Store traits for jobs, records and structures
//!
//! All methods are blocking. The pipeline only calls them from tasks run by
//! the persistence writer, which moves each call onto the blocking pool.

use uuid::Uuid;

use crate::error::Result;
use crate::types::{Job, Record, Structure};

/// Persisted batch jobs
pub trait JobStore: Send + Sync {
    /// Insert a new job together with its keys
    fn create(&self, job: &Job) -> Result<()>;

    /// Overwrite status, message and keys of an existing job.
    /// The processed/failed counters are left untouched.
    fn update(&self, job: &Job) -> Result<()>;

    /// Add one correlation key to an existing job, leaving every other
    /// column as stored
    fn add_key(&self, job_id: Uuid, key: &str) -> Result<()>;

    fn delete(&self, id: Uuid) -> Result<bool>;

    fn find_by_id(&self, id: Uuid) -> Result<Option<Job>>;

    /// Job whose key set contains `key`
    fn find_by_key(&self, key: &str) -> Result<Option<Job>>;

    /// Every job created for a payload, oldest first
    fn find_by_payload(&self, payload_id: Uuid) -> Result<Vec<Job>>;

    /// Most recent PENDING or RUNNING job for a payload
    fn find_active_by_payload(&self, payload_id: Uuid) -> Result<Option<Job>>;

    fn list_recent(&self, limit: usize) -> Result<Vec<Job>>;
}

/// Persisted per-molecule records
pub trait RecordStore: Send + Sync {
    fn save(&self, record: &Record) -> Result<()>;

    /// Write the structure, its cross-reference and the record as one unit
    /// and bump the owning job's counters
    fn persist_outcome(&self, structure: Option<&Structure>, record: &Record) -> Result<()>;

    fn delete(&self, id: Uuid) -> Result<bool>;

    fn find_by_id(&self, id: Uuid) -> Result<Option<Record>>;

    fn find_by_job(&self, job_id: Uuid) -> Result<Vec<Record>>;
}

/// Persisted normalized structures
pub trait StructureStore: Send + Sync {
    fn save(&self, structure: &Structure) -> Result<()>;

    fn update(&self, structure: &Structure) -> Result<()>;

    fn delete(&self, id: Uuid) -> Result<bool>;

    fn find_by_id(&self, id: Uuid) -> Result<Option<Structure>>;

    /// Number of stored structures
    fn count(&self) -> Result<usize>;
}
