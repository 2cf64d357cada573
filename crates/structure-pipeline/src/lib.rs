//! structure-pipeline: asynchronous chemical structure processing
//!
//! Accepts single structures or bulk payloads of many molecules, normalizes
//! each one on a bounded worker pool, persists the results through a single
//! serialized writer, updates a search index and tracks batch progress with
//! jobs and per-molecule records.
//!
//! ```no_run
//! use std::sync::Arc;
//! use structure_pipeline::{
//!     BasicNormalizer, InMemorySearchIndex, Payload, Persistence, PipelineConfig,
//!     PipelineDb, PipelineSupervisor,
//! };
//!
//! # async fn run() -> structure_pipeline::Result<()> {
//! let config = PipelineConfig::default();
//! let db = Arc::new(PipelineDb::new(&config.database.path)?);
//! let persistence = Persistence::with_database(db, Arc::new(InMemorySearchIndex::new()));
//! let pipeline =
//!     PipelineSupervisor::start(&config, persistence, Arc::new(BasicNormalizer::new())).await?;
//!
//! pipeline.submit_payload(Payload::from_path("library.sdf", "chemical/x-mdl-sdfile"));
//! pipeline.wait_idle().await;
//! pipeline.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod chemistry;
pub mod config;
pub mod error;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod storage;
pub mod types;

pub use chemistry::BasicNormalizer;
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use processing::{PipelineStats, PipelineSupervisor, ReceiverStatus, StructureReceiver};
pub use providers::{InMemorySearchIndex, Persistence, SearchIndex, StructureNormalizer};
pub use storage::PipelineDb;
pub use types::{Job, JobStatus, Molecule, MoleculeFormat, Payload, Record, RecordStatus, Structure};
