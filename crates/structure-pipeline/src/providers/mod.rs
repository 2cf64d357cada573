//! Provider abstractions for the pipeline's external collaborators
//!
//! The chemistry step, the search index and the entity stores are reached
//! only through the traits defined here, so deployments can swap the
//! defaults for real toolkits and databases.

pub mod local;
pub mod normalizer;
pub mod search_index;
pub mod store;

use std::sync::Arc;

pub use local::{IndexEntry, InMemorySearchIndex};
pub use normalizer::StructureNormalizer;
pub use search_index::SearchIndex;
pub use store::{JobStore, RecordStore, StructureStore};

use crate::storage::PipelineDb;

/// The stores and index every persistence task writes to
#[derive(Clone)]
pub struct Persistence {
    pub jobs: Arc<dyn JobStore>,
    pub records: Arc<dyn RecordStore>,
    pub structures: Arc<dyn StructureStore>,
    pub index: Arc<dyn SearchIndex>,
}

impl Persistence {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        records: Arc<dyn RecordStore>,
        structures: Arc<dyn StructureStore>,
        index: Arc<dyn SearchIndex>,
    ) -> Self {
        Self {
            jobs,
            records,
            structures,
            index,
        }
    }

    /// Use one database for all three stores
    pub fn with_database(db: Arc<PipelineDb>, index: Arc<dyn SearchIndex>) -> Self {
        Self {
            jobs: db.clone(),
            records: db.clone(),
            structures: db,
            index,
        }
    }
}
