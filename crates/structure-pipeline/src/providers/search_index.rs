//! Search index provider trait

use crate::error::Result;
use crate::types::Molecule;

/// Receives every persisted structure so it becomes searchable
///
/// Implementations:
/// - `InMemorySearchIndex`: process-local map, used by the CLI and tests
pub trait SearchIndex: Send + Sync {
    /// Index an entity against the identifier of the source that produced it
    fn index(&self, source_id: &str, entity_id: &str, molecule: Option<&Molecule>) -> Result<()>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
