//! Local provider implementations kept in process memory

use dashmap::DashMap;

use crate::error::Result;
use crate::types::Molecule;

use super::search_index::SearchIndex;

/// One indexed entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub entity_id: String,
    pub molecule: Option<Molecule>,
}

/// Search index backed by a concurrent map of source id to entries
#[derive(Debug, Default)]
pub struct InMemorySearchIndex {
    entries: DashMap<String, Vec<IndexEntry>>,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of indexed entities across all sources
    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries indexed for one source, in indexing order
    pub fn entries_for(&self, source_id: &str) -> Vec<IndexEntry> {
        self.entries
            .get(source_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}

impl SearchIndex for InMemorySearchIndex {
    fn index(&self, source_id: &str, entity_id: &str, molecule: Option<&Molecule>) -> Result<()> {
        self.entries
            .entry(source_id.to_string())
            .or_default()
            .push(IndexEntry {
                entity_id: entity_id.to_string(),
                molecule: molecule.cloned(),
            });
        tracing::debug!("Indexed {} for source {}", entity_id, source_id);
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_groups_by_source() {
        let index = InMemorySearchIndex::new();
        assert!(index.is_empty());

        let mol = Molecule::smiles("CCO");
        index.index("upload-1", "s1", Some(&mol)).unwrap();
        index.index("upload-1", "s2", None).unwrap();
        index.index("upload-2", "s3", None).unwrap();

        assert_eq!(index.len(), 3);
        let entries = index.entries_for("upload-1");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entity_id, "s1");
        assert_eq!(entries[0].molecule.as_ref(), Some(&mol));
        assert!(index.entries_for("missing").is_empty());
    }
}
