//! Chemistry normalization provider trait

use crate::error::Result;
use crate::types::{Molecule, Structure};

/// Turns a raw molecule into a normalized structure
///
/// Implementations:
/// - `BasicNormalizer`: syntax check plus formula/charge summary
///
/// Calls happen on the blocking thread pool and may take arbitrarily long.
/// A panic inside `normalize` is caught by the caller and reported as a
/// normalization failure.
pub trait StructureNormalizer: Send + Sync {
    /// Normalize one molecule
    fn normalize(&self, molecule: &Molecule) -> Result<Structure>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
