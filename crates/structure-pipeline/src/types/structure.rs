//! Normalized chemical structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A normalized chemical entity derived from a raw molecule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Structure {
    /// Unique structure ID
    pub id: Uuid,
    /// SHA-256 of the original representation
    pub digest: String,
    /// SMILES form, when the input was SMILES
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smiles: Option<String>,
    /// Molfile form, when the input was a molfile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub molfile: Option<String>,
    /// Hill-order formula of the explicit atoms
    pub formula: String,
    pub atom_count: u32,
    pub bond_count: u32,
    /// Net formal charge
    pub charge: i32,
    pub created_at: DateTime<Utc>,
}

impl Structure {
    /// Short label for logs
    pub fn label(&self) -> String {
        format!("{} ({})", self.id, self.formula)
    }
}
