//! Default structure normalizer

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{parse_molfile, parse_smiles};
use crate::error::{Error, Result};
use crate::providers::StructureNormalizer;
use crate::types::{Molecule, MoleculeFormat, Structure};

/// Validates SMILES and V2000 molfiles and summarizes them into a [`Structure`]
#[derive(Debug, Clone, Default)]
pub struct BasicNormalizer;

impl BasicNormalizer {
    pub fn new() -> Self {
        Self
    }
}

/// SHA-256 of the trimmed representation
pub fn digest(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.trim().as_bytes());
    hex::encode(hasher.finalize())
}

impl StructureNormalizer for BasicNormalizer {
    fn normalize(&self, molecule: &Molecule) -> Result<Structure> {
        let data = molecule.data.trim();
        if data.is_empty() {
            return Err(Error::normalization(format!(
                "Empty {} input",
                molecule.format.as_str()
            )));
        }

        let (summary, smiles, molfile) = match molecule.format {
            MoleculeFormat::Smiles => (parse_smiles(data)?, Some(data.to_string()), None),
            // Leading blank name lines are significant in a molfile
            MoleculeFormat::Molfile => {
                let text = molecule.data.trim_end_matches(['\n', '\r']);
                (parse_molfile(text)?, None, Some(text.to_string()))
            }
        };

        Ok(Structure {
            id: Uuid::new_v4(),
            digest: digest(data),
            smiles,
            molfile,
            formula: summary.formula(),
            atom_count: summary.atom_count,
            bond_count: summary.bond_count,
            charge: summary.charge,
            created_at: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "basic"
    }
}
