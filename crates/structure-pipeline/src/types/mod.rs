//! Core types for the structure pipeline

pub mod job;
pub mod molecule;
pub mod payload;
pub mod record;
pub mod structure;

pub use job::{Job, JobStatus};
pub use molecule::{Molecule, MoleculeFormat};
pub use payload::{Payload, PayloadContent};
pub use record::{Record, RecordStatus, XRef};
pub use structure::Structure;
