//! Payload ingestion: turning uploaded files into molecules

mod reader;

pub use reader::{detect_format, MoleculeReader};
