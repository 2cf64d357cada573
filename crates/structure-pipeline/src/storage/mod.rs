//! Storage module for persistent data storage
//!
//! Provides the SQLite backend for jobs, records and structures.

mod database;

pub use database::{PipelineDb, PipelineDbStats};
