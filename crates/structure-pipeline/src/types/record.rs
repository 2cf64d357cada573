//! Per-molecule outcome records within a job

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Structure;

/// Record status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Ok,
    Failed,
    #[default]
    Pending,
    Unknown,
    Adapted,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Pending => "pending",
            Self::Unknown => "unknown",
            Self::Adapted => "adapted",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ok" => Self::Ok,
            "failed" => Self::Failed,
            "pending" => Self::Pending,
            "adapted" => Self::Adapted,
            _ => Self::Unknown,
        }
    }
}

/// Cross-reference from a record to a persisted entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct XRef {
    pub id: Uuid,
    /// Kind of the referenced entity, e.g. "structure"
    pub kind: String,
    pub ref_id: String,
}

impl XRef {
    pub fn structure(structure: &Structure) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: "structure".to_string(),
            ref_id: structure.id.to_string(),
        }
    }
}

/// Persisted outcome of one molecule of a job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: Uuid,
    pub name: String,
    pub status: RecordStatus,
    /// Detailed status message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xref: Option<XRef>,
    pub job_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Record {
    pub fn new(name: impl Into<String>, job_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: RecordStatus::Pending,
            message: None,
            xref: None,
            job_id,
            created_at: Utc::now(),
        }
    }

    pub fn ok(mut self) -> Self {
        self.status = RecordStatus::Ok;
        self.message = None;
        self
    }

    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.status = RecordStatus::Failed;
        self.message = Some(message.into());
        self
    }
}
