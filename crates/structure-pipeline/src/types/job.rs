//! Job tracking for batch payload submissions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::Payload;

/// Job status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    NotRun,
    Failed,
    Complete,
    Stopped,
    Unknown,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::NotRun => "not_run",
            Self::Failed => "failed",
            Self::Complete => "complete",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "not_run" => Self::NotRun,
            "failed" => Self::Failed,
            "complete" => Self::Complete,
            "stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    /// Statuses of jobs a worker may still be producing results for
    pub const ACTIVE: &'static [JobStatus] = &[Self::Pending, Self::Running];

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted tracking record for one batch submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Correlation keys of every worker that touched this job
    pub keys: BTreeSet<String>,
    pub payload_id: Option<Uuid>,
    pub payload_name: Option<String>,
    /// Records persisted for this job
    pub processed: u32,
    /// Records persisted with a FAILED status
    pub failed: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a pending job for a payload
    pub fn for_payload(payload: &Payload, key: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut keys = BTreeSet::new();
        keys.insert(key.into());
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            message: None,
            keys,
            payload_id: Some(payload.id),
            payload_name: Some(payload.name.clone()),
            processed: 0,
            failed: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_status(mut self, status: JobStatus, message: Option<String>) -> Self {
        self.status = status;
        self.message = message;
        self
    }

    pub fn add_key(&mut self, key: impl Into<String>) {
        self.keys.insert(key.into());
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.keys.contains(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_strings() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::NotRun,
            JobStatus::Failed,
            JobStatus::Complete,
            JobStatus::Stopped,
            JobStatus::Unknown,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), status);
        }
        assert_eq!(JobStatus::parse("garbage"), JobStatus::Unknown);
    }

    #[test]
    fn test_keys_only_accumulate() {
        let payload = Payload::from_bytes("lib.smi", "text/plain", "C\n");
        let mut job = Job::for_payload(&payload, "aa");
        job.add_key("bb");
        job.add_key("aa");
        assert_eq!(job.keys.len(), 2);
        assert!(job.has_key("aa") && job.has_key("bb"));
        assert_eq!(job.status, JobStatus::Pending);
    }
}
