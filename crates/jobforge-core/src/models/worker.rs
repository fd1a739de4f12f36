use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::JobType;
use crate::Error;

/// Worker runtime status. Idle at rest, busy only while holding a claimed
/// job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Busy => "busy",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WorkerStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(WorkerStatus::Idle),
            "busy" => Ok(WorkerStatus::Busy),
            other => Err(Error::validation(format!("unknown worker status: {}", other))),
        }
    }
}

/// A long-lived process dedicated to one job type. The process handle
/// itself is runtime-only state owned by the supervisor, not persisted
/// here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: i64,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: WorkerStatus,
    pub is_active: bool,
    pub last_active: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Worker {
    pub fn mark_busy(&mut self) {
        self.status = WorkerStatus::Busy;
        self.last_active = Utc::now();
    }

    pub fn mark_idle(&mut self) {
        self.status = WorkerStatus::Idle;
        self.last_active = Utc::now();
    }
}

/// Aggregate counts for `/api/stats`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkerStats {
    pub total: i64,
    pub idle: i64,
    pub busy: i64,
    pub by_type: std::collections::HashMap<String, i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_status_roundtrips() {
        for s in [WorkerStatus::Idle, WorkerStatus::Busy] {
            let parsed: WorkerStatus = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn mark_busy_then_idle() {
        let mut worker = Worker {
            id: 1,
            job_type: JobType::Whatsapp,
            status: WorkerStatus::Idle,
            is_active: true,
            last_active: Utc::now(),
            created_at: Utc::now(),
        };
        worker.mark_busy();
        assert_eq!(worker.status, WorkerStatus::Busy);
        worker.mark_idle();
        assert_eq!(worker.status, WorkerStatus::Idle);
    }
}
