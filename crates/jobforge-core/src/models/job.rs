use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Error;

/// The closed set of job types the core understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobType {
    Email,
    Whatsapp,
    Sms,
    Notification,
    Cronjob,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Email => "EMAIL",
            JobType::Whatsapp => "WHATSAPP",
            JobType::Sms => "SMS",
            JobType::Notification => "NOTIFICATION",
            JobType::Cronjob => "CRONJOB",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EMAIL" => Ok(JobType::Email),
            "WHATSAPP" => Ok(JobType::Whatsapp),
            "SMS" => Ok(JobType::Sms),
            "NOTIFICATION" => Ok(JobType::Notification),
            "CRONJOB" => Ok(JobType::Cronjob),
            other => Err(Error::validation(format!("unknown job type: {}", other))),
        }
    }
}

/// Job lifecycle state. Transitions are one-way: pending -> processing ->
/// {completed, failed}. There is no failed -> pending transition in the core;
/// retries are the producer's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether `self -> next` is a transition the state machine allows.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::validation(format!("unknown job status: {}", other))),
        }
    }
}

/// A unit of producer-submitted work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub worker_id: Option<i64>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Validate a producer-supplied payload before a Job is constructed.
    /// Payload must be a non-empty JSON object.
    pub fn validate_payload(payload: &serde_json::Value) -> Result<(), Error> {
        match payload.as_object() {
            Some(obj) if !obj.is_empty() => Ok(()),
            _ => Err(Error::validation(
                "Payload must be a non-empty object".to_string(),
            )),
        }
    }

    pub fn mark_processing(&mut self, worker_id: i64) {
        self.status = JobStatus::Processing;
        self.worker_id = Some(worker_id);
        self.updated_at = Utc::now();
    }

    pub fn mark_completed(&mut self, result: serde_json::Value) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.result = Some(serde_json::json!({ "error": error.into() }));
        self.updated_at = Utc::now();
    }
}

/// Aggregate counts for `/api/stats`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub by_type: std::collections::HashMap<String, i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_non_empty_object_payload() {
        assert!(Job::validate_payload(&serde_json::json!({"to": "x"})).is_ok());
    }

    #[test]
    fn rejects_empty_object_payload() {
        assert!(Job::validate_payload(&serde_json::json!({})).is_err());
    }

    #[test]
    fn rejects_array_payload() {
        assert!(Job::validate_payload(&serde_json::json!([])).is_err());
    }

    #[test]
    fn rejects_scalar_payload() {
        assert!(Job::validate_payload(&serde_json::json!("hello")).is_err());
    }

    #[test]
    fn job_type_roundtrips_through_display_and_from_str() {
        for t in [
            JobType::Email,
            JobType::Whatsapp,
            JobType::Sms,
            JobType::Notification,
            JobType::Cronjob,
        ] {
            let parsed: JobType = t.to_string().parse().unwrap();
            assert_eq!(parsed, t);
        }
    }

    #[test]
    fn state_machine_allows_only_forward_transitions() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Processing));
    }

    #[test]
    fn mark_completed_sets_result_and_status() {
        let mut job = Job {
            id: 1,
            job_type: JobType::Sms,
            payload: serde_json::json!({"to": "+1"}),
            status: JobStatus::Processing,
            worker_id: Some(7),
            result: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        job.mark_completed(serde_json::json!({"ok": true}));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(serde_json::json!({"ok": true})));
    }
}
