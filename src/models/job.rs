use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::spec::Specification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// A safety verdict recorded at Stage B (`moderation_input`) or Stage G
/// (`moderation_output`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ModerationVerdict {
    Safe,
    Unsafe { reason: String },
}

/// The unit of work produced by a single admission request; owns the
/// pipeline's state (SPEC_FULL.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub user_key: String,
    pub idempotency_key: Option<String>,
    pub spec: Specification,
    pub status: JobStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub moderation_input: Option<ModerationVerdict>,
    pub moderation_output: Option<ModerationVerdict>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        job_id: String,
        user_key: String,
        idempotency_key: Option<String>,
        spec: Specification,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            user_key,
            idempotency_key,
            spec,
            status: JobStatus::Queued,
            progress: 0,
            current_step: None,
            moderation_input: None,
            moderation_output: None,
            error_code: None,
            error_message: None,
            retry_count: 0,
            last_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}
