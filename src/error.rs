//! Stable error codes surfaced on a failed `Job`.
//!
//! The request tier keys a human-readable string off `JobErrorCode::as_str()`;
//! provider-specific error text never crosses this boundary (see `error_message`
//! on `Job`, which carries the free-form detail a forensic reader wants but a
//! client never parses).

use thiserror::Error;

/// Whether a terminal `JobErrorCode` implies a credit refund.
///
/// Admission-time codes never reach this type: they are returned directly to
/// the caller before any debit happens, so there is nothing to refund.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum JobErrorCode {
    #[error("the topic or forbidden elements failed input safety review")]
    SafetyInput,
    #[error("the generated story failed output safety review after rewrite attempts")]
    SafetyOutput,
    #[error("the language model timed out")]
    LlmTimeout,
    #[error("the language model returned a response that could not be parsed")]
    LlmJsonInvalid,
    #[error("the image provider timed out")]
    ImageTimeout,
    #[error("the image provider is rate-limiting requests")]
    ImageRateLimit,
    #[error("the image provider failed to generate an image")]
    ImageFailed,
    #[error("uploading a generated image to object storage failed")]
    StorageUploadFailed,
    #[error("a durable write failed")]
    DbWriteFailed,
    #[error("the job exceeded its stuck-recovery retry budget")]
    StuckTimeout,
    #[error("the job exceeded its total time budget")]
    SlaBreach,
}

impl JobErrorCode {
    /// The stable wire code stored in `Job::error_code`.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobErrorCode::SafetyInput => "SAFETY_INPUT",
            JobErrorCode::SafetyOutput => "SAFETY_OUTPUT",
            JobErrorCode::LlmTimeout => "LLM_TIMEOUT",
            JobErrorCode::LlmJsonInvalid => "LLM_JSON_INVALID",
            JobErrorCode::ImageTimeout => "IMAGE_TIMEOUT",
            JobErrorCode::ImageRateLimit => "IMAGE_RATE_LIMIT",
            JobErrorCode::ImageFailed => "IMAGE_FAILED",
            JobErrorCode::StorageUploadFailed => "STORAGE_UPLOAD_FAILED",
            JobErrorCode::DbWriteFailed => "DB_WRITE_FAILED",
            JobErrorCode::StuckTimeout => "STUCK_TIMEOUT",
            JobErrorCode::SlaBreach => "SLA_BREACH",
        }
    }

    /// Whether the Orchestrator should still retry this code locally before
    /// giving up and writing it as terminal (the per-stage budgets in
    /// SPEC_FULL.md §4.2 are what actually bound the retry count; this is
    /// just "is this class of failure ever worth a second attempt").
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            JobErrorCode::SafetyInput | JobErrorCode::SafetyOutput | JobErrorCode::DbWriteFailed
        )
    }
}

/// Errors the Admission Controller returns directly to the caller.
///
/// None of these touch the Credit Ledger: a debit only ever happens after
/// every variant here has been ruled out.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("invalid specification: {0}")]
    InvalidSpec(String),
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("daily job limit reached for this user")]
    DailyLimit,
    #[error("system is at capacity, try again later")]
    Overloaded,
    #[error("insufficient credits")]
    NoCredits,
}

impl AdmissionError {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionError::InvalidSpec(_) => "INVALID_SPEC",
            AdmissionError::RateLimited { .. } => "RATE_LIMITED",
            AdmissionError::DailyLimit => "DAILY_LIMIT",
            AdmissionError::Overloaded => "OVERLOADED",
            AdmissionError::NoCredits => "NO_CREDITS",
        }
    }
}
