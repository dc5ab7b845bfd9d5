//! Admission Controller (C8): the single entry point a job passes through
//! before the Orchestrator ever sees it (SPEC_FULL.md §4.1). Composes the
//! idempotency probe, rate limiter, guardrails, credit debit, and job
//! insertion, then dispatches the queued job id over an unbounded channel —
//! the same `mpsc::unbounded_channel` hand-off the teacher uses between its
//! scrapers and consumers (e.g. `scrapers::dome_websocket`).

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::Config;
use crate::error::AdmissionError;
use crate::ledger::{CreditLedger, LedgerError};
use crate::models::{Job, Specification};
use crate::ratelimit::{RateLimitDecision, RateLimiter};
use crate::store::JobStore;

const JOB_SUBMISSION_CREDIT_COST: i64 = 1;

pub struct AdmissionController {
    clock: Arc<dyn Clock>,
    config: Config,
    job_store: Arc<dyn JobStore>,
    ledger: Arc<dyn CreditLedger>,
    rate_limiter: Arc<RateLimiter>,
    dispatch: UnboundedSender<String>,
}

impl AdmissionController {
    pub fn new(
        clock: Arc<dyn Clock>,
        config: Config,
        job_store: Arc<dyn JobStore>,
        ledger: Arc<dyn CreditLedger>,
        rate_limiter: Arc<RateLimiter>,
        dispatch: UnboundedSender<String>,
    ) -> Self {
        Self {
            clock,
            config,
            job_store,
            ledger,
            rate_limiter,
            dispatch,
        }
    }

    pub async fn create_job(
        &self,
        user_key: &str,
        spec: Specification,
        idempotency_key: Option<String>,
    ) -> Result<String, AdmissionError> {
        if user_key.chars().count() < crate::models::MIN_USER_KEY_LEN {
            return Err(AdmissionError::InvalidSpec(format!(
                "user_key must be at least {} characters",
                crate::models::MIN_USER_KEY_LEN
            )));
        }
        spec.validate().map_err(AdmissionError::InvalidSpec)?;

        if let Some(key) = idempotency_key.as_deref() {
            match self.job_store.find_by_idempotency_key(user_key, key).await {
                Ok(Some(existing)) => return Ok(existing.job_id),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "idempotency probe failed, proceeding as a fresh admission");
                }
            }
        }

        match self.rate_limiter.check(user_key) {
            RateLimitDecision::Allow => {}
            RateLimitDecision::Deny { retry_after_secs } => {
                return Err(AdmissionError::RateLimited { retry_after_secs });
            }
        }

        let now = self.clock.now();
        let today_start = now.date_naive().and_hms_opt(0, 0, 0).unwrap().and_utc();
        let created_today = self
            .job_store
            .count_created_since(user_key, today_start)
            .await
            .unwrap_or(0);
        if created_today >= self.config.daily_job_limit_per_user as u64 {
            return Err(AdmissionError::DailyLimit);
        }

        let active = self.job_store.count_active().await.unwrap_or(0);
        if active >= self.config.max_pending_jobs as u64 {
            return Err(AdmissionError::Overloaded);
        }

        self.ledger
            .debit(user_key, JOB_SUBMISSION_CREDIT_COST, "job_submitted", None)
            .await
            .map_err(|e| match e {
                LedgerError::InsufficientFunds => AdmissionError::NoCredits,
            })?;

        let job_id = Uuid::new_v4().to_string();
        let job = Job::new(job_id.clone(), user_key.to_string(), idempotency_key, spec, now);

        if let Err(e) = self.job_store.insert_queued(&job).await {
            warn!(error = %e, job_id = %job_id, "job insert failed after debit, refunding");
            let _ = self
                .ledger
                .refund(user_key, JOB_SUBMISSION_CREDIT_COST, "admission_insert_failed", &job_id)
                .await;
            return Err(AdmissionError::InvalidSpec(
                "failed to persist job, credit refunded".to_string(),
            ));
        }

        if self.dispatch.send(job_id.clone()).is_err() {
            warn!(job_id = %job_id, "dispatch channel closed, job remains queued for the monitor to pick up");
        }

        info!(job_id = %job_id, user_key = %user_key, "job admitted");
        Ok(job_id)
    }
}
