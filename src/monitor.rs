//! Job Monitor (C9): a periodic sweep that recovers `running` jobs whose
//! worker died mid-stage and fails jobs that have overrun their total SLA
//! regardless of which stage they are stuck in (SPEC_FULL.md §4.6). Runs
//! independently of the Orchestrator's own per-stage SLA check, the same
//! belt-and-suspenders shape as the teacher's reconciliation sweep that
//! catches positions its websocket feed missed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::error::JobErrorCode;
use crate::ledger::CreditLedger;
use crate::models::{Job, JobStatus};
use crate::store::JobStore;

const FAILURE_REFUND_REASON: &str = "job_failed";

pub struct JobMonitor {
    clock: Arc<dyn Clock>,
    job_store: Arc<dyn JobStore>,
    ledger: Arc<dyn CreditLedger>,
    dispatch: UnboundedSender<String>,
    interval: Duration,
    stuck_timeout: ChronoDuration,
    sla: ChronoDuration,
    max_retries: u32,
}

impl JobMonitor {
    pub fn new(
        clock: Arc<dyn Clock>,
        job_store: Arc<dyn JobStore>,
        ledger: Arc<dyn CreditLedger>,
        dispatch: UnboundedSender<String>,
        interval_secs: u64,
        stuck_timeout_secs: i64,
        sla_seconds: i64,
        max_retries: u32,
    ) -> Self {
        Self {
            clock,
            job_store,
            ledger,
            dispatch,
            interval: Duration::from_secs(interval_secs),
            stuck_timeout: ChronoDuration::seconds(stuck_timeout_secs),
            sla: ChronoDuration::seconds(sla_seconds),
            max_retries,
        }
    }

    /// Runs the sweep on `interval` forever. Intended to be spawned once at
    /// startup alongside the Orchestrator's dispatch loop.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    pub async fn sweep(&self) {
        self.sweep_stuck().await;
        self.sweep_sla_breaching().await;
    }

    async fn sweep_stuck(&self) {
        let now = self.clock.now();
        let threshold = now - self.stuck_timeout;
        let stuck = match self.job_store.select_stuck(threshold).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "failed to select stuck jobs");
                return;
            }
        };

        for job in stuck {
            if job.retry_count < self.max_retries {
                self.requeue(&job, now).await;
            } else {
                self.fail(&job, JobErrorCode::StuckTimeout, "job exceeded its stuck-recovery retry budget", now).await;
            }
        }
    }

    async fn requeue(&self, job: &Job, now: chrono::DateTime<chrono::Utc>) {
        match self.job_store.cas_status(&job.job_id, JobStatus::Running, JobStatus::Queued, now).await {
            Ok(true) => {
                if let Err(e) = self.job_store.mark_requeued(&job.job_id, job.retry_count + 1, now).await {
                    error!(error = %e, job_id = %job.job_id, "failed to record requeue");
                }
                if self.dispatch.send(job.job_id.clone()).is_err() {
                    warn!(job_id = %job.job_id, "dispatch channel closed, requeued job will not be picked up");
                }
                info!(job_id = %job.job_id, retry_count = job.retry_count + 1, "requeued stuck job");
            }
            Ok(false) => {
                // Already progressed past `running` by the time we got here; nothing to do.
            }
            Err(e) => error!(error = %e, job_id = %job.job_id, "failed to requeue stuck job"),
        }
    }

    async fn sweep_sla_breaching(&self) {
        let now = self.clock.now();
        let cutoff = now - self.sla;
        let breaching = match self.job_store.select_sla_breaching(cutoff).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "failed to select sla-breaching jobs");
                return;
            }
        };

        for job in breaching {
            self.fail(&job, JobErrorCode::SlaBreach, "job exceeded its total time budget", now).await;
        }
    }

    /// Same duplicate-refund guard as the Orchestrator's own `fail_job`: if
    /// the job was already finished or failed by a racing writer by the time
    /// this sweep reached it, `mark_failed` reports that the compare-and-set
    /// did not apply and this is a no-op.
    async fn fail(&self, job: &Job, code: JobErrorCode, message: &str, now: chrono::DateTime<chrono::Utc>) {
        let applied = match self.job_store.mark_failed(&job.job_id, code.as_str(), message, now).await {
            Ok(applied) => applied,
            Err(e) => {
                error!(error = %e, job_id = %job.job_id, "failed to persist monitor-driven failure");
                return;
            }
        };
        if !applied {
            info!(job_id = %job.job_id, "job already in a terminal state, skipping duplicate failure handling");
            return;
        }
        if let Err(e) = self.ledger.refund(&job.user_key, 1, FAILURE_REFUND_REASON, &job.job_id).await {
            error!(error = %e, job_id = %job.job_id, "failed to refund after monitor-driven failure");
        }
        warn!(job_id = %job.job_id, error_code = code.as_str(), "monitor failed job");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::ledger::SqliteCreditLedger;
    use crate::models::{Specification, Style, TargetAge};
    use crate::store::SqliteJobStore;
    use chrono::Utc;
    use rusqlite::Connection;
    use tokio::sync::{mpsc, Mutex as AsyncMutex};

    fn spec() -> Specification {
        Specification {
            topic: "a fox who paints the sky".to_string(),
            language: "en".to_string(),
            target_age: TargetAge::Age5To7,
            style: Style::Watercolor,
            theme: None,
            page_count: 8,
            character_id: None,
            character_ids: vec![],
            forbidden_elements: vec![],
        }
    }

    fn harness() -> (
        Arc<TestClock>,
        Arc<dyn JobStore>,
        Arc<dyn CreditLedger>,
        mpsc::UnboundedReceiver<String>,
        UnboundedSender<String>,
    ) {
        let conn = Arc::new(AsyncMutex::new(Connection::open_in_memory().unwrap()));
        let job_store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::new(conn.clone()).unwrap());
        let ledger: Arc<dyn CreditLedger> = Arc::new(SqliteCreditLedger::new(conn, 5).unwrap());
        let clock = Arc::new(TestClock::new(Utc::now()));
        let (tx, rx) = mpsc::unbounded_channel();
        (clock, job_store, ledger, rx, tx)
    }

    #[tokio::test]
    async fn requeues_a_stuck_running_job_and_dispatches_it() {
        let (clock, job_store, ledger, mut rx, tx) = harness();
        let monitor = JobMonitor::new(clock.clone(), job_store.clone(), ledger, tx, 60, 900, 600, 3);

        let now = clock.now();
        let job = Job::new("job-1".into(), "user-0001".into(), None, spec(), now);
        job_store.insert_queued(&job).await.unwrap();
        job_store.cas_status("job-1", JobStatus::Queued, JobStatus::Running, now).await.unwrap();

        clock.advance(chrono::Duration::seconds(901));
        monitor.sweep().await;

        let updated = job_store.get("job-1").await.unwrap().unwrap();
        assert_eq!(updated.status, JobStatus::Queued);
        assert_eq!(updated.retry_count, 1);
        assert_eq!(rx.recv().await.as_deref(), Some("job-1"));
    }

    #[tokio::test]
    async fn stuck_job_past_retry_budget_fails_and_refunds() {
        let (clock, job_store, ledger, _rx, tx) = harness();
        let monitor = JobMonitor::new(clock.clone(), job_store.clone(), ledger.clone(), tx, 60, 900, 600, 3);

        let now = clock.now();
        let job = Job::new("job-2".into(), "user-0001".into(), None, spec(), now);
        job_store.insert_queued(&job).await.unwrap();
        job_store.cas_status("job-2", JobStatus::Queued, JobStatus::Running, now).await.unwrap();
        job_store.mark_requeued("job-2", 3, now).await.unwrap();
        job_store.cas_status("job-2", JobStatus::Queued, JobStatus::Running, now).await.unwrap();

        ledger.debit("user-0001", 1, "job_submitted", Some("job-2")).await.unwrap();

        clock.advance(chrono::Duration::seconds(901));
        monitor.sweep().await;

        let updated = job_store.get("job-2").await.unwrap().unwrap();
        assert_eq!(updated.status, JobStatus::Failed);
        assert_eq!(updated.error_code.as_deref(), Some("STUCK_TIMEOUT"));
        assert_eq!(ledger.balance("user-0001").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn sla_breaching_job_fails_and_refunds_regardless_of_stage() {
        let (clock, job_store, ledger, _rx, tx) = harness();
        let monitor = JobMonitor::new(clock.clone(), job_store.clone(), ledger.clone(), tx, 60, 900, 600, 3);

        let now = clock.now();
        let job = Job::new("job-3".into(), "user-0001".into(), None, spec(), now);
        job_store.insert_queued(&job).await.unwrap();
        ledger.debit("user-0001", 1, "job_submitted", Some("job-3")).await.unwrap();

        clock.advance(chrono::Duration::seconds(601));
        monitor.sweep().await;

        let updated = job_store.get("job-3").await.unwrap().unwrap();
        assert_eq!(updated.status, JobStatus::Failed);
        assert_eq!(updated.error_code.as_deref(), Some("SLA_BREACH"));
        assert_eq!(ledger.balance("user-0001").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn healthy_jobs_are_left_untouched() {
        let (clock, job_store, ledger, _rx, tx) = harness();
        let monitor = JobMonitor::new(clock, job_store.clone(), ledger, tx, 60, 900, 600, 3);

        let now = Utc::now();
        let job = Job::new("job-4".into(), "user-0001".into(), None, spec(), now);
        job_store.insert_queued(&job).await.unwrap();

        monitor.sweep().await;

        let updated = job_store.get("job-4").await.unwrap().unwrap();
        assert_eq!(updated.status, JobStatus::Queued);
    }
}
