use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::models::{Job, JobStatus, ModerationVerdict, Specification};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find_by_idempotency_key(&self, user_key: &str, key: &str) -> Result<Option<Job>>;
    async fn insert_queued(&self, job: &Job) -> Result<()>;
    async fn get(&self, job_id: &str) -> Result<Option<Job>>;
    async fn count_active(&self) -> Result<u64>;
    async fn count_created_since(&self, user_key: &str, since: DateTime<Utc>) -> Result<u64>;

    /// Conditional monotone progress update: only advances `progress` and
    /// `current_step` if the row is still in `queued`/`running` and the
    /// proposed value is not lower than the stored one (SPEC_FULL.md §4.2 F,
    /// §9 "Monotone progress").
    async fn advance_progress(&self, job_id: &str, progress: u8, current_step: &str, now: DateTime<Utc>) -> Result<()>;

    async fn set_moderation_input(&self, job_id: &str, verdict: &ModerationVerdict, now: DateTime<Utc>) -> Result<()>;
    async fn set_moderation_output(&self, job_id: &str, verdict: &ModerationVerdict, now: DateTime<Utc>) -> Result<()>;

    /// Compare-and-set: only transitions if the row's current status still
    /// matches `expected`. Returns whether the transition applied.
    async fn cas_status(&self, job_id: &str, expected: JobStatus, new_status: JobStatus, now: DateTime<Utc>) -> Result<bool>;

    /// Compare-and-set terminal transition: only applies if the row is still
    /// `queued` or `running`. Returns whether it applied, the same
    /// convention as `cas_status`, so a caller racing the Job Monitor or the
    /// Orchestrator's own success path never clobbers a terminal state
    /// someone else already wrote (spec.md:146, SPEC_FULL.md §9 "Refund
    /// idempotence").
    async fn mark_failed(&self, job_id: &str, error_code: &str, error_message: &str, now: DateTime<Utc>) -> Result<bool>;
    async fn mark_requeued(&self, job_id: &str, retry_count: u32, now: DateTime<Utc>) -> Result<()>;

    /// `status=running AND updated_at < now - stuck_timeout`.
    async fn select_stuck(&self, threshold: DateTime<Utc>) -> Result<Vec<Job>>;
    /// `status IN (queued, running) AND created_at < now - sla_seconds`.
    async fn select_sla_breaching(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>>;
}

pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteJobStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        let guard = conn.blocking_lock();
        Self::init_schema(&guard)?;
        drop(guard);
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                user_key TEXT NOT NULL,
                idempotency_key TEXT,
                spec_json TEXT NOT NULL,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL,
                current_step TEXT,
                moderation_input_json TEXT,
                moderation_output_json TEXT,
                error_code TEXT,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_retry_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_user_idempotency
                ON jobs(user_key, idempotency_key) WHERE idempotency_key IS NOT NULL",
            [],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)", [])?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_jobs_updated_at ON jobs(updated_at)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_jobs_user_created ON jobs(user_key, created_at)",
            [],
        )?;
        Ok(())
    }
}

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .context("invalid timestamp in jobs table")?
        .with_timezone(&Utc))
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let spec_json: String = row.get("spec_json")?;
    let status_str: String = row.get("status")?;
    let moderation_input_json: Option<String> = row.get("moderation_input_json")?;
    let moderation_output_json: Option<String> = row.get("moderation_output_json")?;
    let last_retry_at: Option<String> = row.get("last_retry_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let spec: Specification = serde_json::from_str(&spec_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;
    let status = JobStatus::from_str(&status_str).unwrap_or(JobStatus::Failed);
    let moderation_input = moderation_input_json
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;
    let moderation_output = moderation_output_json
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(Job {
        job_id: row.get("job_id")?,
        user_key: row.get("user_key")?,
        idempotency_key: row.get("idempotency_key")?,
        spec,
        status,
        progress: row.get::<_, i64>("progress")? as u8,
        current_step: row.get("current_step")?,
        moderation_input,
        moderation_output,
        error_code: row.get("error_code")?,
        error_message: row.get("error_message")?,
        retry_count: row.get::<_, i64>("retry_count")? as u32,
        last_retry_at: last_retry_at.map(|s| parse_dt(&s)).transpose().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        created_at: parse_dt(&created_at).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        updated_at: parse_dt(&updated_at).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
    })
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn find_by_idempotency_key(&self, user_key: &str, key: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().await;
        let job = conn
            .query_row(
                "SELECT * FROM jobs WHERE user_key = ?1 AND idempotency_key = ?2",
                params![user_key, key],
                row_to_job,
            )
            .optional()
            .context("query jobs by idempotency key")?;
        Ok(job)
    }

    async fn insert_queued(&self, job: &Job) -> Result<()> {
        let conn = self.conn.lock().await;
        let spec_json = serde_json::to_string(&job.spec)?;
        conn.execute(
            "INSERT INTO jobs (job_id, user_key, idempotency_key, spec_json, status, progress,
                current_step, retry_count, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                job.job_id,
                job.user_key,
                job.idempotency_key,
                spec_json,
                job.status.as_str(),
                job.progress as i64,
                job.current_step,
                job.retry_count as i64,
                job.created_at.to_rfc3339(),
                job.updated_at.to_rfc3339(),
            ],
        )
        .context("insert queued job")?;
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>> {
        let conn = self.conn.lock().await;
        let job = conn
            .query_row("SELECT * FROM jobs WHERE job_id = ?1", params![job_id], row_to_job)
            .optional()
            .context("query job by id")?;
        Ok(job)
    }

    async fn count_active(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status IN ('queued', 'running')",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    async fn count_created_since(&self, user_key: &str, since: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE user_key = ?1 AND created_at >= ?2",
            params![user_key, since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    async fn advance_progress(
        &self,
        job_id: &str,
        progress: u8,
        current_step: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE jobs SET progress = MAX(progress, ?1), current_step = ?2, updated_at = ?3
             WHERE job_id = ?4 AND status IN ('queued', 'running')",
            params![progress as i64, current_step, now.to_rfc3339(), job_id],
        )
        .context("advance job progress")?;
        Ok(())
    }

    async fn set_moderation_input(&self, job_id: &str, verdict: &ModerationVerdict, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        let json = serde_json::to_string(verdict)?;
        conn.execute(
            "UPDATE jobs SET moderation_input_json = ?1, updated_at = ?2 WHERE job_id = ?3",
            params![json, now.to_rfc3339(), job_id],
        )?;
        Ok(())
    }

    async fn set_moderation_output(&self, job_id: &str, verdict: &ModerationVerdict, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        let json = serde_json::to_string(verdict)?;
        conn.execute(
            "UPDATE jobs SET moderation_output_json = ?1, updated_at = ?2 WHERE job_id = ?3",
            params![json, now.to_rfc3339(), job_id],
        )?;
        Ok(())
    }

    async fn cas_status(&self, job_id: &str, expected: JobStatus, new_status: JobStatus, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().await;
        let affected = conn.execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE job_id = ?3 AND status = ?4",
            params![new_status.as_str(), now.to_rfc3339(), job_id, expected.as_str()],
        )?;
        Ok(affected == 1)
    }

    async fn mark_failed(&self, job_id: &str, error_code: &str, error_message: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().await;
        let affected = conn.execute(
            "UPDATE jobs SET status = 'failed', error_code = ?1, error_message = ?2, updated_at = ?3
             WHERE job_id = ?4 AND status IN ('queued', 'running')",
            params![error_code, error_message, now.to_rfc3339(), job_id],
        )?;
        Ok(affected == 1)
    }

    async fn mark_requeued(&self, job_id: &str, retry_count: u32, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE jobs SET status = 'queued', retry_count = ?1, last_retry_at = ?2, updated_at = ?2
             WHERE job_id = ?3",
            params![retry_count as i64, now.to_rfc3339(), job_id],
        )?;
        Ok(())
    }

    async fn select_stuck(&self, threshold: DateTime<Utc>) -> Result<Vec<Job>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE status = 'running' AND updated_at < ?1",
        )?;
        let rows = stmt
            .query_map(params![threshold.to_rfc3339()], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    async fn select_sla_breaching(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE status IN ('queued', 'running') AND created_at < ?1",
        )?;
        let rows = stmt
            .query_map(params![cutoff.to_rfc3339()], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Specification;

    fn test_store() -> SqliteJobStore {
        let conn = Connection::open_in_memory().unwrap();
        SqliteJobStore::new(Arc::new(Mutex::new(conn))).unwrap()
    }

    fn test_spec() -> Specification {
        Specification {
            topic: "a fox who paints the sky".to_string(),
            language: "en".to_string(),
            target_age: crate::models::TargetAge::Age5To7,
            style: crate::models::Style::Watercolor,
            theme: None,
            page_count: 8,
            character_id: None,
            character_ids: vec![],
            forbidden_elements: vec![],
        }
    }

    #[tokio::test]
    async fn insert_and_get_round_trips() {
        let store = test_store();
        let now = Utc::now();
        let job = Job::new("job-1".into(), "user-0001".into(), None, test_spec(), now);
        store.insert_queued(&job).await.unwrap();

        let fetched = store.get("job-1").await.unwrap().unwrap();
        assert_eq!(fetched.job_id, "job-1");
        assert_eq!(fetched.status, JobStatus::Queued);
        assert_eq!(fetched.spec.topic, job.spec.topic);
    }

    #[tokio::test]
    async fn idempotency_lookup_matches_user_and_key() {
        let store = test_store();
        let now = Utc::now();
        let job = Job::new(
            "job-2".into(),
            "user-0001".into(),
            Some("K1".into()),
            test_spec(),
            now,
        );
        store.insert_queued(&job).await.unwrap();

        let found = store
            .find_by_idempotency_key("user-0001", "K1")
            .await
            .unwrap();
        assert!(found.is_some());

        let not_found = store
            .find_by_idempotency_key("user-0002", "K1")
            .await
            .unwrap();
        assert!(not_found.is_none());
    }

    #[tokio::test]
    async fn progress_update_is_monotone() {
        let store = test_store();
        let now = Utc::now();
        let job = Job::new("job-3".into(), "user-0001".into(), None, test_spec(), now);
        store.insert_queued(&job).await.unwrap();
        store.cas_status("job-3", JobStatus::Queued, JobStatus::Running, now).await.unwrap();

        store.advance_progress("job-3", 50, "images", now).await.unwrap();
        store.advance_progress("job-3", 30, "images", now).await.unwrap();

        let fetched = store.get("job-3").await.unwrap().unwrap();
        assert_eq!(fetched.progress, 50, "progress must never regress");
    }

    #[tokio::test]
    async fn cas_status_fails_on_stale_expectation() {
        let store = test_store();
        let now = Utc::now();
        let job = Job::new("job-4".into(), "user-0001".into(), None, test_spec(), now);
        store.insert_queued(&job).await.unwrap();

        let applied = store.cas_status("job-4", JobStatus::Running, JobStatus::Failed, now).await.unwrap();
        assert!(!applied, "cas must not apply when the observed status is stale");

        let applied = store.cas_status("job-4", JobStatus::Queued, JobStatus::Running, now).await.unwrap();
        assert!(applied);
    }

    #[tokio::test]
    async fn select_stuck_finds_old_running_jobs() {
        let store = test_store();
        let created = Utc::now() - chrono::Duration::minutes(30);
        let job = Job::new("job-5".into(), "user-0001".into(), None, test_spec(), created);
        store.insert_queued(&job).await.unwrap();
        store.cas_status("job-5", JobStatus::Queued, JobStatus::Running, created).await.unwrap();

        let threshold = Utc::now() - chrono::Duration::minutes(15);
        let stuck = store.select_stuck(threshold).await.unwrap();
        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].job_id, "job-5");
    }
}
