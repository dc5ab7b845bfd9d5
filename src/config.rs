//! Application configuration, loaded from the environment.

/// Runtime knobs for admission guardrails, the rate limiter, and the job
/// monitor. Every field has a default drawn from SPEC_FULL.md so a bare
/// `.env`-less run still behaves sensibly.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,

    pub daily_job_limit_per_user: u32,
    pub max_pending_jobs: u32,

    pub rate_limit_window_secs: u64,
    pub rate_limit_max_requests: u32,

    pub image_max_concurrent: usize,

    pub monitor_interval_secs: u64,
    pub stuck_timeout_secs: i64,
    pub sla_seconds: i64,
    pub monitor_max_retries: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./storybook_forge.db".to_string());

        let daily_job_limit_per_user = std::env::var("DAILY_JOB_LIMIT_PER_USER")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20);

        let max_pending_jobs = std::env::var("MAX_PENDING_JOBS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);

        let rate_limit_window_secs = std::env::var("RATE_LIMIT_WINDOW_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        let rate_limit_max_requests = std::env::var("RATE_LIMIT_MAX_REQUESTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        let image_max_concurrent = std::env::var("IMAGE_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        let monitor_interval_secs = std::env::var("MONITOR_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        let stuck_timeout_secs = std::env::var("STUCK_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(900);

        let sla_seconds = std::env::var("SLA_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(600);

        let monitor_max_retries = std::env::var("MONITOR_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3);

        Ok(Self {
            database_path,
            daily_job_limit_per_user,
            max_pending_jobs,
            rate_limit_window_secs,
            rate_limit_max_requests,
            image_max_concurrent,
            monitor_interval_secs,
            stuck_timeout_secs,
            sla_seconds,
            monitor_max_retries,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "./storybook_forge.db".to_string(),
            daily_job_limit_per_user: 20,
            max_pending_jobs: 100,
            rate_limit_window_secs: 60,
            rate_limit_max_requests: 10,
            image_max_concurrent: 3,
            monitor_interval_secs: 300,
            stuck_timeout_secs: 900,
            sla_seconds: 600,
            monitor_max_retries: 3,
        }
    }
}
