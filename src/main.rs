//! Process entry point: wires the Job Store, Credit Ledger, Rate Limiter,
//! Admission Controller, Orchestrator, and Job Monitor together, then runs
//! the dispatch loop that hands admitted job ids to the Orchestrator.
//!
//! Real LLM/image/moderation/storage adapters live outside this core
//! (SPEC_FULL.md §1, "out of scope: provider-specific request formats");
//! this binary runs the in-memory test doubles from `capability::testing`
//! so the service is runnable end to end without external credentials.

use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storybook_forge::admission::AdmissionController;
use storybook_forge::capability::testing::{
    InMemoryObjectStore, LexiconModeration, ScriptedImageGenerator, ScriptedLlm,
};
use storybook_forge::clock::SystemClock;
use storybook_forge::config::Config;
use storybook_forge::ledger::SqliteCreditLedger;
use storybook_forge::models::{Specification, Style, TargetAge};
use storybook_forge::monitor::JobMonitor;
use storybook_forge::pipeline::Orchestrator;
use storybook_forge::ratelimit::RateLimiter;
use storybook_forge::store::{SqliteArtifactStore, SqliteBookStore, SqliteCharacterStore, SqliteJobStore};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env().context("loading configuration")?;
    info!(database_path = %config.database_path, "starting storybook-forge");

    let conn = Connection::open(&config.database_path)
        .with_context(|| format!("opening database at {}", config.database_path))?;
    let conn = Arc::new(AsyncMutex::new(conn));

    let clock = Arc::new(SystemClock);
    let job_store = Arc::new(SqliteJobStore::new(conn.clone())?);
    let character_store = Arc::new(SqliteCharacterStore::new(conn.clone())?);
    let book_store = Arc::new(SqliteBookStore::new(conn.clone())?);
    let artifact_store = Arc::new(SqliteArtifactStore::new(conn.clone())?);
    let ledger = Arc::new(SqliteCreditLedger::new(conn, 10)?);
    let rate_limiter = Arc::new(RateLimiter::new(
        clock.clone(),
        config.rate_limit_window_secs,
        config.rate_limit_max_requests as usize,
    ));

    let llm = Arc::new(ScriptedLlm::succeeding_with(demo_story_response()));
    let moderation = Arc::new(LexiconModeration::new());
    let image_gen = Arc::new(ScriptedImageGenerator::new());
    let storage = Arc::new(InMemoryObjectStore::new());

    let (dispatch_tx, mut dispatch_rx) = mpsc::unbounded_channel::<String>();

    let admission = Arc::new(AdmissionController::new(
        clock.clone(),
        config.clone(),
        job_store.clone(),
        ledger.clone(),
        rate_limiter.clone(),
        dispatch_tx.clone(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        clock.clone(),
        job_store.clone(),
        character_store,
        book_store,
        artifact_store,
        ledger.clone(),
        llm,
        moderation,
        image_gen,
        storage,
        config.image_max_concurrent,
        config.sla_seconds,
    ));

    let monitor = Arc::new(JobMonitor::new(
        clock,
        job_store,
        ledger,
        dispatch_tx,
        config.monitor_interval_secs,
        config.stuck_timeout_secs,
        config.sla_seconds,
        config.monitor_max_retries,
    ));

    tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.run().await }
    });

    tokio::spawn(async move {
        while let Some(job_id) = dispatch_rx.recv().await {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.run_job(job_id).await });
        }
    });

    let job_id = admission
        .create_job("demo-user-000001", demo_spec(), None)
        .await
        .context("submitting demo job")?;
    info!(job_id = %job_id, "demo job admitted");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutting down");
    Ok(())
}

fn demo_spec() -> Specification {
    Specification {
        topic: "a fox who paints the sky".to_string(),
        language: "en".to_string(),
        target_age: TargetAge::Age5To7,
        style: Style::Watercolor,
        theme: None,
        page_count: 6,
        character_id: None,
        character_ids: vec![],
        forbidden_elements: vec![],
    }
}

fn demo_story_response() -> serde_json::Value {
    serde_json::json!({
        "title": "The Fox and the Painted Sky",
        "pages": [
            "The fox wakes at dawn. The sky is gray and still.",
            "She dips her tail in color. Orange spreads above the hills.",
            "A bird stops to watch. The clouds turn soft and pink.",
            "The fox paints a long gold stripe. The sun peeks through.",
            "Other animals gather below. They point at the changing sky.",
            "By evening the sky glows purple. The fox curls up to rest."
        ]
    })
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storybook_forge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
