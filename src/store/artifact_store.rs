use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::models::{ImagePrompts, StoryDraft};

/// Stores the two write-once intermediate artifacts Stages C and E produce
/// (SPEC_FULL.md §3.1): one `story_drafts` row and one `image_prompts` row
/// per job, persisted before the Orchestrator advances progress past that
/// stage.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save_story_draft(&self, job_id: &str, draft: &StoryDraft, now: DateTime<Utc>) -> Result<()>;
    async fn get_story_draft(&self, job_id: &str) -> Result<Option<StoryDraft>>;

    async fn save_image_prompts(&self, job_id: &str, prompts: &ImagePrompts, now: DateTime<Utc>) -> Result<()>;
    async fn get_image_prompts(&self, job_id: &str) -> Result<Option<ImagePrompts>>;
}

pub struct SqliteArtifactStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteArtifactStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        let guard = conn.blocking_lock();
        guard.execute(
            "CREATE TABLE IF NOT EXISTS story_drafts (
                job_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                pages_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        guard.execute(
            "CREATE TABLE IF NOT EXISTS image_prompts (
                job_id TEXT PRIMARY KEY,
                cover_prompt TEXT NOT NULL,
                page_prompts_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        drop(guard);
        Ok(Self { conn })
    }
}

#[async_trait]
impl ArtifactStore for SqliteArtifactStore {
    async fn save_story_draft(&self, job_id: &str, draft: &StoryDraft, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO story_drafts (job_id, title, pages_json, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(job_id) DO UPDATE SET title = excluded.title, pages_json = excluded.pages_json",
            params![job_id, draft.title, serde_json::to_string(&draft.pages)?, now.to_rfc3339()],
        )
        .context("save story draft")?;
        Ok(())
    }

    async fn get_story_draft(&self, job_id: &str) -> Result<Option<StoryDraft>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT title, pages_json FROM story_drafts WHERE job_id = ?1",
                params![job_id],
                |row| {
                    let title: String = row.get(0)?;
                    let pages_json: String = row.get(1)?;
                    Ok((title, pages_json))
                },
            )
            .optional()
            .context("query story draft")?;
        row.map(|(title, pages_json)| {
            Ok(StoryDraft {
                title,
                pages: serde_json::from_str(&pages_json)?,
            })
        })
        .transpose()
    }

    async fn save_image_prompts(&self, job_id: &str, prompts: &ImagePrompts, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO image_prompts (job_id, cover_prompt, page_prompts_json, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(job_id) DO UPDATE SET
                cover_prompt = excluded.cover_prompt, page_prompts_json = excluded.page_prompts_json",
            params![
                job_id,
                prompts.cover_prompt,
                serde_json::to_string(&prompts.page_prompts)?,
                now.to_rfc3339()
            ],
        )
        .context("save image prompts")?;
        Ok(())
    }

    async fn get_image_prompts(&self, job_id: &str) -> Result<Option<ImagePrompts>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT cover_prompt, page_prompts_json FROM image_prompts WHERE job_id = ?1",
                params![job_id],
                |row| {
                    let cover_prompt: String = row.get(0)?;
                    let page_prompts_json: String = row.get(1)?;
                    Ok((cover_prompt, page_prompts_json))
                },
            )
            .optional()
            .context("query image prompts")?;
        row.map(|(cover_prompt, page_prompts_json)| {
            Ok(ImagePrompts {
                cover_prompt,
                page_prompts: serde_json::from_str(&page_prompts_json)?,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteArtifactStore {
        let conn = Connection::open_in_memory().unwrap();
        SqliteArtifactStore::new(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[tokio::test]
    async fn story_draft_round_trips() {
        let store = store();
        let draft = StoryDraft {
            title: "The Fox and the Sky".to_string(),
            pages: vec!["Page one.".to_string(), "Page two.".to_string()],
        };
        store.save_story_draft("job-1", &draft, Utc::now()).await.unwrap();
        let fetched = store.get_story_draft("job-1").await.unwrap().unwrap();
        assert_eq!(fetched, draft);
    }

    #[tokio::test]
    async fn image_prompts_round_trip() {
        let store = store();
        let prompts = ImagePrompts {
            cover_prompt: "a fox under the sky".to_string(),
            page_prompts: vec!["page 1 prompt".to_string()],
        };
        store.save_image_prompts("job-1", &prompts, Utc::now()).await.unwrap();
        let fetched = store.get_image_prompts("job-1").await.unwrap().unwrap();
        assert_eq!(fetched, prompts);
    }

    #[tokio::test]
    async fn missing_job_returns_none() {
        let store = store();
        assert!(store.get_story_draft("missing").await.unwrap().is_none());
    }
}
