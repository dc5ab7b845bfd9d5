use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::models::{Book, Page, Style, TargetAge};

#[async_trait]
pub trait BookStore: Send + Sync {
    /// Inserts the Book and its Pages and marks `job_id` `done` with
    /// `progress=100`, all as a single transaction (spec.md:114). Returns
    /// `false` without writing the book or its pages if the job was no
    /// longer `running` (a racing writer — typically the Job Monitor's SLA
    /// sweep — already finalized it), so a packaged book can never outlive
    /// a job its own store disagrees with.
    async fn insert_completing_job(&self, book: &Book, job_id: &str, now: DateTime<Utc>) -> Result<bool>;
    async fn get(&self, book_id: &str) -> Result<Option<Book>>;
    async fn get_by_job_id(&self, job_id: &str) -> Result<Option<Book>>;
}

pub struct SqliteBookStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBookStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        let guard = conn.blocking_lock();
        guard.execute(
            "CREATE TABLE IF NOT EXISTS books (
                book_id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                language TEXT NOT NULL,
                target_age TEXT NOT NULL,
                style TEXT NOT NULL,
                theme TEXT,
                character_id TEXT,
                cover_image_url TEXT NOT NULL,
                user_key TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        guard.execute(
            "CREATE TABLE IF NOT EXISTS pages (
                book_id TEXT NOT NULL,
                page_number INTEGER NOT NULL,
                text TEXT NOT NULL,
                image_url TEXT NOT NULL,
                image_prompt TEXT NOT NULL,
                PRIMARY KEY (book_id, page_number)
            )",
            [],
        )?;
        drop(guard);
        Ok(Self { conn })
    }
}

fn target_age_to_str(age: TargetAge) -> &'static str {
    match age {
        TargetAge::Age3To5 => "3-5",
        TargetAge::Age5To7 => "5-7",
        TargetAge::Age7To9 => "7-9",
        TargetAge::Adult => "adult",
    }
}

fn target_age_from_str(s: &str) -> Option<TargetAge> {
    match s {
        "3-5" => Some(TargetAge::Age3To5),
        "5-7" => Some(TargetAge::Age5To7),
        "7-9" => Some(TargetAge::Age7To9),
        "adult" => Some(TargetAge::Adult),
        _ => None,
    }
}

fn style_to_str(style: Style) -> &'static str {
    match style {
        Style::Watercolor => "watercolor",
        Style::Cartoon => "cartoon",
        Style::ThreeD => "3d",
        Style::Pixel => "pixel",
        Style::OilPainting => "oil_painting",
        Style::Claymation => "claymation",
        Style::Realistic => "realistic",
    }
}

fn style_from_str(s: &str) -> Option<Style> {
    match s {
        "watercolor" => Some(Style::Watercolor),
        "cartoon" => Some(Style::Cartoon),
        "3d" => Some(Style::ThreeD),
        "pixel" => Some(Style::Pixel),
        "oil_painting" => Some(Style::OilPainting),
        "claymation" => Some(Style::Claymation),
        "realistic" => Some(Style::Realistic),
        _ => None,
    }
}

fn load_pages(conn: &Connection, book_id: &str) -> rusqlite::Result<Vec<Page>> {
    let mut stmt = conn.prepare(
        "SELECT page_number, text, image_url, image_prompt FROM pages
         WHERE book_id = ?1 ORDER BY page_number ASC",
    )?;
    stmt.query_map(params![book_id], |row| {
        Ok(Page {
            page_number: row.get::<_, i64>(0)? as u32,
            text: row.get(1)?,
            image_url: row.get(2)?,
            image_prompt: row.get(3)?,
        })
    })?
    .collect()
}

fn row_to_book(row: &rusqlite::Row, pages: Vec<Page>) -> rusqlite::Result<Book> {
    let created_at: String = row.get("created_at")?;
    let target_age_str: String = row.get("target_age")?;
    let style_str: String = row.get("style")?;
    Ok(Book {
        book_id: row.get("book_id")?,
        job_id: row.get("job_id")?,
        title: row.get("title")?,
        language: row.get("language")?,
        target_age: target_age_from_str(&target_age_str)
            .ok_or_else(|| rusqlite::Error::InvalidColumnType(0, "target_age".into(), rusqlite::types::Type::Text))?,
        style: style_from_str(&style_str)
            .ok_or_else(|| rusqlite::Error::InvalidColumnType(0, "style".into(), rusqlite::types::Type::Text))?,
        theme: row.get("theme")?,
        character_id: row.get("character_id")?,
        cover_image_url: row.get("cover_image_url")?,
        pages,
        user_key: row.get("user_key")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?
            .with_timezone(&Utc),
    })
}

#[async_trait]
impl BookStore for SqliteBookStore {
    async fn insert_completing_job(&self, book: &Book, job_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().context("begin book completion transaction")?;

        let job_completed = tx
            .execute(
                "UPDATE jobs SET status = 'done', progress = 100, updated_at = ?1
                 WHERE job_id = ?2 AND status = 'running'",
                params![now.to_rfc3339(), job_id],
            )
            .context("mark job done")?;
        if job_completed != 1 {
            tx.rollback().context("rollback book completion transaction")?;
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO books (book_id, job_id, title, language, target_age, style, theme,
                character_id, cover_image_url, user_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                book.book_id,
                book.job_id,
                book.title,
                book.language,
                target_age_to_str(book.target_age),
                style_to_str(book.style),
                book.theme,
                book.character_id,
                book.cover_image_url,
                book.user_key,
                book.created_at.to_rfc3339(),
            ],
        )
        .context("insert book")?;

        for page in &book.pages {
            tx.execute(
                "INSERT INTO pages (book_id, page_number, text, image_url, image_prompt)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![book.book_id, page.page_number as i64, page.text, page.image_url, page.image_prompt],
            )
            .context("insert page")?;
        }

        tx.commit().context("commit book completion transaction")?;
        Ok(true)
    }

    async fn get(&self, book_id: &str) -> Result<Option<Book>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row("SELECT * FROM books WHERE book_id = ?1", params![book_id], |row| {
                Ok((
                    row.get::<_, String>("book_id")?,
                    row.get::<_, String>("job_id")?,
                ))
            })
            .optional()
            .context("query book by id")?;
        let Some(_) = row else { return Ok(None) };

        let pages = load_pages(&conn, book_id).context("load book pages")?;
        let book = conn
            .query_row("SELECT * FROM books WHERE book_id = ?1", params![book_id], |row| {
                row_to_book(row, pages)
            })
            .optional()
            .context("query book by id")?;
        Ok(book)
    }

    async fn get_by_job_id(&self, job_id: &str) -> Result<Option<Book>> {
        let conn = self.conn.lock().await;
        let book_id: Option<String> = conn
            .query_row("SELECT book_id FROM books WHERE job_id = ?1", params![job_id], |row| row.get(0))
            .optional()
            .context("query book by job id")?;
        let Some(book_id) = book_id else { return Ok(None) };

        let pages = load_pages(&conn, &book_id).context("load book pages")?;
        let book = conn
            .query_row("SELECT * FROM books WHERE book_id = ?1", params![book_id], |row| {
                row_to_book(row, pages)
            })
            .optional()
            .context("query book by id")?;
        Ok(book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Job, JobStatus, Specification};
    use crate::store::{JobStore, SqliteJobStore};

    fn test_spec() -> Specification {
        Specification {
            topic: "a fox who paints the sky".to_string(),
            language: "en".to_string(),
            target_age: TargetAge::Age5To7,
            style: Style::Watercolor,
            theme: None,
            page_count: 2,
            character_id: None,
            character_ids: vec![],
            forbidden_elements: vec![],
        }
    }

    /// Builds a `BookStore` sharing a connection with a `JobStore` that
    /// already has `job_id` in `running`, the state `insert_completing_job`
    /// expects to transition out of.
    async fn test_store_with_running_job(job_id: &str) -> SqliteBookStore {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let job_store = SqliteJobStore::new(conn.clone()).unwrap();
        let now = Utc::now();
        let job = Job::new(job_id.to_string(), "user-0001".to_string(), None, test_spec(), now);
        job_store.insert_queued(&job).await.unwrap();
        job_store
            .cas_status(job_id, JobStatus::Queued, JobStatus::Running, now)
            .await
            .unwrap();
        SqliteBookStore::new(conn).unwrap()
    }

    fn test_store() -> SqliteBookStore {
        let conn = Connection::open_in_memory().unwrap();
        SqliteBookStore::new(Arc::new(Mutex::new(conn))).unwrap()
    }

    fn test_book() -> Book {
        Book {
            book_id: "book-1".to_string(),
            job_id: "job-1".to_string(),
            title: "The Fox Who Painted the Sky".to_string(),
            language: "en".to_string(),
            target_age: TargetAge::Age5To7,
            style: Style::Watercolor,
            theme: Some("courage".to_string()),
            character_id: Some("char-1".to_string()),
            cover_image_url: "https://objects.local/book-1/cover.png".to_string(),
            pages: vec![
                Page {
                    page_number: 1,
                    text: "Once there was a fox.".to_string(),
                    image_url: "https://objects.local/book-1/1.png".to_string(),
                    image_prompt: "a fox in a meadow".to_string(),
                },
                Page {
                    page_number: 2,
                    text: "The fox loved the color of the sky.".to_string(),
                    image_url: "https://objects.local/book-1/2.png".to_string(),
                    image_prompt: "a fox looking at the sunset".to_string(),
                },
            ],
            user_key: "user-0001".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_get_round_trips_pages_in_order() {
        let store = test_store_with_running_job("job-1").await;
        let book = test_book();
        let completed = store.insert_completing_job(&book, "job-1", Utc::now()).await.unwrap();
        assert!(completed);

        let fetched = store.get("book-1").await.unwrap().unwrap();
        assert_eq!(fetched.title, book.title);
        assert_eq!(fetched.pages.len(), 2);
        assert_eq!(fetched.pages[0].page_number, 1);
        assert_eq!(fetched.pages[1].page_number, 2);
    }

    #[tokio::test]
    async fn get_by_job_id_finds_the_same_book() {
        let store = test_store_with_running_job("job-1").await;
        store.insert_completing_job(&test_book(), "job-1", Utc::now()).await.unwrap();

        let fetched = store.get_by_job_id("job-1").await.unwrap().unwrap();
        assert_eq!(fetched.book_id, "book-1");
    }

    #[tokio::test]
    async fn unknown_book_id_returns_none() {
        let store = test_store();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refuses_to_insert_against_a_job_that_is_no_longer_running() {
        let conn = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let job_store = SqliteJobStore::new(conn.clone()).unwrap();
        let now = Utc::now();
        let job = Job::new("job-1".to_string(), "user-0001".to_string(), None, test_spec(), now);
        job_store.insert_queued(&job).await.unwrap();
        // Never transitioned to running; e.g. the Job Monitor already failed it for an SLA breach.

        let store = SqliteBookStore::new(conn).unwrap();
        let completed = store
            .insert_completing_job(&test_book(), "job-1", now)
            .await
            .unwrap();
        assert!(!completed, "must not write a book against a job that raced past running");
        assert!(store.get("book-1").await.unwrap().is_none(), "book insert must have rolled back");
    }
}
