use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::spec::{Style, TargetAge};

/// `(book_id, page_number)` is unique, 1-indexed (SPEC_FULL.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub page_number: u32,
    pub text: String,
    pub image_url: String,
    pub image_prompt: String,
}

/// Terminal artifact, written exactly once at Stage H.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub book_id: String,
    pub job_id: String,
    pub title: String,
    pub language: String,
    pub target_age: TargetAge,
    pub style: Style,
    pub theme: Option<String>,
    pub character_id: Option<String>,
    pub cover_image_url: String,
    pub pages: Vec<Page>,
    pub user_key: String,
    pub created_at: DateTime<Utc>,
}
