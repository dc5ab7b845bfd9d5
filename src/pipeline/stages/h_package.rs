//! Stage H — Package: uploads every generated image, then writes the Book
//! and Page rows and marks the job done in one transaction (timeout 30s per
//! upload, 1 retry on storage failure, `DB_WRITE_FAILED` is terminal with no
//! retry; SPEC_FULL.md §4.2, §6, spec.md:114).

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::capability::{ObjectStore, StorageError};
use crate::error::JobErrorCode;
use crate::models::{Book, Page, Specification};
use crate::pipeline::stage_runner::retry_with_backoff;
use crate::pipeline::stages::f_images::GeneratedImages;
use crate::store::BookStore;

const MAX_RETRIES: u32 = 1;
const NO_BACKOFF: [Duration; 0] = [];

pub async fn package_book(
    storage: &dyn ObjectStore,
    book_store: &dyn BookStore,
    job_id: &str,
    user_key: &str,
    spec: &Specification,
    title: String,
    page_texts: &[String],
    page_prompts: &[String],
    character_id: Option<String>,
    images: GeneratedImages,
    now: DateTime<Utc>,
) -> Result<Book, JobErrorCode> {
    let book_id = Uuid::new_v4().to_string();

    let cover_url = upload(storage, &format!("books/{book_id}/cover.png"), &images.cover).await?;

    let mut pages = Vec::with_capacity(images.pages.len());
    for (i, bytes) in images.pages.into_iter().enumerate() {
        let page_number = (i + 1) as u32;
        let key = format!("books/{book_id}/pages/{page_number}.png");
        let url = upload(storage, &key, &bytes).await?;
        pages.push(Page {
            page_number,
            text: page_texts[i].clone(),
            image_url: url,
            image_prompt: page_prompts[i].clone(),
        });
    }

    let book = Book {
        book_id,
        job_id: job_id.to_string(),
        title,
        language: spec.language.clone(),
        target_age: spec.target_age,
        style: spec.style,
        theme: spec.theme.clone(),
        character_id,
        cover_image_url: cover_url,
        pages,
        user_key: user_key.to_string(),
        created_at: now,
    };

    let completed = book_store
        .insert_completing_job(&book, job_id, now)
        .await
        .map_err(|_| JobErrorCode::DbWriteFailed)?;
    if !completed {
        return Err(JobErrorCode::DbWriteFailed);
    }

    Ok(book)
}

async fn upload(storage: &dyn ObjectStore, key: &str, bytes: &[u8]) -> Result<String, JobErrorCode> {
    retry_with_backoff(MAX_RETRIES, &NO_BACKOFF, || async {
        storage.put(key, bytes).await.map_err(classify_storage_error)
    })
    .await
}

fn classify_storage_error(_err: StorageError) -> JobErrorCode {
    JobErrorCode::StorageUploadFailed
}
