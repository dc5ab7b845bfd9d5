//! Stage F — Images: the critical concurrent section. Bounds in-flight
//! provider calls with an `Arc<Semaphore>` sized to `image_max_concurrent`,
//! the same shape as the teacher's `DomeEnrichmentService::request_sem`
//! (SPEC_FULL.md §5.1). On the first terminal per-image failure, a
//! `CancellationToken` tells sibling tasks not to start new attempts; every
//! task is still joined so no provider call is left unawaited, but only the
//! first failure's classification is surfaced.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::capability::{ImageError, ImageGeneration};
use crate::error::JobErrorCode;
use crate::pipeline::stage_runner::retry_with_backoff;

const PER_IMAGE_TIMEOUT: Duration = Duration::from_secs(90);
const MAX_RETRIES: u32 = 3;
const BACKOFF: [Duration; 3] = [Duration::from_secs(2), Duration::from_secs(5), Duration::from_secs(12)];

/// Notified once per completed image so the Orchestrator can advance the
/// job's stored progress without Stage F depending on the Job Store.
#[async_trait]
pub trait ImageProgressSink: Send + Sync {
    async fn on_image_done(&self, completed: usize, total: usize);
}

pub struct NoopProgressSink;

#[async_trait]
impl ImageProgressSink for NoopProgressSink {
    async fn on_image_done(&self, _completed: usize, _total: usize) {}
}

pub struct GeneratedImages {
    pub cover: Vec<u8>,
    pub pages: Vec<Vec<u8>>,
}

pub async fn generate_images(
    image_gen: Arc<dyn ImageGeneration>,
    semaphore: Arc<Semaphore>,
    cover_prompt: String,
    page_prompts: Vec<String>,
    negative_prompt: String,
    style_token: String,
    progress: Arc<dyn ImageProgressSink>,
) -> Result<GeneratedImages, JobErrorCode> {
    let total = page_prompts.len() + 1;
    let cancel = CancellationToken::new();
    let completed = Arc::new(AtomicUsize::new(0));

    let mut prompts = Vec::with_capacity(total);
    prompts.push(cover_prompt);
    prompts.extend(page_prompts);

    let mut set = JoinSet::new();
    for (idx, prompt) in prompts.into_iter().enumerate() {
        let image_gen = image_gen.clone();
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        let negative_prompt = negative_prompt.clone();
        let style_token = style_token.clone();
        let completed = completed.clone();
        let progress = progress.clone();

        set.spawn(async move {
            if cancel.is_cancelled() {
                return (idx, Err(JobErrorCode::ImageFailed));
            }
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (idx, Err(JobErrorCode::ImageFailed)),
            };
            if cancel.is_cancelled() {
                return (idx, Err(JobErrorCode::ImageFailed));
            }

            let result = retry_with_backoff(MAX_RETRIES, &BACKOFF, || {
                let image_gen = &image_gen;
                let prompt = &prompt;
                let negative_prompt = &negative_prompt;
                let style_token = &style_token;
                async move {
                    image_gen
                        .generate(prompt, negative_prompt, style_token, PER_IMAGE_TIMEOUT)
                        .await
                }
            })
            .await;

            match result {
                Ok(bytes) => {
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    progress.on_image_done(done, total).await;
                    (idx, Ok(bytes))
                }
                Err(err) => {
                    cancel.cancel();
                    (idx, Err(classify_image_error(err)))
                }
            }
        });
    }

    let mut results: Vec<Option<Vec<u8>>> = (0..total).map(|_| None).collect();
    let mut first_error = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((idx, Ok(bytes))) => results[idx] = Some(bytes),
            Ok((_, Err(err))) => {
                first_error.get_or_insert(err);
            }
            Err(_join_error) => {
                first_error.get_or_insert(JobErrorCode::ImageFailed);
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }

    let mut bytes: Vec<Vec<u8>> = results.into_iter().map(|r| r.expect("every slot filled on success")).collect();
    let cover = bytes.remove(0);
    Ok(GeneratedImages { cover, pages: bytes })
}

fn classify_image_error(err: ImageError) -> JobErrorCode {
    match err {
        ImageError::Timeout => JobErrorCode::ImageTimeout,
        ImageError::RateLimit => JobErrorCode::ImageRateLimit,
        ImageError::Other(_) => JobErrorCode::ImageFailed,
    }
}
