use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::capability::{ContentModeration, ImageGeneration, LlmCompletion, ObjectStore};
use crate::clock::Clock;
use crate::error::JobErrorCode;
use crate::ledger::CreditLedger;
use crate::models::{Job, JobStatus};
use crate::pipeline::stages::{
    a_normalize, b_moderate_input, c_story, d_character, e_prompts,
    f_images::{self, ImageProgressSink},
    g_moderate_output, h_package,
};
use crate::policy;
use crate::store::{ArtifactStore, BookStore, CharacterStore, JobStore};

const JOB_SUBMISSION_CREDIT_COST: i64 = 1;

/// Drives one job from `queued` through the eight stages to `done`/`failed`
/// (SPEC_FULL.md §4.2). One `Orchestrator` is shared (behind `Arc`) across
/// every concurrently running job; it holds no per-job state itself — all
/// of that lives in the Job Store row the stages checkpoint against.
pub struct Orchestrator {
    clock: Arc<dyn Clock>,
    job_store: Arc<dyn JobStore>,
    character_store: Arc<dyn CharacterStore>,
    book_store: Arc<dyn BookStore>,
    artifact_store: Arc<dyn ArtifactStore>,
    ledger: Arc<dyn CreditLedger>,
    llm: Arc<dyn LlmCompletion>,
    moderation: Arc<dyn ContentModeration>,
    image_gen: Arc<dyn ImageGeneration>,
    storage: Arc<dyn ObjectStore>,
    image_semaphore: Arc<Semaphore>,
    sla_seconds: i64,
}

struct JobStoreProgressSink {
    job_store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    job_id: String,
}

#[async_trait]
impl ImageProgressSink for JobStoreProgressSink {
    async fn on_image_done(&self, completed: usize, total: usize) {
        let delta = (40 * completed / total.max(1)) as u8;
        let progress = (55 + delta).min(95);
        let now = self.clock.now();
        if let Err(e) = self.job_store.advance_progress(&self.job_id, progress, "images", now).await {
            warn!(error = %e, job_id = %self.job_id, "failed to persist image progress");
        }
    }
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<dyn Clock>,
        job_store: Arc<dyn JobStore>,
        character_store: Arc<dyn CharacterStore>,
        book_store: Arc<dyn BookStore>,
        artifact_store: Arc<dyn ArtifactStore>,
        ledger: Arc<dyn CreditLedger>,
        llm: Arc<dyn LlmCompletion>,
        moderation: Arc<dyn ContentModeration>,
        image_gen: Arc<dyn ImageGeneration>,
        storage: Arc<dyn ObjectStore>,
        image_max_concurrent: usize,
        sla_seconds: i64,
    ) -> Self {
        Self {
            clock,
            job_store,
            character_store,
            book_store,
            artifact_store,
            ledger,
            llm,
            moderation,
            image_gen,
            storage,
            image_semaphore: Arc::new(Semaphore::new(image_max_concurrent.max(1))),
            sla_seconds,
        }
    }

    fn sla_breached(&self, job: &Job) -> bool {
        (self.clock.now() - job.created_at).num_seconds() > self.sla_seconds
    }

    /// Writes the terminal failure and refunds the submission credit. If the
    /// compare-and-set in `mark_failed` does not apply — the job was already
    /// finished or failed by a racing writer, typically the Job Monitor's
    /// SLA sweep — this is a no-op: whoever won that race already wrote the
    /// terminal state and issued its own refund, so issuing a second one
    /// here would double-refund (spec.md:146, SPEC_FULL.md §9 "Refund
    /// idempotence").
    async fn fail_job(&self, job_id: &str, user_key: &str, code: JobErrorCode, message: &str) {
        let now = self.clock.now();
        let applied = match self.job_store.mark_failed(job_id, code.as_str(), message, now).await {
            Ok(applied) => applied,
            Err(e) => {
                error!(error = %e, job_id = %job_id, "failed to persist terminal failure");
                return;
            }
        };
        if !applied {
            debug!(job_id = %job_id, "job already in a terminal state, skipping duplicate failure handling");
            return;
        }
        if let Err(e) = self
            .ledger
            .refund(user_key, JOB_SUBMISSION_CREDIT_COST, "job_failed", job_id)
            .await
        {
            error!(error = %e, job_id = %job_id, "failed to refund after job failure");
        }
        warn!(job_id = %job_id, error_code = code.as_str(), "job failed");
    }

    /// Runs one job to completion. Safe to call more than once for the same
    /// `job_id` (by the Monitor's requeue path, or a duplicate dispatch): the
    /// compare-and-set into `running` makes every call but the first a no-op.
    pub async fn run_job(&self, job_id: String) {
        let job = match self.job_store.get(&job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job_id = %job_id, "dispatched job not found in store");
                return;
            }
            Err(e) => {
                error!(error = %e, job_id = %job_id, "failed to load dispatched job");
                return;
            }
        };

        let now = self.clock.now();
        match self.job_store.cas_status(&job_id, JobStatus::Queued, JobStatus::Running, now).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id = %job_id, "job no longer queued, another worker owns it");
                return;
            }
            Err(e) => {
                error!(error = %e, job_id = %job_id, "failed to claim job");
                return;
            }
        }

        let user_key = job.user_key.clone();

        macro_rules! bail_if_sla_breached {
            () => {
                if self.sla_breached(&job) {
                    self.fail_job(&job_id, &user_key, JobErrorCode::SlaBreach, "job exceeded its total time budget").await;
                    return;
                }
            };
        }

        let normalized = a_normalize::normalize(job.spec.clone());
        let _ = self.job_store.advance_progress(&job_id, 5, "normalize", now).await;

        bail_if_sla_breached!();
        let moderation_input = match b_moderate_input::moderate_input(self.moderation.as_ref(), &normalized.spec).await {
            Ok(verdict) => verdict,
            Err(code) => {
                self.fail_job(&job_id, &user_key, code, "topic failed input safety review").await;
                return;
            }
        };
        let now = self.clock.now();
        let _ = self.job_store.set_moderation_input(&job_id, &moderation_input, now).await;
        let _ = self.job_store.advance_progress(&job_id, 10, "moderate_input", now).await;

        bail_if_sla_breached!();
        let story = match c_story::write_story(self.llm.as_ref(), &normalized.spec).await {
            Ok(draft) => draft,
            Err(code) => {
                self.fail_job(&job_id, &user_key, code, "story generation failed").await;
                return;
            }
        };
        let now = self.clock.now();
        let _ = self.artifact_store.save_story_draft(&job_id, &story, now).await;
        let _ = self.job_store.advance_progress(&job_id, 30, "story", now).await;

        bail_if_sla_breached!();
        let character = match d_character::resolve_character(
            self.llm.as_ref(),
            self.character_store.as_ref(),
            &normalized.spec,
            &normalized.character_ids,
        )
        .await
        {
            Ok(sheet) => sheet,
            Err(code) => {
                self.fail_job(&job_id, &user_key, code, "character resolution failed").await;
                return;
            }
        };
        let now = self.clock.now();
        let _ = self.job_store.advance_progress(&job_id, 40, "character", now).await;

        bail_if_sla_breached!();
        let prompts = match e_prompts::build_prompts(self.llm.as_ref(), &normalized.spec, &story, &character).await {
            Ok(prompts) => prompts,
            Err(code) => {
                self.fail_job(&job_id, &user_key, code, "image prompt generation failed").await;
                return;
            }
        };
        let now = self.clock.now();
        let _ = self.artifact_store.save_image_prompts(&job_id, &prompts, now).await;
        let _ = self.job_store.advance_progress(&job_id, 55, "prompts", now).await;

        bail_if_sla_breached!();
        let progress_sink = Arc::new(JobStoreProgressSink {
            job_store: self.job_store.clone(),
            clock: self.clock.clone(),
            job_id: job_id.clone(),
        });
        let images = match f_images::generate_images(
            self.image_gen.clone(),
            self.image_semaphore.clone(),
            prompts.cover_prompt.clone(),
            prompts.page_prompts.clone(),
            policy::negative_prompt_clause(),
            policy::style_token(normalized.spec.style).to_string(),
            progress_sink,
        )
        .await
        {
            Ok(images) => images,
            Err(code) => {
                self.fail_job(&job_id, &user_key, code, "image generation failed").await;
                return;
            }
        };

        bail_if_sla_breached!();
        let (story, moderation_output) =
            match g_moderate_output::moderate_output(self.moderation.as_ref(), self.llm.as_ref(), &normalized.spec, story).await {
                Ok(result) => result,
                Err(code) => {
                    self.fail_job(&job_id, &user_key, code, "generated story failed output safety review").await;
                    return;
                }
            };
        let now = self.clock.now();
        let _ = self.job_store.set_moderation_output(&job_id, &moderation_output, now).await;
        let _ = self.job_store.advance_progress(&job_id, 95, "moderate_output", now).await;

        bail_if_sla_breached!();
        let now = self.clock.now();
        let book = match h_package::package_book(
            self.storage.as_ref(),
            self.book_store.as_ref(),
            &job_id,
            &user_key,
            &normalized.spec,
            story.title.clone(),
            &story.pages,
            &prompts.page_prompts,
            Some(character.character_id.clone()),
            images,
            now,
        )
        .await
        {
            Ok(book) => book,
            Err(code) => {
                self.fail_job(&job_id, &user_key, code, "packaging the finished book failed").await;
                return;
            }
        };

        info!(job_id = %job_id, book_id = %book.book_id, "job completed");
    }
}
