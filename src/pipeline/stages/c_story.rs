//! Stage C — Story: LLM draft of a title and N page texts respecting the
//! age-band length rules (timeout 30s, 2 retries, backoff 2s/5s;
//! SPEC_FULL.md §4.2, §4.7).

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::capability::{LlmCompletion, LlmError};
use crate::error::JobErrorCode;
use crate::models::{Specification, StoryDraft};
use crate::pipeline::stage_runner::retry_with_backoff;
use crate::policy::{find_banned_term, page_within_age_limits};

const TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 2;
const BACKOFF: [Duration; 2] = [Duration::from_secs(2), Duration::from_secs(5)];

#[derive(Deserialize)]
struct RawDraft {
    title: String,
    pages: Vec<String>,
}

pub async fn write_story(llm: &dyn LlmCompletion, spec: &Specification) -> Result<StoryDraft, JobErrorCode> {
    let prompt = build_prompt(spec);
    let schema = story_schema();

    retry_with_backoff(MAX_RETRIES, &BACKOFF, || async {
        let value = llm
            .complete(&prompt, &schema, TIMEOUT)
            .await
            .map_err(classify_llm_error)?;

        let raw: RawDraft = serde_json::from_value(value).map_err(|_| JobErrorCode::LlmJsonInvalid)?;

        if raw.pages.len() != spec.page_count as usize {
            return Err(JobErrorCode::LlmJsonInvalid);
        }

        for page in &raw.pages {
            if !page_within_age_limits(page, spec.target_age) {
                return Err(JobErrorCode::LlmJsonInvalid);
            }
            if find_banned_term(page, &spec.forbidden_elements).is_some() {
                return Err(JobErrorCode::SafetyOutput);
            }
        }
        if find_banned_term(&raw.title, &spec.forbidden_elements).is_some() {
            return Err(JobErrorCode::SafetyOutput);
        }

        Ok(StoryDraft {
            title: raw.title,
            pages: raw.pages,
        })
    })
    .await
}

fn classify_llm_error(err: LlmError) -> JobErrorCode {
    match err {
        LlmError::Timeout => JobErrorCode::LlmTimeout,
        LlmError::InvalidJson(_) => JobErrorCode::LlmJsonInvalid,
        LlmError::Other(_) => JobErrorCode::LlmTimeout,
    }
}

fn build_prompt(spec: &Specification) -> String {
    format!(
        "Write a {}-page illustrated children's story in {} about: {}. Target age band: {:?}. Theme: {}.",
        spec.page_count,
        spec.language,
        spec.topic,
        spec.target_age,
        spec.theme.as_deref().unwrap_or("none"),
    )
}

fn story_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "title": { "type": "string" },
            "pages": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["title", "pages"]
    })
}
