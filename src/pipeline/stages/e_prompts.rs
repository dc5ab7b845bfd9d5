//! Stage E — Prompts: builds the cover and per-page image prompts, each
//! embedding the character's `master_description`, the fixed style token,
//! and the negative-prompt clause (timeout 30s, 1 retry, backoff 2s;
//! SPEC_FULL.md §4.2, §4.7).

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::capability::{LlmCompletion, LlmError};
use crate::error::JobErrorCode;
use crate::models::{CharacterSheet, ImagePrompts, Specification, StoryDraft};
use crate::pipeline::stage_runner::retry_with_backoff;
use crate::policy::{negative_prompt_clause, style_token};

const TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 1;
const BACKOFF: [Duration; 1] = [Duration::from_secs(2)];

#[derive(Deserialize)]
struct RawPrompts {
    cover_prompt: String,
    page_prompts: Vec<String>,
}

pub async fn build_prompts(
    llm: &dyn LlmCompletion,
    spec: &Specification,
    story: &StoryDraft,
    character: &CharacterSheet,
) -> Result<ImagePrompts, JobErrorCode> {
    let style = style_token(spec.style);
    let negative = negative_prompt_clause();

    let prompt = format!(
        "Write one cover image prompt and one per-page image prompt for each of these pages: {:?}. \
         Every prompt must textually include this character description verbatim: \"{}\". \
         Every prompt must end with this style description: \"{}\". \
         Every prompt must end with this negative-prompt clause: \"{}\".",
        story.pages, character.master_description, style, negative,
    );
    let schema = prompts_schema();

    retry_with_backoff(MAX_RETRIES, &BACKOFF, || async {
        let value = llm
            .complete(&prompt, &schema, TIMEOUT)
            .await
            .map_err(classify_llm_error)?;
        let raw: RawPrompts = serde_json::from_value(value).map_err(|_| JobErrorCode::LlmJsonInvalid)?;

        if raw.page_prompts.len() != story.pages.len() {
            return Err(JobErrorCode::LlmJsonInvalid);
        }

        let finalize = |p: String| finalize_prompt(p, &character.master_description, style, &negative);
        Ok(ImagePrompts {
            cover_prompt: finalize(raw.cover_prompt),
            page_prompts: raw.page_prompts.into_iter().map(finalize).collect(),
        })
    })
    .await
}

/// Guarantees the hard-required clauses are present even if the LLM
/// dropped one, rather than retrying a whole generation over a missing
/// suffix.
fn finalize_prompt(mut prompt: String, master_description: &str, style: &str, negative: &str) -> String {
    if !prompt.contains(master_description) {
        prompt = format!("{prompt}. Character: {master_description}");
    }
    if !prompt.contains(style) {
        prompt = format!("{prompt}. Style: {style}");
    }
    if !prompt.contains(negative) {
        prompt = format!("{prompt}. {negative}");
    }
    prompt
}

fn classify_llm_error(err: LlmError) -> JobErrorCode {
    match err {
        LlmError::Timeout => JobErrorCode::LlmTimeout,
        LlmError::InvalidJson(_) => JobErrorCode::LlmJsonInvalid,
        LlmError::Other(_) => JobErrorCode::LlmTimeout,
    }
}

fn prompts_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "cover_prompt": { "type": "string" },
            "page_prompts": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["cover_prompt", "page_prompts"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::testing::ScriptedLlm;
    use crate::models::{Appearance, Clothing, Style, TargetAge};

    fn spec() -> Specification {
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

    fn story() -> StoryDraft {
        StoryDraft {
            title: "The Fox and the Sky".to_string(),
            pages: vec!["The fox hops.".to_string(), "The sky turns pink.".to_string()],
        }
    }

    fn character() -> CharacterSheet {
        CharacterSheet {
            character_id: "char-1".to_string(),
            master_description: "a small red fox with amber eyes".to_string(),
            appearance: Appearance::default(),
            clothing: Clothing::default(),
            personality_traits: vec![],
            style_notes: String::new(),
        }
    }

    #[tokio::test]
    async fn every_prompt_embeds_character_style_and_negative_clause() {
        let llm = ScriptedLlm::succeeding_with(json!({
            "cover_prompt": "a fox under a painted sky",
            "page_prompts": ["the fox hops in a meadow", "the fox watches the pink sky"]
        }));
        let prompts = build_prompts(&llm, &spec(), &story(), &character()).await.unwrap();

        let style = style_token(Style::Watercolor);
        let negative = negative_prompt_clause();
        for prompt in std::iter::once(&prompts.cover_prompt).chain(prompts.page_prompts.iter()) {
            assert!(prompt.contains(&character().master_description));
            assert!(prompt.contains(style));
            assert!(prompt.contains(&negative));
        }
    }

    #[tokio::test]
    async fn page_prompt_count_mismatch_is_invalid() {
        let llm = ScriptedLlm::succeeding_with(json!({
            "cover_prompt": "a fox under a painted sky",
            "page_prompts": ["only one prompt"]
        }));
        let result = build_prompts(&llm, &spec(), &story(), &character()).await;
        assert_eq!(result, Err(JobErrorCode::LlmJsonInvalid));
    }
}
