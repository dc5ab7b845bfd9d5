//! Stage G — Moderate Output: re-checks the generated title and each page
//! against safety rules, rewriting only the flagged unit (not the whole
//! story) up to 2 cycles before failing terminally (timeout 10s per check,
//! no external retries; SPEC_FULL.md §4.2).

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::capability::{ContentModeration, LlmCompletion, LlmError};
use crate::error::JobErrorCode;
use crate::models::{ModerationVerdict, Specification, StoryDraft};

const MAX_REWRITE_CYCLES: u32 = 2;
const TIMEOUT: Duration = Duration::from_secs(10);

enum FlaggedUnit {
    Title,
    Page(usize),
}

pub async fn moderate_output(
    moderation: &dyn ContentModeration,
    llm: &dyn LlmCompletion,
    spec: &Specification,
    mut draft: StoryDraft,
) -> Result<(StoryDraft, ModerationVerdict), JobErrorCode> {
    for _ in 0..MAX_REWRITE_CYCLES {
        let flagged = flagged_units(moderation, &draft).await;
        if flagged.is_empty() {
            return Ok((draft, ModerationVerdict::Safe));
        }
        for unit in flagged {
            match unit {
                FlaggedUnit::Title => draft.title = rewrite_title(llm, spec, &draft).await?,
                FlaggedUnit::Page(i) => draft.pages[i] = rewrite_page(llm, spec, &draft, i).await?,
            }
        }
    }

    if flagged_units(moderation, &draft).await.is_empty() {
        Ok((draft, ModerationVerdict::Safe))
    } else {
        Err(JobErrorCode::SafetyOutput)
    }
}

async fn flagged_units(moderation: &dyn ContentModeration, draft: &StoryDraft) -> Vec<FlaggedUnit> {
    let mut flagged = Vec::new();
    if !moderation.classify_text(&draft.title).await.is_safe() {
        flagged.push(FlaggedUnit::Title);
    }
    for (i, page) in draft.pages.iter().enumerate() {
        if !moderation.classify_text(page).await.is_safe() {
            flagged.push(FlaggedUnit::Page(i));
        }
    }
    flagged
}

#[derive(Deserialize)]
struct RawRewrite {
    text: String,
}

async fn rewrite_title(llm: &dyn LlmCompletion, spec: &Specification, draft: &StoryDraft) -> Result<String, JobErrorCode> {
    let prompt = format!(
        "Rewrite only the title of this children's story about {}. The current title failed a safety \
         review; keep it consistent with the pages but remove anything unsafe for the target age band. \
         Current title: {}.",
        spec.topic, draft.title,
    );
    rewrite(llm, &prompt).await
}

async fn rewrite_page(
    llm: &dyn LlmCompletion,
    spec: &Specification,
    draft: &StoryDraft,
    page_index: usize,
) -> Result<String, JobErrorCode> {
    let prompt = format!(
        "Rewrite only page {} of the children's story titled \"{}\" (topic: {}). That page failed a \
         safety review; keep the other pages' events consistent but remove anything unsafe for the \
         target age band. Current page text: {}.",
        page_index + 1,
        draft.title,
        spec.topic,
        draft.pages[page_index],
    );
    rewrite(llm, &prompt).await
}

async fn rewrite(llm: &dyn LlmCompletion, prompt: &str) -> Result<String, JobErrorCode> {
    let schema = json!({
        "type": "object",
        "properties": { "text": { "type": "string" } },
        "required": ["text"]
    });
    let value = llm.complete(prompt, &schema, TIMEOUT).await.map_err(classify_llm_error)?;
    let raw: RawRewrite = serde_json::from_value(value).map_err(|_| JobErrorCode::LlmJsonInvalid)?;
    Ok(raw.text)
}

fn classify_llm_error(err: LlmError) -> JobErrorCode {
    match err {
        LlmError::Timeout => JobErrorCode::LlmTimeout,
        LlmError::InvalidJson(_) => JobErrorCode::LlmJsonInvalid,
        LlmError::Other(_) => JobErrorCode::LlmTimeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::testing::{LexiconModeration, ScriptedLlm};
    use crate::models::{Style, TargetAge};
    use serde_json::json;

    fn spec() -> Specification {
        Specification {
            topic: "a fox who paints the sky".to_string(),
            language: "en".to_string(),
            target_age: TargetAge::Age5To7,
            style: Style::Watercolor,
            theme: None,
            page_count: 1,
            character_id: None,
            character_ids: vec![],
            forbidden_elements: vec![],
        }
    }

    #[tokio::test]
    async fn safe_draft_passes_without_rewriting() {
        let moderation = LexiconModeration::new();
        let llm = ScriptedLlm::new(vec![]);
        let draft = StoryDraft {
            title: "The Fox and the Sky".to_string(),
            pages: vec!["The fox is happy.".to_string()],
        };
        let (result_draft, verdict) = moderate_output(&moderation, &llm, &spec(), draft.clone())
            .await
            .unwrap();
        assert_eq!(result_draft, draft);
        assert!(matches!(verdict, ModerationVerdict::Safe));
    }

    #[tokio::test]
    async fn unsafe_page_is_rewritten_until_safe() {
        let moderation = LexiconModeration::new();
        let llm = ScriptedLlm::succeeding_with(json!({ "text": "The fox is happy." }));
        let draft = StoryDraft {
            title: "The Fox and the Sky".to_string(),
            pages: vec!["a weapon appears".to_string()],
        };
        let (result_draft, verdict) = moderate_output(&moderation, &llm, &spec(), draft).await.unwrap();
        assert_eq!(result_draft.pages[0], "The fox is happy.");
        assert!(matches!(verdict, ModerationVerdict::Safe));
    }

    #[tokio::test]
    async fn rewriting_a_flagged_page_leaves_other_pages_untouched() {
        let moderation = LexiconModeration::new();
        let llm = ScriptedLlm::succeeding_with(json!({ "text": "The fox paints calmly." }));
        let draft = StoryDraft {
            title: "The Fox and the Sky".to_string(),
            pages: vec![
                "The fox wakes up.".to_string(),
                "a weapon appears".to_string(),
                "The fox goes to sleep.".to_string(),
            ],
        };
        let (result_draft, verdict) = moderate_output(&moderation, &llm, &spec(), draft).await.unwrap();
        assert_eq!(result_draft.pages[0], "The fox wakes up.", "untouched page must survive the rewrite cycle");
        assert_eq!(result_draft.pages[1], "The fox paints calmly.");
        assert_eq!(result_draft.pages[2], "The fox goes to sleep.", "untouched page must survive the rewrite cycle");
        assert!(matches!(verdict, ModerationVerdict::Safe));
    }

    #[tokio::test]
    async fn still_unsafe_after_rewrite_budget_fails_terminally() {
        let moderation = LexiconModeration::new();
        let llm = ScriptedLlm::succeeding_with(json!({ "text": "a weapon appears" }));
        let draft = StoryDraft {
            title: "The Fox and the Sky".to_string(),
            pages: vec!["a weapon appears".to_string()],
        };
        let result = moderate_output(&moderation, &llm, &spec(), draft).await;
        assert_eq!(result.err(), Some(JobErrorCode::SafetyOutput));
    }
}
