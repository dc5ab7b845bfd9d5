//! Stage B — Moderate Input: safety classification of `topic` and
//! `forbidden_elements` (timeout 10s, no retries, SPEC_FULL.md §4.2).

use crate::capability::ContentModeration;
use crate::error::JobErrorCode;
use crate::models::{ModerationVerdict, Specification};

pub async fn moderate_input(
    moderation: &dyn ContentModeration,
    spec: &Specification,
) -> Result<ModerationVerdict, JobErrorCode> {
    let haystack = format!("{} {}", spec.topic, spec.forbidden_elements.join(" "));
    match moderation.classify_text(&haystack).await {
        crate::capability::Moderation::Safe => Ok(ModerationVerdict::Safe),
        crate::capability::Moderation::Unsafe { reason } => {
            let _ = ModerationVerdict::Unsafe { reason };
            Err(JobErrorCode::SafetyInput)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::testing::LexiconModeration;
    use crate::models::{Style, TargetAge};

    fn spec(topic: &str) -> Specification {
        Specification {
            topic: topic.to_string(),
            language: "en".to_string(),
            target_age: TargetAge::Age5To7,
            style: Style::Watercolor,
            theme: None,
            page_count: 8,
            character_id: None,
            character_ids: vec![],
            forbidden_elements: vec![],
        }
    }

    #[tokio::test]
    async fn safe_topic_passes() {
        let moderation = LexiconModeration::new();
        let result = moderate_input(&moderation, &spec("a fox who paints the sky")).await;
        assert!(matches!(result, Ok(ModerationVerdict::Safe)));
    }

    #[tokio::test]
    async fn banned_term_fails_with_safety_input() {
        let moderation = LexiconModeration::new();
        let result = moderate_input(&moderation, &spec("a story about a weapon")).await;
        assert!(matches!(result, Err(JobErrorCode::SafetyInput)));
    }
}
