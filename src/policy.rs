//! Age and style policy embedded in Stages C and E (SPEC_FULL.md §4.7).

use crate::models::{Style, TargetAge};

/// Hard constraint on a single Stage C page's prose.
#[derive(Debug, Clone, Copy)]
pub struct AgeLimits {
    pub min_sentences: u32,
    pub max_sentences: u32,
    pub max_words: Option<u32>,
}

pub fn age_limits(age: TargetAge) -> AgeLimits {
    match age {
        TargetAge::Age3To5 => AgeLimits {
            min_sentences: 1,
            max_sentences: 2,
            max_words: Some(25),
        },
        TargetAge::Age5To7 => AgeLimits {
            min_sentences: 2,
            max_sentences: 3,
            max_words: Some(40),
        },
        TargetAge::Age7To9 => AgeLimits {
            min_sentences: 2,
            max_sentences: 4,
            max_words: Some(60),
        },
        TargetAge::Adult => AgeLimits {
            min_sentences: 3,
            max_sentences: 6,
            max_words: None,
        },
    }
}

/// A page's text satisfies its age band's length rules.
pub fn page_within_age_limits(text: &str, age: TargetAge) -> bool {
    let limits = age_limits(age);
    let sentence_count = count_sentences(text);
    if sentence_count < limits.min_sentences || sentence_count > limits.max_sentences {
        return false;
    }
    if let Some(max_words) = limits.max_words {
        if count_words(text) > max_words {
            return false;
        }
    }
    true
}

fn count_sentences(text: &str) -> u32 {
    let count = text
        .split(|c| c == '.' || c == '!' || c == '?')
        .filter(|s| !s.trim().is_empty())
        .count();
    count.max(1) as u32
}

fn count_words(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

/// Fixed style-token mapping embedded in every Stage E prompt.
pub fn style_token(style: Style) -> &'static str {
    match style {
        Style::Watercolor => {
            "soft watercolor painting, gentle brush strokes, pastel colors, warm light"
        }
        Style::Cartoon => "vibrant cartoon, bold outlines, bright colors, playful",
        Style::ThreeD => "3D rendered, Pixar-like, cute proportions, soft lighting",
        Style::Pixel => "pixel art, 16-bit retro, limited palette",
        Style::OilPainting => "oil painting illustration, rich texture, warm tones",
        Style::Claymation => "claymation, stop-motion look, textured clay figures",
        Style::Realistic => "photorealistic, natural lighting, fine detail",
    }
}

/// The negative-prompt clause every Stage E prompt must include.
pub fn negative_prompt_clause() -> String {
    let lexicon = crate::capability::BANNED_LEXICON.join(", ");
    format!("no text, no watermark, no signature, no {lexicon}")
}

/// Checks `text` for any `forbidden_elements` term or banned-lexicon term,
/// used by Stage C and Stage G to enforce the `SAFETY_OUTPUT` contract
/// without round-tripping through the moderation port for a plain substring
/// match (SPEC_FULL.md §4.2 Stage C contract).
pub fn find_banned_term(text: &str, forbidden_elements: &[String]) -> Option<String> {
    let lower = text.to_lowercase();
    crate::capability::BANNED_LEXICON
        .iter()
        .map(|s| s.to_string())
        .chain(forbidden_elements.iter().cloned())
        .find(|term| !term.is_empty() && lower.contains(&term.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_3_5_allows_up_to_two_sentences_and_25_words() {
        assert!(page_within_age_limits("The bunny hops. It is happy.", TargetAge::Age3To5));
    }

    #[test]
    fn age_3_5_rejects_too_many_words() {
        let long = "word ".repeat(30);
        assert!(!page_within_age_limits(&long, TargetAge::Age3To5));
    }

    #[test]
    fn adult_has_no_word_cap() {
        let long = format!("{}.", "word ".repeat(200));
        let limits = age_limits(TargetAge::Adult);
        assert!(limits.max_words.is_none());
        let _ = long;
    }

    #[test]
    fn find_banned_term_matches_lexicon_case_insensitively() {
        assert_eq!(
            find_banned_term("a story about a WEAPON", &[]),
            Some("weapon".to_string())
        );
    }

    #[test]
    fn find_banned_term_matches_user_forbidden_elements() {
        assert_eq!(
            find_banned_term("the dragon breathes fire", &["dragon".to_string()]),
            Some("dragon".to_string())
        );
    }

    #[test]
    fn find_banned_term_returns_none_for_clean_text() {
        assert_eq!(find_banned_term("a fox paints the sky", &[]), None);
    }

    #[test]
    fn style_tokens_are_all_distinct() {
        let styles = [
            Style::Watercolor,
            Style::Cartoon,
            Style::ThreeD,
            Style::Pixel,
            Style::OilPainting,
            Style::Claymation,
            Style::Realistic,
        ];
        let mut tokens: Vec<&str> = styles.iter().map(|s| style_token(*s)).collect();
        tokens.sort();
        tokens.dedup();
        assert_eq!(tokens.len(), styles.len());
    }
}
