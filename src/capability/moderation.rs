use async_trait::async_trait;

/// Pure function from the Orchestrator's perspective: `safe` or
/// `unsafe(reason)` (SPEC_FULL.md §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Moderation {
    Safe,
    Unsafe { reason: String },
}

impl Moderation {
    pub fn is_safe(&self) -> bool {
        matches!(self, Moderation::Safe)
    }
}

#[async_trait]
pub trait ContentModeration: Send + Sync {
    async fn classify_text(&self, text: &str) -> Moderation;
    async fn classify_image(&self, image_bytes: &[u8]) -> Moderation;
}

/// The fixed safety-banned lexicon referenced throughout SPEC_FULL.md §4.2.
/// A production moderation provider would classify far more than substring
/// matches; this lexicon is the minimum both Stage B/G and Stage E's
/// negative-prompt clause must agree on.
pub const BANNED_LEXICON: &[&str] = &["gore", "weapon", "suicide", "self-harm", "hateful slur"];

pub mod testing {
    use super::*;

    /// Flags any text/forbidden-element match against a fixed lexicon plus
    /// whatever extra banned terms a test wants to inject.
    pub struct LexiconModeration {
        pub extra_banned: Vec<String>,
    }

    impl LexiconModeration {
        pub fn new() -> Self {
            Self { extra_banned: vec![] }
        }

        pub fn with_banned(terms: Vec<String>) -> Self {
            Self { extra_banned: terms }
        }

        fn banned_hit(&self, haystack: &str) -> Option<String> {
            let lower = haystack.to_lowercase();
            BANNED_LEXICON
                .iter()
                .map(|s| s.to_string())
                .chain(self.extra_banned.iter().cloned())
                .find(|term| lower.contains(&term.to_lowercase()))
        }
    }

    impl Default for LexiconModeration {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ContentModeration for LexiconModeration {
        async fn classify_text(&self, text: &str) -> Moderation {
            match self.banned_hit(text) {
                Some(reason) => Moderation::Unsafe { reason },
                None => Moderation::Safe,
            }
        }

        async fn classify_image(&self, _image_bytes: &[u8]) -> Moderation {
            Moderation::Safe
        }
    }
}
