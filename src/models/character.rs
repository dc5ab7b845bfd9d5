use serde::{Deserialize, Serialize};

/// Structured physical description, part of a `CharacterSheet`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Appearance {
    pub species_or_ethnicity: String,
    pub age_look: String,
    pub hair: String,
    pub eyes: String,
    pub distinguishing_features: Vec<String>,
}

/// Structured wardrobe description, part of a `CharacterSheet`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Clothing {
    pub outfit: String,
    pub colors: Vec<String>,
    pub accessories: Vec<String>,
}

/// Stable visual identity, either loaded via `character_id(s)` or generated
/// fresh by Stage D and persisted with a new id (SPEC_FULL.md §3, §4.2 D).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterSheet {
    pub character_id: String,
    pub master_description: String,
    pub appearance: Appearance,
    pub clothing: Clothing,
    pub personality_traits: Vec<String>,
    pub style_notes: String,
}
