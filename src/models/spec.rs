use serde::{Deserialize, Serialize};

/// Target age band; governs Stage C's sentence/word limits (see `crate::policy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetAge {
    #[serde(rename = "3-5")]
    Age3To5,
    #[serde(rename = "5-7")]
    Age5To7,
    #[serde(rename = "7-9")]
    Age7To9,
    Adult,
}

/// Visual style; governs the style token embedded in every Stage E prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    Watercolor,
    Cartoon,
    #[serde(rename = "3d")]
    ThreeD,
    Pixel,
    OilPainting,
    Claymation,
    Realistic,
}

pub const MIN_PAGE_COUNT: u32 = 6;
pub const MAX_PAGE_COUNT: u32 = 12;
pub const DEFAULT_PAGE_COUNT: u32 = 8;
pub const MIN_TOPIC_LEN: usize = 1;
pub const MAX_TOPIC_LEN: usize = 200;
pub const MIN_USER_KEY_LEN: usize = 10;

/// The frozen input to a job. Immutable once the job is queued (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Specification {
    pub topic: String,
    pub language: String,
    pub target_age: TargetAge,
    pub style: Style,
    pub theme: Option<String>,
    #[serde(default = "default_page_count")]
    pub page_count: u32,
    pub character_id: Option<String>,
    #[serde(default)]
    pub character_ids: Vec<String>,
    #[serde(default)]
    pub forbidden_elements: Vec<String>,
}

fn default_page_count() -> u32 {
    DEFAULT_PAGE_COUNT
}

impl Specification {
    /// Structural validation performed by Stage A / Admission before any
    /// side effect runs. Returns the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        let topic_len = self.topic.chars().count();
        if !(MIN_TOPIC_LEN..=MAX_TOPIC_LEN).contains(&topic_len) {
            return Err(format!(
                "topic must be {MIN_TOPIC_LEN}-{MAX_TOPIC_LEN} characters, got {topic_len}"
            ));
        }
        if !(MIN_PAGE_COUNT..=MAX_PAGE_COUNT).contains(&self.page_count) {
            return Err(format!(
                "page_count must be {MIN_PAGE_COUNT}-{MAX_PAGE_COUNT}, got {}",
                self.page_count
            ));
        }
        Ok(())
    }

    /// §9 Open Question (c): when both `character_id` and `character_ids`
    /// are present, prefer the list and ignore the singular.
    pub fn effective_character_ids(&self) -> Vec<String> {
        if !self.character_ids.is_empty() {
            self.character_ids.clone()
        } else {
            self.character_id.clone().into_iter().collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec() -> Specification {
        Specification {
            topic: "a rabbit who learns to fly".to_string(),
            language: "en".to_string(),
            target_age: TargetAge::Age5To7,
            style: Style::Watercolor,
            theme: None,
            page_count: DEFAULT_PAGE_COUNT,
            character_id: None,
            character_ids: vec![],
            forbidden_elements: vec![],
        }
    }

    #[test]
    fn accepts_boundary_page_counts() {
        let mut spec = base_spec();
        spec.page_count = MIN_PAGE_COUNT;
        assert!(spec.validate().is_ok());
        spec.page_count = MAX_PAGE_COUNT;
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_page_counts() {
        let mut spec = base_spec();
        spec.page_count = MIN_PAGE_COUNT - 1;
        assert!(spec.validate().is_err());
        spec.page_count = MAX_PAGE_COUNT + 1;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_empty_topic() {
        let mut spec = base_spec();
        spec.topic = String::new();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn prefers_character_ids_list_over_singular() {
        let mut spec = base_spec();
        spec.character_id = Some("solo".to_string());
        spec.character_ids = vec!["a".to_string(), "b".to_string()];
        assert_eq!(spec.effective_character_ids(), vec!["a", "b"]);
    }

    #[test]
    fn falls_back_to_singular_character_id() {
        let mut spec = base_spec();
        spec.character_id = Some("solo".to_string());
        assert_eq!(spec.effective_character_ids(), vec!["solo"]);
    }
}
