//! Stage D — Character: loads a referenced character sheet or generates a
//! fresh one via the LLM (timeout 20s, 1 retry, backoff 2s; SPEC_FULL.md
//! §4.2). The sheet's `master_description` is the canonical visual anchor
//! every later image prompt must embed.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::capability::{LlmCompletion, LlmError};
use crate::error::JobErrorCode;
use crate::models::{Appearance, CharacterSheet, Clothing, Specification};
use crate::pipeline::stage_runner::retry_with_backoff;
use crate::store::CharacterStore;

const TIMEOUT: Duration = Duration::from_secs(20);
const MAX_RETRIES: u32 = 1;
const BACKOFF: [Duration; 1] = [Duration::from_secs(2)];

#[derive(Deserialize)]
struct RawSheet {
    master_description: String,
    appearance: Appearance,
    clothing: Clothing,
    personality_traits: Vec<String>,
    style_notes: String,
}

pub async fn resolve_character(
    llm: &dyn LlmCompletion,
    character_store: &dyn CharacterStore,
    spec: &Specification,
    character_ids: &[String],
) -> Result<CharacterSheet, JobErrorCode> {
    if let Some(id) = character_ids.first() {
        match character_store.get(id).await {
            Ok(Some(sheet)) => return Ok(sheet),
            Ok(None) => warn!(character_id = %id, "referenced character not found, generating a fresh one"),
            Err(e) => warn!(error = %e, character_id = %id, "character lookup failed, generating a fresh one"),
        }
    }

    let sheet = generate_character(llm, spec).await?;
    let now = chrono::Utc::now();
    if let Err(e) = character_store.insert(&sheet, now).await {
        warn!(error = %e, character_id = %sheet.character_id, "failed to persist generated character sheet");
        return Err(JobErrorCode::DbWriteFailed);
    }
    Ok(sheet)
}

async fn generate_character(llm: &dyn LlmCompletion, spec: &Specification) -> Result<CharacterSheet, JobErrorCode> {
    let prompt = format!(
        "Invent a single consistent illustrated-book character for a story about: {}. Theme: {}.",
        spec.topic,
        spec.theme.as_deref().unwrap_or("none"),
    );
    let schema = character_schema();

    retry_with_backoff(MAX_RETRIES, &BACKOFF, || async {
        let value = llm
            .complete(&prompt, &schema, TIMEOUT)
            .await
            .map_err(classify_llm_error)?;
        let raw: RawSheet = serde_json::from_value(value).map_err(|_| JobErrorCode::LlmJsonInvalid)?;
        Ok(CharacterSheet {
            character_id: Uuid::new_v4().to_string(),
            master_description: raw.master_description,
            appearance: raw.appearance,
            clothing: raw.clothing,
            personality_traits: raw.personality_traits,
            style_notes: raw.style_notes,
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

fn character_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "master_description": { "type": "string" },
            "appearance": { "type": "object" },
            "clothing": { "type": "object" },
            "personality_traits": { "type": "array", "items": { "type": "string" } },
            "style_notes": { "type": "string" }
        },
        "required": ["master_description", "appearance", "clothing", "personality_traits", "style_notes"]
    })
}
