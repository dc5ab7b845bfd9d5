use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::models::CharacterSheet;

#[async_trait]
pub trait CharacterStore: Send + Sync {
    async fn insert(&self, sheet: &CharacterSheet, now: DateTime<Utc>) -> Result<()>;
    async fn get(&self, character_id: &str) -> Result<Option<CharacterSheet>>;
    async fn get_many(&self, character_ids: &[String]) -> Result<Vec<CharacterSheet>>;
}

pub struct SqliteCharacterStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCharacterStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        let guard = conn.blocking_lock();
        guard.execute(
            "CREATE TABLE IF NOT EXISTS characters (
                character_id TEXT PRIMARY KEY,
                master_description TEXT NOT NULL,
                appearance_json TEXT NOT NULL,
                clothing_json TEXT NOT NULL,
                personality_json TEXT NOT NULL,
                style_notes TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        drop(guard);
        Ok(Self { conn })
    }
}

fn row_to_sheet(row: &rusqlite::Row) -> rusqlite::Result<CharacterSheet> {
    let appearance_json: String = row.get("appearance_json")?;
    let clothing_json: String = row.get("clothing_json")?;
    let personality_json: String = row.get("personality_json")?;
    Ok(CharacterSheet {
        character_id: row.get("character_id")?,
        master_description: row.get("master_description")?,
        appearance: serde_json::from_str(&appearance_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        clothing: serde_json::from_str(&clothing_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        personality_traits: serde_json::from_str(&personality_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        style_notes: row.get("style_notes")?,
    })
}

#[async_trait]
impl CharacterStore for SqliteCharacterStore {
    async fn insert(&self, sheet: &CharacterSheet, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO characters (character_id, master_description, appearance_json,
                clothing_json, personality_json, style_notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(character_id) DO UPDATE SET
                master_description = excluded.master_description,
                appearance_json = excluded.appearance_json,
                clothing_json = excluded.clothing_json,
                personality_json = excluded.personality_json,
                style_notes = excluded.style_notes",
            params![
                sheet.character_id,
                sheet.master_description,
                serde_json::to_string(&sheet.appearance)?,
                serde_json::to_string(&sheet.clothing)?,
                serde_json::to_string(&sheet.personality_traits)?,
                sheet.style_notes,
                now.to_rfc3339(),
            ],
        )
        .context("insert character sheet")?;
        Ok(())
    }

    async fn get(&self, character_id: &str) -> Result<Option<CharacterSheet>> {
        let conn = self.conn.lock().await;
        let sheet = conn
            .query_row(
                "SELECT * FROM characters WHERE character_id = ?1",
                params![character_id],
                row_to_sheet,
            )
            .optional()
            .context("query character by id")?;
        Ok(sheet)
    }

    async fn get_many(&self, character_ids: &[String]) -> Result<Vec<CharacterSheet>> {
        let mut out = Vec::with_capacity(character_ids.len());
        for id in character_ids {
            if let Some(sheet) = self.get(id).await? {
                out.push(sheet);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Appearance, Clothing};

    fn test_store() -> SqliteCharacterStore {
        let conn = Connection::open_in_memory().unwrap();
        SqliteCharacterStore::new(Arc::new(Mutex::new(conn))).unwrap()
    }

    fn test_sheet(id: &str) -> CharacterSheet {
        CharacterSheet {
            character_id: id.to_string(),
            master_description: "a small red fox with a curious expression".to_string(),
            appearance: Appearance {
                species_or_ethnicity: "fox".to_string(),
                age_look: "young".to_string(),
                hair: "russet fur".to_string(),
                eyes: "amber".to_string(),
                distinguishing_features: vec!["white-tipped tail".to_string()],
            },
            clothing: Clothing {
                outfit: "blue scarf".to_string(),
                colors: vec!["blue".to_string()],
                accessories: vec![],
            },
            personality_traits: vec!["curious".to_string(), "brave".to_string()],
            style_notes: "keep proportions consistent across pages".to_string(),
        }
    }

    #[tokio::test]
    async fn insert_and_get_round_trips() {
        let store = test_store();
        let sheet = test_sheet("char-1");
        store.insert(&sheet, Utc::now()).await.unwrap();

        let fetched = store.get("char-1").await.unwrap().unwrap();
        assert_eq!(fetched.master_description, sheet.master_description);
        assert_eq!(fetched.appearance.eyes, "amber");
    }

    #[tokio::test]
    async fn get_many_skips_missing_ids() {
        let store = test_store();
        store.insert(&test_sheet("char-a"), Utc::now()).await.unwrap();

        let found = store
            .get_many(&["char-a".to_string(), "char-missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].character_id, "char-a");
    }
}
