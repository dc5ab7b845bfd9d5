//! Durable persistence: the Job Store (C2) plus the Character and Book
//! stores it shares a connection pool with. All three follow the teacher's
//! `rusqlite` behind `Arc<tokio::sync::Mutex<Connection>>` pattern, with
//! schema created via `CREATE TABLE IF NOT EXISTS` at construction time.

mod artifact_store;
mod book_store;
mod character_store;
mod job_store;

pub use artifact_store::{ArtifactStore, SqliteArtifactStore};
pub use book_store::{BookStore, SqliteBookStore};
pub use character_store::{CharacterStore, SqliteCharacterStore};
pub use job_store::{JobStore, SqliteJobStore};
