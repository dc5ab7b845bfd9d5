//! Narrow capability interfaces for the four external collaborators the
//! core depends on (SPEC_FULL.md §6). Production adapters implement these
//! traits and are not part of this core; each port also ships an in-memory
//! test double so the Orchestrator's tests never perform real network I/O,
//! mirroring how `scrapers::*` isolates the teacher's trading engine from
//! its external feeds behind a narrow boundary.

mod image;
mod llm;
mod moderation;
mod storage;

pub use image::{ImageError, ImageGeneration};
pub use llm::{LlmCompletion, LlmError};
pub use moderation::{ContentModeration, Moderation, BANNED_LEXICON};
pub use storage::{ObjectStore, StorageError};

/// In-memory test doubles for all four ports, used by the Orchestrator's
/// own tests and available to integration tests under `tests/`.
pub mod testing {
    pub use super::image::testing::*;
    pub use super::llm::testing::*;
    pub use super::moderation::testing::*;
    pub use super::storage::testing::*;
}
