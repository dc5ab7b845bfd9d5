//! The Orchestrator (C7) and its eight Stages (C6), driving one job from
//! `queued` to `done`/`failed` (SPEC_FULL.md §4.2).

pub mod stage_runner;
pub mod stages;

mod orchestrator;

pub use orchestrator::Orchestrator;
