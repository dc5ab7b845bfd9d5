//! `storybook_forge`: a job-orchestration backend that turns a
//! `Specification` into a finished illustrated storybook through an
//! eight-stage pipeline (SPEC_FULL.md §1). This crate exposes the core
//! (Admission, the Orchestrator and its Stages, the Job Monitor, and the
//! durable stores) as a library so `main.rs` and integration tests can
//! assemble it with either real provider adapters or the in-memory test
//! doubles under `capability::testing`.

pub mod admission;
pub mod capability;
pub mod clock;
pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod monitor;
pub mod pipeline;
pub mod policy;
pub mod ratelimit;
pub mod store;
