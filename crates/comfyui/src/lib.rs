//! ComfyUI REST client and execution orchestration.
//!
//! Talks to one ComfyUI server: submits API-format workflows, polls the
//! queue and history until they finish, and assembles the produced
//! artifacts. The node catalog is cached as a versioned snapshot for
//! validation. [`manager::ComfyUIManager`] is the entry point.

pub mod api;
pub mod assembler;
pub mod compat;
pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod manager;
pub mod models;
pub mod orchestrator;
pub mod schema_cache;

#[cfg(test)]
mod testing;

pub use api::{ComfyUIApi, EngineApi};
pub use config::{ComfyConfig, OutputMode, PollConfig};
pub use error::{ComfyError, ComfyResult};
pub use manager::ComfyUIManager;
