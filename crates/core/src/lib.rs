//! Core of the photo-restoration job scheduler.
//!
//! Everything here is HTTP-agnostic: the in-memory job and photo records,
//! the stage registry, the subprocess worker invoker, the scheduler with
//! its dispatch rules, and the heartbeat and cleanup background logic.
//! The `restora-api` crate wires this into an axum server.

pub mod artifacts;
pub mod cleanup;
pub mod error;
pub mod heartbeat;
pub mod job;
pub mod sanitize;
pub mod scheduler;
pub mod stages;
pub mod store;
pub mod types;
pub mod worker;
