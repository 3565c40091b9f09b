// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod command;
pub mod config;
pub mod discord;
pub mod history;
pub mod metrics;
pub mod poster;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod source;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::poster::{CycleReport, Poster, PosterSettings};
pub use crate::scheduler::ReadyGate;
