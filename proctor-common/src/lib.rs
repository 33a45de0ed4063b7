//! # Proctor Common Library
//!
//! Shared code for the proctor verification services:
//! - Error type shared across crates
//! - Configuration loading (TOML bootstrap + root folder resolution)
//! - Pipeline event types (ProctorEvent) and the EventBus
//! - SSE stream helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
