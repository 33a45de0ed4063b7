//! Utility modules

pub mod retry;

pub use retry::{retry_budget, retry_on_lock, retry_transient};
