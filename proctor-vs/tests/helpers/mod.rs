//! Test Helper Utilities
//!
//! Shared utilities for testing proctor-vs

#![allow(dead_code)]

pub mod harness;
pub mod scripted;

pub use harness::{alert, wait_for_idle, TestHarness};
pub use scripted::{marker_png, FlakyRenderer, Marker, ScriptedDetector};
