//! Storyforge - resumable storyboard generation
//!
//! This library crate exposes the binary's wiring for integration testing.

pub mod app;
