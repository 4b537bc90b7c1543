//! Database query modules.

pub mod storyboards;
