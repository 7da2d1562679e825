//! slackwire: Slack workspace directory cache, name resolution and unread
//! triage for tool-calling agents.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod cli;
pub mod config;
pub mod directory;
pub mod logs;
pub mod reference;
pub mod slack;
pub mod tools;
pub mod unreads;
pub mod utils;

/// Return the slackwire home directory.
///
/// Resolution order:
/// 1. `SLACKWIRE_HOME` environment variable
/// 2. `$HOME/.slackwire`
pub fn slackwire_home() -> std::path::PathBuf {
    if let Ok(p) = std::env::var("SLACKWIRE_HOME") {
        std::path::PathBuf::from(p)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".slackwire")
    }
}
