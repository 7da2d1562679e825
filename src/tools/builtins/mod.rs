//! Built-in tool implementations.
//!
//! Each sub-module implements a small family of tools and exposes a
//! `register` function that adds them to a [`ToolRegistry`].

pub mod canvases;
pub mod conversations;
pub mod directory;
pub mod unreads;

use super::ToolRegistry;

/// Register every built-in tool.
pub fn register_all(reg: &mut ToolRegistry) {
    directory::register(reg);
    conversations::register(reg);
    unreads::register(reg);
    canvases::register(reg);
}
