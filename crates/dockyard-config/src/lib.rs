//! Configuration for dockyard
//!
//! This crate handles the global configuration file
//! (`~/.config/dockyard/config.toml` on Linux) and exposes typed sections for
//! the engine connection, the shared network, the image registry, readiness
//! probing and image installation.

mod error;
mod global;

pub use error::*;
pub use global::*;
