//! Core logic for dockyard
//!
//! This crate provides:
//! - Idempotent container lifecycle management with conflict recovery
//! - Image installation and the private bridge network
//! - Interactive sessions over an attached container, with TTY resizing
//! - Readiness probing with bounded retries
//! - Resolution of the newest compatible image tag for a client version

pub mod compat;
mod error;
pub mod host;
pub mod installer;
pub mod lifecycle;
pub mod network;
pub mod readiness;
pub mod registry;
pub mod session;
pub mod terminal;
pub mod volume;

pub use compat::{resolve_compatible_tag, CompatibleTag};
pub use error::*;
pub use installer::Installer;
pub use lifecycle::LifecycleManager;
pub use network::NetworkManager;
pub use readiness::{wait_until_ready, ProbeError, ReadinessPolicy, TcpProbe};
pub use registry::{RegistryClient, TagSource};
pub use session::Session;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
