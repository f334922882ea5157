//! Container engine access for dockyard
//!
//! This crate provides the [`ContainerEngine`] abstraction over a Docker
//! compatible engine, the bollard backed [`DockerEngine`], and the narrow value
//! types the rest of the workspace works with instead of SDK wire types.

mod docker;
mod error;
mod types;

pub use docker::DockerEngine;
pub use error::*;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// Substring in the engine's reported operating system identifying Docker
/// Toolbox, which cannot share host paths the way dockyard needs.
pub const UNSUPPORTED_ENGINE_MARKER: &str = "boot2docker";

/// Shared, immutable handle to a validated engine connection
pub type EngineHandle = Arc<dyn ContainerEngine>;

/// Trait for container engines (Docker, or anything speaking its API)
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Engine host details
    async fn info(&self) -> Result<EngineInfo>;

    /// Check the engine responds, returning the negotiated API version
    async fn ping(&self) -> Result<String>;

    /// List locally stored images
    async fn list_images(&self) -> Result<Vec<ImageRecord>>;

    /// Pull `image:tag` from its registry
    async fn pull(&self, image: &str, tag: &str) -> Result<()>;

    /// Force-remove a local image
    async fn remove_image(&self, id: &str) -> Result<()>;

    /// List all containers, running or not. With a name filter the engine
    /// may still return partial matches; callers compare names exactly.
    async fn list_containers(&self, name_filter: Option<&str>) -> Result<Vec<ContainerRecord>>;

    /// Create a container with the given name
    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<ContainerId>;

    /// Start a created container
    async fn start(&self, id: &ContainerId) -> Result<()>;

    /// Attach to the container's stdin/stdout/stderr
    async fn attach(&self, id: &ContainerId) -> Result<AttachedStream>;

    /// Block until the container stops, returning its exit status
    async fn wait(&self, id: &ContainerId) -> Result<i64>;

    /// Force-remove a container together with its anonymous volumes
    async fn remove(&self, id: &ContainerId) -> Result<()>;

    /// Resize the container's TTY
    async fn resize(&self, id: &ContainerId, size: TtySize) -> Result<()>;

    /// Stream stdout/stderr of a container. Following starts now, otherwise
    /// the output logged so far is returned.
    async fn logs(&self, id: &ContainerId, follow: bool) -> Result<LogStream>;

    /// Look a network up by name, `None` when it does not exist
    async fn inspect_network(&self, name: &str) -> Result<Option<NetworkRecord>>;

    async fn list_networks(&self) -> Result<Vec<NetworkRecord>>;

    /// Create a plain bridge network. A network with the same name that
    /// already exists is reported as [`ProviderError::Conflict`].
    async fn create_network(&self, name: &str) -> Result<()>;

    async fn connect_network(&self, network: &str, container: &ContainerId) -> Result<()>;

    async fn remove_network(&self, id: &str) -> Result<()>;

    async fn list_volumes(&self) -> Result<Vec<VolumeRecord>>;

    /// Look a volume up by name, `None` when it does not exist
    async fn inspect_volume(&self, name: &str) -> Result<Option<VolumeRecord>>;

    async fn create_volume(&self, name: &str) -> Result<()>;

    async fn remove_volume(&self, name: &str) -> Result<()>;
}

/// Connect to the engine described by `config` and validate it.
///
/// Performs, in order: client construction, an info query that rejects
/// Docker Toolbox, and a version query forcing API negotiation.
pub async fn connect(config: &dockyard_config::EngineConfig) -> Result<EngineHandle> {
    let engine = DockerEngine::connect(config).await?;
    Ok(Arc::new(engine))
}

/// Reject engine variants dockyard cannot work with
pub fn check_engine_info(info: &EngineInfo) -> Result<()> {
    if info
        .operating_system
        .to_lowercase()
        .contains(UNSUPPORTED_ENGINE_MARKER)
    {
        return Err(ProviderError::IncompatibleEngine(
            "Docker Toolbox is not supported".to_string(),
        ));
    }
    Ok(())
}
