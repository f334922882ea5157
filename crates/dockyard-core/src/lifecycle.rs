//! Idempotent create-or-reuse of named containers

use crate::installer::split_image_id;
use crate::{CoreError, NetworkManager, Result};
use dockyard_provider::{ContainerId, ContainerRecord, ContainerSpec, EngineHandle, LogStream};
use std::future::Future;
use tracing::{debug, warn};

/// Manages named containers on a single engine.
///
/// A name maps to at most one container. Creation that collides with an
/// existing container of the same name removes that container and retries
/// once, so a stopped leftover never blocks a fresh start.
#[derive(Clone)]
pub struct LifecycleManager {
    engine: EngineHandle,
    network: NetworkManager,
}

impl LifecycleManager {
    pub fn new(engine: EngineHandle, network: NetworkManager) -> Self {
        Self { engine, network }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn network(&self) -> &NetworkManager {
        &self.network
    }

    async fn lookup(&self, name: &str) -> Result<Option<ContainerRecord>> {
        let containers = self.engine.list_containers(Some(name)).await?;
        Ok(containers.into_iter().find(|c| c.name == name))
    }

    /// Record of the container with exactly this name
    pub async fn info(&self, name: &str) -> Result<ContainerRecord> {
        self.lookup(name)
            .await?
            .ok_or_else(|| CoreError::ContainerNotFound(name.to_string()))
    }

    /// Whether a container with this name is running.
    ///
    /// A non-empty `image` must also match the container's image name and tag.
    pub async fn is_running(&self, name: &str, image: &str) -> Result<bool> {
        let record = match self.lookup(name).await? {
            Some(record) if record.is_running() => record,
            _ => return Ok(false),
        };

        if image.is_empty() {
            return Ok(true);
        }
        Ok(split_image_id(&record.image) == split_image_id(image))
    }

    /// Return the running container, or run `start_fn` and return the result.
    ///
    /// With a non-empty `image`, a running container built from a different
    /// image name or tag does not count, and `start_fn` replaces it. Otherwise
    /// a running container is returned as is.
    pub async fn ensure_running<F, Fut>(
        &self,
        name: &str,
        image: &str,
        start_fn: F,
    ) -> Result<ContainerRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if self.is_running(name, image).await? {
            debug!("Container {} already running", name);
            return self.info(name).await;
        }

        start_fn()
            .await
            .map_err(|e| CoreError::action(format!("could not create {}", name), e))?;

        self.info(name).await
    }

    /// Create a container, replacing any existing container with the same name
    pub async fn create(&self, spec: &ContainerSpec, name: &str) -> Result<ContainerId> {
        let create_err = match self.engine.create(name, spec).await {
            Ok(id) => return Ok(id),
            Err(e) => e,
        };

        let existing = match self.lookup(name).await {
            Ok(Some(record)) => record,
            _ => return Err(create_err.into()),
        };

        debug!(
            "Container {} exists as {}, recreating",
            name,
            existing.id.short()
        );
        if let Err(e) = self.engine.remove(&existing.id).await {
            warn!("Could not remove container {}: {}", name, e);
            return Err(e.into());
        }

        Ok(self.engine.create(name, spec).await?)
    }

    /// Create, connect to the shared network and start a container
    pub async fn start(&self, spec: &ContainerSpec, name: &str) -> Result<ContainerId> {
        let id = self
            .create(spec, name)
            .await
            .map_err(|e| CoreError::action(format!("could not create container {}", name), e))?;

        self.network
            .connect(&id)
            .await
            .map_err(|e| CoreError::action("could not connect to network", e))?;

        self.engine
            .start(&id)
            .await
            .map_err(|e| CoreError::action(format!("could not start container {}", name), e))?;

        Ok(id)
    }

    /// Force-remove the named container along with its anonymous volumes
    pub async fn remove(&self, name: &str) -> Result<()> {
        let record = self.info(name).await?;
        debug!("Removing container {}", name);
        self.engine.remove(&record.id).await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ContainerRecord>> {
        Ok(self.engine.list_containers(None).await?)
    }

    /// Output of the named container, new lines only when following
    pub async fn logs(&self, name: &str, follow: bool) -> Result<LogStream> {
        let record = self.info(name).await?;
        Ok(self.engine.logs(&record.id, follow).await?)
    }
}
