//! The private bridge network every dockyard container joins

use crate::Result;
use dockyard_provider::{ContainerId, EngineHandle, NetworkRecord};
use tracing::debug;

/// Ensures the shared network exists and wires containers into it
#[derive(Clone)]
pub struct NetworkManager {
    engine: EngineHandle,
    name: String,
}

impl NetworkManager {
    pub fn new(engine: EngineHandle, name: impl Into<String>) -> Self {
        Self {
            engine,
            name: name.into(),
        }
    }

    /// Name of the managed network
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create the network unless it already exists.
    ///
    /// Safe to call concurrently: losing a creation race to another caller
    /// counts as success.
    pub async fn ensure(&self) -> Result<()> {
        if self.engine.inspect_network(&self.name).await?.is_some() {
            return Ok(());
        }

        debug!("Creating network {}", self.name);
        match self.engine.create_network(&self.name).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_conflict() => {
                debug!("Network {} created concurrently", self.name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Connect a container to the network, creating the network on demand
    pub async fn connect(&self, container: &ContainerId) -> Result<()> {
        self.ensure().await?;
        debug!("Connecting {} to network {}", container.short(), self.name);
        self.engine.connect_network(&self.name, container).await?;
        Ok(())
    }

    /// Remove the network. An absent network is not an error.
    pub async fn remove(&self) -> Result<()> {
        match self.engine.remove_network(&self.name).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list(&self) -> Result<Vec<NetworkRecord>> {
        Ok(self.engine.list_networks().await?)
    }
}
