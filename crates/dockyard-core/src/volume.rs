//! Named volume helpers

use crate::Result;
use dockyard_provider::{ContainerEngine, VolumeRecord};
use tracing::debug;

/// Create the volume unless it exists
pub async fn ensure_volume(engine: &dyn ContainerEngine, name: &str) -> Result<()> {
    if engine.inspect_volume(name).await?.is_some() {
        return Ok(());
    }

    debug!("Creating volume {}", name);
    match engine.create_volume(name).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_conflict() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub async fn list_volumes(engine: &dyn ContainerEngine) -> Result<Vec<VolumeRecord>> {
    Ok(engine.list_volumes().await?)
}

/// Force-remove a volume
pub async fn remove_volume(engine: &dyn ContainerEngine, name: &str) -> Result<()> {
    engine.remove_volume(name).await?;
    Ok(())
}
