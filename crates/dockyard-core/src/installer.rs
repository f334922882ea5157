//! Local image installation

use crate::{CoreError, Result};
use dockyard_provider::EngineHandle;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_TAG: &str = "latest";

/// Split an image reference into name and tag, defaulting the tag to `latest`.
///
/// A colon before the last `/` belongs to a registry host port, not a tag.
pub fn split_image_id(id: &str) -> (String, String) {
    let name_start = id.rfind('/').map(|i| i + 1).unwrap_or(0);
    match id[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            let tag = &id[split + 1..];
            let tag = if tag.is_empty() { DEFAULT_TAG } else { tag };
            (id[..split].to_string(), tag.to_string())
        }
        None => (id.to_string(), DEFAULT_TAG.to_string()),
    }
}

/// Ensures images are present in the engine's local store
pub struct Installer {
    engine: EngineHandle,
    pull_timeout: Duration,
}

impl Installer {
    pub fn new(engine: EngineHandle, pull_timeout: Duration) -> Self {
        Self {
            engine,
            pull_timeout,
        }
    }

    /// Tags of `image` present locally
    pub async fn versions_installed(&self, image: &str) -> Result<Vec<String>> {
        let images = self.engine.list_images().await?;

        let mut versions = Vec::new();
        for record in images {
            for reference in &record.repo_tags {
                let (name, tag) = split_image_id(reference);
                if name == image {
                    versions.push(tag);
                }
            }
        }
        Ok(versions)
    }

    /// Whether `image:version` is present. An empty version matches any tag.
    pub async fn is_installed(&self, image: &str, version: &str) -> Result<bool> {
        let versions = self.versions_installed(image).await?;
        if version.is_empty() {
            return Ok(!versions.is_empty());
        }
        Ok(versions.iter().any(|v| v == version))
    }

    /// Pull `image:version` unless it is already installed
    pub async fn ensure_installed(&self, image: &str, version: &str) -> Result<()> {
        if self.is_installed(image, version).await? {
            debug!("Image {}:{} already installed", image, version);
            return Ok(());
        }

        let tag = if version.is_empty() {
            DEFAULT_TAG
        } else {
            version
        };
        let reference = format!("{}:{}", image, tag);

        info!("Installing image {}", reference);
        match tokio::time::timeout(self.pull_timeout, self.engine.pull(image, tag)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(CoreError::action(
                    format!("could not install image {}", reference),
                    e,
                ))
            }
            Err(_) => {
                return Err(CoreError::InstallFailed(format!(
                    "pulling {} timed out after {:?}",
                    reference, self.pull_timeout
                )))
            }
        }

        if !self.is_installed(image, tag).await? {
            return Err(CoreError::InstallFailed(format!(
                "{} not present after pull",
                reference
            )));
        }
        Ok(())
    }

    /// Force-remove a local image
    pub async fn remove_image(&self, id: &str) -> Result<()> {
        self.engine.remove_image(id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockCall, MockEngine};
    use std::sync::Arc;

    #[test]
    fn test_split_image_id() {
        assert_eq!(
            split_image_id("srcd/gitbase:v0.24.0"),
            ("srcd/gitbase".to_string(), "v0.24.0".to_string())
        );
        assert_eq!(
            split_image_id("mysql"),
            ("mysql".to_string(), "latest".to_string())
        );
        assert_eq!(
            split_image_id("localhost:5000/tools/db"),
            ("localhost:5000/tools/db".to_string(), "latest".to_string())
        );
        assert_eq!(
            split_image_id("localhost:5000/db:1.2"),
            ("localhost:5000/db".to_string(), "1.2".to_string())
        );
        assert_eq!(
            split_image_id("mysql:"),
            ("mysql".to_string(), "latest".to_string())
        );
    }

    #[tokio::test]
    async fn test_versions_installed() {
        let mock = MockEngine::new();
        mock.add_image(&["srcd/gitbase:v0.24.0", "srcd/gitbase:latest"]);
        mock.add_image(&["mysql:8.0.16"]);
        let installer = Installer::new(Arc::new(mock), Duration::from_secs(5));

        let mut versions = installer.versions_installed("srcd/gitbase").await.unwrap();
        versions.sort();
        assert_eq!(versions, vec!["latest", "v0.24.0"]);
        assert!(installer.is_installed("mysql", "").await.unwrap());
        assert!(!installer.is_installed("mysql", "5.7").await.unwrap());
        assert!(!installer.is_installed("bblfsh/bblfshd", "").await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_installed_pulls_missing_image() {
        let mock = Arc::new(MockEngine::new());
        let installer = Installer::new(mock.clone(), Duration::from_secs(5));

        installer.ensure_installed("bblfsh/bblfshd", "").await.unwrap();
        installer.ensure_installed("bblfsh/bblfshd", "").await.unwrap();

        let pulls: Vec<_> = mock
            .get_calls()
            .into_iter()
            .filter(|c| matches!(c, MockCall::Pull { .. }))
            .collect();
        assert_eq!(
            pulls,
            vec![MockCall::Pull {
                image: "bblfsh/bblfshd".to_string(),
                tag: "latest".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_remove_image() {
        let mock = Arc::new(MockEngine::new());
        mock.add_image(&["srcd/gitbase:v0.24.0"]);
        let installer = Installer::new(mock.clone(), Duration::from_secs(5));

        installer.remove_image("srcd/gitbase:v0.24.0").await.unwrap();
        assert!(mock.was_called(&MockCall::RemoveImage {
            id: "srcd/gitbase:v0.24.0".to_string(),
        }));
        assert!(!installer.is_installed("srcd/gitbase", "").await.unwrap());

        let err = installer.remove_image("srcd/gitbase:v0.24.0").await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Provider(dockyard_provider::ProviderError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ensure_installed_reports_pull_failure() {
        let mock = Arc::new(MockEngine::new());
        mock.fail_pull("manifest unknown");
        let installer = Installer::new(mock, Duration::from_secs(5));

        let err = installer
            .ensure_installed("srcd/gitbase", "v9.9.9")
            .await
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("could not install image srcd/gitbase:v9.9.9"));
    }
}
