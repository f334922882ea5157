//! Error types for dockyard-core

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] dockyard_config::ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] dockyard_provider::ProviderError),

    /// A failed step, labelled with what was being attempted
    #[error("{action}: {source}")]
    Action {
        action: String,
        #[source]
        source: Box<CoreError>,
    },

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Timed out after {0:?} waiting for readiness")]
    DeadlineExceeded(Duration),

    #[error("Probe failed: {0}")]
    ProbeFailed(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("No compatible tag found for image {0}")]
    NoCompatibleTag(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Label an error with the action that failed
    pub fn action(action: impl Into<String>, source: impl Into<CoreError>) -> Self {
        Self::Action {
            action: action.into(),
            source: Box::new(source.into()),
        }
    }

    /// The innermost error, skipping action labels
    pub fn root(&self) -> &CoreError {
        match self {
            Self::Action { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard_provider::ProviderError;

    #[test]
    fn test_action_display_includes_cause() {
        let err = CoreError::action(
            "could not create container db",
            ProviderError::Conflict("name in use".into()),
        );
        assert_eq!(
            err.to_string(),
            "could not create container db: Provider error: Conflict: name in use"
        );
        assert!(matches!(
            err.root(),
            CoreError::Provider(ProviderError::Conflict(_))
        ));
    }
}
