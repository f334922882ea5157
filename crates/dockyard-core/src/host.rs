//! Host path translation for engines running on Windows

use crate::{CoreError, Result};
use dockyard_provider::{ContainerEngine, EngineInfo, ProviderError};
use std::time::Duration;

const INFO_TIMEOUT: Duration = Duration::from_secs(1);

/// True when the engine host runs Windows
pub fn is_windows_host(info: &EngineInfo) -> bool {
    info.os_type == "windows" || info.operating_system.to_lowercase().contains("windows")
}

/// Rewrite a host path into the form the engine host expects.
///
/// Windows hosts want drive-letter paths such as `C:/Users/me` as
/// `//c/Users/me`; every other host gets the path unchanged.
pub fn engine_host_path(path: &str, info: &EngineInfo) -> String {
    if !is_windows_host(info) {
        return path.to_string();
    }

    let mut chars = path.chars();
    match (chars.next(), chars.next()) {
        (Some(drive), Some(':')) if drive.is_alphanumeric() || drive == '_' => {
            format!("//{}{}", drive.to_lowercase(), &path[drive.len_utf8() + 1..])
        }
        _ => path.to_string(),
    }
}

/// Query the engine and translate `path` for its host
pub async fn host_path(engine: &dyn ContainerEngine, path: &str) -> Result<String> {
    let info = tokio::time::timeout(INFO_TIMEOUT, engine.info())
        .await
        .map_err(|_| ProviderError::Timeout)?
        .map_err(|e| CoreError::action("could not get information about the engine", e))?;
    Ok(engine_host_path(path, &info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockEngine;

    fn windows() -> EngineInfo {
        EngineInfo {
            os_type: "windows".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_windows_drive_is_rewritten() {
        assert_eq!(
            engine_host_path("C:/Users/me/repos", &windows()),
            "//c/Users/me/repos"
        );
        assert_eq!(engine_host_path("d:", &windows()), "//d");
        assert_eq!(engine_host_path("/already/unix", &windows()), "/already/unix");
    }

    #[test]
    fn test_desktop_on_windows_detected_by_os_name() {
        let info = EngineInfo {
            os_type: "linux".to_string(),
            operating_system: "Docker Desktop (Windows)".to_string(),
            ..Default::default()
        };
        assert_eq!(engine_host_path("C:/src", &info), "//c/src");
    }

    #[test]
    fn test_other_hosts_unchanged() {
        let info = EngineInfo {
            os_type: "linux".to_string(),
            operating_system: "Ubuntu 22.04".to_string(),
            ..Default::default()
        };
        assert_eq!(engine_host_path("C:/src", &info), "C:/src");
    }

    #[tokio::test]
    async fn test_host_path_queries_engine() {
        let mock = MockEngine::new();
        mock.set_info(windows());
        assert_eq!(host_path(&mock, "E:/data").await.unwrap(), "//e/data");
    }
}
