//! Value types exchanged with the container engine

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};

/// Container ID wrapper
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn short(&self) -> &str {
        if self.0.len() > 12 {
            &self.0[..12]
        } else {
            &self.0
        }
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// State of a named container slot.
///
/// A missing container is modelled as `None` by callers, so only the three
/// states an existing container can be in are listed here. Anything that is
/// not created or running (exited, dead, paused, restarting, removing) counts
/// as stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Stopped,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl From<&str> for ContainerState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// A container as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: ContainerId,
    /// Name without the leading `/` the engine reports
    pub name: String,
    pub state: ContainerState,
    /// Image reference the container was created from (`name:tag`)
    pub image: String,
}

impl ContainerRecord {
    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }
}

/// A network as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRecord {
    pub id: String,
    pub name: String,
    pub driver: String,
}

/// A locally stored image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: String,
    /// `name:tag` references pointing at this image
    pub repo_tags: Vec<String>,
}

/// A named volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRecord {
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
}

/// Engine details gathered during the connection handshake
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineInfo {
    /// Human readable OS of the engine host, e.g. "Docker Desktop"
    pub operating_system: String,
    /// "linux" or "windows"
    pub os_type: String,
    pub server_version: String,
    pub api_version: String,
}

/// Terminal dimensions in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TtySize {
    pub rows: u16,
    pub cols: u16,
}

impl TtySize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }
}

/// Mount type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountKind {
    /// Named engine volume
    Volume,
    /// Host directory
    Bind,
}

impl std::fmt::Display for MountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Volume => write!(f, "volume"),
            Self::Bind => write!(f, "bind"),
        }
    }
}

/// Consistency hint for mounts on hosts where file sharing goes through a VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    Consistent,
    Cached,
    Delegated,
}

impl Consistency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Consistent => "consistent",
            Self::Cached => "cached",
            Self::Delegated => "delegated",
        }
    }
}

/// Mount configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub kind: MountKind,
    /// Volume name or host path
    pub source: String,
    /// Path inside the container
    pub target: String,
    pub read_only: bool,
    pub consistency: Option<Consistency>,
}

/// Host side of a published port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPort {
    /// Let the engine pick a free port
    Auto,
    /// Publish on the same port number as inside the container
    SameAsContainer,
    Fixed(u16),
}

/// Port configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpec {
    pub container_port: u16,
    pub host_port: HostPort,
}

impl PortSpec {
    /// Host port to request from the engine, `None` for an engine-chosen port
    pub fn resolved_host_port(&self) -> Option<u16> {
        match self.host_port {
            HostPort::Auto => None,
            HostPort::SameAsContainer => Some(self.container_port),
            HostPort::Fixed(port) => Some(port),
        }
    }
}

/// Everything needed to create a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image reference (`name:tag`)
    pub image: String,
    /// Command arguments
    pub cmd: Vec<String>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<MountSpec>,
    pub ports: Vec<PortSpec>,
    /// Attach all stdio streams, keep stdin open and allocate a TTY
    pub interactive: bool,
    /// Console size handed over at creation time
    pub console_size: Option<TtySize>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Append arguments to the command
    pub fn cmd<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Mount a named volume
    pub fn volume(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.mount(MountKind::Volume, name.into(), target.into(), false)
    }

    /// Bind-mount a host directory
    pub fn shared_dir(self, host_path: impl Into<String>, target: impl Into<String>) -> Self {
        self.mount(MountKind::Bind, host_path.into(), target.into(), false)
    }

    /// Bind-mount a host directory read-only
    pub fn shared_dir_ro(self, host_path: impl Into<String>, target: impl Into<String>) -> Self {
        self.mount(MountKind::Bind, host_path.into(), target.into(), true)
    }

    fn mount(mut self, kind: MountKind, source: String, target: String, read_only: bool) -> Self {
        self.mounts.push(MountSpec {
            kind,
            source,
            target,
            read_only,
            consistency: None,
        });
        self
    }

    /// Publish `container_port` on the host
    pub fn port(mut self, host_port: HostPort, container_port: u16) -> Self {
        self.ports.push(PortSpec {
            container_port,
            host_port,
        });
        self
    }

    /// Mark all mounts as delegated when the engine runs on a non-linux host.
    ///
    /// An empty `host_os` means unknown and leaves the mounts untouched.
    pub fn delegate_mounts_for(mut self, host_os: &str) -> Self {
        if !host_os.is_empty() && host_os != "linux" {
            for mount in &mut self.mounts {
                mount.consistency = Some(Consistency::Delegated);
            }
        }
        self
    }

    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Env rendered as `KEY=value` pairs, the form the engine expects
    pub fn env_pairs(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }
}

/// Duplex stream obtained by attaching to a container
pub struct AttachedStream {
    /// Container stdout/stderr merged into a single byte stream
    pub output: Pin<Box<dyn AsyncRead + Send>>,
    /// Container stdin
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

/// Log stream
pub struct LogStream {
    pub stream: Pin<Box<dyn AsyncRead + Send>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_state_from_engine_strings() {
        assert_eq!(ContainerState::from("running"), ContainerState::Running);
        assert_eq!(ContainerState::from("Created"), ContainerState::Created);
        assert_eq!(ContainerState::from("exited"), ContainerState::Stopped);
        assert_eq!(ContainerState::from("paused"), ContainerState::Stopped);
        assert_eq!(ContainerState::from("dead"), ContainerState::Stopped);
    }

    #[test]
    fn test_short_id() {
        let id = ContainerId::new("0123456789abcdef0123");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(ContainerId::new("abc").short(), "abc");
    }

    #[test]
    fn test_builder_collects_options() {
        let spec = ContainerSpec::new("srcd/gitbase:v0.24.0")
            .env("BBLFSH_ENDPOINT", "bblfshd:9432")
            .env("GITBASE_READONLY", "true")
            .volume("gitbase-indexes", "/var/lib/gitbase/index")
            .shared_dir_ro("/home/me/repos", "/opt/repos")
            .port(HostPort::SameAsContainer, 3306)
            .cmd(["--verbose"]);

        assert_eq!(spec.image, "srcd/gitbase:v0.24.0");
        assert_eq!(
            spec.env_pairs(),
            vec!["BBLFSH_ENDPOINT=bblfshd:9432", "GITBASE_READONLY=true"]
        );
        assert_eq!(spec.mounts.len(), 2);
        assert_eq!(spec.mounts[0].kind, MountKind::Volume);
        assert!(!spec.mounts[0].read_only);
        assert_eq!(spec.mounts[1].kind, MountKind::Bind);
        assert!(spec.mounts[1].read_only);
        assert_eq!(spec.ports[0].resolved_host_port(), Some(3306));
        assert_eq!(spec.cmd, vec!["--verbose"]);
        assert!(!spec.interactive);
    }

    #[test]
    fn test_delegated_consistency_only_off_linux() {
        let linux = ContainerSpec::new("img").volume("v", "/data").delegate_mounts_for("linux");
        assert_eq!(linux.mounts[0].consistency, None);

        let unknown = ContainerSpec::new("img").volume("v", "/data").delegate_mounts_for("");
        assert_eq!(unknown.mounts[0].consistency, None);

        let mac = ContainerSpec::new("img")
            .shared_dir("/Users/me", "/src")
            .delegate_mounts_for("darwin");
        assert_eq!(mac.mounts[0].consistency, Some(Consistency::Delegated));
    }

    #[test]
    fn test_host_port_resolution() {
        let auto = PortSpec {
            container_port: 8080,
            host_port: HostPort::Auto,
        };
        let fixed = PortSpec {
            container_port: 8080,
            host_port: HostPort::Fixed(18080),
        };
        assert_eq!(auto.resolved_host_port(), None);
        assert_eq!(fixed.resolved_host_port(), Some(18080));
    }
}
