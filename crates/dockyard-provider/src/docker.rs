//! Docker engine implementation using bollard

use crate::{
    check_engine_info, AttachedStream, ContainerEngine, ContainerId, ContainerRecord,
    ContainerSpec, ContainerState, EngineInfo, ImageRecord, LogStream, MountKind, NetworkRecord,
    ProviderError, Result, TtySize, VolumeRecord,
};
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    ListContainersOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    ResizeContainerTtyOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::{CreateImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::network::{
    ConnectNetworkOptions, CreateNetworkOptions, InspectNetworkOptions, ListNetworksOptions,
};
use bollard::service::{EndpointSettings, HostConfig, Mount, MountTypeEnum, PortBinding};
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions, RemoveVolumeOptions};
use bollard::Docker;
use dockyard_config::EngineConfig;
use futures::StreamExt;
use std::collections::HashMap;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Docker engine using the bollard crate
pub struct DockerEngine {
    client: Docker,
}

impl DockerEngine {
    /// Build a client and validate the engine behind it.
    pub async fn connect(config: &EngineConfig) -> Result<Self> {
        tracing::debug!("Creating docker client");
        let client = Self::client_for(config)?;
        let engine = Self { client };

        tracing::debug!("Checking for Docker Toolbox");
        let info = engine.info().await?;
        check_engine_info(&info)?;

        tracing::debug!("Retrieving docker server version");
        engine
            .client
            .version()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        Ok(engine)
    }

    fn client_for(config: &EngineConfig) -> Result<Docker> {
        let timeout = config.timeout_secs;
        let client = match config.socket.as_deref() {
            None => Docker::connect_with_local_defaults(),
            Some(url) if url.starts_with("http://") || url.starts_with("tcp://") => {
                Docker::connect_with_http(url, timeout, bollard::API_DEFAULT_VERSION)
            }
            Some(path) => Docker::connect_with_socket(
                path.trim_start_matches("unix://"),
                timeout,
                bollard::API_DEFAULT_VERSION,
            ),
        };
        client.map_err(|e| ProviderError::ConnectionError(e.to_string()))
    }

    /// Get the underlying Docker client
    pub fn client(&self) -> &Docker {
        &self.client
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn info(&self) -> Result<EngineInfo> {
        let info = self
            .client
            .info()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;

        Ok(EngineInfo {
            operating_system: info.operating_system.unwrap_or_default(),
            os_type: info.os_type.unwrap_or_default(),
            server_version: info.server_version.unwrap_or_default(),
            api_version: String::new(),
        })
    }

    async fn ping(&self) -> Result<String> {
        self.client
            .ping()
            .await
            .map_err(|e| ProviderError::ConnectionError(e.to_string()))?;
        let version = self.client.version().await?;
        Ok(version.api_version.unwrap_or_default())
    }

    async fn list_images(&self) -> Result<Vec<ImageRecord>> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };
        let images = self.client.list_images(Some(options)).await?;

        Ok(images
            .into_iter()
            .map(|img| ImageRecord {
                id: img.id,
                repo_tags: img.repo_tags,
            })
            .collect())
    }

    async fn pull(&self, image: &str, tag: &str) -> Result<()> {
        let options = CreateImageOptions {
            from_image: image,
            tag,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(ProviderError::PullError(error));
                    }
                    if let Some(status) = info.status {
                        tracing::debug!("{}", status);
                    }
                }
                Err(e) => return Err(ProviderError::PullError(e.to_string())),
            }
        }

        Ok(())
    }

    async fn remove_image(&self, id: &str) -> Result<()> {
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        self.client.remove_image(id, Some(options), None).await?;
        Ok(())
    }

    async fn list_containers(&self, name_filter: Option<&str>) -> Result<Vec<ContainerRecord>> {
        let mut filters = HashMap::new();
        if let Some(name) = name_filter {
            filters.insert("name".to_string(), vec![name.to_string()]);
        }

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerRecord {
                id: ContainerId::new(c.id.unwrap_or_default()),
                name: c
                    .names
                    .and_then(|n| n.first().cloned())
                    .unwrap_or_default()
                    .trim_start_matches('/')
                    .to_string(),
                image: c.image.unwrap_or_default(),
                state: c
                    .state
                    .as_deref()
                    .map(ContainerState::from)
                    .unwrap_or(ContainerState::Stopped),
            })
            .collect())
    }

    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<ContainerId> {
        let options = CreateContainerOptions {
            name,
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(options), container_config(spec))
            .await?;

        for warning in &response.warnings {
            tracing::warn!("{}: {}", name, warning);
        }

        Ok(ContainerId::new(response.id))
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.client
            .start_container(&id.0, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn attach(&self, id: &ContainerId) -> Result<AttachedStream> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(false),
            detach_keys: None,
        };

        let AttachContainerResults { output, input } =
            self.client.attach_container(&id.0, Some(options)).await?;

        Ok(AttachedStream {
            output: Box::pin(LogOutputReader::new(output)),
            input,
        })
    }

    async fn wait(&self, id: &ContainerId) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };

        let mut stream = self.client.wait_container(&id.0, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit status as an error
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Err(ProviderError::RuntimeError(format!(
                "wait on container {} ended without a status",
                id.short()
            ))),
        }
    }

    async fn remove(&self, id: &ContainerId) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.client.remove_container(&id.0, Some(options)).await?;
        Ok(())
    }

    async fn resize(&self, id: &ContainerId, size: TtySize) -> Result<()> {
        let options = ResizeContainerTtyOptions {
            width: size.cols,
            height: size.rows,
        };
        self.client.resize_container_tty(&id.0, options).await?;
        Ok(())
    }

    async fn logs(&self, id: &ContainerId, follow: bool) -> Result<LogStream> {
        let options = logs_options(follow, chrono::Utc::now().timestamp());
        let stream = self.client.logs(&id.0, Some(options));
        let reader = LogOutputReader::new(Box::pin(stream));

        Ok(LogStream {
            stream: Box::pin(reader),
        })
    }

    async fn inspect_network(&self, name: &str) -> Result<Option<NetworkRecord>> {
        match self
            .client
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(network) => Ok(Some(NetworkRecord {
                id: network.id.unwrap_or_default(),
                name: network.name.unwrap_or_default(),
                driver: network.driver.unwrap_or_default(),
            })),
            Err(e) => match ProviderError::from(e) {
                ProviderError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn list_networks(&self) -> Result<Vec<NetworkRecord>> {
        let networks = self
            .client
            .list_networks(None::<ListNetworksOptions<String>>)
            .await?;

        Ok(networks
            .into_iter()
            .map(|n| NetworkRecord {
                id: n.id.unwrap_or_default(),
                name: n.name.unwrap_or_default(),
                driver: n.driver.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        let options = CreateNetworkOptions {
            name,
            check_duplicate: true,
            driver: "bridge",
            ..Default::default()
        };
        self.client.create_network(options).await?;
        Ok(())
    }

    async fn connect_network(&self, network: &str, container: &ContainerId) -> Result<()> {
        let options = ConnectNetworkOptions {
            container: container.0.as_str(),
            endpoint_config: EndpointSettings::default(),
        };
        self.client.connect_network(network, options).await?;
        Ok(())
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.client.remove_network(id).await?;
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeRecord>> {
        let response = self
            .client
            .list_volumes(None::<ListVolumesOptions<String>>)
            .await?;

        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| VolumeRecord {
                name: v.name,
                driver: v.driver,
                mountpoint: v.mountpoint,
            })
            .collect())
    }

    async fn inspect_volume(&self, name: &str) -> Result<Option<VolumeRecord>> {
        match self.client.inspect_volume(name).await {
            Ok(v) => Ok(Some(VolumeRecord {
                name: v.name,
                driver: v.driver,
                mountpoint: v.mountpoint,
            })),
            Err(e) => match ProviderError::from(e) {
                ProviderError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        let options = CreateVolumeOptions {
            name,
            ..Default::default()
        };
        self.client.create_volume(options).await?;
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.client
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await?;
        Ok(())
    }
}

/// Following starts at `now`; a one-off read returns everything logged so far
fn logs_options(follow: bool, now: i64) -> LogsOptions<String> {
    LogsOptions::<String> {
        follow,
        stdout: true,
        stderr: true,
        since: if follow { now } else { 0 },
        tail: "all".to_string(),
        ..Default::default()
    }
}

/// Translate a [`ContainerSpec`] into the engine's create payload
fn container_config(spec: &ContainerSpec) -> Config<String> {
    let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();

    for port in &spec.ports {
        let container_port = format!("{}/tcp", port.container_port);
        exposed_ports.insert(container_port.clone(), HashMap::new());

        let binding = PortBinding {
            host_ip: None,
            host_port: port.resolved_host_port().map(|p| p.to_string()),
        };
        port_bindings
            .entry(container_port)
            .or_default()
            .get_or_insert_with(Vec::new)
            .push(binding);
    }

    let mounts: Vec<Mount> = spec
        .mounts
        .iter()
        .map(|m| Mount {
            target: Some(m.target.clone()),
            source: Some(m.source.clone()),
            typ: Some(match m.kind {
                MountKind::Bind => MountTypeEnum::BIND,
                MountKind::Volume => MountTypeEnum::VOLUME,
            }),
            read_only: Some(m.read_only),
            consistency: m.consistency.map(|c| c.as_str().to_string()),
            ..Default::default()
        })
        .collect();

    let host_config = HostConfig {
        mounts: if mounts.is_empty() {
            None
        } else {
            Some(mounts)
        },
        port_bindings: if port_bindings.is_empty() {
            None
        } else {
            Some(port_bindings)
        },
        console_size: spec
            .console_size
            .map(|size| vec![i32::from(size.rows), i32::from(size.cols)]),
        ..Default::default()
    };

    let env = spec.env_pairs();

    Config {
        image: Some(spec.image.clone()),
        cmd: if spec.cmd.is_empty() {
            None
        } else {
            Some(spec.cmd.clone())
        },
        env: if env.is_empty() { None } else { Some(env) },
        exposed_ports: if exposed_ports.is_empty() {
            None
        } else {
            Some(exposed_ports)
        },
        attach_stdin: Some(spec.interactive),
        attach_stdout: Some(spec.interactive),
        attach_stderr: Some(spec.interactive),
        open_stdin: Some(spec.interactive),
        tty: Some(spec.interactive),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// Reader that converts a framed engine output stream to AsyncRead
struct LogOutputReader<S> {
    stream: S,
    buffer: Vec<u8>,
    pos: usize,
}

impl<S> LogOutputReader<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            pos: 0,
        }
    }
}

impl<S> AsyncRead for LogOutputReader<S>
where
    S: futures::Stream<Item = std::result::Result<LogOutput, bollard::errors::Error>> + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use std::task::Poll;

        loop {
            // Drain what is left of the previous frame first
            if self.pos < self.buffer.len() {
                let remaining = &self.buffer[self.pos..];
                let to_copy = std::cmp::min(remaining.len(), buf.remaining());
                buf.put_slice(&remaining[..to_copy]);
                self.pos += to_copy;
                return Poll::Ready(Ok(()));
            }

            match Pin::new(&mut self.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(output))) => {
                    let data = match output {
                        LogOutput::StdOut { message }
                        | LogOutput::StdErr { message }
                        | LogOutput::StdIn { message }
                        | LogOutput::Console { message } => message,
                    };
                    // An empty frame must not be reported as EOF
                    self.buffer = data.to_vec();
                    self.pos = 0;
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Err(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        e.to_string(),
                    )));
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostPort;
    use tokio::io::AsyncReadExt;

    fn frames(
        chunks: &[&'static str],
    ) -> impl futures::Stream<Item = std::result::Result<LogOutput, bollard::errors::Error>> + Unpin
    {
        let items: Vec<_> = chunks
            .iter()
            .map(|c| {
                Ok(LogOutput::StdOut {
                    message: c.as_bytes().to_vec().into(),
                })
            })
            .collect();
        futures::stream::iter(items)
    }

    #[test]
    fn test_logs_options_follow_from_now() {
        let options = logs_options(true, 1_700_000_000);
        assert!(options.follow);
        assert_eq!(options.since, 1_700_000_000);
        assert!(options.stdout && options.stderr);
    }

    #[test]
    fn test_logs_options_without_follow_read_existing_output() {
        let options = logs_options(false, 1_700_000_000);
        assert!(!options.follow);
        assert_eq!(options.since, 0);
        assert_eq!(options.tail, "all");
    }

    #[test]
    fn test_container_config_ports_and_mounts() {
        let spec = ContainerSpec::new("srcd/gitbase:v0.24.0")
            .env("GITBASE_USER", "root")
            .volume("gitbase-index", "/var/lib/gitbase/index")
            .shared_dir_ro("/home/me/repos", "/opt/repos")
            .port(HostPort::SameAsContainer, 3306)
            .port(HostPort::Auto, 9432)
            .delegate_mounts_for("windows");

        let config = container_config(&spec);

        assert_eq!(config.image.as_deref(), Some("srcd/gitbase:v0.24.0"));
        assert_eq!(config.env, Some(vec!["GITBASE_USER=root".to_string()]));
        assert_eq!(config.cmd, None);
        assert_eq!(config.tty, Some(false));

        let exposed = config.exposed_ports.unwrap();
        assert!(exposed.contains_key("3306/tcp"));
        assert!(exposed.contains_key("9432/tcp"));

        let host = config.host_config.unwrap();
        let bindings = host.port_bindings.unwrap();
        let mysql = bindings["3306/tcp"].as_ref().unwrap();
        assert_eq!(mysql[0].host_port.as_deref(), Some("3306"));
        let auto = bindings["9432/tcp"].as_ref().unwrap();
        assert_eq!(auto[0].host_port, None);

        let mounts = host.mounts.unwrap();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].typ, Some(MountTypeEnum::VOLUME));
        assert_eq!(mounts[1].typ, Some(MountTypeEnum::BIND));
        assert_eq!(mounts[1].read_only, Some(true));
        assert_eq!(mounts[1].consistency.as_deref(), Some("delegated"));
        assert_eq!(host.console_size, None);
    }

    #[test]
    fn test_container_config_interactive() {
        let mut spec = ContainerSpec::new("mysql:8.0.16")
            .cmd(["mysql", "-h", "gitbase"])
            .interactive();
        spec.console_size = Some(TtySize::new(40, 120));

        let config = container_config(&spec);

        assert_eq!(config.attach_stdin, Some(true));
        assert_eq!(config.attach_stdout, Some(true));
        assert_eq!(config.attach_stderr, Some(true));
        assert_eq!(config.open_stdin, Some(true));
        assert_eq!(config.tty, Some(true));
        assert_eq!(
            config.cmd,
            Some(vec!["mysql".into(), "-h".into(), "gitbase".into()])
        );
        assert_eq!(config.host_config.unwrap().console_size, Some(vec![40, 120]));
    }

    #[tokio::test]
    async fn test_log_output_reader_concatenates_frames() {
        let mut reader = LogOutputReader::new(frames(&["hello ", "", "world"]));
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn test_log_output_reader_small_buffer() {
        let mut reader = LogOutputReader::new(frames(&["abcdef"]));
        let mut buf = [0u8; 4];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abcd");
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ef");
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    #[ignore] // Requires a running Docker engine
    async fn test_connect_local_engine() {
        let engine = DockerEngine::connect(&EngineConfig::default()).await.unwrap();
        let api = engine.ping().await.unwrap();
        assert!(!api.is_empty());
    }
}
