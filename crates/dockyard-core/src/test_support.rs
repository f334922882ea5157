//! Test support utilities for dockyard-core
//!
//! Provides a stateful in-memory [`MockEngine`] so lifecycle, network and
//! session logic can be tested without a running container engine.

use async_trait::async_trait;
use dockyard_provider::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Records which methods were called on the mock
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Info,
    Ping,
    ListImages,
    Pull { image: String, tag: String },
    RemoveImage { id: String },
    ListContainers { filter: Option<String> },
    Create { name: String, image: String },
    Start { id: String },
    Attach { id: String },
    Wait { id: String },
    Remove { id: String },
    Resize { id: String, size: TtySize },
    Logs { id: String, follow: bool },
    InspectNetwork { name: String },
    ListNetworks,
    CreateNetwork { name: String },
    ConnectNetwork { network: String, container: String },
    RemoveNetwork { name: String },
    ListVolumes,
    InspectVolume { name: String },
    CreateVolume { name: String },
    RemoveVolume { name: String },
}

/// What the remote end of an attached stream does
#[derive(Debug, Clone)]
pub enum AttachBehavior {
    /// Write these bytes, then close the output. Input is read and discarded.
    Output(Vec<u8>),
    /// Copy input back to output until input is closed
    Echo,
    /// Discard input and never write or close the output
    Silent,
}

struct MockContainer {
    id: ContainerId,
    name: String,
    image: String,
    state: ContainerState,
    spec: Option<ContainerSpec>,
}

impl MockContainer {
    fn record(&self) -> ContainerRecord {
        ContainerRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            state: self.state,
            image: self.image.clone(),
        }
    }
}

#[derive(Default)]
struct MockState {
    containers: Vec<MockContainer>,
    networks: HashMap<String, NetworkRecord>,
    connections: Vec<(String, ContainerId)>,
    volumes: HashMap<String, VolumeRecord>,
    images: Vec<ImageRecord>,
}

/// Configurable in-memory container engine
pub struct MockEngine {
    calls: Arc<Mutex<Vec<MockCall>>>,
    state: Mutex<MockState>,
    info: Mutex<EngineInfo>,
    /// Result handed out by `wait`
    wait_result: Mutex<Result<i64>>,
    attach_behavior: Mutex<AttachBehavior>,
    logs_output: Mutex<Vec<u8>>,
    pull_error: Mutex<Option<String>>,
    next_create_error: Mutex<Option<ProviderError>>,
    next_remove_error: Mutex<Option<ProviderError>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Create an empty engine where every operation succeeds
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            state: Mutex::new(MockState::default()),
            info: Mutex::new(EngineInfo {
                operating_system: "Mock Linux".to_string(),
                os_type: "linux".to_string(),
                server_version: "24.0.0".to_string(),
                api_version: "1.43".to_string(),
            }),
            wait_result: Mutex::new(Ok(0)),
            attach_behavior: Mutex::new(AttachBehavior::Output(Vec::new())),
            logs_output: Mutex::new(Vec::new()),
            pull_error: Mutex::new(None),
            next_create_error: Mutex::new(None),
            next_remove_error: Mutex::new(None),
        }
    }

    /// Record a call
    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Get all recorded calls
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Check if a specific call was made
    pub fn was_called(&self, call: &MockCall) -> bool {
        self.calls.lock().unwrap().contains(call)
    }

    pub fn set_info(&self, info: EngineInfo) {
        *self.info.lock().unwrap() = info;
    }

    pub fn set_wait_result(&self, result: Result<i64>) {
        *self.wait_result.lock().unwrap() = result;
    }

    pub fn set_attach_behavior(&self, behavior: AttachBehavior) {
        *self.attach_behavior.lock().unwrap() = behavior;
    }

    pub fn set_logs_output(&self, output: &[u8]) {
        *self.logs_output.lock().unwrap() = output.to_vec();
    }

    /// Make every pull fail with `message`
    pub fn fail_pull(&self, message: &str) {
        *self.pull_error.lock().unwrap() = Some(message.to_string());
    }

    /// Make the next `create` fail with `err`
    pub fn fail_next_create(&self, err: ProviderError) {
        *self.next_create_error.lock().unwrap() = Some(err);
    }

    /// Make the next `remove` fail with `err`
    pub fn fail_next_remove(&self, err: ProviderError) {
        *self.next_remove_error.lock().unwrap() = Some(err);
    }

    /// Seed a container, returning its id
    pub fn add_container(&self, name: &str, image: &str, state: ContainerState) -> ContainerId {
        let id = mock_id();
        self.state.lock().unwrap().containers.push(MockContainer {
            id: id.clone(),
            name: name.to_string(),
            image: image.to_string(),
            state,
            spec: None,
        });
        id
    }

    /// Seed a local image carrying the given `name:tag` references
    pub fn add_image(&self, repo_tags: &[&str]) {
        self.state.lock().unwrap().images.push(ImageRecord {
            id: format!("sha256:{}", uuid::Uuid::new_v4().simple()),
            repo_tags: repo_tags.iter().map(|t| t.to_string()).collect(),
        });
    }

    /// Simulate the named container exiting
    pub fn stop(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        for container in state.containers.iter_mut().filter(|c| c.name == name) {
            container.state = ContainerState::Stopped;
        }
    }

    /// Number of containers with exactly this name
    pub fn count_named(&self, name: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.containers.iter().filter(|c| c.name == name).count()
    }

    /// Spec the named container was created with
    pub fn spec_of(&self, name: &str) -> Option<ContainerSpec> {
        let state = self.state.lock().unwrap();
        state
            .containers
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.spec.clone())
    }

    /// Networks a container was connected to
    pub fn networks_of(&self, id: &ContainerId) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .connections
            .iter()
            .filter(|(_, c)| c == id)
            .map(|(n, _)| n.clone())
            .collect()
    }

    fn with_container<T>(
        &self,
        id: &ContainerId,
        f: impl FnOnce(&mut MockContainer) -> T,
    ) -> Result<T> {
        let mut state = self.state.lock().unwrap();
        state
            .containers
            .iter_mut()
            .find(|c| &c.id == id)
            .map(f)
            .ok_or_else(|| ProviderError::NotFound(format!("No such container: {}", id)))
    }
}

fn mock_id() -> ContainerId {
    ContainerId::new(uuid::Uuid::new_v4().simple().to_string())
}

/// Clone a ProviderError (thiserror types don't implement Clone)
fn clone_provider_error(e: &ProviderError) -> ProviderError {
    match e {
        ProviderError::ConnectionError(s) => ProviderError::ConnectionError(s.clone()),
        ProviderError::IncompatibleEngine(s) => ProviderError::IncompatibleEngine(s.clone()),
        ProviderError::NotFound(s) => ProviderError::NotFound(s.clone()),
        ProviderError::Conflict(s) => ProviderError::Conflict(s.clone()),
        ProviderError::PullError(s) => ProviderError::PullError(s.clone()),
        ProviderError::RuntimeError(s) => ProviderError::RuntimeError(s.clone()),
        ProviderError::IoError(_) => ProviderError::RuntimeError("IO error (cloned)".into()),
        ProviderError::Timeout => ProviderError::Timeout,
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn info(&self) -> Result<EngineInfo> {
        self.record(MockCall::Info);
        Ok(self.info.lock().unwrap().clone())
    }

    async fn ping(&self) -> Result<String> {
        self.record(MockCall::Ping);
        Ok(self.info.lock().unwrap().api_version.clone())
    }

    async fn list_images(&self) -> Result<Vec<ImageRecord>> {
        self.record(MockCall::ListImages);
        Ok(self.state.lock().unwrap().images.clone())
    }

    async fn pull(&self, image: &str, tag: &str) -> Result<()> {
        self.record(MockCall::Pull {
            image: image.to_string(),
            tag: tag.to_string(),
        });
        if let Some(message) = self.pull_error.lock().unwrap().clone() {
            return Err(ProviderError::PullError(message));
        }
        self.add_image(&[&format!("{}:{}", image, tag)]);
        Ok(())
    }

    async fn remove_image(&self, id: &str) -> Result<()> {
        self.record(MockCall::RemoveImage { id: id.to_string() });
        let mut state = self.state.lock().unwrap();
        let before = state.images.len();
        state
            .images
            .retain(|i| i.id != id && !i.repo_tags.iter().any(|t| t == id));
        if state.images.len() == before {
            return Err(ProviderError::NotFound(format!("No such image: {}", id)));
        }
        Ok(())
    }

    async fn list_containers(&self, name_filter: Option<&str>) -> Result<Vec<ContainerRecord>> {
        self.record(MockCall::ListContainers {
            filter: name_filter.map(String::from),
        });
        let state = self.state.lock().unwrap();
        // The engine's name filter matches substrings
        Ok(state
            .containers
            .iter()
            .filter(|c| name_filter.map_or(true, |f| c.name.contains(f)))
            .map(MockContainer::record)
            .collect())
    }

    async fn create(&self, name: &str, spec: &ContainerSpec) -> Result<ContainerId> {
        self.record(MockCall::Create {
            name: name.to_string(),
            image: spec.image.clone(),
        });
        if let Some(err) = self.next_create_error.lock().unwrap().take() {
            return Err(err);
        }

        let mut state = self.state.lock().unwrap();
        if state.containers.iter().any(|c| c.name == name) {
            return Err(ProviderError::Conflict(format!(
                "The container name \"/{}\" is already in use",
                name
            )));
        }

        let id = mock_id();
        state.containers.push(MockContainer {
            id: id.clone(),
            name: name.to_string(),
            image: spec.image.clone(),
            state: ContainerState::Created,
            spec: Some(spec.clone()),
        });
        Ok(id)
    }

    async fn start(&self, id: &ContainerId) -> Result<()> {
        self.record(MockCall::Start { id: id.0.clone() });
        self.with_container(id, |c| c.state = ContainerState::Running)
    }

    async fn attach(&self, id: &ContainerId) -> Result<AttachedStream> {
        self.record(MockCall::Attach { id: id.0.clone() });
        self.with_container(id, |_| ())?;

        let (output_local, mut output_remote) = tokio::io::duplex(64 * 1024);
        let (input_local, mut input_remote) = tokio::io::duplex(64 * 1024);

        match self.attach_behavior.lock().unwrap().clone() {
            AttachBehavior::Output(bytes) => {
                tokio::spawn(async move {
                    let _ = output_remote.write_all(&bytes).await;
                    let _ = output_remote.shutdown().await;
                });
                tokio::spawn(async move {
                    let mut sink = Vec::new();
                    let _ = input_remote.read_to_end(&mut sink).await;
                });
            }
            AttachBehavior::Echo => {
                tokio::spawn(async move {
                    let _ = tokio::io::copy(&mut input_remote, &mut output_remote).await;
                    let _ = output_remote.shutdown().await;
                });
            }
            AttachBehavior::Silent => {
                tokio::spawn(async move {
                    let _held = output_remote;
                    let mut sink = Vec::new();
                    let _ = input_remote.read_to_end(&mut sink).await;
                    std::future::pending::<()>().await;
                });
            }
        }

        Ok(AttachedStream {
            output: Box::pin(output_local),
            input: Box::pin(input_local),
        })
    }

    async fn wait(&self, id: &ContainerId) -> Result<i64> {
        self.record(MockCall::Wait { id: id.0.clone() });
        let result = match &*self.wait_result.lock().unwrap() {
            Ok(code) => Ok(*code),
            Err(e) => Err(clone_provider_error(e)),
        };
        if result.is_ok() {
            let _ = self.with_container(id, |c| c.state = ContainerState::Stopped);
        }
        result
    }

    async fn remove(&self, id: &ContainerId) -> Result<()> {
        self.record(MockCall::Remove { id: id.0.clone() });
        if let Some(err) = self.next_remove_error.lock().unwrap().take() {
            return Err(err);
        }
        let mut state = self.state.lock().unwrap();
        let before = state.containers.len();
        state.containers.retain(|c| &c.id != id);
        if state.containers.len() == before {
            return Err(ProviderError::NotFound(format!("No such container: {}", id)));
        }
        state.connections.retain(|(_, c)| c != id);
        Ok(())
    }

    async fn resize(&self, id: &ContainerId, size: TtySize) -> Result<()> {
        self.record(MockCall::Resize {
            id: id.0.clone(),
            size,
        });
        self.with_container(id, |_| ())
    }

    async fn logs(&self, id: &ContainerId, follow: bool) -> Result<LogStream> {
        self.record(MockCall::Logs {
            id: id.0.clone(),
            follow,
        });
        self.with_container(id, |_| ())?;
        let output = self.logs_output.lock().unwrap().clone();
        Ok(LogStream {
            stream: Box::pin(std::io::Cursor::new(output)),
        })
    }

    async fn inspect_network(&self, name: &str) -> Result<Option<NetworkRecord>> {
        self.record(MockCall::InspectNetwork {
            name: name.to_string(),
        });
        let found = self.state.lock().unwrap().networks.get(name).cloned();
        // Let concurrent callers interleave between inspect and create
        tokio::task::yield_now().await;
        Ok(found)
    }

    async fn list_networks(&self) -> Result<Vec<NetworkRecord>> {
        self.record(MockCall::ListNetworks);
        Ok(self.state.lock().unwrap().networks.values().cloned().collect())
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        self.record(MockCall::CreateNetwork {
            name: name.to_string(),
        });
        let mut state = self.state.lock().unwrap();
        if state.networks.contains_key(name) {
            return Err(ProviderError::Conflict(format!(
                "network with name {} already exists",
                name
            )));
        }
        state.networks.insert(
            name.to_string(),
            NetworkRecord {
                id: uuid::Uuid::new_v4().simple().to_string(),
                name: name.to_string(),
                driver: "bridge".to_string(),
            },
        );
        Ok(())
    }

    async fn connect_network(&self, network: &str, container: &ContainerId) -> Result<()> {
        self.record(MockCall::ConnectNetwork {
            network: network.to_string(),
            container: container.0.clone(),
        });
        let mut state = self.state.lock().unwrap();
        if !state.networks.contains_key(network) {
            return Err(ProviderError::NotFound(format!("network {} not found", network)));
        }
        if !state.containers.iter().any(|c| &c.id == container) {
            return Err(ProviderError::NotFound(format!(
                "No such container: {}",
                container
            )));
        }
        state
            .connections
            .push((network.to_string(), container.clone()));
        Ok(())
    }

    async fn remove_network(&self, id: &str) -> Result<()> {
        self.record(MockCall::RemoveNetwork {
            name: id.to_string(),
        });
        let mut state = self.state.lock().unwrap();
        let key = state
            .networks
            .iter()
            .find(|(name, record)| name.as_str() == id || record.id == id)
            .map(|(name, _)| name.clone());
        match key {
            Some(name) => {
                state.networks.remove(&name);
                state.connections.retain(|(n, _)| n != &name);
                Ok(())
            }
            None => Err(ProviderError::NotFound(format!("network {} not found", id))),
        }
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeRecord>> {
        self.record(MockCall::ListVolumes);
        Ok(self.state.lock().unwrap().volumes.values().cloned().collect())
    }

    async fn inspect_volume(&self, name: &str) -> Result<Option<VolumeRecord>> {
        self.record(MockCall::InspectVolume {
            name: name.to_string(),
        });
        Ok(self.state.lock().unwrap().volumes.get(name).cloned())
    }

    async fn create_volume(&self, name: &str) -> Result<()> {
        self.record(MockCall::CreateVolume {
            name: name.to_string(),
        });
        self.state.lock().unwrap().volumes.insert(
            name.to_string(),
            VolumeRecord {
                name: name.to_string(),
                driver: "local".to_string(),
                mountpoint: format!("/var/lib/docker/volumes/{}/_data", name),
            },
        );
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.record(MockCall::RemoveVolume {
            name: name.to_string(),
        });
        match self.state.lock().unwrap().volumes.remove(name) {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound(format!("no such volume: {}", name))),
        }
    }
}
