//! CLI command implementations

use anyhow::{bail, Context, Result};
use dockyard_config::GlobalConfig;
use dockyard_core::host::host_path;
use dockyard_core::installer::split_image_id;
use dockyard_core::readiness::{Announce, ANNOUNCE_AFTER};
use dockyard_core::volume::{ensure_volume, remove_volume};
use dockyard_core::{
    resolve_compatible_tag, wait_until_ready, CompatibleTag, CoreError, Installer, LifecycleManager,
    NetworkManager, ReadinessPolicy, Session, TagSource, TcpProbe,
};
use dockyard_provider::{ContainerRecord, ContainerSpec, EngineHandle, HostPort};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Everything a command needs: configuration and a validated engine
pub struct App {
    pub config: GlobalConfig,
    pub engine: EngineHandle,
}

impl App {
    pub fn new(config: GlobalConfig, engine: EngineHandle) -> Self {
        Self { config, engine }
    }

    pub fn network(&self) -> NetworkManager {
        NetworkManager::new(self.engine.clone(), self.config.network.name.clone())
    }

    pub fn lifecycle(&self) -> LifecycleManager {
        LifecycleManager::new(self.engine.clone(), self.network())
    }

    pub fn installer(&self) -> Installer {
        Installer::new(self.engine.clone(), self.config.install.pull_timeout())
    }
}

/// Published port given as `CONTAINER`, `:CONTAINER` or `HOST:CONTAINER`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: HostPort,
    pub container: u16,
}

/// Host directory given as `HOST:PATH` or `HOST:PATH:ro`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host: String,
    pub target: String,
    pub read_only: bool,
}

pub fn parse_env(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

pub fn parse_port(s: &str) -> std::result::Result<PortMapping, String> {
    let port = |p: &str| {
        p.parse::<u16>()
            .map_err(|_| format!("invalid port '{}' in '{}'", p, s))
    };

    match s.split_once(':') {
        None => Ok(PortMapping {
            host: HostPort::SameAsContainer,
            container: port(s)?,
        }),
        Some(("", container)) => Ok(PortMapping {
            host: HostPort::Auto,
            container: port(container)?,
        }),
        Some((host, container)) => Ok(PortMapping {
            host: HostPort::Fixed(port(host)?),
            container: port(container)?,
        }),
    }
}

pub fn parse_volume(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once(':') {
        Some((name, path)) if !name.is_empty() && path.starts_with('/') => {
            Ok((name.to_string(), path.to_string()))
        }
        _ => Err(format!("expected NAME:/container/path, got '{}'", s)),
    }
}

pub fn parse_bind(s: &str) -> std::result::Result<BindMount, String> {
    let (rest, read_only) = match s.strip_suffix(":ro") {
        Some(rest) => (rest, true),
        None => (s, false),
    };
    // The last colon separates the target so Windows drive letters survive
    match rest.rsplit_once(':') {
        Some((host, target)) if !host.is_empty() && target.starts_with('/') => Ok(BindMount {
            host: host.to_string(),
            target: target.to_string(),
            read_only,
        }),
        _ => Err(format!("expected HOST:/container/path[:ro], got '{}'", s)),
    }
}

/// Parse `HOST:PORT` for readiness waits
pub fn parse_address(s: &str) -> std::result::Result<String, String> {
    match s.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(s.to_string()),
        _ => Err(format!("expected HOST:PORT, got '{}'", s)),
    }
}

/// Options for `up`
#[derive(Debug, Clone, Default)]
pub struct UpOptions {
    pub image: String,
    pub env: Vec<(String, String)>,
    pub ports: Vec<PortMapping>,
    pub volumes: Vec<(String, String)>,
    pub binds: Vec<BindMount>,
    pub cmd: Vec<String>,
}

/// Report the engine API version
pub async fn version(app: &App) -> Result<String> {
    let api = app.engine.ping().await.context("Engine did not respond")?;
    println!("Engine API version: {}", api);
    Ok(api)
}

/// Make sure an image is present locally
pub async fn install(app: &App, image: &str, tag: Option<&str>) -> Result<()> {
    let (name, parsed_tag) = split_image_id(image);
    let tag = tag.unwrap_or(&parsed_tag);
    app.installer().ensure_installed(&name, tag).await?;
    println!("{}:{} is installed", name, tag);
    Ok(())
}

/// Print the newest tag of `image` compatible with `client_version`
pub async fn compat(
    source: &dyn TagSource,
    image: &str,
    client_version: &str,
) -> Result<CompatibleTag> {
    let result = resolve_compatible_tag(source, image, client_version)
        .await
        .with_context(|| format!("Could not resolve a compatible tag for {}", image))?;

    println!("{}", result.tag);
    if result.has_breaking_newer {
        warn!(
            "A newer incompatible version of {} exists, consider upgrading dockyard",
            image
        );
    }
    Ok(result)
}

async fn build_spec(app: &App, opts: &UpOptions) -> Result<ContainerSpec> {
    let mut spec = ContainerSpec::new(opts.image.as_str()).cmd(opts.cmd.iter().cloned());
    for (key, value) in &opts.env {
        spec = spec.env(key.as_str(), value.as_str());
    }
    for port in &opts.ports {
        spec = spec.port(port.host, port.container);
    }
    for (volume, target) in &opts.volumes {
        ensure_volume(app.engine.as_ref(), volume)
            .await
            .with_context(|| format!("Could not create volume {}", volume))?;
        spec = spec.volume(volume.as_str(), target.as_str());
    }
    for bind in &opts.binds {
        let host = host_path(app.engine.as_ref(), &bind.host).await?;
        spec = if bind.read_only {
            spec.shared_dir_ro(host, bind.target.as_str())
        } else {
            spec.shared_dir(host, bind.target.as_str())
        };
    }
    Ok(spec.delegate_mounts_for(std::env::consts::OS))
}

/// Install the image and make sure a container named `name` runs it
pub async fn up(app: &App, name: &str, opts: &UpOptions) -> Result<ContainerRecord> {
    let (image, tag) = split_image_id(&opts.image);
    app.installer().ensure_installed(&image, &tag).await?;

    let spec = build_spec(app, opts).await?;
    let lifecycle = app.lifecycle();
    let record = lifecycle
        .ensure_running(name, &opts.image, || async {
            lifecycle.start(&spec, name).await.map(|_| ())
        })
        .await?;

    println!("{} is running ({})", record.name, record.id.short());
    Ok(record)
}

/// Block until `addr` accepts TCP connections
pub async fn wait(policy: &ReadinessPolicy, addr: &str) -> Result<()> {
    let probe = TcpProbe::new(addr);
    let _announce = Announce::after(ANNOUNCE_AFTER, format!("Waiting for {} to be ready", addr));
    wait_until_ready(policy, || probe.check())
        .await
        .with_context(|| format!("{} did not become ready", addr))?;
    info!("{} is ready", addr);
    Ok(())
}

/// Run an interactive container and return its exit code.
///
/// The container is removed afterwards.
pub async fn run(
    app: &App,
    name: &str,
    image: &str,
    wait_for: Option<&str>,
    cmd: Vec<String>,
) -> Result<i64> {
    let (image_name, tag) = split_image_id(image);
    app.installer().ensure_installed(&image_name, &tag).await?;

    if let Some(addr) = wait_for {
        wait(&ReadinessPolicy::from(&app.config.readiness), addr).await?;
    }

    let lifecycle = app.lifecycle();
    let spec = ContainerSpec::new(image).cmd(cmd);
    let mut session = Session::attach(&lifecycle, spec, name).await?;
    session.remove_on_interrupt();

    let piped = session.attach_stdio().await;
    let code = session.exit_code().await;
    session.close();

    if let Err(e) = remove_if_present(&lifecycle, name).await {
        warn!("Could not remove container {}: {}", name, e);
    }

    piped?;
    Ok(code)
}

/// Remove a container, treating one that is already gone as removed.
///
/// The interrupt handler of a session may have removed it first.
pub async fn remove_if_present(lifecycle: &LifecycleManager, name: &str) -> Result<bool> {
    match lifecycle.remove(name).await {
        Ok(()) => Ok(true),
        Err(CoreError::ContainerNotFound(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Print the state of a container
pub async fn status(app: &App, name: &str) -> Result<Option<ContainerRecord>> {
    match app.lifecycle().info(name).await {
        Ok(record) => {
            println!(
                "{}\t{}\t{}\t{}",
                record.name,
                record.id.short(),
                record.state,
                record.image
            );
            Ok(Some(record))
        }
        Err(CoreError::ContainerNotFound(_)) => {
            println!("{}\tnot found", name);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Stream the output of a container to stdout
pub async fn logs(app: &App, name: &str, follow: bool) -> Result<()> {
    let mut logs = app.lifecycle().logs(name, follow).await?;
    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut logs.stream, &mut stdout).await?;
    stdout.flush().await?;
    Ok(())
}

/// Remove a container
pub async fn remove(app: &App, name: &str) -> Result<()> {
    app.lifecycle()
        .remove(name)
        .await
        .with_context(|| format!("Could not remove {}", name))?;
    println!("Removed {}", name);
    Ok(())
}

/// Remove the shared network and the given volumes
pub async fn prune(app: &App, volumes: &[String]) -> Result<()> {
    let running: Vec<_> = app
        .lifecycle()
        .list()
        .await?
        .into_iter()
        .filter(|c| c.is_running())
        .collect();

    let network = app.network();
    if running.is_empty() {
        network.remove().await?;
        println!("Removed network {}", network.name());
    } else {
        warn!(
            "Keeping network {}, {} container(s) still running",
            network.name(),
            running.len()
        );
    }

    for volume in volumes {
        remove_volume(app.engine.as_ref(), volume)
            .await
            .with_context(|| format!("Could not remove volume {}", volume))?;
        println!("Removed volume {}", volume);
    }
    Ok(())
}

/// Show the configuration file location and its effective contents
pub fn config(config: &GlobalConfig) -> Result<()> {
    match GlobalConfig::config_path() {
        Ok(path) => println!("# {}", path.display()),
        Err(e) => warn!("{}", e),
    }
    let rendered = toml::to_string_pretty(config).context("Could not render configuration")?;
    print!("{}", rendered);
    Ok(())
}

/// Fail early with a readable message for an empty container name
pub fn check_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("Container name must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env() {
        assert_eq!(
            parse_env("GITBASE_USER=root").unwrap(),
            ("GITBASE_USER".to_string(), "root".to_string())
        );
        assert_eq!(
            parse_env("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_env("novalue").is_err());
        assert!(parse_env("=x").is_err());
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(
            parse_port("3306").unwrap(),
            PortMapping {
                host: HostPort::SameAsContainer,
                container: 3306
            }
        );
        assert_eq!(parse_port(":9432").unwrap().host, HostPort::Auto);
        assert_eq!(
            parse_port("13306:3306").unwrap(),
            PortMapping {
                host: HostPort::Fixed(13306),
                container: 3306
            }
        );
        assert!(parse_port("abc").is_err());
        assert!(parse_port("70000").is_err());
    }

    #[test]
    fn test_parse_bind() {
        assert_eq!(
            parse_bind("/home/me/repos:/opt/repos:ro").unwrap(),
            BindMount {
                host: "/home/me/repos".to_string(),
                target: "/opt/repos".to_string(),
                read_only: true,
            }
        );
        let win = parse_bind("C:/Users/me:/opt/repos").unwrap();
        assert_eq!(win.host, "C:/Users/me");
        assert_eq!(win.target, "/opt/repos");
        assert!(!win.read_only);
        assert!(parse_bind("/only-host").is_err());
    }

    #[test]
    fn test_parse_volume_and_address() {
        assert_eq!(
            parse_volume("gitbase-index:/var/lib/gitbase/index").unwrap(),
            (
                "gitbase-index".to_string(),
                "/var/lib/gitbase/index".to_string()
            )
        );
        assert!(parse_volume("relative:path").is_err());
        assert!(parse_address("localhost:3306").is_ok());
        assert!(parse_address("localhost").is_err());
        assert!(parse_address(":3306").is_err());
    }
}
