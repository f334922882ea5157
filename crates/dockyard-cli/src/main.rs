//! dockyard - run, supervise and attach to containerized services

use clap::{Parser, Subcommand};
use dockyard_cli::commands::{
    self, parse_address, parse_bind, parse_env, parse_port, parse_volume, App, BindMount,
    PortMapping, UpOptions,
};
use dockyard_config::GlobalConfig;
use dockyard_core::{ReadinessPolicy, RegistryClient};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "dockyard")]
#[command(author, version, about = "Run and attach to containerized services", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this configuration file instead of the default one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the engine API version
    Version,

    /// Make sure an image is present locally
    Install {
        /// Image reference, e.g. srcd/gitbase:v0.24.0
        image: String,
        /// Tag to install, overrides the one in the reference
        #[arg(long)]
        tag: Option<String>,
    },

    /// Find the newest image tag compatible with a client version
    Compat {
        image: String,
        /// Client version; empty or "dev" resolves to latest
        #[arg(long, default_value = "")]
        client_version: String,
    },

    /// Start a container unless it is already running
    Up {
        /// Container name
        name: String,
        #[arg(long)]
        image: String,
        /// Environment variable (KEY=VALUE)
        #[arg(long = "env", short = 'e', value_parser = parse_env)]
        env: Vec<(String, String)>,
        /// Published port (CONTAINER, :CONTAINER or HOST:CONTAINER)
        #[arg(long = "port", short = 'p', value_parser = parse_port)]
        ports: Vec<PortMapping>,
        /// Named volume (NAME:/path)
        #[arg(long = "volume", value_parser = parse_volume)]
        volumes: Vec<(String, String)>,
        /// Host directory (HOST:/path[:ro])
        #[arg(long = "bind", value_parser = parse_bind)]
        binds: Vec<BindMount>,
        /// Command to run
        #[arg(last = true)]
        cmd: Vec<String>,
    },

    /// Run an interactive container, removing it on exit
    Run {
        /// Container name
        name: String,
        #[arg(long)]
        image: String,
        /// Wait for HOST:PORT to accept connections first
        #[arg(long, value_parser = parse_address)]
        wait_for: Option<String>,
        /// Command to run
        #[arg(last = true)]
        cmd: Vec<String>,
    },

    /// Wait until HOST:PORT accepts connections
    Wait {
        #[arg(value_parser = parse_address)]
        address: String,
        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show the state of a container
    Status { name: String },

    /// Show the output of a container
    Logs {
        name: String,
        #[arg(short, long)]
        follow: bool,
    },

    /// Remove a container
    Rm { name: String },

    /// Remove the shared network and named volumes
    Prune {
        /// Volumes to remove as well
        #[arg(long = "volumes", num_args = 1..)]
        volumes: Vec<String>,
    },

    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    // Initialize logging, RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = match &cli.config {
        Some(path) => GlobalConfig::load_from(path)?,
        None => GlobalConfig::load().unwrap_or_default(),
    };

    // Commands that never touch the engine
    match &cli.command {
        Commands::Compat {
            image,
            client_version,
        } => {
            let registry = RegistryClient::new(&config.registry)?;
            commands::compat(&registry, image, client_version).await?;
            return Ok(0);
        }
        Commands::Wait { address, timeout } => {
            let mut policy = ReadinessPolicy::from(&config.readiness);
            if let Some(secs) = timeout {
                policy.deadline = Duration::from_secs(*secs);
            }
            commands::wait(&policy, address).await?;
            return Ok(0);
        }
        Commands::Config => {
            commands::config(&config)?;
            return Ok(0);
        }
        _ => {}
    }

    let engine = dockyard_provider::connect(&config.engine).await?;
    let app = App::new(config, engine);

    match cli.command {
        Commands::Version => {
            commands::version(&app).await?;
        }
        Commands::Install { image, tag } => {
            commands::install(&app, &image, tag.as_deref()).await?;
        }
        Commands::Up {
            name,
            image,
            env,
            ports,
            volumes,
            binds,
            cmd,
        } => {
            commands::check_name(&name)?;
            let opts = UpOptions {
                image,
                env,
                ports,
                volumes,
                binds,
                cmd,
            };
            commands::up(&app, &name, &opts).await?;
        }
        Commands::Run {
            name,
            image,
            wait_for,
            cmd,
        } => {
            commands::check_name(&name)?;
            let code = commands::run(&app, &name, &image, wait_for.as_deref(), cmd).await?;
            return Ok(i32::try_from(code).unwrap_or(1));
        }
        Commands::Status { name } => {
            commands::status(&app, &name).await?;
        }
        Commands::Logs { name, follow } => {
            commands::logs(&app, &name, follow).await?;
        }
        Commands::Rm { name } => {
            commands::remove(&app, &name).await?;
        }
        Commands::Prune { volumes } => {
            commands::prune(&app, &volumes).await?;
        }
        Commands::Compat { .. } | Commands::Wait { .. } | Commands::Config => {}
    }

    Ok(0)
}
