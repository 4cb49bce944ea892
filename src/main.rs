use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dockhand::Engine;
use dockhand::config::ProjectConfig;
use dockhand::docker::DockerCli;
use dockhand::engine::CONDUCTOR_SERVICE;

#[derive(Parser)]
#[command(name = "dockhand", version, about = "Build and run container projects")]
struct Cli {
    /// Project directory containing container.yml
    #[arg(long, global = true, default_value = ".", env = "DOCKHAND_PROJECT")]
    project: PathBuf,

    /// Show build output and debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the project's conductor image
    BuildConductor {
        /// Base image (defaults to settings.conductor_base)
        #[arg(long)]
        base: Option<String>,

        /// Build without the layer cache
        #[arg(long)]
        no_cache: bool,
    },
    /// Start the conductor with a work order and follow its output
    Conductor {
        /// Work order command, e.g. `build` or `run`
        command: String,

        /// Mount the local conductor source over the installed copy
        #[arg(long)]
        devel: bool,

        /// Extra work order parameter, KEY=VALUE (VALUE may be JSON)
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },
    /// Show which services have running containers
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let base_path = cli.project.clone();
    let project = ProjectConfig::load(&base_path)?;
    let docker = DockerCli::new(project.settings.docker_binary.clone());
    docker.ensure_available()?;
    let engine = Engine::from_project(&project, Arc::new(docker)).verbose(cli.verbose);

    match cli.command {
        Command::BuildConductor { base, no_cache } => {
            let base = base.unwrap_or_else(|| project.settings.conductor_base.clone());
            let image = engine.build_conductor_image(&base_path, &base, !no_cache)?;
            println!("{image}");
        }
        Command::Conductor {
            command,
            devel,
            params,
        } => {
            let mut order = parse_params(&params)?;
            order.insert("devel".into(), Value::Bool(devel));
            let id = engine.launch_conductor(
                &command,
                &project.document,
                &base_path,
                &Value::Object(order),
            )?;
            engine.wait_for_logs();
            let name = engine.container_name_for_service(CONDUCTOR_SERVICE);
            if let Some(details) = engine.inspect_container(&id)? {
                info!(container = %name, status = %details.status, "conductor finished");
            }
        }
        Command::Status => {
            for service in engine.services() {
                let name = engine.container_name_for_service(&service.name);
                let state = match engine.inspect_container(&name)? {
                    Some(details) if details.is_running() => "running",
                    Some(_) => "stopped",
                    None => "absent",
                };
                println!("{:<24} {state}", service.name);
            }
        }
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "dockhand=debug" } else { "dockhand=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_params(raw: &[String]) -> Result<Map<String, Value>> {
    let mut params = Map::new();
    for item in raw {
        let Some((key, value)) = item.split_once('=') else {
            bail!("parameter `{item}` is not KEY=VALUE");
        };
        if key.is_empty() {
            bail!("parameter `{item}` has an empty key");
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.into()));
        params.insert(key.to_string(), value);
    }
    Ok(params)
}
