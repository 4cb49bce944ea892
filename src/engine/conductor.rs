use std::path::Path;

use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::context::ConductorSource;
use super::payload::{self, ENCODING};
use super::{ENGINE_ID, Engine};
use crate::config::RunParams;
use crate::error::{EngineError, Result};

/// Service name under which the conductor's image and container live.
pub const CONDUCTOR_SERVICE: &str = "conductor";

/// Where the project source tree appears inside the conductor.
pub const SOURCE_MOUNT: &str = "/src";
pub const CERT_MOUNT: &str = "/etc/docker";
pub const LOCAL_SOCKET: &str = "/var/run/docker.sock";
/// Bundled copy of the conductor package inside its image.
pub const DEVEL_MOUNT: &str = "/_dockhand/conductor/conductor";
/// The conductor's runtime volume, shared with the containers it configures.
pub const RUNTIME_VOLUME_MOUNT: &str = "/usr";

/// The command line a conductor container is started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkOrder {
    pub command: String,
    pub project_name: String,
    pub engine: String,
    /// `b64json`-encoded parameters.
    pub params: String,
    /// `b64json`-encoded project configuration.
    pub config: String,
}

impl WorkOrder {
    pub fn new(command: &str, project_name: &str, config: &Value, params: &Value) -> Result<Self> {
        Ok(Self {
            command: command.to_string(),
            project_name: project_name.to_string(),
            engine: ENGINE_ID.to_string(),
            params: payload::encode(params)?,
            config: payload::encode(config)?,
        })
    }

    pub fn argv(&self) -> Vec<String> {
        vec![
            "conductor".into(),
            self.command.clone(),
            "--project-name".into(),
            self.project_name.clone(),
            "--engine".into(),
            self.engine.clone(),
            "--params".into(),
            self.params.clone(),
            "--config".into(),
            self.config.clone(),
            "--encoding".into(),
            ENCODING.into(),
        ]
    }
}

fn bind(mode: &str, target: &str) -> Value {
    json!({ "bind": target, "mode": mode })
}

impl Engine {
    /// Start the conductor with a work order and return its container id.
    ///
    /// Does not wait for the work order to finish; the conductor's output
    /// goes to the log multiplexer.
    pub fn launch_conductor(
        &self,
        command: &str,
        config: &Value,
        base_path: &Path,
        params: &Value,
    ) -> Result<String> {
        let image_id = self
            .latest_image_id_for_service(CONDUCTOR_SERVICE)?
            .ok_or_else(|| {
                EngineError::Configuration(format!(
                    "no conductor image {}:latest; build the conductor first",
                    self.image_name_for_service(CONDUCTOR_SERVICE)
                ))
            })?;

        let run_params = self.conductor_run_params(command, config, base_path, params)?;
        self.clear_stale_conductor()?;

        debug!(image = %image_id, ?run_params, "docker run conductor");
        let name = self.container_name_for_service(CONDUCTOR_SERVICE);
        let id = self.launch(&image_id, &run_params, &name)?;
        info!(command, container = %name, "conductor launched");
        Ok(id)
    }

    /// Everything `docker run` needs to start the conductor.
    pub fn conductor_run_params(
        &self,
        command: &str,
        config: &Value,
        base_path: &Path,
        params: &Value,
    ) -> Result<RunParams> {
        let base_path = base_path.canonicalize().map_err(|e| {
            EngineError::Configuration(format!(
                "project path {} is not accessible: {e}",
                base_path.display()
            ))
        })?;

        let mut volumes = Map::new();
        let mut environment = Map::new();
        volumes.insert(path_key(&base_path), bind("ro", SOURCE_MOUNT));

        match &self.env.docker_host {
            Some(host) => {
                environment.insert("DOCKER_HOST".into(), json!(host));
                if let Some(certs) = &self.env.cert_path {
                    environment.insert("DOCKER_CERT_PATH".into(), json!(CERT_MOUNT));
                    volumes.insert(path_key(certs), bind("ro", CERT_MOUNT));
                }
                if let Some(verify) = &self.env.tls_verify {
                    environment.insert("DOCKER_TLS_VERIFY".into(), json!(verify));
                }
            }
            None => {
                environment.insert(
                    "DOCKER_HOST".into(),
                    json!(format!("unix://{LOCAL_SOCKET}")),
                );
                volumes.insert(LOCAL_SOCKET.into(), bind("rw", LOCAL_SOCKET));
            }
        }

        if params.get("devel").and_then(Value::as_bool).unwrap_or(false) {
            let source = ConductorSource::locate(&self.settings, &base_path);
            debug!(path = %source.package_dir.display(), "development mode: mounting conductor source");
            volumes.insert(path_key(&source.package_dir), bind("rw", DEVEL_MOUNT));
        }

        let order = WorkOrder::new(command, &self.project_name, config, params)?;

        let mut run = RunParams::new();
        run.insert(
            "name".into(),
            json!(self.container_name_for_service(CONDUCTOR_SERVICE)),
        );
        run.insert("command".into(), json!(order.argv()));
        run.insert("user".into(), json!("root"));
        run.insert("volumes".into(), Value::Object(volumes));
        run.insert("environment".into(), Value::Object(environment));
        Ok(run)
    }

    /// One conductor per project: a running one blocks the launch, a
    /// stopped one is removed to free the name.
    fn clear_stale_conductor(&self) -> Result<()> {
        let name = self.container_name_for_service(CONDUCTOR_SERVICE);
        let Some(existing) = self.inspect_container(&name)? else {
            return Ok(());
        };
        if existing.is_running() {
            return Err(EngineError::Configuration(format!(
                "conductor container {name} is already running ({})",
                existing.id
            )));
        }
        info!(container = %name, status = %existing.status, "removing stale conductor container");
        self.delete_container(&existing.id)
    }

    /// Name of the volume the conductor exposes at `/usr`.
    pub fn runtime_volume_id(&self) -> Result<String> {
        let name = self.container_name_for_service(CONDUCTOR_SERVICE);
        let container = self.inspect_container(&name)?.ok_or_else(|| {
            EngineError::Configuration(format!("conductor container {name} not found"))
        })?;
        container
            .mount_at(RUNTIME_VOLUME_MOUNT)
            .map(|m| m.name.clone())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                EngineError::Configuration(format!(
                    "runtime volume at {RUNTIME_VOLUME_MOUNT} not found on conductor {name}"
                ))
            })
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
