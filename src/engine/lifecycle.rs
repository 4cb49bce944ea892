use std::time::Duration;

use tracing::{debug, info, warn};

use super::Engine;
use crate::config::{BUILD_ONLY_KEYS, RunParams};
use crate::docker::ContainerDetails;
use crate::error::{EngineError, Result};

/// How long a graceful stop waits before the runtime kills the container.
pub const STOP_GRACE: Duration = Duration::from_secs(60);

impl Engine {
    /// Run `image_id` as the container for `service_name`.
    ///
    /// The service's declared parameters are the base; `overrides` replace
    /// them key by key. Build-only keys never reach the runtime. Returns as
    /// soon as the container is started, with its output already attached to
    /// the log multiplexer.
    pub fn run_container(
        &self,
        image_id: &str,
        service_name: &str,
        overrides: RunParams,
    ) -> Result<String> {
        let params = self.run_params_for_service(service_name, overrides)?;
        debug!(image = image_id, ?params, "docker run");
        let source = self.container_name_for_service(service_name);
        self.launch(image_id, &params, &source)
    }

    /// Declared parameters merged with `overrides`, build-only keys removed,
    /// `name` set to the service's container name.
    pub fn run_params_for_service(
        &self,
        service_name: &str,
        overrides: RunParams,
    ) -> Result<RunParams> {
        let service = self
            .services
            .get(service_name)
            .ok_or_else(|| EngineError::UnknownService(service_name.to_string()))?;
        let mut params = service.run_params();
        for (key, value) in overrides {
            if BUILD_ONLY_KEYS.contains(&key.as_str()) {
                debug!(key = %key, "ignoring build-only override");
                continue;
            }
            params.insert(key, value);
        }
        // Lookups by service depend on this name, so overrides cannot change it.
        params.insert(
            "name".into(),
            serde_json::Value::String(self.container_name_for_service(service_name)),
        );
        Ok(params)
    }

    /// Start a detached container and attach its output. Shared with the
    /// conductor launcher.
    pub(super) fn launch(&self, image: &str, params: &RunParams, source: &str) -> Result<String> {
        let id = self.backend.run_detached(image, params)?;
        info!(container = source, id = %id, "container started");
        self.attach_logs(&id, source);
        Ok(id)
    }

    /// Stop a container. Graceful stops allow [`STOP_GRACE`] before the kill.
    ///
    /// Best effort: an unknown container or a runtime error is logged, not
    /// returned.
    pub fn stop_container(&self, container_id: &str, forceful: bool) -> Result<()> {
        if self.inspect_container(container_id)?.is_none() {
            debug!(container = container_id, "stop: container not found");
            return Ok(());
        }
        let result = if forceful {
            self.backend.kill_container(container_id)
        } else {
            self.backend.stop_container(container_id, STOP_GRACE)
        };
        if let Err(e) = result {
            warn!(container = container_id, forceful, error = %e, "stop failed");
        }
        Ok(())
    }

    /// Remove a container. Best effort, like [`Engine::stop_container`].
    pub fn delete_container(&self, container_id: &str) -> Result<()> {
        if self.inspect_container(container_id)?.is_none() {
            debug!(container = container_id, "delete: container not found");
            return Ok(());
        }
        if let Err(e) = self.backend.remove_container(container_id) {
            warn!(container = container_id, error = %e, "delete failed");
        }
        Ok(())
    }

    /// Container metadata, or `None` when the runtime does not know it.
    pub fn inspect_container(&self, container_id: &str) -> Result<Option<ContainerDetails>> {
        match self.backend.inspect_container(container_id) {
            Ok(details) => Ok(details),
            Err(e) => {
                debug!(container = container_id, error = %e, "inspect failed");
                Ok(None)
            }
        }
    }

    pub fn container_id_for_service(&self, service_name: &str) -> Result<Option<String>> {
        let name = self.container_name_for_service(service_name);
        Ok(self.inspect_container(&name)?.map(|c| c.id))
    }

    pub fn service_is_running(&self, service_name: &str) -> Result<bool> {
        let name = self.container_name_for_service(service_name);
        Ok(self
            .inspect_container(&name)?
            .is_some_and(|c| c.is_running()))
    }
}
