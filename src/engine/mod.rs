//! The Docker engine: lifecycle, image cache, conductor bootstrap.
//!
//! One [`Engine`] serves one project. The runtime backend, log sink and
//! environment are handed in at construction; nothing is created lazily.

pub mod build_log;
mod cache;
mod conductor;
pub mod context;
mod lifecycle;
pub mod payload;

pub use cache::ImageMetadata;
pub use conductor::{CONDUCTOR_SERVICE, WorkOrder};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::{ProjectConfig, RuntimeEnv, ServiceDefinition, Settings};
use crate::docker::Backend;
use crate::logmux::{LogMux, LogSink, LogWorker};

/// Identifier passed to the conductor as `--engine`.
pub const ENGINE_ID: &str = "docker";

pub const DISPLAY_NAME: &str = "Docker\u{2122} daemon";

/// Label carrying a role's content fingerprint on every committed image.
pub const FINGERPRINT_LABEL_KEY: &str = "dockhand.fingerprint";

/// Commit message attached to every committed layer.
pub const LAYER_COMMENT: &str = "Built with dockhand";

/// Connection arguments for playbook runs against this engine's containers.
pub const CONNECTION_ARGS: &str = "-c docker";

/// What this engine implementation can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub build_conductor: bool,
    pub build: bool,
    pub run: bool,
    pub deploy: bool,
}

pub const CAPABILITIES: Capabilities = Capabilities {
    build_conductor: true,
    build: true,
    run: true,
    deploy: true,
};

pub struct Engine {
    project_name: String,
    services: BTreeMap<String, ServiceDefinition>,
    settings: Settings,
    env: RuntimeEnv,
    backend: Arc<dyn Backend>,
    logs: LogMux,
    workers: Mutex<Vec<LogWorker>>,
    /// Last commit second handed out per service.
    commit_tags: Mutex<HashMap<String, DateTime<Utc>>>,
    verbose: bool,
}

impl Engine {
    pub fn new(project_name: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        Self {
            project_name: project_name.into(),
            services: BTreeMap::new(),
            settings: Settings::default(),
            env: RuntimeEnv::default(),
            backend,
            logs: LogMux::default(),
            workers: Mutex::new(Vec::new()),
            commit_tags: Mutex::new(HashMap::new()),
            verbose: false,
        }
    }

    /// Engine for a loaded project, reading endpoint settings from the environment.
    pub fn from_project(project: &ProjectConfig, backend: Arc<dyn Backend>) -> Self {
        Self::new(project.name.clone(), backend)
            .with_services(project.services.values().cloned())
            .with_settings(project.settings.clone())
            .with_env(RuntimeEnv::from_env())
    }

    pub fn with_services(mut self, services: impl IntoIterator<Item = ServiceDefinition>) -> Self {
        self.services = services
            .into_iter()
            .map(|svc| (svc.name.clone(), svc))
            .collect();
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_env(mut self, env: RuntimeEnv) -> Self {
        self.env = env;
        self
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.logs = LogMux::new(sink);
        self
    }

    /// Stream build output to debug logging instead of consuming it quietly.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.values()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn container_name_for_service(&self, service_name: &str) -> String {
        format!("{}_{}", self.project_name, service_name)
    }

    pub fn image_name_for_service(&self, service_name: &str) -> String {
        format!("{}-{}", self.project_name, service_name)
    }

    /// Attach every output channel of `container_id` to the log multiplexer.
    ///
    /// Failing to follow logs does not undo the launch; the container is
    /// already running by the time this is called.
    fn attach_logs(&self, container_id: &str, source: &str) {
        let sources = match self.backend.follow_logs(container_id) {
            Ok(sources) => sources,
            Err(e) => {
                warn!(container = source, error = %e, "cannot follow container output");
                return;
            }
        };
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers.retain(|w| !w.is_finished());
        for log in sources {
            debug!(container = source, channel = log.channel, "attaching log stream");
            workers.push(self.logs.attach(source, log.reader));
        }
    }

    /// Block until every attached log stream has ended.
    pub fn wait_for_logs(&self) {
        let workers = {
            let mut guard = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for worker in workers {
            let source = worker.source().to_string();
            let stats = worker.join();
            if stats.dropped > 0 {
                warn!(container = %source, dropped = stats.dropped, "log lines dropped");
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("project_name", &self.project_name)
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;

    #[test]
    fn names_are_deterministic() {
        let engine = Engine::new("myapp", Arc::new(FakeBackend::default()));
        assert_eq!(engine.container_name_for_service("web"), "myapp_web");
        assert_eq!(engine.image_name_for_service("web"), "myapp-web");
        // Stable across calls.
        assert_eq!(
            engine.container_name_for_service("web"),
            engine.container_name_for_service("web")
        );
    }

    #[test]
    fn names_follow_project_and_service() {
        for (project, service) in [("a", "b"), ("shop", "db"), ("x-y", "z_w")] {
            let engine = Engine::new(project, Arc::new(FakeBackend::default()));
            assert_eq!(
                engine.container_name_for_service(service),
                format!("{project}_{service}")
            );
            assert_eq!(
                engine.image_name_for_service(service),
                format!("{project}-{service}")
            );
        }
    }

    #[test]
    fn from_project_carries_services_and_settings() {
        let mut project = ProjectConfig {
            name: "shop".into(),
            ..ProjectConfig::default()
        };
        project.settings.conductor_base = "debian:12".into();
        project
            .services
            .insert("web".into(), ServiceDefinition::new("web", Default::default()));

        let engine = Engine::from_project(&project, Arc::new(FakeBackend::default()));
        assert_eq!(engine.project_name(), "shop");
        assert_eq!(engine.settings().conductor_base, "debian:12");
        assert_eq!(engine.services().count(), 1);
    }

    #[test]
    fn descriptors() {
        assert!(CAPABILITIES.build_conductor);
        assert_eq!(ENGINE_ID, "docker");
        assert_eq!(CONNECTION_ARGS, "-c docker");
        assert!(DISPLAY_NAME.starts_with("Docker"));
    }
}
