// Project configuration: `container.yml` and the runtime environment.

mod env;
mod loader;
mod types;

pub use env::{DOCKER_CERT_PATH, DOCKER_HOST, DOCKER_TLS_VERIFY, RuntimeEnv};
pub use loader::PROJECT_FILE;
pub use types::{
    BUILD_ONLY_KEYS, DEFAULT_RUNTIME_CLIENT_VERSION, ProjectConfig, RunParams, ServiceDefinition,
    Settings,
};
