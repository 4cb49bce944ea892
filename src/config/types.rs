use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Run parameters as declared in the project file, keyed by parameter name.
pub type RunParams = serde_json::Map<String, serde_json::Value>;

/// Keys that only matter to image builds and never reach `docker run`.
pub const BUILD_ONLY_KEYS: [&str; 2] = ["from", "roles"];

/// Runtime-client version baked into the conductor image.
pub const DEFAULT_RUNTIME_CLIENT_VERSION: &str = "24.0.7";

/// Engine settings from the `settings` block of `container.yml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub project_name: Option<String>,
    pub conductor_base: String,
    pub conductor_source: Option<PathBuf>,
    pub runtime_client_version: String,
    pub docker_binary: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_name: None,
            conductor_base: "centos:7".to_string(),
            conductor_source: None,
            runtime_client_version: DEFAULT_RUNTIME_CLIENT_VERSION.to_string(),
            docker_binary: "docker".to_string(),
        }
    }
}

/// One service from the project's `services` mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceDefinition {
    pub name: String,
    /// Everything declared for the service, build-only keys included.
    pub declared: RunParams,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>, declared: RunParams) -> Self {
        Self {
            name: name.into(),
            declared,
        }
    }

    /// The image this service is built on.
    pub fn from(&self) -> Option<&str> {
        self.declared.get("from").and_then(|v| v.as_str())
    }

    pub fn roles(&self) -> Vec<&str> {
        self.declared
            .get("roles")
            .and_then(|v| v.as_array())
            .map(|roles| roles.iter().filter_map(|r| r.as_str()).collect())
            .unwrap_or_default()
    }

    /// Declared parameters with the build-only keys removed.
    pub fn run_params(&self) -> RunParams {
        let mut params = self.declared.clone();
        for key in BUILD_ONLY_KEYS {
            params.remove(key);
        }
        params
    }
}

/// Parsed `container.yml`.
#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    pub name: String,
    pub settings: Settings,
    pub services: BTreeMap<String, ServiceDefinition>,
    /// The whole file as structured data, handed to the conductor verbatim.
    pub document: serde_json::Value,
}
