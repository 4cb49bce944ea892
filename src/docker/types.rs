use std::collections::BTreeMap;
use std::io::Read;

use serde::Deserialize;

/// A container as reported by `docker inspect`.
#[derive(Debug, Clone)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub status: String,
    pub mounts: Vec<Mount>,
    /// The full inspect document.
    pub raw: serde_json::Value,
}

impl ContainerDetails {
    /// Build from one element of the `docker inspect` output array.
    pub fn from_inspect(raw: serde_json::Value) -> anyhow::Result<Self> {
        let doc: InspectDoc = serde_json::from_value(raw.clone())?;
        Ok(Self {
            id: doc.id,
            name: doc.name.trim_start_matches('/').to_string(),
            status: doc.state.status,
            mounts: doc.mounts,
            raw,
        })
    }

    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    pub fn mount_at(&self, destination: &str) -> Option<&Mount> {
        self.mounts.iter().find(|m| m.destination == destination)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectDoc {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: InspectState,
    #[serde(default)]
    mounts: Vec<Mount>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Mount {
    #[serde(default, rename = "Type")]
    pub kind: String,
    /// Volume name; empty for bind mounts.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub source: String,
    pub destination: String,
}

/// Parameters for `docker commit`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitRequest {
    pub repository: String,
    pub tag: String,
    pub message: String,
    pub labels: BTreeMap<String, String>,
    /// Dockerfile instructions applied to the image config (`CMD`, `ENV`, ...).
    pub changes: Vec<String>,
}

/// Parameters for `docker build` from a context archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub tag: String,
    pub use_cache: bool,
    pub remove_intermediate: bool,
}

/// Outcome of a build once its output has been drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildStatus {
    pub success: bool,
    pub exit_code: Option<i32>,
}

/// One readable output stream of a running container.
pub struct LogSource {
    /// `stdout` or `stderr`.
    pub channel: &'static str,
    pub reader: Box<dyn Read + Send>,
}

impl std::fmt::Debug for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSource")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

/// Streamed output from a `docker` child process.
#[derive(Debug)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}
