//! In-memory [`Backend`] for unit tests.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use serde_json::json;

use crate::config::RunParams;
use crate::docker::{
    Backend, BuildRequest, BuildStatus, CommitRequest, ContainerDetails, LogSource,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Run { image: String, params: RunParams },
    Stop { id: String, grace: Duration },
    Kill { id: String },
    Remove { id: String },
    Commit { id: String, request: CommitRequest },
    Build { request: BuildRequest, archive: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    /// `(volume name, destination)` pairs.
    pub mounts: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct FakeImage {
    pub id: String,
    pub tags: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Default)]
struct State {
    containers: Vec<FakeContainer>,
    images: Vec<FakeImage>,
    calls: Vec<Call>,
    log_lines: Vec<String>,
    build_lines: Vec<String>,
    build_fails: bool,
    fail_runs: bool,
    fail_stops: bool,
    fail_removes: bool,
    fail_inspects: bool,
    plain_build_output: bool,
    next_id: usize,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<State>,
}

impl FakeBackend {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn add_container(&self, name: &str, status: &str) -> String {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("ctr{:04}", state.next_id);
        state.containers.push(FakeContainer {
            id: id.clone(),
            name: name.to_string(),
            image: "sha256:base".into(),
            status: status.to_string(),
            mounts: Vec::new(),
        });
        id
    }

    pub fn add_mount(&self, container: &str, volume: &str, destination: &str) {
        let mut state = self.state();
        let ctr = state
            .containers
            .iter_mut()
            .find(|c| c.id == container || c.name == container)
            .expect("no such fake container");
        ctr.mounts.push((volume.to_string(), destination.to_string()));
    }

    pub fn add_image(&self, id: &str, tags: &[&str], labels: &[(&str, &str)]) {
        self.state().images.push(FakeImage {
            id: id.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
    }

    pub fn container(&self, id_or_name: &str) -> Option<FakeContainer> {
        self.state()
            .containers
            .iter()
            .find(|c| c.id == id_or_name || c.name == id_or_name)
            .cloned()
    }

    pub fn image(&self, id: &str) -> Option<FakeImage> {
        self.state().images.iter().find(|i| i.id == id).cloned()
    }

    pub fn set_log_lines(&self, lines: &[&str]) {
        self.state().log_lines = lines.iter().map(|l| l.to_string()).collect();
    }

    pub fn set_build_output(&self, lines: &[&str], fails: bool) {
        let mut state = self.state();
        state.build_lines = lines.iter().map(|l| l.to_string()).collect();
        state.build_fails = fails;
    }

    pub fn fail_runs(&self) {
        self.state().fail_runs = true;
    }

    pub fn fail_stops(&self) {
        self.state().fail_stops = true;
    }

    pub fn fail_removes(&self) {
        self.state().fail_removes = true;
    }

    pub fn fail_inspects(&self) {
        self.state().fail_inspects = true;
    }

    /// Report build output as plain text instead of JSON frames.
    pub fn plain_build_output(&self) {
        self.state().plain_build_output = true;
    }
}

fn find<'a>(state: &'a mut State, id_or_name: &str) -> Option<&'a mut FakeContainer> {
    state
        .containers
        .iter_mut()
        .find(|c| c.id == id_or_name || c.name == id_or_name)
}

fn no_such(id: &str) -> anyhow::Error {
    anyhow!("Error response from daemon: No such container: {id}")
}

impl Backend for FakeBackend {
    fn run_detached(&self, image: &str, params: &RunParams) -> Result<String> {
        let mut state = self.state();
        state.calls.push(Call::Run {
            image: image.to_string(),
            params: params.clone(),
        });
        if state.fail_runs {
            bail!("Error response from daemon: pull access denied for {image}");
        }
        state.next_id += 1;
        let id = format!("ctr{:04}", state.next_id);
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| format!("auto_{}", state.next_id));
        if state.containers.iter().any(|c| c.name == name) {
            bail!("Conflict. The container name \"/{name}\" is already in use");
        }
        state.containers.push(FakeContainer {
            id: id.clone(),
            name,
            image: image.to_string(),
            status: "running".into(),
            mounts: Vec::new(),
        });
        Ok(id)
    }

    fn follow_logs(&self, _container: &str) -> Result<Vec<LogSource>> {
        let mut text = self.state().log_lines.join("\n");
        text.push('\n');
        Ok(vec![LogSource {
            channel: "stdout",
            reader: Box::new(Cursor::new(text.into_bytes())),
        }])
    }

    fn inspect_container(&self, container: &str) -> Result<Option<ContainerDetails>> {
        let mut state = self.state();
        if state.fail_inspects {
            bail!("permission denied while trying to connect to the Docker daemon socket");
        }
        let Some(ctr) = find(&mut state, container) else {
            return Ok(None);
        };
        let mounts: Vec<_> = ctr
            .mounts
            .iter()
            .map(|(name, dest)| json!({ "Type": "volume", "Name": name, "Destination": dest }))
            .collect();
        let doc = json!({
            "Id": ctr.id,
            "Name": format!("/{}", ctr.name),
            "Image": ctr.image,
            "State": { "Status": ctr.status },
            "Mounts": mounts,
        });
        Ok(Some(ContainerDetails::from_inspect(doc)?))
    }

    fn stop_container(&self, container: &str, grace: Duration) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::Stop {
            id: container.to_string(),
            grace,
        });
        if state.fail_stops {
            bail!("Error response from daemon: cannot stop container {container}");
        }
        let ctr = find(&mut state, container).ok_or_else(|| no_such(container))?;
        ctr.status = "exited".into();
        Ok(())
    }

    fn kill_container(&self, container: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::Kill {
            id: container.to_string(),
        });
        let ctr = find(&mut state, container).ok_or_else(|| no_such(container))?;
        ctr.status = "exited".into();
        Ok(())
    }

    fn remove_container(&self, container: &str) -> Result<()> {
        let mut state = self.state();
        state.calls.push(Call::Remove {
            id: container.to_string(),
        });
        if state.fail_removes {
            bail!("Error response from daemon: removal of container {container} is already in progress");
        }
        let before = state.containers.len();
        state
            .containers
            .retain(|c| c.id != container && c.name != container);
        if state.containers.len() == before {
            return Err(no_such(container));
        }
        Ok(())
    }

    fn commit_container(&self, container: &str, request: &CommitRequest) -> Result<String> {
        let mut state = self.state();
        state.calls.push(Call::Commit {
            id: container.to_string(),
            request: request.clone(),
        });
        if find(&mut state, container).is_none() {
            return Err(no_such(container));
        }
        state.next_id += 1;
        let id = format!("sha256:img{:04}", state.next_id);
        state.images.push(FakeImage {
            id: id.clone(),
            tags: vec![format!("{}:{}", request.repository, request.tag)],
            labels: request.labels.clone(),
        });
        Ok(id)
    }

    fn images_by_label(&self, key: &str, value: &str) -> Result<Vec<String>> {
        Ok(self
            .state()
            .images
            .iter()
            .filter(|i| i.labels.get(key).map(String::as_str) == Some(value))
            .map(|i| i.id.clone())
            .collect())
    }

    fn image_id_by_tag(&self, tag: &str) -> Result<Option<String>> {
        let tag = if tag.contains(':') {
            tag.to_string()
        } else {
            format!("{tag}:latest")
        };
        Ok(self
            .state()
            .images
            .iter()
            .find(|i| i.tags.contains(&tag))
            .map(|i| i.id.clone()))
    }

    fn emits_build_frames(&self) -> bool {
        !self.state().plain_build_output
    }

    fn build_image(
        &self,
        mut context: File,
        request: &BuildRequest,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<BuildStatus> {
        let mut archive = Vec::new();
        context.read_to_end(&mut archive)?;
        let (lines, fails) = {
            let mut state = self.state();
            state.calls.push(Call::Build {
                request: request.clone(),
                archive,
            });
            (state.build_lines.clone(), state.build_fails)
        };

        for line in &lines {
            on_line(line);
        }
        if fails {
            return Ok(BuildStatus {
                success: false,
                exit_code: Some(1),
            });
        }

        let mut state = self.state();
        let latest = format!("{}:latest", request.tag);
        for image in state.images.iter_mut() {
            image.tags.retain(|t| t != &latest);
        }
        state.next_id += 1;
        let id = format!("sha256:built{:04}", state.next_id);
        state.images.push(FakeImage {
            id,
            tags: vec![latest],
            labels: BTreeMap::new(),
        });
        Ok(BuildStatus {
            success: true,
            exit_code: Some(0),
        })
    }
}
