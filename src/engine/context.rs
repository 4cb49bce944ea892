//! Build context for the conductor image.
//!
//! The context is a tar archive with a fixed layout:
//!
//! ```text
//! build-src/.touch              always present
//! build-src/<project files>     only those that exist
//! contrib/install-runtime.sh    bundled installer
//! conductor-src/conductor/...   helper package source
//! conductor-src/setup.py
//! conductor-src/requirements.txt
//! Dockerfile                    rendered from the bundled template
//! ```
//!
//! Headers are normalized (mtime, owner, mode) and trees are walked in name
//! order, so identical inputs produce identical archives.

use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result as AnyResult, bail};
use include_dir::{Dir, include_dir};
use tracing::{debug, info};
use walkdir::WalkDir;

use super::Engine;
use super::build_log::{BuildLine, decode_build_line};
use super::conductor::CONDUCTOR_SERVICE;
use crate::config::Settings;
use crate::docker::BuildRequest;
use crate::error::{EngineError, Result};

static ASSETS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/assets");

const DOCKERFILE_TEMPLATE: &str = "templates/conductor.Dockerfile";
const INSTALLER: &str = "files/install-runtime.sh";

/// Project files copied into `build-src/` when present.
pub const PROJECT_CONTEXT_FILES: [&str; 3] =
    ["ansible.cfg", "ansible-requirements.txt", "requirements.yml"];

/// Directory and file names never copied from the helper source tree.
const SKIPPED_NAMES: [&str; 4] = ["__pycache__", ".git", ".tox", ".pytest_cache"];

/// Build output lines kept for the failure message.
const FAILURE_TAIL_LINES: usize = 10;

/// Where the conductor helper's own sources live on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConductorSource {
    pub root: PathBuf,
    /// The importable package, copied to `conductor-src/conductor`.
    pub package_dir: PathBuf,
    pub setup: PathBuf,
    pub requirements: PathBuf,
}

impl ConductorSource {
    /// `settings.conductor_source` (relative paths resolve against the
    /// project), or `<project>/conductor`.
    pub fn locate(settings: &Settings, base_path: &Path) -> Self {
        let root = match &settings.conductor_source {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => base_path.join(path),
            None => base_path.join("conductor"),
        };
        Self::at(root)
    }

    pub fn at(root: PathBuf) -> Self {
        Self {
            package_dir: root.join("conductor"),
            setup: root.join("setup.py"),
            requirements: root.join("requirements.txt"),
            root,
        }
    }

    fn check(&self) -> Result<()> {
        if !self.package_dir.is_dir() {
            return Err(EngineError::Configuration(format!(
                "conductor source package {} not found",
                self.package_dir.display()
            )));
        }
        for file in [&self.setup, &self.requirements] {
            if !file.is_file() {
                return Err(EngineError::Configuration(format!(
                    "conductor packaging file {} not found",
                    file.display()
                )));
            }
        }
        Ok(())
    }
}

/// One archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextEntry {
    pub path: String,
    pub size: u64,
}

/// An assembled context archive and what went into it.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub archive: PathBuf,
    pub manifest: Vec<ContextEntry>,
}

struct ContextWriter {
    builder: tar::Builder<File>,
    manifest: Vec<ContextEntry>,
}

impl ContextWriter {
    fn create(path: &Path) -> AnyResult<Self> {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self {
            builder: tar::Builder::new(file),
            manifest: Vec::new(),
        })
    }

    fn add_bytes(&mut self, path: &str, data: &[u8], mode: u32) -> AnyResult<()> {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(mode);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_entry_type(tar::EntryType::Regular);
        self.builder
            .append_data(&mut header, path, data)
            .with_context(|| format!("failed to add {path}"))?;
        self.manifest.push(ContextEntry {
            path: path.to_string(),
            size: data.len() as u64,
        });
        Ok(())
    }

    fn add_file(&mut self, path: &str, source: &Path) -> AnyResult<()> {
        let data =
            std::fs::read(source).with_context(|| format!("failed to read {}", source.display()))?;
        self.add_bytes(path, &data, file_mode(source))
    }

    /// Add every regular file under `root` beneath `prefix`, in name order.
    fn add_tree(&mut self, prefix: &str, root: &Path) -> AnyResult<()> {
        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_skipped(e.file_name().to_string_lossy().as_ref()));

        for entry in walker {
            let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .context("walked outside the source tree")?;
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            self.add_file(&format!("{prefix}/{rel}"), entry.path())?;
        }
        Ok(())
    }

    fn finish(self) -> AnyResult<Vec<ContextEntry>> {
        let mut file = self.builder.into_inner().context("failed to finish archive")?;
        std::io::Write::flush(&mut file)?;
        Ok(self.manifest)
    }
}

fn is_skipped(name: &str) -> bool {
    SKIPPED_NAMES.contains(&name) || name.ends_with(".pyc")
}

#[cfg(unix)]
fn file_mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) if meta.permissions().mode() & 0o111 != 0 => 0o755,
        _ => 0o644,
    }
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> u32 {
    0o644
}

fn asset(path: &str) -> AnyResult<&'static [u8]> {
    ASSETS
        .get_file(path)
        .map(|f| f.contents())
        .with_context(|| format!("bundled asset {path} is missing"))
}

/// Substitute `{{ name }}` placeholders. Any placeholder left over is an error.
pub fn render(template: &str, vars: &[(&str, &str)]) -> AnyResult<String> {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{{ {name} }}}}"), value);
    }
    if let Some(start) = out.find("{{") {
        let end = out[start..].find("}}").map_or(out.len(), |i| start + i + 2);
        bail!("unresolved template placeholder {}", &out[start..end]);
    }
    Ok(out)
}

/// Write the conductor build context into `dir/context.tar`.
pub fn assemble(
    dir: &Path,
    base_path: &Path,
    source: &ConductorSource,
    base_image: &str,
    client_version: &str,
) -> AnyResult<BuildContext> {
    let archive = dir.join("context.tar");
    let mut writer = ContextWriter::create(&archive)?;

    for name in PROJECT_CONTEXT_FILES {
        let path = base_path.join(name);
        if path.is_file() {
            writer.add_file(&format!("build-src/{name}"), &path)?;
        } else {
            debug!(file = name, "project context file not present, skipping");
        }
    }
    // Keeps build-src/ from ever being empty, which COPY rejects.
    writer.add_bytes("build-src/.touch", b"", 0o644)?;

    writer.add_bytes("contrib/install-runtime.sh", asset(INSTALLER)?, 0o755)?;

    writer.add_tree("conductor-src/conductor", &source.package_dir)?;
    writer.add_file("conductor-src/setup.py", &source.setup)?;
    writer.add_file("conductor-src/requirements.txt", &source.requirements)?;

    let template = std::str::from_utf8(asset(DOCKERFILE_TEMPLATE)?)
        .context("Dockerfile template is not UTF-8")?;
    let dockerfile = render(
        template,
        &[
            ("conductor_base", base_image),
            ("runtime_client_version", client_version),
        ],
    )?;
    writer.add_bytes("Dockerfile", dockerfile.as_bytes(), 0o644)?;

    let manifest = writer.finish()?;
    Ok(BuildContext { archive, manifest })
}

impl Engine {
    /// Build the project's conductor image and return its id.
    ///
    /// The context is assembled in a private temporary directory that is
    /// removed however the build ends.
    pub fn build_conductor_image(
        &self,
        base_path: &Path,
        base_image: &str,
        use_cache: bool,
    ) -> Result<String> {
        self.build_conductor_image_in(&std::env::temp_dir(), base_path, base_image, use_cache)
    }

    pub(crate) fn build_conductor_image_in(
        &self,
        scratch: &Path,
        base_path: &Path,
        base_image: &str,
        use_cache: bool,
    ) -> Result<String> {
        let source = ConductorSource::locate(&self.settings, base_path);
        source.check()?;

        let temp = tempfile::Builder::new()
            .prefix("dockhand-context-")
            .tempdir_in(scratch)
            .context("failed to create build context directory")
            .map_err(EngineError::Context)?;

        info!("assembling conductor build context");
        let context = assemble(
            temp.path(),
            base_path,
            &source,
            base_image,
            &self.settings.runtime_client_version,
        )
        .map_err(EngineError::Context)?;

        debug!("context manifest:");
        for entry in &context.manifest {
            debug!(" - {} ({} bytes)", entry.path, entry.size);
        }

        let archive = File::open(&context.archive)
            .context("failed to reopen build context")
            .map_err(EngineError::Context)?;
        let request = BuildRequest {
            tag: self.image_name_for_service(CONDUCTOR_SERVICE),
            use_cache,
            remove_intermediate: true,
        };

        info!(tag = %request.tag, base = base_image, "building conductor image (please be patient)");
        let verbose = self.verbose;
        // In plain-text output a JSON line is whatever a build step printed.
        let framed = self.backend.emits_build_frames();
        let mut reported_error: Option<String> = None;
        let mut tail: VecDeque<String> = VecDeque::with_capacity(FAILURE_TAIL_LINES);
        let status = self.backend.build_image(archive, &request, &mut |line| {
            let decoded = decode_build_line(line);
            if verbose {
                debug!(target: "dockhand::build", "{}", decoded.text());
            }
            if let BuildLine::Error(message) = &decoded
                && framed
            {
                reported_error = Some(message.clone());
            }
            if tail.len() == FAILURE_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(decoded.text().to_string());
        })?;

        if let Some(message) = reported_error {
            return Err(EngineError::BuildFailure(message));
        }
        if !status.success {
            let code = status
                .exit_code
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            let tail = Vec::from(tail).join("\n");
            return Err(EngineError::BuildFailure(format!(
                "docker build exited with {code}\n{tail}"
            )));
        }

        let image_id = self
            .latest_image_id_for_service(CONDUCTOR_SERVICE)?
            .ok_or_else(|| {
                EngineError::BuildFailure(format!(
                    "build finished but {}:latest is missing",
                    request.tag
                ))
            })?;
        info!(image = %image_id, "conductor image built");
        Ok(image_id)
    }
}
