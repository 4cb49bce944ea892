use std::fs::File;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::debug;

use super::args::run_args;
use super::backend::Backend;
use super::run::drain_child;
use super::types::{
    BuildRequest, BuildStatus, CommitRequest, ContainerDetails, LogSource, OutputLine,
};
use crate::config::RunParams;

/// [`Backend`] that drives the `docker` command-line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Verify that the Docker daemon is reachable.
    pub fn ensure_available(&self) -> Result<()> {
        let status = Command::new(&self.binary)
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| {
                format!("failed to invoke `{}`, is it installed and on PATH?", self.binary)
            })?;

        if !status.success() {
            bail!("docker daemon is not running (exit {})", status);
        }
        Ok(())
    }

    fn output(&self, args: &[String]) -> Result<Output> {
        debug!(binary = %self.binary, ?args, "docker call");
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to invoke `{}`", self.binary))
    }

    /// Run a command that must succeed and return its trimmed stdout.
    fn capture(&self, args: &[String]) -> Result<String> {
        let output = self.output(args)?;
        if !output.status.success() {
            bail!(
                "`docker {}` failed ({}): {}",
                args.first().map(String::as_str).unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run a lookup command; a non-zero exit means "not there".
    fn lookup(&self, args: &[String]) -> Result<Option<String>> {
        let output = self.output(args)?;
        if !output.status.success() {
            debug!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "docker lookup found nothing"
            );
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

/// Double-quoted with JSON escapes, which Dockerfile instructions accept.
fn quoted(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

impl Backend for DockerCli {
    fn run_detached(&self, image: &str, params: &RunParams) -> Result<String> {
        let args = run_args(image, params)?;
        self.capture(&args)
    }

    fn follow_logs(&self, container: &str) -> Result<Vec<LogSource>> {
        let mut child = Command::new(&self.binary)
            .args(["logs", "--follow", container])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn docker logs")?;

        let stdout = child.stdout.take().context("stdout was not piped")?;
        let stderr = child.stderr.take().context("stderr was not piped")?;

        // Reap the follower once the container's streams close.
        std::thread::spawn(move || {
            let _ = child.wait();
        });

        Ok(vec![
            LogSource {
                channel: "stdout",
                reader: Box::new(stdout),
            },
            LogSource {
                channel: "stderr",
                reader: Box::new(stderr),
            },
        ])
    }

    fn inspect_container(&self, container: &str) -> Result<Option<ContainerDetails>> {
        let Some(json) = self.lookup(&strings(&["inspect", "--type", "container", container]))?
        else {
            return Ok(None);
        };
        let docs: Vec<serde_json::Value> =
            serde_json::from_str(&json).context("unexpected `docker inspect` output")?;
        match docs.into_iter().next() {
            Some(doc) => Ok(Some(ContainerDetails::from_inspect(doc)?)),
            None => Ok(None),
        }
    }

    fn stop_container(&self, container: &str, grace: Duration) -> Result<()> {
        let secs = grace.as_secs().to_string();
        self.capture(&strings(&["stop", "--time", &secs, container]))?;
        Ok(())
    }

    fn kill_container(&self, container: &str) -> Result<()> {
        self.capture(&strings(&["kill", container]))?;
        Ok(())
    }

    fn remove_container(&self, container: &str) -> Result<()> {
        self.capture(&strings(&["rm", container]))?;
        Ok(())
    }

    fn commit_container(&self, container: &str, request: &CommitRequest) -> Result<String> {
        let mut args = strings(&["commit", "--message", &request.message]);
        for (key, value) in &request.labels {
            args.push("--change".into());
            args.push(format!("LABEL {}={}", quoted(key), quoted(value)));
        }
        for change in &request.changes {
            args.push("--change".into());
            args.push(change.clone());
        }
        args.push(container.to_string());
        args.push(format!("{}:{}", request.repository, request.tag));
        self.capture(&args)
    }

    fn images_by_label(&self, key: &str, value: &str) -> Result<Vec<String>> {
        let filter = format!("label={key}={value}");
        let out = self.capture(&strings(&[
            "images", "--all", "--quiet", "--no-trunc", "--filter", &filter,
        ]))?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn image_id_by_tag(&self, tag: &str) -> Result<Option<String>> {
        self.lookup(&strings(&["image", "inspect", "--format", "{{.Id}}", tag]))
    }

    fn build_image(
        &self,
        context: File,
        request: &BuildRequest,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<BuildStatus> {
        let mut args = strings(&["build", "--tag", &request.tag]);
        if request.remove_intermediate {
            args.push("--rm".into());
        }
        if !request.use_cache {
            args.push("--no-cache".into());
        }
        args.push("-".into());
        debug!(binary = %self.binary, ?args, "docker build");

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::from(context))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn docker build")?;

        let status = drain_child(child, &mut |line| match line {
            OutputLine::Stdout(l) | OutputLine::Stderr(l) => on_line(&l),
        })?;

        Ok(BuildStatus {
            success: status.success(),
            exit_code: status.code(),
        })
    }
}
