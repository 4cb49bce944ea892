use std::fs::File;
use std::time::Duration;

use anyhow::Result;

use super::types::{BuildRequest, BuildStatus, CommitRequest, ContainerDetails, LogSource};
use crate::config::RunParams;

/// The container runtime as seen by the engine.
///
/// Implementations are pure clients: every method maps to one runtime
/// request. Lookups return `Ok(None)` when the object does not exist or is
/// not accessible; everything else the runtime rejects is an `Err`.
pub trait Backend: Send + Sync {
    /// Create and start a container in the background, returning its id.
    fn run_detached(&self, image: &str, params: &RunParams) -> Result<String>;

    /// Follow the container's output. One source per output channel.
    fn follow_logs(&self, container: &str) -> Result<Vec<LogSource>>;

    /// Look up a container by id or name.
    fn inspect_container(&self, container: &str) -> Result<Option<ContainerDetails>>;

    /// Ask the container to stop, killing it after `grace`.
    fn stop_container(&self, container: &str, grace: Duration) -> Result<()>;

    fn kill_container(&self, container: &str) -> Result<()>;

    fn remove_container(&self, container: &str) -> Result<()>;

    /// Snapshot a container's filesystem as a new image, returning its id.
    fn commit_container(&self, container: &str, request: &CommitRequest) -> Result<String>;

    /// Ids of all images, intermediate ones included, carrying `key=value`.
    /// The same image may be listed more than once.
    fn images_by_label(&self, key: &str, value: &str) -> Result<Vec<String>>;

    fn image_id_by_tag(&self, tag: &str) -> Result<Option<String>>;

    /// Whether `build_image` hands out JSON progress frames rather than the
    /// plain text a terminal would show. Only framed output is trusted to
    /// report build errors in-band.
    fn emits_build_frames(&self) -> bool {
        false
    }

    /// Build an image from a tar context, handing each output line to `on_line`.
    fn build_image(
        &self,
        context: File,
        request: &BuildRequest,
        on_line: &mut dyn FnMut(&str),
    ) -> Result<BuildStatus>;
}
