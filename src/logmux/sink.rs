use tracing::info;

/// Destination for container output lines.
///
/// Called from per-stream delivery threads, possibly concurrently.
pub trait LogSink: Send + Sync {
    fn write_line(&self, source: &str, line: &str);
}

/// Writes each line as an info event under the `dockhand::container` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write_line(&self, source: &str, line: &str) {
        info!(target: "dockhand::container", container = source, "{line}");
    }
}
