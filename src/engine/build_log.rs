//! Image build output decoding.
//!
//! The runtime may emit build progress as JSON frames
//! (`{"stream": "Step 1/9 : FROM centos:7\n"}`) or as plain text. Each line
//! is decoded on its own; anything that is not a recognised frame is kept
//! as the raw line.

use serde::Deserialize;

/// One decoded line of build output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildLine {
    /// Build step output.
    Stream(String),
    /// Pull or push progress.
    Status(String),
    /// The build reported a failure.
    Error(String),
    /// Not a frame; the line as received.
    Raw(String),
}

impl BuildLine {
    pub fn text(&self) -> &str {
        match self {
            Self::Stream(s) | Self::Status(s) | Self::Error(s) | Self::Raw(s) => s,
        }
    }
}

#[derive(Deserialize)]
struct Frame {
    stream: Option<String>,
    status: Option<String>,
    error: Option<String>,
    #[serde(rename = "errorDetail")]
    error_detail: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

pub fn decode_build_line(line: &str) -> BuildLine {
    let Ok(frame) = serde_json::from_str::<Frame>(line) else {
        return BuildLine::Raw(line.to_string());
    };

    let detail = frame.error_detail.and_then(|d| d.message);
    if let Some(error) = frame.error.or(detail) {
        return BuildLine::Error(error.trim_end().to_string());
    }
    if let Some(stream) = frame.stream {
        return BuildLine::Stream(stream.trim_end_matches('\n').to_string());
    }
    if let Some(status) = frame.status {
        return BuildLine::Status(status);
    }
    BuildLine::Raw(line.to_string())
}
