use thiserror::Error;

/// Errors surfaced by engine operations.
///
/// Lookups that find nothing return `Ok(None)` rather than an error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(
        "fingerprint {fingerprint} matches {} images ({}); refusing to pick one",
        .candidates.len(),
        .candidates.join(", ")
    )]
    AmbiguousFingerprint {
        fingerprint: String,
        candidates: Vec<String>,
    },

    #[error("image build failed: {0}")]
    BuildFailure(String),

    #[error("cannot assemble build context: {0:#}")]
    Context(anyhow::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("invalid work order payload: {0}")]
    Payload(String),

    /// The container runtime rejected or failed a request.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
