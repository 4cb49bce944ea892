use std::path::PathBuf;

pub const DOCKER_HOST: &str = "DOCKER_HOST";
pub const DOCKER_CERT_PATH: &str = "DOCKER_CERT_PATH";
pub const DOCKER_TLS_VERIFY: &str = "DOCKER_TLS_VERIFY";

/// Runtime endpoint settings taken from the process environment.
///
/// Captured once when the engine is created so that every launch sees the
/// same values. Empty variables count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeEnv {
    pub docker_host: Option<String>,
    pub cert_path: Option<PathBuf>,
    pub tls_verify: Option<String>,
}

impl RuntimeEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            docker_host: get(DOCKER_HOST),
            cert_path: get(DOCKER_CERT_PATH).map(PathBuf::from),
            tls_verify: get(DOCKER_TLS_VERIFY),
        }
    }
}
