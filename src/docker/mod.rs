// Docker runtime access: the backend seam, the CLI client, run-parameter translation.

pub mod args;
pub mod backend;
pub mod engine;
pub mod run;
pub mod types;

pub use backend::Backend;
pub use engine::DockerCli;
pub use types::{
    BuildRequest, BuildStatus, CommitRequest, ContainerDetails, LogSource, Mount, OutputLine,
};
