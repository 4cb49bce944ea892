pub mod config;
pub mod docker;
pub mod engine;
pub mod error;
pub mod logmux;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::Engine;
pub use error::{EngineError, Result};
