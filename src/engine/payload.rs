//! `b64json`: the encoding of conductor work-order arguments.
//!
//! Structured data is serialized to compact JSON with object keys sorted,
//! then base64 encoded (standard alphabet, padded, no line breaks) so it
//! survives as a single command-line argument.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{EngineError, Result};

/// Value of the conductor's `--encoding` flag.
pub const ENCODING: &str = "b64json";

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    // Going through `Value` sorts object keys, so equal data encodes equally.
    let value = serde_json::to_value(value).map_err(|e| EngineError::Payload(e.to_string()))?;
    let json = serde_json::to_vec(&value).map_err(|e| EngineError::Payload(e.to_string()))?;
    Ok(STANDARD.encode(json))
}

pub fn decode<T: DeserializeOwned>(encoded: &str) -> Result<T> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| EngineError::Payload(format!("not base64: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| EngineError::Payload(format!("not JSON: {e}")))
}
