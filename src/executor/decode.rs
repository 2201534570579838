//! Structured-line decoding of tool output
//!
//! The tool mixes free-form diagnostics with one-line JSON payloads on the
//! same stream. Decoding scans line by line and takes the first line that
//! both looks like JSON and deserializes into the requested payload type.

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Extracts the first decodable JSON payload from tool output
///
/// Lines are trimmed and only considered if they start with `{`. Lines that
/// look like JSON but do not match `T` are skipped, so unrelated structured
/// diagnostics do not shadow the payload. Returns
/// [`Error::DecodingFailed`] when no line decodes.
pub fn decode_event<T: DeserializeOwned>(text: &str) -> Result<T> {
    for line in text.lines() {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            continue;
        }
        if let Ok(decoded) = serde_json::from_str::<T>(trimmed) {
            return Ok(decoded);
        }
    }
    Err(Error::DecodingFailed)
}
