//! Encoding helpers for diagnostics

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Encode raw tool output so it survives being embedded in a one-line error message
pub fn encode_base64(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}
