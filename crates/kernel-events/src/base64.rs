//! Base64 helpers for binary image payloads in MIME bundles.

use base64::prelude::*;

use crate::EventError;

/// Decode a base64 image payload.
///
/// nbformat files wrap long payloads across lines, so ASCII whitespace is
/// dropped before decoding.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, EventError> {
    let compact: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    if compact.is_empty() {
        return Err(EventError::EmptyPayload);
    }
    Ok(BASE64_STANDARD.decode(compact)?)
}

pub fn encode_payload(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_payload() {
        assert_eq!(decode_payload("aGVsbG8=").unwrap(), b"hello");
    }

    #[test]
    fn test_decode_wrapped_payload() {
        assert_eq!(decode_payload("aGVs\nbG8=\n").unwrap(), b"hello");
    }

    #[test]
    fn test_decode_invalid_payload() {
        assert!(matches!(
            decode_payload("not base64!"),
            Err(EventError::InvalidBase64(_))
        ));
        assert!(matches!(decode_payload("  \n"), Err(EventError::EmptyPayload)));
    }

    #[test]
    fn test_encode_payload() {
        assert_eq!(encode_payload(b"world"), "d29ybGQ=");
    }
}
