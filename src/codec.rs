//! Text encodings for binary data embedded in JSON and otp secrets.

use base64::{Engine as _, engine::general_purpose};

use crate::error::CodecError;

const BASE32: base32::Alphabet = base32::Alphabet::Rfc4648 { padding: false };

/// Padded standard base64 without line wrapping.
pub fn encode(data: &[u8]) -> String {
    general_purpose::STANDARD.encode(data)
}

/// Strict inverse of [`encode`]: non-canonical padding, stray whitespace or
/// trailing bits are rejected.
pub fn decode(text: &str) -> Result<Vec<u8>, CodecError> {
    Ok(general_purpose::STANDARD.decode(text)?)
}

/// Unpadded upper-case RFC 4648 base32, the form otpauth URIs use.
pub fn encode_base32(data: &[u8]) -> String {
    base32::encode(BASE32, data)
}

/// Lenient base32 for secrets typed or exported by other apps: case,
/// padding, spaces and dashes are ignored.
pub fn decode_base32(text: &str) -> Result<Vec<u8>, CodecError> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    base32::decode(BASE32, &cleaned).ok_or(CodecError::Base32)
}
