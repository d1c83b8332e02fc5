//! Fingerprinting and compression of file content.

use crate::error::{CodecError, CodecResult};
use sha2::{Digest, Sha512_224};
use std::fmt;

/// Length of a hex-encoded fingerprint (224 bits).
pub const FINGERPRINT_HEX_LEN: usize = 56;

/// Hex-encoded SHA-512/224 digest of raw file content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint of `raw`.
    pub fn of(raw: &[u8]) -> Self {
        Self(hex::encode(Sha512_224::digest(raw)))
    }

    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the hex digest as bytes, the form stored in the cluster.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file's fingerprint together with its compressed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedContent {
    /// Digest of the raw bytes.
    pub fingerprint: Fingerprint,
    /// Compressed bytes.
    pub payload: Vec<u8>,
}

/// Compresses `raw` into a self-describing Snappy block.
///
/// The encoder is deterministic: equal input yields equal output.
pub fn compress(raw: &[u8]) -> CodecResult<Vec<u8>> {
    snap::raw::Encoder::new()
        .compress_vec(raw)
        .map_err(|e| CodecError::Compress {
            message: e.to_string(),
        })
}

/// Restores the raw bytes from a payload written by [`compress`].
pub fn decompress(payload: &[u8]) -> CodecResult<Vec<u8>> {
    snap::raw::Decoder::new()
        .decompress_vec(payload)
        .map_err(|e| CodecError::Decompress {
            message: e.to_string(),
        })
}

/// Fingerprints and compresses `raw`.
pub fn encode(raw: &[u8]) -> CodecResult<EncodedContent> {
    Ok(EncodedContent {
        fingerprint: Fingerprint::of(raw),
        payload: compress(raw)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_known_vector() {
        // SHA-512/224 of the empty string (FIPS 180-4 test vector).
        assert_eq!(
            Fingerprint::of(b"").as_str(),
            "6ed0dd02806fa89e25de060c19d3ac86cabb87d6a0ddd05c333b84f4"
        );
        assert_eq!(
            Fingerprint::of(b"abc").as_str(),
            "4634270f707b6a54daae7530460842e20e37ed265ceee9a43e8924aa"
        );
    }

    #[test]
    fn fingerprint_is_fixed_length_lowercase_hex() {
        let fp = Fingerprint::of(b"hello");
        assert_eq!(fp.as_str().len(), FINGERPRINT_HEX_LEN);
        assert!(fp
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_eq!(fp.to_string(), fp.as_str());
    }

    #[test]
    fn different_content_different_fingerprint() {
        assert_ne!(Fingerprint::of(b"hello"), Fingerprint::of(b"world"));
        assert_ne!(Fingerprint::of(b"a"), Fingerprint::of(b"a\n"));
    }

    #[test]
    fn encode_is_deterministic() {
        let data = b"listen 80;\nserver_name example.com;\n".repeat(20);
        assert_eq!(encode(&data).unwrap(), encode(&data).unwrap());
    }

    #[test]
    fn payload_compresses_repetitive_content() {
        let data = vec![b'x'; 4096];
        let encoded = encode(&data).unwrap();
        assert!(encoded.payload.len() < data.len());
        assert_eq!(decompress(&encoded.payload).unwrap(), data);
    }

    #[test]
    fn corrupt_payload_is_rejected() {
        let err = decompress(&[0xff, 0xff, 0xff, 0xff, 0xff, 0x0f, 0x00]).unwrap_err();
        assert!(matches!(err, CodecError::Decompress { .. }));
    }
}
