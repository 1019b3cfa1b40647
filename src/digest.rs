//! Content-derived identifiers for pipeline stages.
//!
//! A digest is the SHA-256 hash of the [ron] serialization of everything
//! that determines a stage's output: its kind, its parameters and the
//! digests of the stages it reads from. Two stages with equal digests
//! produce equal output, which is what makes digests usable as cache keys.

use crate::error::BeamError;
use serde::Serialize;
use sha2::{Digest as _, Sha256};
use std::fmt::Write;

/// Hashes the serialized form of `value` into a lowercase hex string.
pub fn digest<T: Serialize + ?Sized>(value: &T) -> Result<String, BeamError> {
    let repr = ron::ser::to_string(value)?;
    let hash = Sha256::digest(repr.as_bytes());

    let mut hex = String::with_capacity(2 * hash.len());
    for byte in hash.iter() {
        // writing into a String cannot fail
        let _ = write!(hex, "{:02x}", byte);
    }
    Ok(hex)
}

/// Hashes a stream of samples bit-exactly into a lowercase hex string.
/// Used for sample data, where a text serialization would be wasteful.
pub fn digest_samples(samples: impl IntoIterator<Item = f64>) -> String {
    let mut hasher = Sha256::new();
    for sample in samples {
        hasher.update(sample.to_le_bytes());
    }
    let hash = hasher.finalize();

    let mut hex = String::with_capacity(2 * hash.len());
    for byte in hash.iter() {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}
