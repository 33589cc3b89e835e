// crates/types/src/codec.rs

//! Defines the canonical, deterministic binary codec for all consensus-critical state.
//!
//! This module provides simple wrappers around `parity-scale-codec` (SCALE),
//! which is used for its compact and deterministic properties. By centralizing
//! the codec logic here in the base `types` crate, we ensure that all
//! components use the exact same serialization format for state, preventing
//! consensus failures due to different binary representations of the same data.
//!
//! The one structure that does NOT go through SCALE is the voted
//! [`MigrationDeclaration`](crate::migrations::MigrationDeclaration): its wire
//! layout is fixed by the network protocol and is hand-encoded in
//! [`crate::migrations`].

use parity_scale_codec::{Decode, DecodeAll, Encode};

/// Encodes a value into a deterministic, canonical byte representation using SCALE codec.
///
/// This function should be used for all data that is written to consensus-critical state
/// or is included in a hash for signing or replay protection.
pub fn to_bytes_canonical<T: Encode>(v: &T) -> Result<Vec<u8>, String> {
    Ok(v.encode())
}

/// Decodes a value from a canonical byte representation using SCALE codec.
///
/// This function fails fast on any decoding error, including trailing bytes,
/// returning a descriptive string. This is critical for preventing invalid or
/// malformed data from being processed in a consensus context.
pub fn from_bytes_canonical<T: Decode>(b: &[u8]) -> Result<T, String> {
    T::decode_all(&mut &*b).map_err(|e| format!("canonical decode failed: {}", e))
}
