//! # Cryptographic Primitives
//!
//! Thin wrappers around `sha2`. Block hashing and proof-of-work both go
//! through here so there is exactly one definition of "the hash".

pub mod hash;

pub use hash::{leading_hex_zeros, sha256, sha256_hex, sha256_hex_multi};
