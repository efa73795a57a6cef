//! Canonical serialization for cryptographic operations.

pub mod jcs;
