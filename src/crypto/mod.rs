//! Cryptographic primitives underlying the coordinator.
//!
//! - **helpers**: Lagrange interpolation over the secp256k1 scalar field
//!   (ECDSA combine) and the "most common, tie-broken lexicographically"
//!   majority vote (spec.md §4.E, §9).
//! - **hd**: the HD derivation used to compute a claimed key's public key
//!   from the network's master public key (spec.md §4.J).
//! - **ibe**: BLS12-381 identity-based encryption bound to an identity
//!   parameter, plus BLS signature-share combination (spec.md §4.E BLS
//!   path, §4.I).

pub mod hd;
pub mod helpers;
pub mod ibe;
