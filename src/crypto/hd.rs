//! HD public-key derivation for claimed keys (spec.md §4.J step 4
//! "Derive the public key via `computeHDPubKey(derivedKeyId)` — a
//! deterministic HD derivation rooted at the network's master public
//! key").
//!
//! Same non-hardened BIP-32 tweak technique the teacher crate used for
//! wallet-address derivation (`child = parent + IL * G`, `IL` from
//! `HMAC-SHA512(chain_code, …)`), generalized from a `(change,
//! address_index)` path to an arbitrary `derivedKeyId` byte string: the
//! network has no notion of BIP-44 accounts, it derives one key per
//! claimed identity.

use anyhow::Result;
use hmac::{Hmac, Mac};
use secp256kfun::prelude::*;
use sha2::Sha512;

/// `HMAC-SHA512(master_pubkey_xonly, derived_key_id)`, split into a tweak
/// scalar. Retried with an incrementing counter on the (astronomically
/// unlikely) chance the left half is not a valid scalar, mirroring the
/// teacher's non-hardened-derivation rejection behaviour without
/// surfacing it as a caller-visible error.
fn derive_tweak(master_pubkey: &Point<EvenY>, derived_key_id: &[u8]) -> Scalar<Public, Zero> {
    let mut counter: u32 = 0;
    loop {
        let mut mac = Hmac::<Sha512>::new_from_slice(&master_pubkey.to_xonly_bytes())
            .expect("HMAC accepts any key length");
        mac.update(derived_key_id);
        mac.update(&counter.to_be_bytes());
        let result = mac.finalize().into_bytes();
        let il: [u8; 32] = result[..32].try_into().unwrap();
        if let Some(tweak) = Scalar::<Public, Zero>::from_bytes(il) {
            return tweak;
        }
        counter += 1;
    }
}

/// `computeHDPubKey(derivedKeyId)`: the public key of a key whose private
/// half is threshold-held by the network, deterministically derived from
/// `master_pubkey` and `derived_key_id` (spec.md §4.J step 4).
pub fn compute_hd_pub_key(
    master_pubkey: &Point<EvenY>,
    derived_key_id: &[u8],
) -> Result<Point<EvenY>> {
    let tweak = derive_tweak(master_pubkey, derived_key_id);
    let child = g!({ *master_pubkey } + tweak * G).normalize();
    let child_nonzero = child
        .non_zero()
        .ok_or_else(|| anyhow::anyhow!("derived key is the point at infinity"))?;
    Ok(child_nonzero.into_point_with_even_y().0)
}
