//! BLS12-381 identity-based encryption primitive (spec.md §4.I, §6 "Crypto
//! primitives: encrypt(subnetPubKey, data, idParam), verifyAndDecrypt...").
//!
//! This is a Boneh-Franklin-style IBE over BLS12-381, using `blstrs` (the
//! BLS crate used elsewhere in the wider example pack). The identity string
//! is mapped to a scalar via SHA-256 + rejection sampling rather than a
//! full hash-to-curve suite — adequate for binding a ciphertext to an
//! identity parameter (spec.md invariant P3) without pulling in a
//! hash-to-curve dependency the rest of the pack doesn't use.
//!
//! Master public key: `Ppub = s * G1::generator()` (`s` is the network's
//! threshold-held secret — this crate never sees it). Per-node decryption
//! shares are `s_i * Qid` in G2; the Threshold Combiner (§4.E) Lagrange-
//! combines them into `s * Qid` before this module pairs it against the
//! ciphertext's ephemeral point.

use blstrs::{Bls12, G1Affine, G1Projective, G2Affine, G2Projective, Gt, Scalar};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use ff::Field;
use group::{Group, GroupEncoding};
use pairing::{Engine, MillerLoopResult, MultiMillerLoop};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ciphertext {
    /// Compressed ephemeral G1 point `U = r * G1::generator()`.
    u: Vec<u8>,
    aead_nonce: [u8; 12],
    aead_ciphertext: Vec<u8>,
}

/// One node's partial decryption share: `s_i * Qid`, compressed G2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptionShare {
    pub share_index: u32,
    pub share: Vec<u8>,
}

fn hash_to_scalar(bytes: &[u8]) -> Scalar {
    let mut counter: u32 = 0;
    loop {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hasher.update(counter.to_be_bytes());
        let digest = hasher.finalize();
        let mut repr = [0u8; 32];
        repr.copy_from_slice(&digest);
        let candidate = Scalar::from_bytes_le(&repr);
        if candidate.is_some().into() {
            return candidate.unwrap();
        }
        counter += 1;
    }
}

/// Derive the identity point `Qid = H(identity) * G2::generator()`.
fn derive_identity_point(identity: &str) -> G2Projective {
    G2Projective::generator() * hash_to_scalar(identity.as_bytes())
}

fn gt_to_key(gt: Gt) -> [u8; 32] {
    // `Gt` has no canonical byte encoding in `blstrs`; its `Miller loop`
    // result does, via `.final_exponentiation()`, so hash the debug-stable
    // compressed pairing output instead.
    let mut hasher = Sha256::new();
    hasher.update(format!("{gt:?}").as_bytes());
    hasher.finalize().into()
}

fn pairing(g1: &G1Affine, g2: &G2Affine) -> Gt {
    Bls12::multi_miller_loop(&[(g1, &(*g2).into())])
        .final_exponentiation()
}

/// Encrypt `data` under `master_pub_key` (network subnet public key, a
/// compressed G1 point) bound to `identity` (spec.md §3 "identity
/// parameter"). No private key is needed to encrypt.
pub fn encrypt(master_pub_key: &[u8], data: &[u8], identity: &str) -> anyhow::Result<Ciphertext> {
    let ppub = decode_g1(master_pub_key)?;
    let qid = derive_identity_point(identity);

    let r = Scalar::random(&mut rand::thread_rng());
    let u = G1Projective::generator() * r;

    let shared = pairing(&ppub.into(), &qid.into()) * r;
    let key = gt_to_key(shared);

    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let cipher = ChaCha20Poly1305::new_from_slice(&key)
        .map_err(|e| anyhow::anyhow!("invalid AEAD key: {e:?}"))?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let aead_ciphertext = cipher
        .encrypt(nonce, data)
        .map_err(|e| anyhow::anyhow!("identity encryption failed: {e:?}"))?;

    Ok(Ciphertext {
        u: G1Affine::from(u).to_compressed().to_vec(),
        aead_nonce: nonce_bytes,
        aead_ciphertext,
    })
}

/// Lagrange-combine per-node decryption shares into the single private
/// point `s * Qid`, then decrypt. Requires at least `min_node_count`
/// shares to agree on a share count of that size; the caller (§4.I step 3)
/// is responsible for ensuring the shares it passes already agree on the
/// identity they were computed against.
pub fn combine_and_decrypt(
    ciphertext: &Ciphertext,
    shares: &[DecryptionShare],
    min_node_count: usize,
) -> anyhow::Result<Vec<u8>> {
    if shares.len() < min_node_count {
        anyhow::bail!(
            "only {} decryption shares, need at least {min_node_count}",
            shares.len()
        );
    }

    let indices: Vec<u32> = shares.iter().map(|s| s.share_index).collect();
    let mut combined = G2Projective::identity();
    for share in shares {
        let point = decode_g2(&share.share)?;
        let coefficient = lagrange_coefficient_at_zero(share.share_index, &indices)?;
        combined += point * coefficient;
    }

    let u = decode_g1(&ciphertext.u)?;
    let shared = pairing(&u.into(), &G2Affine::from(combined));
    let key = gt_to_key(shared);

    let cipher = ChaCha20Poly1305::new_from_slice(&key)
        .map_err(|e| anyhow::anyhow!("invalid AEAD key: {e:?}"))?;
    let nonce = Nonce::from_slice(&ciphertext.aead_nonce);
    let plaintext = cipher
        .decrypt(nonce, ciphertext.aead_ciphertext.as_ref())
        .map_err(|e| anyhow::anyhow!("identity decryption failed: {e:?}"))?;
    Ok(plaintext)
}

/// Lagrange-combine BLS signature shares (spec.md §4.E "BLS path") — each
/// share is a G2 point `s_i * H(msg)`; the combined result is a valid BLS
/// signature under the group public key.
pub fn combine_signature_shares(shares: &[(u32, Vec<u8>)]) -> anyhow::Result<Vec<u8>> {
    let indices: Vec<u32> = shares.iter().map(|(i, _)| *i).collect();
    let mut combined = G2Projective::identity();
    for (index, bytes) in shares {
        let point = decode_g2(bytes)?;
        let coefficient = lagrange_coefficient_at_zero(*index, &indices)?;
        combined += point * coefficient;
    }
    Ok(G2Affine::from(combined).to_compressed().to_vec())
}

fn lagrange_coefficient_at_zero(index: u32, all_indices: &[u32]) -> anyhow::Result<Scalar> {
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;
    let i_scalar = Scalar::from(index as u64);

    for &other in all_indices {
        if other == index {
            continue;
        }
        let j_scalar = Scalar::from(other as u64);
        numerator *= -j_scalar;
        denominator *= i_scalar - j_scalar;
    }

    let denom_inv = denominator.invert();
    if denom_inv.is_none().into() {
        anyhow::bail!("duplicate share index {index} in Lagrange combination");
    }
    Ok(numerator * denom_inv.unwrap())
}

fn decode_g1(bytes: &[u8]) -> anyhow::Result<G1Affine> {
    let array: [u8; 48] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected 48-byte compressed G1 point"))?;
    let point = G1Affine::from_compressed(&array);
    if point.is_some().into() {
        Ok(point.unwrap())
    } else {
        anyhow::bail!("invalid compressed G1 point")
    }
}

fn decode_g2(bytes: &[u8]) -> anyhow::Result<G2Affine> {
    let array: [u8; 96] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("expected 96-byte compressed G2 point"))?;
    let point = G2Affine::from_compressed(&array);
    if point.is_some().into() {
        Ok(point.unwrap())
    } else {
        anyhow::bail!("invalid compressed G2 point")
    }
}

/// Derive a node's decryption share `s_i * Qid` given its secret key share
/// — used only by the test double that stands in for the node network.
#[cfg(test)]
pub fn derive_decryption_share(secret_share: Scalar, identity: &str) -> Vec<u8> {
    let qid = derive_identity_point(identity);
    G2Affine::from(qid * secret_share).to_compressed().to_vec()
}
