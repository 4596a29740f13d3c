//! Threshold Combiner (spec.md §4.E): merges a quorum of `NodeShare`
//! responses into one canonical signature, for both curve families the
//! network may run.

use base64::Engine;
use schnorr_fun::fun::marker::*;
use secp256kfun::prelude::*;

use crate::auth_sig::NodeShare;
use crate::crypto::helpers::{lagrange_coefficient_at_zero, majority};
use crate::crypto::ibe;
use crate::error::{LitError, NodeFailure};

#[derive(Debug, Clone)]
pub struct CombinedSignature {
    pub signature: String,
    pub data_signed: String,
}

/// `dataSigned`-agreeing, share-index-sorted subset of `shares` with at
/// least `min_node_count` members, or the quorum failure spec.md §4.D
/// defines for the dispatcher.
fn agreeing_shares<'a>(
    shares: &'a [NodeShare],
    min_node_count: usize,
) -> Result<(Vec<&'a NodeShare>, String), LitError> {
    let mut well_formed: Vec<&NodeShare> = shares
        .iter()
        .filter(|s| {
            s.success
                && s.signature_share.is_some()
                && s.share_index.is_some()
                && s.data_signed.is_some()
        })
        .collect();

    if well_formed.len() < min_node_count {
        return Err(incomplete_shares_error(shares, min_node_count));
    }

    well_formed.sort_by_key(|s| s.share_index.unwrap());

    let data_signed = majority(well_formed.iter().map(|s| s.data_signed.as_deref().unwrap()))
        .ok_or_else(|| LitError::unknown("no node shares to combine"))?
        .to_string();

    let agreeing: Vec<&NodeShare> = well_formed
        .into_iter()
        .filter(|s| s.data_signed.as_deref() == Some(data_signed.as_str()))
        .collect();

    if agreeing.len() < min_node_count {
        return Err(incomplete_shares_error(shares, min_node_count));
    }

    Ok((agreeing, data_signed))
}

fn incomplete_shares_error(shares: &[NodeShare], min_node_count: usize) -> LitError {
    LitError::NodeResponse {
        message: format!(
            "fewer than {min_node_count} node shares agree on the signed data"
        ),
        node_count: shares.len(),
        failures: shares
            .iter()
            .filter(|s| !s.success)
            .map(|s| NodeFailure {
                url: s.siwe_message.clone().unwrap_or_default(),
                message: s.response.clone().unwrap_or_else(|| "share rejected".to_string()),
            })
            .collect(),
        request_id: None,
    }
}

/// BLS path: Lagrange-combine the agreeing shares' `signatureShare` (hex
/// compressed G2 points) into one BLS signature over `dataSigned`.
pub fn combine_bls_shares(
    shares: &[NodeShare],
    min_node_count: usize,
) -> Result<CombinedSignature, LitError> {
    let (agreeing, data_signed) = agreeing_shares(shares, min_node_count)?;

    let raw_shares: Vec<(u32, Vec<u8>)> = agreeing
        .iter()
        .map(|s| {
            let index = s.share_index.unwrap();
            let bytes = hex::decode(s.signature_share.as_ref().unwrap())
                .map_err(|e| LitError::unknown(format!("malformed BLS signature share: {e}")))?;
            Ok((index, bytes))
        })
        .collect::<Result<_, LitError>>()?;

    let combined = ibe::combine_signature_shares(&raw_shares).map_err(LitError::unknown)?;

    Ok(CombinedSignature {
        signature: hex::encode(combined),
        data_signed,
    })
}

/// BLS path for JWT-returning operations (§4.I "decrypt" result,
/// §4.G action responses that produce a signed JWT): the combined BLS
/// signature over the agreed `unsignedJwt` is appended to it as
/// `unsignedJwt + "." + base64url(signature)`.
pub fn combine_bls_jwt(shares: &[NodeShare], min_node_count: usize) -> Result<String, LitError> {
    let well_formed: Vec<&NodeShare> = shares
        .iter()
        .filter(|s| s.success && s.signature_share.is_some() && s.response.is_some())
        .collect();
    if well_formed.len() < min_node_count {
        return Err(incomplete_shares_error(shares, min_node_count));
    }

    let unsigned_jwt = majority(well_formed.iter().map(|s| s.response.as_deref().unwrap()))
        .ok_or_else(|| LitError::unknown("no JWT shares to combine"))?
        .to_string();

    let agreeing: Vec<&NodeShare> = well_formed
        .into_iter()
        .filter(|s| s.response.as_deref() == Some(unsigned_jwt.as_str()))
        .collect();
    if agreeing.len() < min_node_count {
        return Err(incomplete_shares_error(shares, min_node_count));
    }

    let raw_shares: Vec<(u32, Vec<u8>)> = agreeing
        .iter()
        .enumerate()
        .map(|(i, s)| {
            let index = s.share_index.unwrap_or(i as u32 + 1);
            let bytes = hex::decode(s.signature_share.as_ref().unwrap())
                .map_err(|e| LitError::unknown(format!("malformed BLS signature share: {e}")))?;
            Ok((index, bytes))
        })
        .collect::<Result<_, LitError>>()?;

    let combined = ibe::combine_signature_shares(&raw_shares).map_err(LitError::unknown)?;
    let encoded_sig = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(combined);
    Ok(format!("{unsigned_jwt}.{encoded_sig}"))
}

/// ECDSA path: Lagrange-combine the agreeing shares' `s`-component shares
/// into a single `(r, s)` signature. Every agreeing node is expected to
/// carry the same deterministic `r` in `signedData.r`.
pub fn combine_ecdsa_shares(
    shares: &[NodeShare],
    min_node_count: usize,
) -> Result<CombinedSignature, LitError> {
    let (agreeing, data_signed) = agreeing_shares(shares, min_node_count)?;

    let r = agreeing[0]
        .signed_data
        .get("r")
        .and_then(|v| v.as_str())
        .ok_or_else(|| LitError::unknown("node share is missing the ECDSA r component"))?
        .to_string();

    let indices: Vec<u32> = agreeing.iter().map(|s| s.share_index.unwrap()).collect();
    let mut combined_s: Scalar<Secret, Zero> = Scalar::zero();
    for share in &agreeing {
        let index = share.share_index.unwrap();
        let share_scalar = decode_scalar(share.signature_share.as_ref().unwrap())?;
        let coefficient =
            lagrange_coefficient_at_zero(index, &indices).map_err(LitError::unknown)?;
        combined_s = s!(combined_s + coefficient * share_scalar);
    }

    Ok(CombinedSignature {
        signature: format!("{r}{}", hex::encode(combined_s.to_bytes())),
        data_signed,
    })
}

fn decode_scalar(hex_str: &str) -> Result<Scalar<Secret, Zero>, LitError> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| LitError::unknown(format!("invalid hex signature share: {e}")))?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|_| LitError::unknown("ECDSA signature share must be 32 bytes"))?;
    Scalar::from_bytes(array)
        .ok_or_else(|| LitError::unknown("ECDSA signature share is not a valid scalar"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use blstrs::{G2Affine, G2Projective, Scalar as BlsScalar};
    use group::{Group, GroupEncoding};
    use std::collections::HashMap;

    fn node_share(
        index: u32,
        data_signed: &str,
        signature_share: String,
    ) -> NodeShare {
        NodeShare {
            success: true,
            signature_share: Some(signature_share),
            share_index: Some(index),
            data_signed: Some(data_signed.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn bls_combine_ignores_minority_dissent_and_is_order_independent() {
        let secret = BlsScalar::from(123456u64);
        let msg_point = G2Projective::generator() * BlsScalar::from(7u64);

        let a1 = BlsScalar::from(9u64);
        let sig_for = |i: u32| {
            let share = secret + a1 * BlsScalar::from(i as u64);
            G2Affine::from(msg_point * share).to_compressed().to_vec()
        };

        let honest = vec![
            node_share(1, "digest", hex::encode(sig_for(1))),
            node_share(2, "digest", hex::encode(sig_for(2))),
            node_share(3, "digest", hex::encode(sig_for(3))),
        ];
        let mut dissenting = honest.clone();
        dissenting.push(node_share(4, "wrong-digest", "00".repeat(96)));

        let combined = combine_bls_shares(&dissenting, 3).unwrap();
        assert_eq!(combined.data_signed, "digest");

        let mut reordered = honest.clone();
        reordered.reverse();
        let combined_reordered = combine_bls_shares(&reordered, 3).unwrap();
        assert_eq!(combined.signature, combined_reordered.signature);
    }

    #[test]
    fn bls_combine_fails_below_quorum() {
        let shares = vec![node_share(1, "digest", "00".repeat(96))];
        let err = combine_bls_shares(&shares, 3).unwrap_err();
        assert!(matches!(err, LitError::NodeResponse { .. }));
    }

    #[test]
    fn ecdsa_combine_recovers_deterministic_signature() {
        let secret: Scalar<Secret, Zero> = Scalar::from(424242u32);
        let a1: Scalar<Secret, Zero> = Scalar::from(5u32);

        let mut shares = Vec::new();
        for i in 1..=3u32 {
            let i_scalar: Scalar<Secret, Zero> = Scalar::from(i);
            let share_value = s!(secret + a1 * i_scalar);
            let mut signed_data = HashMap::new();
            signed_data.insert("r".to_string(), serde_json::json!("deadbeef"));
            let mut share = node_share(i, "digest", hex::encode(share_value.to_bytes()));
            share.signed_data = signed_data;
            shares.push(share);
        }

        let combined = combine_ecdsa_shares(&shares, 3).unwrap();
        assert!(combined.signature.starts_with("deadbeef"));
        assert_eq!(combined.data_signed, "digest");
    }
}
