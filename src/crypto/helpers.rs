//! Cryptographic helper functions shared across the combiner and the
//! identity-encryption primitive.

use anyhow::Result;
use schnorr_fun::fun::marker::*;
use secp256kfun::prelude::*;

// ============================================================================
// Lagrange Interpolation
// ============================================================================

/// Compute Lagrange coefficient for party_index at target_x.
///
/// λ_i(x) = Π_{j≠i} (x - j) / (i - j)
///
/// Uses field arithmetic directly to avoid integer overflow for large party
/// counts.
pub fn lagrange_coefficient_at(
    party_index: u32,
    all_indices: &[u32],
    target_x: u32,
) -> Result<Scalar<Secret, Zero>> {
    let mut numerator: Scalar<Secret, Zero> = Scalar::from(1u32);
    let mut denominator: Scalar<Secret, Zero> = Scalar::from(1u32);

    let i_scalar: Scalar<Secret, Zero> = Scalar::from(party_index);
    let x_scalar: Scalar<Secret, Zero> = Scalar::from(target_x);

    for &other_index in all_indices {
        if other_index == party_index {
            continue;
        }

        let j_scalar: Scalar<Secret, Zero> = Scalar::from(other_index);

        let x_minus_j = s!(x_scalar - j_scalar);
        numerator = s!(numerator * x_minus_j);

        let i_minus_j = s!(i_scalar - j_scalar);
        denominator = s!(denominator * i_minus_j);
    }

    let denom_nonzero = denominator
        .non_zero()
        .ok_or_else(|| anyhow::anyhow!("Lagrange denominator is zero - duplicate indices?"))?;
    let denom_inv = denom_nonzero.invert();
    let result = s!(numerator * denom_inv);

    Ok(result)
}

/// Compute Lagrange coefficient at x=0 (for secret/share reconstruction).
///
/// λ_i(0) = Π_{j≠i} (-j) / (i - j) = Π_{j≠i} j / (j - i)
pub fn lagrange_coefficient_at_zero(
    party_index: u32,
    all_indices: &[u32],
) -> Result<Scalar<Secret, Zero>> {
    lagrange_coefficient_at(party_index, all_indices, 0)
}

// ============================================================================
// Majority vote
// ============================================================================

/// Select the most common value, breaking ties on lexicographic order
/// (spec.md §4.E "majority, tie-broken lexicographically" — used by the
/// Threshold Combiner to agree on `dataSigned` / `unsignedJwt` across a
/// quorum of node shares, and by the Action Executor to agree on the
/// majority response body and logs, spec.md §9 "factor into one generic
/// `majority(xs, tieBreak)`").
pub fn majority<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    for v in values {
        *counts.entry(v).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .fold(None, |best, (value, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((value, count)),
        })
        .map(|(v, _)| v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lagrange_coefficients_sum_to_one_at_zero() {
        let indices = vec![1u32, 2, 3];
        let one: Scalar<Secret, Zero> = Scalar::from(1u32);
        let mut sum: Scalar<Secret, Zero> = Scalar::zero();
        for &i in &indices {
            sum = s!(sum + lagrange_coefficient_at_zero(i, &indices).unwrap());
        }
        assert_eq!(sum.to_bytes(), one.to_bytes());

        let large_indices: Vec<u32> = (1..=15).collect();
        let mut sum15: Scalar<Secret, Zero> = Scalar::zero();
        for &i in &large_indices {
            sum15 = s!(sum15 + lagrange_coefficient_at_zero(i, &large_indices).unwrap());
        }
        assert_eq!(sum15.to_bytes(), one.to_bytes());
    }

    #[test]
    fn majority_breaks_ties_lexicographically() {
        assert_eq!(majority(["b", "a", "b"].into_iter()), Some("b"));
        assert_eq!(majority(["b", "a"].into_iter()), Some("a"));
        assert_eq!(majority(std::iter::empty()), None);
    }
}
