//! Targeted-Node Selector (spec.md §4.K): deterministically pick a subset
//! of connected nodes for operations that must run on the same nodes every
//! time a given identity is targeted (e.g. re-running an action against
//! the nodes that hold a PKP's key shares).

use sha2::{Digest, Sha256};

/// Deterministically select `count` node URLs out of `connected_nodes` for
/// `target_identity`, sorted by `SHA256(target_identity || url)` ascending
/// (spec.md P7: same identity + same connected set -> same selection,
/// every run).
pub fn select_targeted_nodes(
    connected_nodes: &[String],
    target_identity: &str,
    count: usize,
) -> Vec<String> {
    let mut scored: Vec<(Vec<u8>, &String)> = connected_nodes
        .iter()
        .map(|url| {
            let mut hasher = Sha256::new();
            hasher.update(target_identity.as_bytes());
            hasher.update(url.as_bytes());
            (hasher.finalize().to_vec(), url)
        })
        .collect();

    scored.sort_by(|a, b| a.0.cmp(&b.0));
    scored
        .into_iter()
        .take(count.min(connected_nodes.len()))
        .map(|(_, url)| url.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_is_deterministic_for_the_same_identity_and_node_set() {
        let nodes: Vec<String> = (0..10).map(|i| format!("https://node-{i}")).collect();
        let a = select_targeted_nodes(&nodes, "pkp-0xabc", 4);
        let b = select_targeted_nodes(&nodes, "pkp-0xabc", 4);
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
    }

    #[test]
    fn different_identities_usually_select_different_subsets() {
        let nodes: Vec<String> = (0..10).map(|i| format!("https://node-{i}")).collect();
        let a = select_targeted_nodes(&nodes, "pkp-0xabc", 4);
        let b = select_targeted_nodes(&nodes, "pkp-0xdef", 4);
        assert_ne!(a, b);
    }

    #[test]
    fn count_is_clamped_to_the_connected_set_size() {
        let nodes: Vec<String> = (0..3).map(|i| format!("https://node-{i}")).collect();
        let selected = select_targeted_nodes(&nodes, "identity", 10);
        assert_eq!(selected.len(), 3);
    }
}
