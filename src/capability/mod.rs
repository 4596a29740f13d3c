//! ReCap-style capability object (spec.md §4.A).
//!
//! Grants are stored as a mapping from canonical resource-key strings to
//! the set of abilities granted for that resource. `encode_as_siwe_resource`
//! packs the whole grant set into a single URI so it can ride along as one
//! entry of a SIWE message's `resources` list; `decode` is its exact
//! inverse, so `decode(encode(x)) == x` (spec.md §4.A round-trip
//! requirement, tested in `tests/capability_tests.rs`).

pub mod resource;
pub mod siwe;

use std::collections::{BTreeMap, BTreeSet};

use base64::Engine;
use serde::{Deserialize, Serialize};

pub use resource::{LitAbility, LitResource, ResourceAbilityRequest};

/// Scheme prefix for the single SIWE resource URI a capability object
/// encodes to (spec.md §6 "SIWE resource encoding").
const RECAP_URI_SCHEME: &str = "urn:recap:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityObject {
    /// resource canonical key -> sorted ability set. `BTreeMap`/`BTreeSet`
    /// so the JSON this serialises to is canonical (stable key order),
    /// which `encode_as_siwe_resource` depends on for determinism.
    grants: BTreeMap<String, BTreeSet<LitAbility>>,
}

impl CapabilityObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a capability object granting every ability implied by a set of
    /// resource-ability requests, scoped to the wildcard of each request's
    /// resource kind — the default the session orchestrator falls back to
    /// when the caller supplies no explicit capability object (spec.md
    /// §4.F step 2).
    pub fn from_resource_ability_requests(requests: &[ResourceAbilityRequest]) -> Self {
        let mut object = Self::new();
        for request in requests {
            object.add_all_capabilities_for_resource(request.resource.clone());
        }
        object
    }

    pub fn add_capability(&mut self, resource: LitResource, ability: LitAbility) {
        self.grants
            .entry(resource.canonical_key())
            .or_default()
            .insert(ability);
    }

    /// Grant every known ability for a resource — used when the caller asks
    /// for "all capabilities" rather than enumerating each ability.
    pub fn add_all_capabilities_for_resource(&mut self, resource: LitResource) {
        let abilities = match &resource {
            LitResource::Pkp(_) => vec![LitAbility::PkpSigning],
            LitResource::Action(_) => vec![LitAbility::LitActionExecution],
            LitResource::AccessControlCondition(_) => vec![
                LitAbility::AccessControlConditionSigning,
                LitAbility::AccessControlConditionDecryption,
            ],
            LitResource::Wildcard => vec![
                LitAbility::PkpSigning,
                LitAbility::LitActionExecution,
                LitAbility::AccessControlConditionSigning,
                LitAbility::AccessControlConditionDecryption,
            ],
        };
        let entry = self.grants.entry(resource.canonical_key()).or_default();
        for ability in abilities {
            entry.insert(ability);
        }
    }

    /// True iff either a wildcard grant or an exact `(resource, ability)`
    /// match is present (spec.md §4.A).
    pub fn verify_capabilities_for_resource(&self, resource: &LitResource, ability: LitAbility) -> bool {
        if let Some(wildcard) = self.grants.get("*") {
            if wildcard.contains(&ability) {
                return true;
            }
        }
        self.grants
            .get(&resource.canonical_key())
            .map(|abilities| abilities.contains(&ability))
            .unwrap_or(false)
    }

    /// Single URI whose opaque body is base64url(JSON-canonical(grants))
    /// (spec.md §4.A, §6).
    pub fn encode_as_siwe_resource(&self) -> String {
        // BTreeMap serialises with stable key order, so this is
        // byte-for-byte canonical across calls with the same grants.
        let canonical_json =
            serde_json::to_string(&self.grants).expect("BTreeMap<String, _> always serialises");
        let body = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(canonical_json);
        format!("{RECAP_URI_SCHEME}{body}")
    }

    /// Inverse of `encode_as_siwe_resource`.
    pub fn decode(uri: &str) -> anyhow::Result<Self> {
        let body = uri
            .strip_prefix(RECAP_URI_SCHEME)
            .ok_or_else(|| anyhow::anyhow!("not a recap resource URI: {uri}"))?;
        let json = base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(body)?;
        let grants: BTreeMap<String, BTreeSet<LitAbility>> = serde_json::from_slice(&json)?;
        Ok(Self { grants })
    }

    /// Human-readable SIWE statement describing the grants, used as the
    /// `statement` field of the wallet's SIWE message (spec.md §4.C).
    pub fn statement(&self) -> String {
        if self.grants.is_empty() {
            return "I authorize no capabilities.".to_string();
        }
        let mut parts = Vec::new();
        for (resource, abilities) in &self.grants {
            let ability_list: Vec<&str> = abilities.iter().map(LitAbility::as_str).collect();
            parts.push(format!("{resource}: {}", ability_list.join(", ")));
        }
        format!("I further authorize the following capabilities: {}", parts.join("; "))
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_siwe_resource() {
        let mut object = CapabilityObject::new();
        object.add_all_capabilities_for_resource(LitResource::pkp_wildcard());
        object.add_capability(LitResource::Action("ipfs123".into()), LitAbility::LitActionExecution);

        let encoded = object.encode_as_siwe_resource();
        assert!(encoded.starts_with(RECAP_URI_SCHEME));
        let decoded = CapabilityObject::decode(&encoded).unwrap();
        assert_eq!(object, decoded);
    }

    #[test]
    fn wildcard_grant_covers_any_matching_ability() {
        let mut object = CapabilityObject::new();
        object.add_capability(LitResource::Wildcard, LitAbility::PkpSigning);
        assert!(object.verify_capabilities_for_resource(
            &LitResource::Pkp("0xabc".into()),
            LitAbility::PkpSigning
        ));
        assert!(!object.verify_capabilities_for_resource(
            &LitResource::Pkp("0xabc".into()),
            LitAbility::LitActionExecution
        ));
    }

    #[test]
    fn exact_grant_does_not_leak_to_other_resources() {
        let mut object = CapabilityObject::new();
        object.add_capability(LitResource::Pkp("0xabc".into()), LitAbility::PkpSigning);
        assert!(object
            .verify_capabilities_for_resource(&LitResource::Pkp("0xabc".into()), LitAbility::PkpSigning));
        assert!(!object
            .verify_capabilities_for_resource(&LitResource::Pkp("0xdef".into()), LitAbility::PkpSigning));
    }

    #[test]
    fn from_resource_ability_requests_grants_requested_abilities() {
        let requests = vec![
            ResourceAbilityRequest::new(LitResource::pkp_wildcard(), LitAbility::PkpSigning),
            ResourceAbilityRequest::new(LitResource::action_wildcard(), LitAbility::LitActionExecution),
        ];
        let object = CapabilityObject::from_resource_ability_requests(&requests);
        for request in &requests {
            assert!(object.verify_capabilities_for_resource(&request.resource, request.ability));
        }
    }
}
