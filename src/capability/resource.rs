//! Resource/ability vocabulary for capability grants (spec.md §3
//! "CapabilityObject").

use serde::{Deserialize, Serialize};

/// A resource a capability grant can be scoped to. `Wildcard` stands for the
/// `"*"` resource variant in spec.md §3 — "any resource of any kind".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LitResource {
    Pkp(String),
    Action(String),
    AccessControlCondition(String),
    Wildcard,
}

impl LitResource {
    /// Canonical resource-key string used both as the SIWE-resource grant
    /// key and as the `node_address`-independent identity of a resource in
    /// a `ResourceAbilityRequest`.
    pub fn canonical_key(&self) -> String {
        match self {
            LitResource::Pkp(id) => format!("lit-pkp://{id}"),
            LitResource::Action(id) => format!("lit-action://{id}"),
            LitResource::AccessControlCondition(id) => format!("lit-acc://{id}"),
            LitResource::Wildcard => "*".to_string(),
        }
    }

    pub fn pkp_wildcard() -> Self {
        LitResource::Pkp("*".to_string())
    }

    pub fn action_wildcard() -> Self {
        LitResource::Action("*".to_string())
    }

    pub fn acc_wildcard() -> Self {
        LitResource::AccessControlCondition("*".to_string())
    }
}

/// The four ability variants from spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LitAbility {
    PkpSigning,
    LitActionExecution,
    AccessControlConditionSigning,
    AccessControlConditionDecryption,
}

impl LitAbility {
    pub fn as_str(&self) -> &'static str {
        match self {
            LitAbility::PkpSigning => "pkp-signing",
            LitAbility::LitActionExecution => "lit-action-execution",
            LitAbility::AccessControlConditionSigning => "access-control-condition-signing",
            LitAbility::AccessControlConditionDecryption => "access-control-condition-decryption",
        }
    }
}

/// The capabilities a particular call site demands (spec.md §3
/// "ResourceAbilityRequest").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceAbilityRequest {
    pub resource: LitResource,
    pub ability: LitAbility,
}

impl ResourceAbilityRequest {
    pub fn new(resource: LitResource, ability: LitAbility) -> Self {
        Self { resource, ability }
    }
}
