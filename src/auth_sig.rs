//! Wire-level data model shared across the session, node, and action layers
//! (spec.md §3): `AuthSig`, per-node `NodeShare` responses, and the signing
//! template minted once per connected node.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Detached signature over a SIWE message (spec.md §3 "AuthSig").
///
/// Invariant: `sig` verifies `signed_message` under `address` using the
/// algorithm implied by `derived_via`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSig {
    /// Opaque signature bytes, lowercase hex.
    pub sig: String,
    pub derived_via: String,
    pub signed_message: String,
    /// Canonical hex account identifier.
    pub address: String,
    pub algo: Option<String>,
}

/// Outcome of [`AuthSig::verify`]. `derived_via` is an open-ended tag (spec.md
/// §3: "optional `algo`", §6 external wallet callback contract) — this crate
/// can cryptographically check the schemes it produces itself
/// (`litSessionSignViaNacl`, the network's own Ed25519-signed session keys),
/// but an externally-sourced wallet signature (the caller's EOA, a Solana
/// key, a WebAuthn assertion, ...) is an out-of-scope collaborator per
/// spec.md §1 and can only be checked structurally here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSigVerification {
    Valid,
    Invalid,
    /// No verifier is registered for this `derived_via`/`algo` combination.
    Unverifiable,
}

impl AuthSig {
    /// Structural validity check used by the session orchestrator
    /// (spec.md §4.F step 6) — non-empty `address`, `derived_via`, `sig`,
    /// `signed_message`.
    pub fn is_well_formed(&self) -> bool {
        !self.address.is_empty()
            && !self.derived_via.is_empty()
            && !self.sig.is_empty()
            && !self.signed_message.is_empty()
    }

    /// Cryptographically verify `sig` over `signed_message` under `address`,
    /// for the Ed25519 schemes this crate itself mints (session sigs,
    /// `signSessionKey`-issued PKP session sigs). Feeds the first of the four
    /// re-sign conditions spec.md §4.C lists ("the SIWE message fails
    /// signature verification").
    pub fn verify(&self) -> AuthSigVerification {
        if !self.is_well_formed() {
            return AuthSigVerification::Invalid;
        }
        let is_ed25519 =
            self.derived_via == "litSessionSignViaNacl" || self.algo.as_deref() == Some("ed25519");
        if !is_ed25519 {
            return AuthSigVerification::Unverifiable;
        }
        self.verify_ed25519()
            .unwrap_or(AuthSigVerification::Invalid)
    }

    fn verify_ed25519(&self) -> Option<AuthSigVerification> {
        use ed25519_dalek::{Signature, Verifier, VerifyingKey};

        let pk_bytes: [u8; 32] = hex::decode(&self.address).ok()?.try_into().ok()?;
        let verifying_key = VerifyingKey::from_bytes(&pk_bytes).ok()?;
        let sig_bytes: [u8; 64] = hex::decode(&self.sig).ok()?.try_into().ok()?;
        let signature = Signature::from_bytes(&sig_bytes);
        Some(
            if verifying_key
                .verify(self.signed_message.as_bytes(), &signature)
                .is_ok()
            {
                AuthSigVerification::Valid
            } else {
                AuthSigVerification::Invalid
            },
        )
    }
}

/// Per-node response to a sign/execute call (spec.md §3 "NodeShare").
///
/// Nodes reply with camelCase JSON keys (`signatureShare`, `shareIndex`, ...);
/// `rename_all` keeps that wire format in sync with this struct's snake_case
/// fields instead of requiring a per-call-site shim.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeShare {
    pub success: bool,
    #[serde(default)]
    pub signed_data: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub claim_data: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub logs: Option<String>,
    #[serde(default)]
    pub signature_share: Option<String>,
    #[serde(default)]
    pub share_index: Option<u32>,
    #[serde(default)]
    pub curve_type: Option<String>,
    #[serde(default)]
    pub data_signed: Option<String>,
    #[serde(default)]
    pub bls_root_pubkey: Option<String>,
    #[serde(default)]
    pub siwe_message: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

/// One template signed by the session key per connected node (spec.md §3
/// "SessionSigningTemplate"). Serialised with stable key order (derive's
/// field order plus `serde_json`'s map preservation via `BTreeMap` for the
/// resource/ability pairs) so two calls with the same inputs sign identical
/// bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSigningTemplate {
    pub session_key: String,
    /// The `lit:session:<publicKey-hex>` URI of `session_key` — carried on
    /// the template itself (rather than only on an enclosing SIWE message)
    /// so P1 ("`s.signedMessage.uri == lit:session: + s.address`",
    /// spec.md §8) holds directly on the parsed signed message.
    pub uri: String,
    pub resource_ability_requests: Vec<ResourceAbilityRequestWire>,
    pub capabilities: Vec<AuthSig>,
    /// ISO-8601.
    pub issued_at: String,
    /// ISO-8601.
    pub expiration: String,
    pub node_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResourceAbilityRequestWire {
    pub resource: String,
    pub ability: String,
}

/// `node-url -> AuthSig`, one entry per connected node, keyed so that
/// lookups (`sessionSigs[url]`) are deterministic. A `BTreeMap` rather than
/// `HashMap` so JSON serialisation of the whole map is stable for logging
/// and tests.
pub type SessionSigsMap = BTreeMap<String, AuthSig>;

/// A proof of an external authentication event (e.g. a Google OIDC token,
/// a WebAuthn assertion) presented in place of session sigs to `pkpSign`
/// (spec.md §4.H) or to mint a claimed key (spec.md §4.J).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthMethod {
    pub auth_method_type: u32,
    pub access_token: String,
}
