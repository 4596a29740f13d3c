//! Encrypt / Decrypt (spec.md §4.I): identity-based BLS encryption bound
//! to an access-control predicate, and threshold decryption conditional on
//! the caller presenting a session sig/AuthSig that the network accepts
//! against that predicate.

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::auth_sig::AuthSig;
use crate::client::NetworkContext;
use crate::crypto::ibe;
use crate::error::LitError;
use crate::transport::HttpTransport;

/// `AccessControlConditionResource(<hashOfConditions>/<hashOfPrivateData>)`
/// (spec.md §3) rendered in the exact wire form spec.md §6 requires for
/// interop: `lit-accesscontrolcondition://<hex>/<hex>`.
pub fn identity_parameter(hash_of_conditions: &str, hash_of_private_data: &str) -> String {
    format!("lit-accesscontrolcondition://{hash_of_conditions}/{hash_of_private_data}")
}

/// `hashOfConditions = SHA-256(canonical(conditions))`, lowercase hex
/// (spec.md §4.I step 2). `conditions` is serialised with `serde_json`'s
/// stable key order for a `BTreeMap`-backed `Value`; callers are expected
/// to hand in conditions built from canonical (sorted-key) JSON.
pub fn hash_conditions(conditions: &serde_json::Value) -> Result<String, LitError> {
    let canonical = serde_json::to_vec(conditions)
        .map_err(|err| LitError::unknown(format!("conditions are not serialisable: {err}")))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// `hashOfPrivateData = SHA-256(dataToEncrypt)`, lowercase hex (spec.md
/// §4.I step 3).
pub fn hash_private_data(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[derive(Debug, Clone)]
pub struct EncryptParams {
    pub data_to_encrypt: Vec<u8>,
    /// Caller passes exactly one of `accessControlConditions`,
    /// `evmContractConditions`, `solRpcConditions`,
    /// `unifiedAccessControlConditions` (spec.md §4.I) — represented here
    /// as the already-chosen predicate tree, since the coordinator treats
    /// all four variants identically (hash, then bind).
    pub conditions: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptResult {
    /// Base64 of the identity-encrypted ciphertext.
    pub ciphertext: String,
    pub data_to_encrypt_hash: String,
}

/// `encrypt` (spec.md §4.I steps 1-6). Pure local computation — no node
/// round trip, since encryption needs only the network's published
/// subnet public key.
pub fn encrypt(network: &dyn NetworkContext, params: EncryptParams) -> Result<EncryptResult, LitError> {
    let subnet_pub_key = network.subnet_pub_key().ok_or_else(|| LitError::LitNodeClientNotReady {
        message: "subnet public key is not known; is the client connected?".to_string(),
        request_id: None,
    })?;
    let subnet_pub_key_bytes = hex::decode(&subnet_pub_key)
        .map_err(|err| LitError::unknown(format!("malformed subnet public key: {err}")))?;

    let hash_of_conditions = hash_conditions(&params.conditions)?;
    let hash_of_private_data = hash_private_data(&params.data_to_encrypt);
    let identity = identity_parameter(&hash_of_conditions, &hash_of_private_data);

    let ciphertext = ibe::encrypt(&subnet_pub_key_bytes, &params.data_to_encrypt, &identity)
        .map_err(|err| LitError::unknown(format!("identity encryption failed: {err}")))?;
    let ciphertext_bytes = bincode::serialize(&ciphertext)
        .map_err(|err| LitError::unknown(format!("failed to serialise ciphertext: {err}")))?;

    Ok(EncryptResult {
        ciphertext: base64::engine::general_purpose::STANDARD.encode(ciphertext_bytes),
        data_to_encrypt_hash: hash_of_private_data,
    })
}

#[derive(Debug, Clone)]
pub struct DecryptParams {
    pub ciphertext: String,
    pub data_to_encrypt_hash: String,
    pub conditions: serde_json::Value,
    pub chain: String,
    /// `sessionSigs[url] ?? authSig` per node (spec.md §4.I step 2);
    /// supplying neither is a caller error, not a per-node one, so it's
    /// checked eagerly.
    pub session_sigs: crate::auth_sig::SessionSigsMap,
    pub auth_sig: Option<AuthSig>,
}

/// `decrypt` (spec.md §4.I steps 1-4).
pub async fn decrypt(
    network: &dyn NetworkContext,
    transport: &dyn HttpTransport,
    params: DecryptParams,
) -> Result<Vec<u8>, LitError> {
    let subnet_pub_key = network.subnet_pub_key().ok_or_else(|| LitError::LitNodeClientNotReady {
        message: "subnet public key is not known; is the client connected?".to_string(),
        request_id: None,
    })?;
    let subnet_pub_key_bytes = hex::decode(&subnet_pub_key)
        .map_err(|err| LitError::unknown(format!("malformed subnet public key: {err}")))?;

    let hash_of_conditions = hash_conditions(&params.conditions)?;
    let identity = identity_parameter(&hash_of_conditions, &params.data_to_encrypt_hash);

    let ciphertext_bytes = base64::engine::general_purpose::STANDARD
        .decode(&params.ciphertext)
        .map_err(|err| LitError::InvalidArgumentException {
            message: format!("malformed ciphertext: {err}"),
            request_id: None,
        })?;
    let ciphertext: ibe::Ciphertext = bincode::deserialize(&ciphertext_bytes)
        .map_err(|err| LitError::InvalidArgumentException {
            message: format!("malformed ciphertext: {err}"),
            request_id: None,
        })?;

    let nodes = network.connected_node_urls();
    for url in &nodes {
        if params.session_sigs.get(url).is_none() && params.auth_sig.is_none() {
            return Err(LitError::InvalidArgumentException {
                message: format!("no session sig or auth sig available for node {url}"),
                request_id: None,
            });
        }
    }

    let outcome = crate::node::dispatcher::dispatch::<crate::auth_sig::NodeShare, _>(
        network,
        transport,
        "/web/encryption/sign",
        &resolved_sigs_or_placeholder(&params.session_sigs, network),
        |url| {
            let auth_sig = params
                .session_sigs
                .get(url)
                .cloned()
                .or_else(|| params.auth_sig.clone());
            serde_json::json!({
                "conditions": params.conditions,
                "dataToEncryptHash": params.data_to_encrypt_hash,
                "chain": params.chain,
                "authSig": auth_sig,
            })
        },
    )
    .await?;

    let shares: Vec<ibe::DecryptionShare> = outcome
        .values
        .iter()
        .filter(|share| share.success)
        .filter_map(|share| {
            let index = share.share_index?;
            let bytes = hex::decode(share.signature_share.as_ref()?).ok()?;
            Some(ibe::DecryptionShare { share_index: index, share: bytes })
        })
        .collect();

    if shares.len() < network.min_node_count() {
        return Err(LitError::NodeResponse {
            message: "fewer than min_node_count decryption shares were returned".to_string(),
            node_count: outcome.values.len(),
            failures: vec![],
            request_id: Some(outcome.request_id),
        });
    }

    ibe::combine_and_decrypt(&ciphertext, &shares, network.min_node_count())
        .map_err(|err| LitError::unknown(format!("threshold decryption failed: {err}")))
}

#[derive(Debug, Clone)]
pub struct SigningAccessControlConditionParams {
    pub conditions: serde_json::Value,
    pub chain: String,
    pub session_sigs: crate::auth_sig::SessionSigsMap,
}

/// `/web/signing/access_control_condition` (spec.md §6: "issue a
/// conditional signed JWT"). Unlike `decrypt`, no ciphertext is involved —
/// the network attests that the caller satisfies `conditions` by returning
/// BLS shares over an `unsignedJwt` body, which are threshold-combined into
/// `unsignedJwt + "." + base64url(signature)` (spec.md §4.E step 5).
pub async fn get_signed_token(
    network: &dyn NetworkContext,
    transport: &dyn HttpTransport,
    params: SigningAccessControlConditionParams,
) -> Result<String, LitError> {
    let outcome = crate::node::dispatcher::dispatch::<crate::auth_sig::NodeShare, _>(
        network,
        transport,
        "/web/signing/access_control_condition",
        &params.session_sigs,
        |_url| {
            serde_json::json!({
                "conditions": params.conditions,
                "chain": params.chain,
            })
        },
    )
    .await?;

    crate::node::combiner::combine_bls_jwt(&outcome.values, network.min_node_count())
}

/// `dispatch` requires a session sig per node for its own readiness gate;
/// this function has already validated, node-by-node, that every
/// connected node has either a session sig or a fallback `authSig`
/// (spec.md §4.I step 2), so fill in a placeholder entry for any node
/// relying on the fallback instead of re-deriving that check here.
fn resolved_sigs_or_placeholder(
    session_sigs: &crate::auth_sig::SessionSigsMap,
    network: &dyn NetworkContext,
) -> crate::auth_sig::SessionSigsMap {
    network
        .connected_node_urls()
        .into_iter()
        .map(|url| {
            let sig = session_sigs.get(&url).cloned().unwrap_or(AuthSig {
                sig: String::new(),
                derived_via: "authSig".to_string(),
                signed_message: String::new(),
                address: String::new(),
                algo: None,
            });
            (url, sig)
        })
        .collect()
}
