//! Claim (spec.md §4.J): ask N nodes to jointly attest a derived key from
//! an auth-method proof, then combine their per-node ECDSA signatures
//! into an on-chain claim.

use async_trait::async_trait;
use secp256kfun::prelude::*;
use serde::{Deserialize, Serialize};

use crate::auth_sig::AuthMethod;
use crate::client::NetworkContext;
use crate::crypto::hd;
use crate::error::LitError;
use crate::node::dispatcher;
use crate::transport::HttpTransport;

/// Auth method type tags the network does not support claiming against
/// (spec.md §4.J step 1). WebAuthn proofs can't be replayed node-side the
/// way an OIDC/OTP token can, so claiming is rejected up front rather than
/// failing after a wasted dispatch round.
const UNSUPPORTED_AUTH_METHOD_TYPES: &[u32] = &[WEBAUTHN_AUTH_METHOD_TYPE];
const WEBAUTHN_AUTH_METHOD_TYPE: u32 = 3;

pub struct ClaimKeyParams<'a> {
    pub auth_method: AuthMethod,
    pub mint_callback: Option<&'a dyn MintCallback>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MintRequest {
    pub derived_key_id: String,
    pub auth_method_type: u32,
    pub signatures: Vec<ClaimSignature>,
    pub pubkey: String,
    pub network: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSignature {
    pub r: String,
    pub s: String,
    pub v: u8,
}

/// The relay that turns a collected claim into an on-chain mint
/// transaction (spec.md §6 "the on-chain relay that mints claimed keys" —
/// an external collaborator; this crate only shapes the request).
#[async_trait]
pub trait MintCallback: Send + Sync {
    async fn mint(&self, request: &MintRequest) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct ClaimResult {
    pub tx_id: String,
    pub signatures: Vec<ClaimSignature>,
    pub pubkey: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ClaimNodeResponse {
    derived_key_id: String,
    signature: String,
}

/// `claimKeyId` (spec.md §4.J).
pub async fn claim_key_id(
    network: &dyn NetworkContext,
    transport: &dyn HttpTransport,
    params: ClaimKeyParams<'_>,
) -> Result<ClaimResult, LitError> {
    if UNSUPPORTED_AUTH_METHOD_TYPES.contains(&params.auth_method.auth_method_type) {
        return Err(LitError::InvalidArgumentException {
            message: format!(
                "auth method type {} cannot be used to claim a key",
                params.auth_method.auth_method_type
            ),
            request_id: None,
        });
    }

    let nodes = network.connected_node_urls();
    let session_sigs = placeholder_sigs(&nodes);
    let auth_method_type = params.auth_method.auth_method_type;
    let access_token = params.auth_method.access_token.clone();

    let outcome = dispatcher::dispatch::<ClaimNodeResponse, _>(
        network,
        transport,
        "/web/pkp/claim",
        &session_sigs,
        |_url| {
            serde_json::json!({
                "authMethodType": auth_method_type,
                "accessToken": access_token,
            })
        },
    )
    .await?;

    let derived_key_id = outcome
        .values
        .first()
        .map(|r| r.derived_key_id.clone())
        .ok_or_else(|| LitError::unknown("no claim responses from any node"))?;

    let mut signatures = Vec::with_capacity(outcome.values.len());
    for response in &outcome.values {
        if response.derived_key_id != derived_key_id {
            return Err(LitError::NodeResponse {
                message: "nodes disagreed on the derived key id for this claim".to_string(),
                node_count: outcome.values.len(),
                failures: vec![],
                request_id: Some(outcome.request_id.clone()),
            });
        }
        signatures.push(split_claim_signature(&response.signature)?);
    }

    let network_pub_key_set = network.network_pub_key_set().ok_or_else(|| {
        LitError::LitNodeClientNotReady {
            message: "network public key set is not known; is the client connected?".to_string(),
            request_id: Some(outcome.request_id.clone()),
        }
    })?;
    let master_bytes: [u8; 32] = hex::decode(&network_pub_key_set)
        .map_err(|err| LitError::unknown(format!("malformed network public key: {err}")))?
        .try_into()
        .map_err(|_| LitError::unknown("network public key must be 32 bytes (x-only)"))?;
    let master_pubkey = Point::<EvenY>::from_xonly_bytes(master_bytes)
        .ok_or_else(|| LitError::unknown("network public key is not a valid curve point"))?;

    let derived_pubkey = hd::compute_hd_pub_key(&master_pubkey, derived_key_id.as_bytes())
        .map_err(|err| LitError::unknown(format!("HD derivation failed: {err}")))?;
    let pubkey = format!("0x04{}", hex::encode(derived_pubkey.to_xonly_bytes()));

    let mint_request = MintRequest {
        derived_key_id,
        auth_method_type,
        signatures: signatures.clone(),
        pubkey: pubkey.clone(),
        network: "lit".to_string(),
    };

    let tx_id = match params.mint_callback {
        Some(callback) => callback
            .mint(&mint_request)
            .await
            .map_err(|err| LitError::unknown(format!("mint callback failed: {err}")))?,
        None => {
            return Err(LitError::ParamsMissing {
                message: "no mint callback configured and no default relay available".to_string(),
                request_id: Some(outcome.request_id),
            })
        }
    };

    Ok(ClaimResult { tx_id, signatures, pubkey })
}

/// `{r, s, v}` split from a node's hex `r||s||v` signature (spec.md §4.J
/// step 3). Also used by the Action Executor to split a named `claimData`
/// entry's signature the same way.
pub(crate) fn split_claim_signature(hex_sig: &str) -> Result<ClaimSignature, LitError> {
    let trimmed = hex_sig.strip_prefix("0x").unwrap_or(hex_sig);
    if trimmed.len() != 130 {
        return Err(LitError::unknown(format!(
            "expected a 65-byte r||s||v signature, got {} bytes",
            trimmed.len() / 2
        )));
    }
    let r = trimmed[0..64].to_string();
    let s = trimmed[64..128].to_string();
    let v_byte = u8::from_str_radix(&trimmed[128..130], 16)
        .map_err(|err| LitError::unknown(format!("malformed recovery byte: {err}")))?;
    Ok(ClaimSignature { r, s, v: v_byte })
}

fn placeholder_sigs(nodes: &[String]) -> crate::auth_sig::SessionSigsMap {
    nodes
        .iter()
        .map(|url| {
            (
                url.clone(),
                crate::auth_sig::AuthSig {
                    sig: String::new(),
                    derived_via: "authMethod".to_string(),
                    signed_message: String::new(),
                    address: String::new(),
                    algo: None,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use schnorr_fun::fun::marker::*;
    use secp256kfun::prelude::*;
    use std::time::Duration;

    struct FakeNetwork {
        nodes: Vec<String>,
        master_pubkey_hex: String,
    }

    impl NetworkContext for FakeNetwork {
        fn latest_blockhash(&self) -> Option<String> {
            None
        }
        fn subnet_pub_key(&self) -> Option<String> {
            None
        }
        fn connected_node_urls(&self) -> Vec<String> {
            self.nodes.clone()
        }
        fn min_node_count(&self) -> usize {
            self.nodes.len()
        }
        fn request_timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
        fn retry_tolerance(&self) -> u32 {
            0
        }
        fn network_pub_key_set(&self) -> Option<String> {
            Some(self.master_pubkey_hex.clone())
        }
    }

    struct ClaimTransport;

    #[async_trait]
    impl HttpTransport for ClaimTransport {
        async fn post(
            &self,
            _url: &str,
            _body: &serde_json::Value,
            _request_id: &str,
            _timeout: Duration,
        ) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::json!({
                "derivedKeyId": "auth-method:google:user-123",
                "signature": format!("{}{}1b", "a".repeat(64), "b".repeat(64)),
            }))
        }
    }

    struct RelayStub;

    #[async_trait]
    impl MintCallback for RelayStub {
        async fn mint(&self, _request: &MintRequest) -> anyhow::Result<String> {
            Ok("0xtxid".to_string())
        }
    }

    fn random_master_hex() -> String {
        let secret: Scalar<Secret, NonZero> = Scalar::random(&mut rand::thread_rng());
        let pubkey = g!(secret * G)
            .normalize()
            .non_zero()
            .unwrap()
            .into_point_with_even_y()
            .0;
        hex::encode(pubkey.to_xonly_bytes())
    }

    #[tokio::test]
    async fn claims_and_mints_a_key() {
        let network = FakeNetwork {
            nodes: vec!["https://node-a".into(), "https://node-b".into()],
            master_pubkey_hex: random_master_hex(),
        };
        let relay = RelayStub;
        let params = ClaimKeyParams {
            auth_method: AuthMethod {
                auth_method_type: 6,
                access_token: "token".to_string(),
            },
            mint_callback: Some(&relay),
        };

        let result = claim_key_id(&network, &ClaimTransport, params).await.unwrap();
        assert_eq!(result.tx_id, "0xtxid");
        assert_eq!(result.signatures.len(), 2);
        assert_eq!(result.signatures[0].v, 0x1b);
        assert!(result.pubkey.starts_with("0x04"));
    }

    #[tokio::test]
    async fn rejects_webauthn_before_any_dispatch() {
        let network = FakeNetwork {
            nodes: vec!["https://node-a".into()],
            master_pubkey_hex: random_master_hex(),
        };
        let params = ClaimKeyParams {
            auth_method: AuthMethod {
                auth_method_type: WEBAUTHN_AUTH_METHOD_TYPE,
                access_token: "token".to_string(),
            },
            mint_callback: None,
        };
        let err = claim_key_id(&network, &ClaimTransport, params).await.unwrap_err();
        assert!(matches!(err, LitError::InvalidArgumentException { .. }));
    }
}
