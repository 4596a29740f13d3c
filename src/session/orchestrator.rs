//! Session-sig orchestration (spec.md §4.F): builds `SessionSigsMap` from a
//! set of capability demands, a wallet signature, and the session key.

use chrono::{Duration as ChronoDuration, Utc};

use crate::auth_sig::{
    AuthMethod, AuthSig, ResourceAbilityRequestWire, SessionSigningTemplate, SessionSigsMap,
};
use crate::capability::resource::ResourceAbilityRequest;
use crate::capability::CapabilityObject;
use crate::client::NetworkContext;
use crate::error::LitError;
use crate::session::key_store::{self, SessionKeyPair};
use crate::session::wallet_sig::{self, AuthCallbackParams, AuthNeededCallback, SignSessionKeyCallback};
use crate::storage::PersistenceAdapter;
use crate::transport::HttpTransport;

pub struct GetSessionSigsParams<'a> {
    pub resource_ability_requests: Vec<ResourceAbilityRequest>,
    pub domain: Option<String>,
    /// Wallet AuthSig expiration; defaults to `now + 24h` (spec.md §4.C).
    pub wallet_sig_expiration: Option<chrono::DateTime<Utc>>,
    pub capability_object: Option<CapabilityObject>,
    pub capability_auth_sigs: Vec<AuthSig>,
    pub capacity_delegation_auth_sig: Option<AuthSig>,
    pub auth_needed_callback: Option<&'a dyn AuthNeededCallback>,
    pub default_auth_callback: Option<&'a dyn AuthNeededCallback>,
    pub lit_action_code: Option<String>,
    pub lit_action_ipfs_id: Option<String>,
    pub js_params: Option<serde_json::Value>,
    /// Per-node session-sig expiration; defaults to `now + 5min`.
    pub session_sig_expiration: Option<chrono::DateTime<Utc>>,
}

impl<'a> GetSessionSigsParams<'a> {
    pub fn new(resource_ability_requests: Vec<ResourceAbilityRequest>) -> Self {
        Self {
            resource_ability_requests,
            domain: None,
            wallet_sig_expiration: None,
            capability_object: None,
            capability_auth_sigs: Vec::new(),
            capacity_delegation_auth_sig: None,
            auth_needed_callback: None,
            default_auth_callback: None,
            lit_action_code: None,
            lit_action_ipfs_id: None,
            js_params: None,
            session_sig_expiration: None,
        }
    }
}

/// `getSessionSigs` (spec.md §4.F steps 1-9).
pub async fn get_session_sigs(
    network: &dyn NetworkContext,
    storage: &dyn PersistenceAdapter,
    params: GetSessionSigsParams<'_>,
) -> Result<SessionSigsMap, LitError> {
    // Step 1: obtain or reuse a SessionKeyPair; derive SessionKeyUri.
    let session_key: SessionKeyPair = key_store::get_session_key(storage);
    let session_key_uri = session_key.session_key_uri();

    // Step 2: obtain a CapabilityObject, else generate one from the
    // requested resources with wildcard abilities.
    let capability_object = params.capability_object.clone().unwrap_or_else(|| {
        CapabilityObject::from_resource_ability_requests(&params.resource_ability_requests)
    });

    // Step 3: require the latest chain blockhash as the SIWE nonce.
    let nonce = network.latest_blockhash().ok_or_else(|| LitError::InvalidEthBlockhash {
        message: "no latest chain blockhash available; is the client connected?".to_string(),
        request_id: None,
    })?;

    let wallet_expiration = params
        .wallet_sig_expiration
        .unwrap_or_else(|| Utc::now() + ChronoDuration::hours(24));

    let callback_params = AuthCallbackParams {
        uri: session_key_uri.clone(),
        statement: capability_object.statement(),
        resources: vec![capability_object.encode_as_siwe_resource()],
        domain: params.domain.clone(),
        nonce: nonce.clone(),
        expiration: wallet_expiration.to_rfc3339(),
        resource_ability_requests: params.resource_ability_requests.clone(),
        switch_chain: None,
        lit_action_code: params.lit_action_code.clone(),
        lit_action_ipfs_id: params.lit_action_ipfs_id.clone(),
        js_params: params.js_params.clone(),
    };

    // Step 4: invoke the wallet-sig acquirer.
    let mut auth_sig = wallet_sig::get_wallet_sig(
        storage,
        &callback_params,
        &session_key_uri,
        &params.resource_ability_requests,
        params.auth_needed_callback,
        params.default_auth_callback,
    )
    .await?;

    // Step 5: apply the re-sign predicate; if stale, call the callback
    // again with the full context and replace the cached AuthSig.
    if wallet_sig::needs_to_resign(&auth_sig, &session_key_uri, &params.resource_ability_requests) {
        let provider = params
            .auth_needed_callback
            .or(params.default_auth_callback)
            .ok_or_else(|| LitError::WalletSignatureNotFound {
                message: "cached wallet signature is stale and no auth callback is configured"
                    .to_string(),
                request_id: None,
            })?;
        auth_sig = provider
            .call(&callback_params)
            .await
            .map_err(|err| LitError::WalletSignatureNotFound {
                message: format!("auth callback failed while re-signing: {err}"),
                request_id: None,
            })?
            .ok_or_else(|| LitError::WalletSignatureNotFound {
                message: "auth callback declined to produce a signature while re-signing"
                    .to_string(),
                request_id: None,
            })?;
        crate::storage::write_slot_lossy(storage, crate::storage::WALLET_SIGNATURE_KEY, &auth_sig);
    }

    // Step 6: validate the AuthSig's required fields.
    if !auth_sig.is_well_formed() {
        return Err(LitError::WalletSignatureNotFound {
            message: "wallet signature is missing required fields".to_string(),
            request_id: None,
        });
    }

    // Step 7: compose the capability chain.
    let mut capability_chain = params.capability_auth_sigs.clone();
    if let Some(capacity_sig) = params.capacity_delegation_auth_sig.clone() {
        capability_chain.push(capacity_sig);
    }
    capability_chain.push(auth_sig);

    // Step 8: default per-sig expiration is now + 5 min.
    let session_sig_expiration = params
        .session_sig_expiration
        .unwrap_or_else(|| Utc::now() + ChronoDuration::minutes(5));
    let issued_at = Utc::now().to_rfc3339();

    let resource_ability_requests: Vec<ResourceAbilityRequestWire> = params
        .resource_ability_requests
        .iter()
        .map(|r| ResourceAbilityRequestWire {
            resource: r.resource.canonical_key(),
            ability: r.ability.as_str().to_string(),
        })
        .collect();

    // Step 9: sign one template per connected node.
    let mut session_sigs = SessionSigsMap::new();
    for node_address in network.connected_node_urls() {
        let template = SessionSigningTemplate {
            session_key: session_key.public_key.clone(),
            uri: session_key_uri.clone(),
            resource_ability_requests: resource_ability_requests.clone(),
            capabilities: capability_chain.clone(),
            issued_at: issued_at.clone(),
            expiration: session_sig_expiration.to_rfc3339(),
            node_address: node_address.clone(),
        };
        let signed_message =
            serde_json::to_string(&template).map_err(|err| LitError::Unknown {
                message: format!("failed to serialise session signing template: {err}"),
                request_id: None,
            })?;
        let sig = session_key.sign(signed_message.as_bytes()).map_err(|err| LitError::Unknown {
            message: format!("failed to sign session template: {err}"),
            request_id: None,
        })?;
        session_sigs.insert(
            node_address,
            AuthSig {
                sig,
                derived_via: "litSessionSignViaNacl".to_string(),
                signed_message,
                address: session_key.public_key.clone(),
                algo: Some("ed25519".to_string()),
            },
        );
    }

    Ok(session_sigs)
}

/// Parameters shared by the two derived calls (spec.md §4.F "Derived
/// calls"). Unlike `GetSessionSigsParams`, there is no caller-supplied
/// `auth_needed_callback`/`default_auth_callback` — the network itself,
/// reached through `/web/sign_session_key`, is always the AuthSig source.
pub struct PkpSessionSigsParams {
    pub resource_ability_requests: Vec<ResourceAbilityRequest>,
    pub domain: Option<String>,
    pub wallet_sig_expiration: Option<chrono::DateTime<Utc>>,
    pub capability_object: Option<CapabilityObject>,
    pub capability_auth_sigs: Vec<AuthSig>,
    pub capacity_delegation_auth_sig: Option<AuthSig>,
    pub lit_action_code: Option<String>,
    pub lit_action_ipfs_id: Option<String>,
    pub js_params: Option<serde_json::Value>,
    pub session_sig_expiration: Option<chrono::DateTime<Utc>>,
}

impl PkpSessionSigsParams {
    pub fn new(resource_ability_requests: Vec<ResourceAbilityRequest>) -> Self {
        Self {
            resource_ability_requests,
            domain: None,
            wallet_sig_expiration: None,
            capability_object: None,
            capability_auth_sigs: Vec::new(),
            capacity_delegation_auth_sig: None,
            lit_action_code: None,
            lit_action_ipfs_id: None,
            js_params: None,
            session_sig_expiration: None,
        }
    }
}

/// `getPkpSessionSigs` (spec.md §4.F "Derived calls"): wraps
/// `get_session_sigs`, but the AuthSig source is the network's
/// `/web/sign_session_key` endpoint fed an auth-method proof, not an
/// external wallet.
pub async fn get_pkp_session_sigs(
    network: &dyn NetworkContext,
    transport: &dyn HttpTransport,
    storage: &dyn PersistenceAdapter,
    pkp_public_key: String,
    auth_methods: Vec<AuthMethod>,
    params: PkpSessionSigsParams,
) -> Result<SessionSigsMap, LitError> {
    let callback = SignSessionKeyCallback {
        network,
        transport,
        auth_methods,
        pkp_public_key,
    };
    let inner = GetSessionSigsParams {
        resource_ability_requests: params.resource_ability_requests,
        domain: params.domain,
        wallet_sig_expiration: params.wallet_sig_expiration,
        capability_object: params.capability_object,
        capability_auth_sigs: params.capability_auth_sigs,
        capacity_delegation_auth_sig: params.capacity_delegation_auth_sig,
        auth_needed_callback: Some(&callback),
        default_auth_callback: None,
        lit_action_code: params.lit_action_code,
        lit_action_ipfs_id: params.lit_action_ipfs_id,
        js_params: params.js_params,
        session_sig_expiration: params.session_sig_expiration,
    };
    get_session_sigs(network, storage, inner).await
}

/// `getLitActionSessionSigs` (spec.md §4.F "Derived calls"): same pipeline
/// as `get_pkp_session_sigs`, but requires exactly one of `lit_action_code`
/// / `lit_action_ipfs_id` plus `js_params`.
pub async fn get_lit_action_session_sigs(
    network: &dyn NetworkContext,
    transport: &dyn HttpTransport,
    storage: &dyn PersistenceAdapter,
    pkp_public_key: String,
    auth_methods: Vec<AuthMethod>,
    params: PkpSessionSigsParams,
) -> Result<SessionSigsMap, LitError> {
    match (&params.lit_action_code, &params.lit_action_ipfs_id) {
        (Some(_), Some(_)) | (None, None) => {
            return Err(LitError::InvalidArgumentException {
                message: "exactly one of lit_action_code or lit_action_ipfs_id is required"
                    .to_string(),
                request_id: None,
            })
        }
        _ => {}
    }
    if params.js_params.is_none() {
        return Err(LitError::ParamsMissing {
            message: "js_params is required for a Lit Action session".to_string(),
            request_id: None,
        });
    }
    get_pkp_session_sigs(network, transport, storage, pkp_public_key, auth_methods, params).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::resource::{LitAbility, LitResource};
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FakeNetwork {
        nodes: Vec<String>,
    }

    impl NetworkContext for FakeNetwork {
        fn latest_blockhash(&self) -> Option<String> {
            Some("0xdeadbeef".to_string())
        }
        fn subnet_pub_key(&self) -> Option<String> {
            Some("subnet".to_string())
        }
        fn connected_node_urls(&self) -> Vec<String> {
            self.nodes.clone()
        }
        fn min_node_count(&self) -> usize {
            self.nodes.len()
        }
        fn request_timeout(&self) -> Duration {
            Duration::from_secs(5)
        }
        fn retry_tolerance(&self) -> u32 {
            0
        }
    }

    struct WalletStub;

    #[async_trait]
    impl AuthNeededCallback for WalletStub {
        async fn call(&self, params: &AuthCallbackParams) -> anyhow::Result<Option<AuthSig>> {
            let message = crate::capability::siwe::SiweMessage {
                domain: params.domain.clone().unwrap_or_else(|| "localhost".to_string()),
                address: "0xwallet".to_string(),
                statement: params.statement.clone(),
                uri: params.uri.clone(),
                version: "1".to_string(),
                chain_id: 1,
                nonce: params.nonce.clone(),
                issued_at: Utc::now().to_rfc3339(),
                expiration_time: params.expiration.clone(),
                resources: params.resources.clone(),
            };
            Ok(Some(AuthSig {
                sig: "deadbeefcafe".to_string(),
                derived_via: "web3.eth.personal.sign".to_string(),
                signed_message: message.to_text(),
                address: "0xwallet".to_string(),
                algo: None,
            }))
        }
    }

    #[tokio::test]
    async fn session_sigs_satisfy_p1_and_p2_for_every_connected_node() {
        let network = FakeNetwork {
            nodes: vec!["https://node-a".into(), "https://node-b".into(), "https://node-c".into()],
        };
        let storage = MemoryStorage::new();
        let wallet = WalletStub;

        let requests = vec![
            ResourceAbilityRequest::new(LitResource::pkp_wildcard(), LitAbility::PkpSigning),
            ResourceAbilityRequest::new(LitResource::action_wildcard(), LitAbility::LitActionExecution),
        ];
        let mut params = GetSessionSigsParams::new(requests.clone());
        params.auth_needed_callback = Some(&wallet);

        let session_sigs = get_session_sigs(&network, &storage, params).await.unwrap();

        assert_eq!(session_sigs.len(), 3);
        for (node_address, sig) in &session_sigs {
            // P1: signedMessage.uri == "lit:session:" + address
            let template: SessionSigningTemplate = serde_json::from_str(&sig.signed_message).unwrap();
            assert_eq!(template.uri, format!("lit:session:{}", sig.address));
            assert_eq!(&template.node_address, node_address);

            // P2: every required (resource, ability) is covered by the
            // capability object anchoring the wallet AuthSig.
            let wallet_auth_sig = template.capabilities.last().unwrap();
            let wallet_message =
                crate::capability::siwe::SiweMessage::parse(&wallet_auth_sig.signed_message).unwrap();
            let capability_object =
                CapabilityObject::decode(&wallet_message.resources[0]).unwrap();
            for request in &requests {
                assert!(capability_object
                    .verify_capabilities_for_resource(&request.resource, request.ability));
            }
        }
    }

    #[tokio::test]
    async fn fails_without_connected_blockhash() {
        struct NoBlockhashNetwork;
        impl NetworkContext for NoBlockhashNetwork {
            fn latest_blockhash(&self) -> Option<String> {
                None
            }
            fn subnet_pub_key(&self) -> Option<String> {
                None
            }
            fn connected_node_urls(&self) -> Vec<String> {
                vec![]
            }
            fn min_node_count(&self) -> usize {
                0
            }
            fn request_timeout(&self) -> Duration {
                Duration::from_secs(5)
            }
            fn retry_tolerance(&self) -> u32 {
                0
            }
        }

        let storage = MemoryStorage::new();
        let params = GetSessionSigsParams::new(vec![]);
        let err = get_session_sigs(&NoBlockhashNetwork, &storage, params)
            .await
            .unwrap_err();
        assert!(matches!(err, LitError::InvalidEthBlockhash { .. }));
    }

    mod derived_calls {
        use super::*;
        use crate::capability::resource::{LitAbility, LitResource};
        use async_trait::async_trait;
        use blstrs::{G2Affine, G2Projective, Scalar as BlsScalar};
        use group::{Group, GroupEncoding};

        struct BlsShareTransport {
            secret: BlsScalar,
            coefficient: BlsScalar,
            msg_point: G2Projective,
        }

        #[async_trait]
        impl crate::transport::HttpTransport for BlsShareTransport {
            async fn post(
                &self,
                url: &str,
                _body: &serde_json::Value,
                _request_id: &str,
                _timeout: Duration,
            ) -> anyhow::Result<serde_json::Value> {
                let index: u32 = url.rsplit('-').next().unwrap().parse().unwrap();
                let share = self.secret + self.coefficient * BlsScalar::from(index as u64);
                let signature = G2Affine::from(self.msg_point * share).to_compressed().to_vec();
                Ok(serde_json::json!({
                    "success": true,
                    "signatureShare": hex::encode(signature),
                    "shareIndex": index,
                    "curveType": "BLS",
                    "dataSigned": "digest",
                }))
            }
        }

        #[tokio::test]
        async fn get_pkp_session_sigs_mints_one_sig_per_node_from_network_issued_auth_sig() {
            let network = FakeNetwork {
                nodes: vec!["https://node-1".into(), "https://node-2".into(), "https://node-3".into()],
            };
            let transport = BlsShareTransport {
                secret: BlsScalar::from(123456u64),
                coefficient: BlsScalar::from(9u64),
                msg_point: G2Projective::generator() * BlsScalar::from(7u64),
            };
            let storage = MemoryStorage::new();

            let requests = vec![ResourceAbilityRequest::new(
                LitResource::pkp_wildcard(),
                LitAbility::PkpSigning,
            )];
            let params = PkpSessionSigsParams::new(requests);
            let auth_methods = vec![AuthMethod {
                auth_method_type: 1,
                access_token: "token".to_string(),
            }];

            let session_sigs = get_pkp_session_sigs(
                &network,
                &transport,
                &storage,
                "0x04pkp".to_string(),
                auth_methods,
                params,
            )
            .await
            .unwrap();

            assert_eq!(session_sigs.len(), 3);
            for sig in session_sigs.values() {
                let template: SessionSigningTemplate =
                    serde_json::from_str(&sig.signed_message).unwrap();
                let wallet_auth_sig = template.capabilities.last().unwrap();
                assert_eq!(wallet_auth_sig.derived_via, "lit.bls");
                assert_eq!(wallet_auth_sig.address, "0x04pkp");
            }
        }

        #[tokio::test]
        async fn get_lit_action_session_sigs_rejects_both_code_and_ipfs_id() {
            let network = FakeNetwork { nodes: vec!["https://node-1".into()] };
            let transport = BlsShareTransport {
                secret: BlsScalar::from(1u64),
                coefficient: BlsScalar::from(1u64),
                msg_point: G2Projective::generator(),
            };
            let storage = MemoryStorage::new();

            let mut params = PkpSessionSigsParams::new(vec![]);
            params.lit_action_code = Some("1".to_string());
            params.lit_action_ipfs_id = Some("Qm...".to_string());
            params.js_params = Some(serde_json::json!({}));

            let err = get_lit_action_session_sigs(
                &network,
                &transport,
                &storage,
                "0x04pkp".to_string(),
                vec![],
                params,
            )
            .await
            .unwrap_err();
            assert!(matches!(err, LitError::InvalidArgumentException { .. }));
        }

        #[tokio::test]
        async fn get_lit_action_session_sigs_requires_js_params() {
            let network = FakeNetwork { nodes: vec!["https://node-1".into()] };
            let transport = BlsShareTransport {
                secret: BlsScalar::from(1u64),
                coefficient: BlsScalar::from(1u64),
                msg_point: G2Projective::generator(),
            };
            let storage = MemoryStorage::new();

            let mut params = PkpSessionSigsParams::new(vec![]);
            params.lit_action_code = Some("1".to_string());

            let err = get_lit_action_session_sigs(
                &network,
                &transport,
                &storage,
                "0x04pkp".to_string(),
                vec![],
                params,
            )
            .await
            .unwrap_err();
            assert!(matches!(err, LitError::ParamsMissing { .. }));
        }
    }
}
