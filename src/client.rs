//! `LitNodeClient` connection lifecycle (spec.md §4.K closing paragraph,
//! §5): `Unconnected → Connecting → Ready`. Any request made while not
//! `Ready` fails with `LitNodeClientNotReady`.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::action::{self, ExecuteJsParams, ExecuteJsResult, ResponseStrategy};
use crate::claim::{self, ClaimKeyParams, ClaimResult};
use crate::config::LitNodeClientConfig;
use crate::encryption::{
    self, DecryptParams, EncryptParams, EncryptResult, SigningAccessControlConditionParams,
};
use crate::error::LitError;
use crate::pkp::{self, EcdsaSignature, PkpSignParams};
use crate::session::{self, GetSessionSigsParams};
use crate::storage::PersistenceAdapter;
use crate::transport::HttpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Unconnected,
    Connecting,
    Ready,
}

/// The connection snapshot established by `connect()` (spec.md §4.K).
#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub subnet_pub_key: Option<String>,
    pub network_pub_key_set: Option<String>,
    pub min_node_count: usize,
    pub current_epoch_number: Option<u64>,
    pub latest_blockhash: Option<String>,
    pub connected_nodes: Vec<String>,
}

/// The narrow view of the client other components are handed, instead of a
/// back-reference to the whole client (spec.md §9 "Cyclic reference between
/// client and capability-object helpers").
pub trait NetworkContext: Send + Sync {
    fn latest_blockhash(&self) -> Option<String>;
    fn subnet_pub_key(&self) -> Option<String>;
    fn connected_node_urls(&self) -> Vec<String>;
    fn min_node_count(&self) -> usize;
    fn request_timeout(&self) -> Duration;
    fn retry_tolerance(&self) -> u32;
    /// The network's master public key (hex, x-only), used to derive a
    /// claimed key's public key (spec.md §4.J step 4). Defaulted so the
    /// fakes in other modules' tests don't all need updating.
    fn network_pub_key_set(&self) -> Option<String> {
        None
    }
}

/// The single mutable piece of shared state outside the persistence slots
/// (spec.md §5): the connection snapshot, mutated only by `connect()`.
struct State {
    status: ClientStatus,
    connection: ConnectionInfo,
}

pub struct LitNodeClient {
    config: LitNodeClientConfig,
    transport: Arc<dyn HttpTransport>,
    storage: Arc<dyn PersistenceAdapter>,
    state: RwLock<State>,
}

impl LitNodeClient {
    pub fn new(
        config: LitNodeClientConfig,
        transport: Arc<dyn HttpTransport>,
        storage: Arc<dyn PersistenceAdapter>,
    ) -> Self {
        Self {
            config,
            transport,
            storage,
            state: RwLock::new(State {
                status: ClientStatus::Unconnected,
                connection: ConnectionInfo::default(),
            }),
        }
    }

    pub fn status(&self) -> ClientStatus {
        self.state.read().unwrap().status
    }

    pub fn config(&self) -> &LitNodeClientConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn PersistenceAdapter> {
        &self.storage
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    /// Establish `subnetPubKey`, `networkPubKeySet`, `minNodeCount`,
    /// `currentEpochNumber`, `latestBlockhash`, `connectedNodes` from a
    /// handshake against every bootstrap URL (spec.md §4.K).
    ///
    /// The node-side handshake endpoint itself is an external collaborator
    /// (spec.md §1) — this calls `/web/handshake` on each bootstrap URL and
    /// takes the first well-formed response as authoritative, the way the
    /// dispatcher in `crate::node::dispatcher` treats node responses.
    pub async fn connect(&self) -> Result<(), LitError> {
        {
            let mut state = self.state.write().unwrap();
            state.status = ClientStatus::Connecting;
        }

        let mut connected_nodes = Vec::new();
        let mut handshake: Option<serde_json::Value> = None;

        for url in &self.config.bootstrap_urls {
            let endpoint = format!("{url}/web/handshake");
            match self
                .transport
                .post(
                    &endpoint,
                    &serde_json::json!({}),
                    "connect",
                    self.config.request_timeout,
                )
                .await
            {
                Ok(value) => {
                    connected_nodes.push(url.clone());
                    if handshake.is_none() {
                        handshake = Some(value);
                    }
                }
                Err(err) => {
                    tracing::warn!(url, %err, "node handshake failed");
                }
            }
        }

        if connected_nodes.len() < self.config.min_node_count {
            let mut state = self.state.write().unwrap();
            state.status = ClientStatus::Unconnected;
            return Err(LitError::NodeResponse {
                message: "not enough nodes responded to handshake to form quorum".to_string(),
                node_count: self.config.bootstrap_urls.len(),
                failures: vec![],
                request_id: None,
            });
        }

        let handshake = handshake.unwrap_or_else(|| serde_json::json!({}));
        let connection = ConnectionInfo {
            subnet_pub_key: handshake
                .get("subnetPubKey")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            network_pub_key_set: handshake
                .get("networkPubKeySet")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            min_node_count: self.config.min_node_count,
            current_epoch_number: handshake.get("epoch").and_then(|v| v.as_u64()),
            latest_blockhash: handshake
                .get("latestBlockhash")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            connected_nodes,
        };

        let mut state = self.state.write().unwrap();
        state.connection = connection;
        state.status = ClientStatus::Ready;
        Ok(())
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        self.state.read().unwrap().connection.clone()
    }

    /// Used by every public request method as the readiness gate (spec.md
    /// §4.K, §7 "readiness errors are raised synchronously before any
    /// network I/O").
    pub fn require_ready(&self) -> Result<(), LitError> {
        if self.status() != ClientStatus::Ready {
            return Err(LitError::LitNodeClientNotReady {
                message: "client must be connected before issuing requests".to_string(),
                request_id: None,
            });
        }
        Ok(())
    }

    /// `getSessionSigs` (spec.md §4.F).
    pub async fn get_session_sigs(
        &self,
        params: GetSessionSigsParams<'_>,
    ) -> Result<crate::auth_sig::SessionSigsMap, LitError> {
        self.require_ready()?;
        session::get_session_sigs(self, self.storage.as_ref(), params).await
    }

    /// `getPkpSessionSigs` (spec.md §4.F "Derived calls"): the AuthSig
    /// source is the network's `/web/sign_session_key` endpoint, authorised
    /// by an auth-method proof, rather than an external wallet.
    pub async fn get_pkp_session_sigs(
        &self,
        pkp_public_key: String,
        auth_methods: Vec<crate::auth_sig::AuthMethod>,
        params: session::PkpSessionSigsParams,
    ) -> Result<crate::auth_sig::SessionSigsMap, LitError> {
        self.require_ready()?;
        session::get_pkp_session_sigs(
            self,
            self.transport.as_ref(),
            self.storage.as_ref(),
            pkp_public_key,
            auth_methods,
            params,
        )
        .await
    }

    /// `getLitActionSessionSigs` (spec.md §4.F "Derived calls"): same as
    /// `get_pkp_session_sigs`, requiring exactly one of the params'
    /// `lit_action_code`/`lit_action_ipfs_id` plus `js_params`.
    pub async fn get_lit_action_session_sigs(
        &self,
        pkp_public_key: String,
        auth_methods: Vec<crate::auth_sig::AuthMethod>,
        params: session::PkpSessionSigsParams,
    ) -> Result<crate::auth_sig::SessionSigsMap, LitError> {
        self.require_ready()?;
        session::get_lit_action_session_sigs(
            self,
            self.transport.as_ref(),
            self.storage.as_ref(),
            pkp_public_key,
            auth_methods,
            params,
        )
        .await
    }

    /// `executeJs` (spec.md §4.G).
    pub async fn execute_js(
        &self,
        params: ExecuteJsParams,
        response_strategy: ResponseStrategy<'_>,
    ) -> Result<ExecuteJsResult, LitError> {
        self.require_ready()?;
        action::execute_js(self, self.transport.as_ref(), params, response_strategy).await
    }

    /// `pkpSign` (spec.md §4.H).
    pub async fn pkp_sign(&self, params: PkpSignParams) -> Result<EcdsaSignature, LitError> {
        self.require_ready()?;
        pkp::pkp_sign(self, self.transport.as_ref(), params).await
    }

    /// `encrypt` (spec.md §4.I). Pure local computation once connected, so
    /// it still requires a network snapshot for the subnet public key.
    pub fn encrypt(&self, params: EncryptParams) -> Result<EncryptResult, LitError> {
        self.require_ready()?;
        encryption::encrypt(self, params)
    }

    /// `decrypt` (spec.md §4.I).
    pub async fn decrypt(&self, params: DecryptParams) -> Result<Vec<u8>, LitError> {
        self.require_ready()?;
        encryption::decrypt(self, self.transport.as_ref(), params).await
    }

    /// `/web/signing/access_control_condition` (spec.md §6): issue a
    /// conditional signed JWT attesting the caller satisfies `conditions`,
    /// without decrypting any payload.
    pub async fn get_signed_token(
        &self,
        params: SigningAccessControlConditionParams,
    ) -> Result<String, LitError> {
        self.require_ready()?;
        encryption::get_signed_token(self, self.transport.as_ref(), params).await
    }

    /// `claimKeyId` (spec.md §4.J).
    pub async fn claim_key_id(&self, params: ClaimKeyParams<'_>) -> Result<ClaimResult, LitError> {
        self.require_ready()?;
        claim::claim_key_id(self, self.transport.as_ref(), params).await
    }
}

impl NetworkContext for LitNodeClient {
    fn latest_blockhash(&self) -> Option<String> {
        self.state.read().unwrap().connection.latest_blockhash.clone()
    }

    fn subnet_pub_key(&self) -> Option<String> {
        self.state.read().unwrap().connection.subnet_pub_key.clone()
    }

    fn connected_node_urls(&self) -> Vec<String> {
        self.state.read().unwrap().connection.connected_nodes.clone()
    }

    fn min_node_count(&self) -> usize {
        self.config.min_node_count
    }

    fn request_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    fn retry_tolerance(&self) -> u32 {
        self.config.retry_tolerance
    }

    fn network_pub_key_set(&self) -> Option<String> {
        self.state.read().unwrap().connection.network_pub_key_set.clone()
    }
}
