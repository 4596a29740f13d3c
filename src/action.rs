//! Action Executor (spec.md §4.G): submit a sandboxed action (`code` or
//! `ipfsId`) plus `jsParams` to the network, aggregate the per-node
//! responses, and combine any signatures/claims the action requested.

use std::collections::HashMap;

use base64::Engine;
use serde::Deserialize;

use crate::auth_sig::{NodeShare, SessionSigsMap};
use crate::client::NetworkContext;
use crate::crypto::helpers::majority;
use crate::error::LitError;
use crate::node::{combiner, dispatcher, targeted};
use crate::node::combiner::CombinedSignature;
use crate::transport::HttpTransport;

/// spec.md §9 "Open question ... implementers SHOULD preserve behaviour
/// (most-frequent with lexicographic tie-break) and not reinterpret the
/// label" — `LeastCommon` (the default) and `MostCommon` therefore resolve
/// identically; only `Custom` changes the selection.
pub enum ResponseStrategy<'a> {
    LeastCommon,
    MostCommon,
    Custom(&'a dyn Fn(&[String]) -> String),
}

impl Default for ResponseStrategy<'_> {
    fn default() -> Self {
        ResponseStrategy::LeastCommon
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteJsParams {
    pub code: Option<String>,
    pub ipfs_id: Option<String>,
    pub js_params: Option<serde_json::Value>,
    pub session_sigs: SessionSigsMap,
    /// Exactly `target_node_range` nodes, deterministically selected
    /// (spec.md §4.K), instead of the all-nodes fan-out.
    pub target_node_range: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ExecuteJsResult {
    pub response: serde_json::Value,
    pub logs: String,
    pub success: bool,
    pub signed_data: HashMap<String, CombinedSignature>,
    pub claim_data: HashMap<String, crate::claim::ClaimSignature>,
}

#[derive(Debug, Deserialize)]
struct SignedDataEntry {
    #[serde(rename = "signatureShare")]
    signature_share: String,
    #[serde(rename = "shareIndex")]
    share_index: u32,
    #[serde(rename = "curveType")]
    curve_type: String,
    #[serde(rename = "dataSigned")]
    data_signed: String,
}

#[derive(Debug, Deserialize)]
struct ClaimDataEntry {
    #[serde(rename = "derivedKeyId")]
    derived_key_id: String,
    signature: String,
}

/// `executeJs` (spec.md §4.G steps 1-6).
pub async fn execute_js(
    network: &dyn NetworkContext,
    transport: &dyn HttpTransport,
    params: ExecuteJsParams,
    response_strategy: ResponseStrategy<'_>,
) -> Result<ExecuteJsResult, LitError> {
    match (&params.code, &params.ipfs_id) {
        (Some(_), Some(_)) | (None, None) => {
            return Err(LitError::InvalidArgumentException {
                message: "exactly one of `code` or `ipfs_id` is required".to_string(),
                request_id: None,
            })
        }
        _ => {}
    }

    let code_b64 = params
        .code
        .as_ref()
        .map(|code| base64::engine::general_purpose::STANDARD.encode(code));
    let js_params = params.js_params.clone().unwrap_or(serde_json::json!({}));
    let ipfs_id = params.ipfs_id.clone();

    let target_nodes = params.target_node_range.map(|count| {
        // spec.md §4.K derives the targeted subset from the action's own
        // content hash; the action body is itself the payload identifier.
        let identity = code_b64.clone().unwrap_or_else(|| ipfs_id.clone().unwrap_or_default());
        targeted::select_targeted_nodes(&network.connected_node_urls(), &identity, count)
    });

    let outcome = if let Some(nodes) = &target_nodes {
        dispatch_to_nodes(network, transport, nodes, &params.session_sigs, &code_b64, &ipfs_id, &js_params).await?
    } else {
        dispatcher::dispatch::<NodeShare, _>(
            network,
            transport,
            "/web/execute",
            &params.session_sigs,
            |_url| build_execute_body(&code_b64, &ipfs_id, &js_params),
        )
        .await?
    };

    let responses: Vec<String> = outcome
        .values
        .iter()
        .filter(|share| share.success)
        .filter_map(|share| share.response.clone())
        .collect();
    if responses.is_empty() {
        return Err(LitError::NodeResponse {
            message: "no node returned a successful execution response".to_string(),
            node_count: outcome.values.len(),
            failures: vec![],
            request_id: Some(outcome.request_id),
        });
    }

    let majority_response = select_response(&responses, &response_strategy);

    let logs: Vec<&str> = outcome
        .values
        .iter()
        .filter_map(|share| share.logs.as_deref())
        .collect();
    let combined_logs = majority(logs.into_iter()).unwrap_or_default().to_string();

    let agreeing: Vec<&NodeShare> = outcome
        .values
        .iter()
        .filter(|share| share.success && share.response.as_deref() == Some(majority_response.as_str()))
        .collect();

    let any_signing = agreeing.iter().any(|s| !s.signed_data.is_empty() || !s.claim_data.is_empty());

    let parsed_response = serde_json::from_str(&majority_response)
        .unwrap_or_else(|_| serde_json::Value::String(majority_response.clone()));

    if !any_signing {
        return Ok(ExecuteJsResult {
            response: parsed_response,
            logs: combined_logs,
            success: true,
            signed_data: HashMap::new(),
            claim_data: HashMap::new(),
        });
    }

    let signed_data = combine_named_signatures(&agreeing, network.min_node_count())?;
    let claim_data = combine_named_claims(&agreeing, network.min_node_count())?;

    Ok(ExecuteJsResult {
        response: parsed_response,
        logs: combined_logs,
        success: true,
        signed_data,
        claim_data,
    })
}

async fn dispatch_to_nodes(
    network: &dyn NetworkContext,
    transport: &dyn HttpTransport,
    nodes: &[String],
    session_sigs: &SessionSigsMap,
    code_b64: &Option<String>,
    ipfs_id: &Option<String>,
    js_params: &serde_json::Value,
) -> Result<dispatcher::DispatchOutcome<NodeShare>, LitError> {
    // spec.md §9 "Open question: `runOnTargetedNodes` composes its request
    // with `data: params` (not `reqBody`) — possibly a bug; spec requires
    // sending the full `reqBody` including the per-URL session sig." This
    // sends the same full body every other dispatch path sends.
    use futures::future::join_all;

    for url in nodes {
        if !session_sigs.contains_key(url) {
            return Err(LitError::WalletSignatureNotFound {
                message: format!("no session sig for targeted node {url}"),
                request_id: None,
            });
        }
    }

    let request_id = uuid::Uuid::new_v4().to_string();
    let futures = nodes.iter().map(|url| {
        let endpoint = format!("{url}/web/execute");
        let body = build_execute_body(code_b64, ipfs_id, js_params);
        let request_id = request_id.clone();
        async move {
            let result = transport
                .post(&endpoint, &body, &request_id, network.request_timeout())
                .await;
            (url.clone(), result)
        }
    });

    let results = join_all(futures).await;
    let mut values = Vec::new();
    let mut failures = Vec::new();
    for (url, result) in results {
        match result {
            Ok(json) => match serde_json::from_value::<NodeShare>(json) {
                Ok(share) => values.push(share),
                Err(err) => failures.push(crate::error::NodeFailure {
                    url,
                    message: format!("malformed node response: {err}"),
                }),
            },
            Err(err) => failures.push(crate::error::NodeFailure { url, message: err.to_string() }),
        }
    }

    if values.len() < network.min_node_count().min(nodes.len()) {
        return Err(LitError::NodeResponse {
            message: "too few targeted nodes returned a valid response".to_string(),
            node_count: nodes.len(),
            failures,
            request_id: Some(request_id),
        });
    }

    Ok(dispatcher::DispatchOutcome { values, request_id })
}

fn build_execute_body(
    code_b64: &Option<String>,
    ipfs_id: &Option<String>,
    js_params: &serde_json::Value,
) -> serde_json::Value {
    let mut body = serde_json::json!({ "jsParams": js_params });
    if let Some(code) = code_b64 {
        body["code"] = serde_json::Value::String(code.clone());
    }
    if let Some(id) = ipfs_id {
        body["ipfsId"] = serde_json::Value::String(id.clone());
    }
    body
}

fn select_response(responses: &[String], strategy: &ResponseStrategy<'_>) -> String {
    match strategy {
        ResponseStrategy::LeastCommon | ResponseStrategy::MostCommon => {
            majority(responses.iter().map(|s| s.as_str())).unwrap_or_default().to_string()
        }
        ResponseStrategy::Custom(select) => select(responses),
    }
}

/// Group every agreeing node's `signedData` by key name and Lagrange-
/// combine each group independently (spec.md §4.G step 5).
fn combine_named_signatures(
    agreeing: &[&NodeShare],
    min_node_count: usize,
) -> Result<HashMap<String, CombinedSignature>, LitError> {
    let mut by_name: HashMap<String, Vec<NodeShare>> = HashMap::new();
    for share in agreeing {
        for (name, value) in &share.signed_data {
            let entry: SignedDataEntry = serde_json::from_value(value.clone())
                .map_err(|err| LitError::unknown(format!("malformed signedData.{name}: {err}")))?;
            by_name.entry(name.clone()).or_default().push(NodeShare {
                success: true,
                signature_share: Some(entry.signature_share),
                share_index: Some(entry.share_index),
                curve_type: Some(entry.curve_type),
                data_signed: Some(entry.data_signed),
                ..Default::default()
            });
        }
    }

    let mut combined = HashMap::new();
    for (name, shares) in by_name {
        let is_bls = shares.first().and_then(|s| s.curve_type.as_deref()) == Some("BLS");
        let result = if is_bls {
            combiner::combine_bls_shares(&shares, min_node_count)?
        } else {
            combiner::combine_ecdsa_shares(&shares, min_node_count)?
        };
        combined.insert(name, result);
    }
    Ok(combined)
}

fn combine_named_claims(
    agreeing: &[&NodeShare],
    min_node_count: usize,
) -> Result<HashMap<String, crate::claim::ClaimSignature>, LitError> {
    let mut by_name: HashMap<String, Vec<ClaimDataEntry>> = HashMap::new();
    for share in agreeing {
        for (name, value) in &share.claim_data {
            let entry: ClaimDataEntry = serde_json::from_value(value.clone())
                .map_err(|err| LitError::unknown(format!("malformed claimData.{name}: {err}")))?;
            by_name.entry(name.clone()).or_default().push(entry);
        }
    }

    let mut combined = HashMap::new();
    for (name, entries) in by_name {
        if entries.len() < min_node_count {
            return Err(LitError::NodeResponse {
                message: format!("fewer than {min_node_count} nodes returned claimData.{name}"),
                node_count: entries.len(),
                failures: vec![],
                request_id: None,
            });
        }
        let derived_key_id = &entries[0].derived_key_id;
        if entries.iter().any(|e| &e.derived_key_id != derived_key_id) {
            return Err(LitError::NodeResponse {
                message: format!("nodes disagreed on the derived key id for claimData.{name}"),
                node_count: entries.len(),
                failures: vec![],
                request_id: None,
            });
        }
        let sig_hex = entries
            .iter()
            .map(|e| e.signature.as_str())
            .collect::<Vec<_>>();
        let chosen = majority(sig_hex.into_iter()).unwrap_or_default();
        let signature = crate::claim::split_claim_signature(chosen)?;
        combined.insert(name, signature);
    }
    Ok(combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FakeNetwork {
        nodes: Vec<String>,
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
    }

    struct HelloWorldTransport;

    #[async_trait]
    impl HttpTransport for HelloWorldTransport {
        async fn post(
            &self,
            _url: &str,
            _body: &serde_json::Value,
            _request_id: &str,
            _timeout: Duration,
        ) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::json!({
                "success": true,
                "response": "",
                "logs": "hello world\n",
            }))
        }
    }

    fn fake_session_sigs(nodes: &[String]) -> SessionSigsMap {
        nodes
            .iter()
            .map(|n| {
                (
                    n.clone(),
                    crate::auth_sig::AuthSig {
                        sig: "s".into(),
                        derived_via: "litSessionSignViaNacl".into(),
                        signed_message: "{}".into(),
                        address: "addr".into(),
                        algo: None,
                    },
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn hello_world_action_returns_no_signing_result() {
        let nodes: Vec<String> = vec!["https://node-a".into(), "https://node-b".into(), "https://node-c".into()];
        let network = FakeNetwork { nodes: nodes.clone() };
        let params = ExecuteJsParams {
            code: Some("(async()=>{console.log('hello world')})();".to_string()),
            session_sigs: fake_session_sigs(&nodes),
            ..Default::default()
        };

        let result = execute_js(&network, &HelloWorldTransport, params, ResponseStrategy::default())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.response, serde_json::Value::String(String::new()));
        assert_eq!(result.logs, "hello world\n");
        assert!(result.signed_data.is_empty());
        assert!(result.claim_data.is_empty());
    }

    #[tokio::test]
    async fn rejects_when_both_code_and_ipfs_id_given() {
        let nodes: Vec<String> = vec!["https://node-a".into()];
        let network = FakeNetwork { nodes: nodes.clone() };
        let params = ExecuteJsParams {
            code: Some("1".to_string()),
            ipfs_id: Some("Qm...".to_string()),
            session_sigs: fake_session_sigs(&nodes),
            ..Default::default()
        };
        let err = execute_js(&network, &HelloWorldTransport, params, ResponseStrategy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LitError::InvalidArgumentException { .. }));
    }
}
