//! Node Dispatcher (spec.md §4.D): fan a request out to all connected
//! nodes, collect a quorum, retry with tolerance.

use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth_sig::SessionSigsMap;
use crate::client::NetworkContext;
use crate::error::{LitError, NodeFailure};
use crate::transport::HttpTransport;

pub struct DispatchOutcome<T> {
    pub values: Vec<T>,
    pub request_id: String,
}

/// Fan `endpoint_path` out to every connected node, attaching each node's
/// URL-specific session sig, and collect at least `min_node_count`
/// successes. Retries the whole batch up to `retry_tolerance` times,
/// logging non-final errors (spec.md §4.D, §5).
pub async fn dispatch<T, F>(
    network: &dyn NetworkContext,
    transport: &dyn HttpTransport,
    endpoint_path: &str,
    session_sigs: &SessionSigsMap,
    build_body: F,
) -> Result<DispatchOutcome<T>, LitError>
where
    F: Fn(&str) -> Value,
    T: DeserializeOwned,
{
    let nodes = network.connected_node_urls();
    for url in &nodes {
        if !session_sigs.contains_key(url) {
            return Err(LitError::WalletSignatureNotFound {
                message: format!("no session sig for node {url}"),
                request_id: None,
            });
        }
    }

    let retry_tolerance = network.retry_tolerance();
    let mut last_failures = Vec::new();
    let mut last_request_id = String::new();

    for attempt in 0..=retry_tolerance {
        let request_id = uuid::Uuid::new_v4().to_string();
        last_request_id = request_id.clone();

        let futures = nodes.iter().map(|url| {
            let endpoint = format!("{url}{endpoint_path}");
            let body = build_body(url);
            let request_id = request_id.clone();
            async move {
                let result = transport
                    .post(&endpoint, &body, &request_id, network.request_timeout())
                    .await;
                (url.clone(), result)
            }
        });

        let results = join_all(futures).await;

        let mut values = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (url, result) in results {
            match result {
                Ok(json) => match serde_json::from_value::<T>(json) {
                    Ok(value) => values.push(value),
                    Err(err) => failures.push(NodeFailure {
                        url,
                        message: format!("malformed node response: {err}"),
                    }),
                },
                Err(err) => failures.push(NodeFailure {
                    url,
                    message: err.to_string(),
                }),
            }
        }

        if values.len() >= network.min_node_count() {
            return Ok(DispatchOutcome { values, request_id });
        }

        tracing::warn!(
            attempt,
            successes = values.len(),
            failures = failures.len(),
            request_id,
            "dispatch batch did not reach quorum"
        );
        last_failures = failures;
    }

    Err(LitError::NodeResponse {
        message: "too many node responses errored to reach quorum".to_string(),
        node_count: nodes.len(),
        failures: last_failures,
        request_id: Some(last_request_id),
    })
}
