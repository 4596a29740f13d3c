//! PKP Signer (spec.md §4.H): request a threshold ECDSA signature over a
//! digest under a named PKP.

use crate::auth_sig::{AuthMethod, SessionSigsMap};
use crate::client::NetworkContext;
use crate::crypto::helpers::majority;
use crate::error::LitError;
use crate::node::{combiner, dispatcher};
use crate::transport::HttpTransport;

#[derive(Debug, Clone)]
pub struct PkpSignParams {
    pub to_sign: Vec<u8>,
    /// Hex-prefixed on the way out, whatever the caller passed in
    /// (spec.md §4.H "hex-prefixes `pubKey`").
    pub pub_key: String,
    pub session_sigs: Option<SessionSigsMap>,
    pub auth_methods: Vec<AuthMethod>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdsaSignature {
    pub r: String,
    pub s: String,
    pub v: u8,
}

/// `pkpSign` (spec.md §4.H). ECDSA combine needs every node's response to
/// be collected (so dissenting shares can be excluded) but only
/// `min_node_count` of them to actually agree before a signature is
/// produced.
pub async fn pkp_sign(
    network: &dyn NetworkContext,
    transport: &dyn HttpTransport,
    params: PkpSignParams,
) -> Result<EcdsaSignature, LitError> {
    if params.session_sigs.is_none() && params.auth_methods.is_empty() {
        return Err(LitError::ParamsMissing {
            message: "pkpSign requires either session sigs or at least one auth method"
                .to_string(),
            request_id: None,
        });
    }

    let pub_key = if params.pub_key.starts_with("0x") {
        params.pub_key.clone()
    } else {
        format!("0x{}", params.pub_key)
    };
    let to_sign_hex = hex::encode(&params.to_sign);

    let session_sigs = params.session_sigs.clone().unwrap_or_default();
    let auth_methods = params.auth_methods.clone();

    let outcome = dispatcher::dispatch::<crate::auth_sig::NodeShare, _>(
        network,
        transport,
        "/web/pkp/sign",
        &full_sig_map(&session_sigs, network),
        |_url| {
            serde_json::json!({
                "toSign": to_sign_hex,
                "pubKey": pub_key,
                "authMethods": auth_methods,
            })
        },
    )
    .await?;

    let combined = combiner::combine_ecdsa_shares(&outcome.values, network.min_node_count())?;

    if combined.signature.len() < 64 {
        return Err(LitError::unknown("combined ECDSA signature is shorter than r||s"));
    }
    let (r, s) = combined.signature.split_at(64);

    let v = majority(
        outcome
            .values
            .iter()
            .filter(|share| share.success && share.data_signed.as_deref() == Some(combined.data_signed.as_str()))
            .filter_map(|share| share.signed_data.get("v")?.as_str()),
    )
    .and_then(|v| v.parse::<u8>().ok())
    .ok_or_else(|| LitError::unknown("node shares did not agree on a recovery id"))?;

    Ok(EcdsaSignature {
        r: r.to_string(),
        s: s.to_string(),
        v,
    })
}

/// ECDSA dispatch needs a session sig entry per node the same way every
/// other dispatch call does; an auth-method-only call still has a
/// connected node per URL, just with an empty sig placeholder, since the
/// node-side authorisation check runs on `authMethods` instead.
fn full_sig_map(session_sigs: &SessionSigsMap, network: &dyn NetworkContext) -> SessionSigsMap {
    if !session_sigs.is_empty() {
        return session_sigs.clone();
    }
    network
        .connected_node_urls()
        .into_iter()
        .map(|url| {
            (
                url,
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
