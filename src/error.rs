//! Error taxonomy for the coordinator.
//!
//! Every public operation returns `Result<T, LitError>`. Internal plumbing
//! (parsing, storage IO, bincode/serde glue) keeps using `anyhow::Result`
//! the way the rest of this crate's crypto helpers do, and is converted to
//! a `LitError::Unknown` at the API boundary.

use serde::Serialize;

/// One entry of the kind taxonomy from spec.md §7. Carried alongside a
/// human-readable message and, when a request actually went out, the
/// request id that produced it.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum LitError {
    #[error("required parameter missing: {message}")]
    ParamsMissing {
        message: String,
        request_id: Option<String>,
    },

    #[error("invalid parameter type: {message}")]
    InvalidParamType {
        message: String,
        request_id: Option<String>,
    },

    #[error("invalid argument: {message}")]
    InvalidArgumentException {
        message: String,
        request_id: Option<String>,
    },

    #[error("invalid or missing chain blockhash: {message}")]
    InvalidEthBlockhash {
        message: String,
        request_id: Option<String>,
    },

    #[error("no valid wallet signature: {message}")]
    WalletSignatureNotFound {
        message: String,
        request_id: Option<String>,
    },

    #[error("client is not ready: {message}")]
    LitNodeClientNotReady {
        message: String,
        request_id: Option<String>,
    },

    #[error("required value was null: {message}")]
    ParamNull {
        message: String,
        request_id: Option<String>,
    },

    /// Aggregated per-node diagnostics from a dispatch batch that failed to
    /// reach quorum (spec.md §4.D "Failure criterion").
    #[error("node request failed ({} of {} nodes errored): {message}", failures.len(), node_count)]
    NodeResponse {
        message: String,
        node_count: usize,
        failures: Vec<NodeFailure>,
        request_id: Option<String>,
    },

    #[error("unknown error: {message}")]
    Unknown {
        message: String,
        request_id: Option<String>,
    },
}

/// Per-node diagnostic captured by the dispatcher when a single node promise
/// errors or times out.
#[derive(Debug, Clone, Serialize)]
pub struct NodeFailure {
    pub url: String,
    pub message: String,
}

impl LitError {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            LitError::ParamsMissing { request_id, .. }
            | LitError::InvalidParamType { request_id, .. }
            | LitError::InvalidArgumentException { request_id, .. }
            | LitError::InvalidEthBlockhash { request_id, .. }
            | LitError::WalletSignatureNotFound { request_id, .. }
            | LitError::LitNodeClientNotReady { request_id, .. }
            | LitError::ParamNull { request_id, .. }
            | LitError::NodeResponse { request_id, .. }
            | LitError::Unknown { request_id, .. } => request_id.as_deref(),
        }
    }

    pub fn unknown(err: impl std::fmt::Display) -> Self {
        LitError::Unknown {
            message: err.to_string(),
            request_id: None,
        }
    }
}

impl From<anyhow::Error> for LitError {
    fn from(err: anyhow::Error) -> Self {
        LitError::unknown(err)
    }
}

pub type LitResult<T> = Result<T, LitError>;
