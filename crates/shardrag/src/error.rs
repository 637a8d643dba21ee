//! Error taxonomy for cluster operations.
//!
//! Every variant is fatal for the operation that raised it. There is no
//! partial-result path: a query either reconstructs from all N shares or
//! fails.

use shardrag_core::aggregate::{AggregateError, QuorumError};
use shardrag_core::codec::CodecError;
use shardrag_core::pipeline::PipelineError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid node url, org, node id or secret key.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Schema or query creation was refused by one or more nodes.
    #[error("provisioning failed on {}: {message}", .failed.join(", "))]
    Provisioning { failed: Vec<String>, message: String },

    /// A node rejected the bearer token (TTL elapsed or wrong audience).
    #[error("node {node} rejected its credentials; reissue tokens")]
    AuthExpired { node: String },

    /// Fewer than N usable node results.
    #[error("quorum not reached: {0}")]
    Quorum(#[from] QuorumError),

    /// Share data that fails to decode or reconstruct.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("invalid pipeline: {0}")]
    Pipeline(#[from] PipelineError),

    /// Non-success HTTP status from a node outside the query path.
    #[error("node {node} returned {status}: {body}")]
    NodeRejected {
        node: String,
        status: u16,
        body: String,
    },

    /// Network-level failure talking to a node.
    #[error("request to node {node} failed: {message}")]
    Transport { node: String, message: String },

    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("chat completion failed: {0:#}")]
    Chat(anyhow::Error),
}

impl From<AggregateError> for Error {
    fn from(err: AggregateError) -> Self {
        match err {
            AggregateError::Quorum(e) => Error::Quorum(e),
            AggregateError::Codec(e) => Error::Codec(e),
        }
    }
}

impl Error {
    /// Name of the node a transport-level error refers to, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            Error::AuthExpired { node }
            | Error::NodeRejected { node, .. }
            | Error::Transport { node, .. } => Some(node),
            _ => None,
        }
    }
}
