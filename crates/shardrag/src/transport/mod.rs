//! Node request transport.
//!
//! The [`NodeTransport`] trait is the single seam between the protocol code
//! (provisioning, query execution) and the network. Two implementations
//! ship with the crate:
//!
//! | Transport | Use |
//! |-----------|-----|
//! | [`HttpTransport`] | Real nodes over HTTPS (reqwest) |
//! | [`memory::InMemoryCluster`] | Simulated nodes for tests and local runs |
//!
//! Implementations must authenticate every request with the node's own
//! bearer token and map a credential rejection to
//! [`Error::AuthExpired`].

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::registry::Node;

/// Node API paths, relative to the node url.
pub mod paths {
    pub const SCHEMAS: &str = "schemas";
    pub const QUERIES: &str = "queries";
    pub const EXECUTE: &str = "queries/execute";
    pub const AD_HOC_QUERY: &str = "query";
    pub const DATA_CREATE: &str = "data/create";
    pub const DATA_READ: &str = "data/read";
}

/// Sends one JSON request to one node.
#[async_trait]
pub trait NodeTransport: Send + Sync {
    /// `POST {node.url}/{path}` with `body`, returning the decoded response.
    async fn post(&self, node: &Node, path: &str, body: &Value) -> Result<Value>;
}

/// reqwest-backed transport for real nodes.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NodeTransport for HttpTransport {
    async fn post(&self, node: &Node, path: &str, body: &Value) -> Result<Value> {
        let url = node.endpoint(path);
        let token = node.bearer_token()?;
        debug!(node = %node.node_id, %url, "POST");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport {
                node: node.node_id.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::AuthExpired {
                node: node.node_id.clone(),
            });
        }
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::NodeRejected {
                node: node.node_id.clone(),
                status: status.as_u16(),
                body: body_text,
            });
        }

        let text = response.text().await.map_err(|e| Error::Transport {
            node: node.node_id.clone(),
            message: e.to_string(),
        })?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| Error::Transport {
            node: node.node_id.clone(),
            message: format!("invalid JSON response: {}", e),
        })
    }
}
