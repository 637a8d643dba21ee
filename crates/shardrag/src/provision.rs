//! Schema and difference-query provisioning.
//!
//! Both operations mint one fresh uuid and register an identical definition
//! on every node, concurrently. They are not idempotent on the nodes, so:
//!
//! - if every node in the registry already carries an id (from an earlier
//!   call or from `[cluster]` in the configuration) the existing id is
//!   returned and no request is sent;
//! - the new id is recorded in the registry only when every node accepted
//!   the definition. On partial failure the nodes that did accept it are
//!   logged; removing them is left to the operator.
//!
//! Each node call is bounded by the transport timeout; a node that does not
//! answer in time counts as failed.

use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use shardrag_core::aggregate::QuorumError;
use shardrag_core::models::SchemaDefinition;
use shardrag_core::pipeline::QueryDefinition;

use crate::error::{Error, Result};
use crate::registry::NodeRegistry;
use crate::transport::{paths, NodeTransport};

/// Register the record schema on every node.
pub async fn init_schema(
    registry: &mut NodeRegistry,
    transport: &dyn NodeTransport,
    timeout: Duration,
) -> Result<Uuid> {
    if let Some(existing) = registry.schema_id()? {
        info!(schema_id = %existing, "schema already provisioned");
        return Ok(existing);
    }

    let id = Uuid::new_v4();
    let body = serde_json::to_value(SchemaDefinition::records(id))
        .map_err(|e| Error::Configuration(format!("cannot encode schema: {}", e)))?;
    broadcast(registry, transport, timeout, paths::SCHEMAS, &body, "schema").await?;

    registry.set_schema_id(id);
    info!(schema_id = %id, nodes = registry.len(), "schema provisioned");
    Ok(id)
}

/// Register the difference query on every node.
///
/// Requires the schema to be provisioned first.
pub async fn init_diff_query(
    registry: &mut NodeRegistry,
    transport: &dyn NodeTransport,
    timeout: Duration,
) -> Result<Uuid> {
    if let Some(existing) = registry.diff_query_id()? {
        info!(diff_query_id = %existing, "difference query already provisioned");
        return Ok(existing);
    }
    let schema_id = registry.schema_id()?.ok_or_else(|| {
        Error::Configuration("schema must be provisioned before the difference query".into())
    })?;

    let id = Uuid::new_v4();
    let body = serde_json::to_value(QueryDefinition::difference(id, schema_id))
        .map_err(|e| Error::Configuration(format!("cannot encode query: {}", e)))?;
    broadcast(registry, transport, timeout, paths::QUERIES, &body, "difference query").await?;

    registry.set_diff_query_id(id);
    info!(diff_query_id = %id, schema_id = %schema_id, "difference query provisioned");
    Ok(id)
}

/// Send the same body to every node; fail unless all of them accept it.
async fn broadcast(
    registry: &NodeRegistry,
    transport: &dyn NodeTransport,
    timeout: Duration,
    path: &str,
    body: &Value,
    what: &str,
) -> Result<()> {
    let calls = registry.nodes().iter().enumerate().map(|(party, node)| async move {
        match tokio::time::timeout(timeout, transport.post(node, path, body)).await {
            Ok(result) => result,
            Err(_) => Err(QuorumError::Timeout { party }.into()),
        }
    });
    let results = join_all(calls).await;

    let mut accepted = Vec::new();
    let mut failed = Vec::new();
    let mut messages = Vec::new();
    let mut auth_expired = None;
    for (node, result) in registry.nodes().iter().zip(results) {
        match result {
            Ok(_) => accepted.push(node.node_id.clone()),
            Err(Error::AuthExpired { node: expired }) => {
                failed.push(node.node_id.clone());
                auth_expired.get_or_insert(expired);
            }
            Err(e) => {
                messages.push(e.to_string());
                failed.push(node.node_id.clone());
            }
        }
    }

    if failed.is_empty() {
        return Ok(());
    }
    if !accepted.is_empty() {
        warn!(
            accepted = ?accepted,
            failed = ?failed,
            "{} created on some nodes only; the cluster is inconsistent until those are removed",
            what
        );
    }
    if let Some(node) = auth_expired {
        return Err(Error::AuthExpired { node });
    }
    Err(Error::Provisioning {
        failed,
        message: messages.join("; "),
    })
}
