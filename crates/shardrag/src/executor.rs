//! Fan-out of per-node requests.
//!
//! [`DiffQueryExecutor::execute`] hands node `i` exactly the `i`-th share of
//! every query dimension and runs the stored difference query there. All
//! node calls are independent and dispatched concurrently; results are kept
//! in party order so they can be paired with the right mask on
//! reconstruction.
//!
//! Any node that times out, errors, or answers without `data` aborts the
//! whole call. Additive sharing needs every share, so a partial answer is
//! never returned.

use std::time::Duration;

use futures::future::join_all;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shardrag_core::aggregate::{transpose, QuorumError};
use shardrag_core::codec::{CodecError, ShareSet};
use shardrag_core::models::StoredRecord;
use shardrag_core::pipeline::{Pipeline, QUERY_EMBEDDING_VAR};

use crate::error::{Error, Result};
use crate::registry::NodeRegistry;
use crate::transport::{paths, NodeTransport};

pub struct DiffQueryExecutor<'a> {
    registry: &'a NodeRegistry,
    transport: &'a dyn NodeTransport,
    timeout: Duration,
}

impl<'a> DiffQueryExecutor<'a> {
    pub fn new(registry: &'a NodeRegistry, transport: &'a dyn NodeTransport, timeout: Duration) -> Self {
        Self {
            registry,
            transport,
            timeout,
        }
    }

    /// Run the stored difference query on every node.
    ///
    /// `query_shares` is `[dimension][party]`. Returns `[party] → rows`,
    /// each row `{_id, difference}`.
    pub async fn execute(&self, query_shares: &[ShareSet<i64>]) -> Result<Vec<Vec<Value>>> {
        let query_id = self.registry.diff_query_id()?.ok_or_else(|| {
            Error::Configuration("difference query has not been provisioned".into())
        })?;
        let per_party = self.split_by_party(query_shares)?;

        let bodies: Vec<Value> = per_party
            .into_iter()
            .map(|shares| {
                json!({
                    "id": query_id,
                    "variables": { QUERY_EMBEDDING_VAR: shares },
                })
            })
            .collect();

        self.collect_data(paths::EXECUTE, &bodies).await
    }

    /// Upload one batch of record shares; `per_party[i]` goes to node `i`.
    pub async fn store_records(&self, schema_id: Uuid, per_party: &[Vec<StoredRecord>]) -> Result<()> {
        if per_party.len() != self.registry.len() {
            return Err(CodecError::ShareCount {
                expected: self.registry.len(),
                found: per_party.len(),
            }
            .into());
        }
        let bodies: Vec<Value> = per_party
            .iter()
            .map(|records| json!({ "schema": schema_id, "data": records }))
            .collect();

        for (party, result) in self.dispatch(paths::DATA_CREATE, &bodies).await.into_iter().enumerate() {
            if let Err(e) = result {
                warn!(party, error = %e, "record upload failed");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Fetch the shares of `ids` from every node, `[party] → rows`.
    pub async fn read_records(&self, schema_id: Uuid, ids: &[String]) -> Result<Vec<Vec<Value>>> {
        let body = json!({
            "schema": schema_id,
            "filter": { "_id": { "$in": ids } },
        });
        let bodies = vec![body; self.registry.len()];
        self.collect_data(paths::DATA_READ, &bodies).await
    }

    /// Run a pipeline on one node without registering it.
    ///
    /// This is the non-secret-shared variant: the node sees the variables
    /// in the clear, so it is only meant for non-sensitive lookups.
    pub async fn ad_hoc_query(
        &self,
        party: usize,
        schema_id: Uuid,
        pipeline: &Pipeline,
        variables: Map<String, Value>,
    ) -> Result<Vec<Value>> {
        let node = self.registry.node(party).ok_or_else(|| {
            Error::Configuration(format!("no node at party index {}", party))
        })?;
        let body = json!({
            "schema": schema_id,
            "pipeline": pipeline,
            "variables": variables,
        });
        let response = tokio::time::timeout(
            self.timeout,
            self.transport.post(node, paths::AD_HOC_QUERY, &body),
        )
        .await
        .map_err(|_| QuorumError::Timeout { party })??;
        data_rows(party, &response)
    }

    fn split_by_party(&self, query_shares: &[ShareSet<i64>]) -> Result<Vec<Vec<i64>>> {
        if query_shares.is_empty() {
            return Err(Error::Configuration("query embedding is empty".into()));
        }
        let parties = self.registry.len();
        if let Some(bad) = query_shares.iter().find(|s| s.len() != parties) {
            return Err(CodecError::ShareCount {
                expected: parties,
                found: bad.len(),
            }
            .into());
        }
        transpose(query_shares).ok_or_else(|| Error::Configuration("ragged query shares".into()))
    }

    async fn dispatch(&self, path: &str, bodies: &[Value]) -> Vec<Result<Value>> {
        let calls = self
            .registry
            .nodes()
            .iter()
            .zip(bodies)
            .enumerate()
            .map(|(party, (node, body))| async move {
                debug!(party, node = %node.node_id, path, "dispatch");
                match tokio::time::timeout(self.timeout, self.transport.post(node, path, body)).await {
                    Ok(result) => result,
                    Err(_) => Err(QuorumError::Timeout { party }.into()),
                }
            });
        join_all(calls).await
    }

    async fn collect_data(&self, path: &str, bodies: &[Value]) -> Result<Vec<Vec<Value>>> {
        let results = self.dispatch(path, bodies).await;
        if results.len() != self.registry.len() {
            return Err(QuorumError::MissingResponses {
                expected: self.registry.len(),
                found: results.len(),
            }
            .into());
        }

        results
            .into_iter()
            .enumerate()
            .map(|(party, result)| match result {
                Ok(response) => data_rows(party, &response),
                Err(e @ (Error::AuthExpired { .. } | Error::Quorum(_))) => Err(e),
                Err(e) => Err(QuorumError::NodeFailed {
                    party,
                    reason: e.to_string(),
                }
                .into()),
            })
            .collect()
    }
}

fn data_rows(party: usize, response: &Value) -> Result<Vec<Value>> {
    response
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| {
            QuorumError::NodeFailed {
                party,
                reason: "response has no data array".to_string(),
            }
            .into()
        })
}
