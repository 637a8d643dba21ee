//! In-memory simulated cluster.
//!
//! Each simulated node keeps its own schemas, stored queries and records
//! behind a `Mutex`, checks bearer tokens exactly as a real node would
//! (signature, audience = that node's id, expiry) and runs stored
//! pipelines with the reference interpreter from `shardrag_core`.
//!
//! Faults can be injected per node to exercise the N-of-N failure paths.
//! Every accepted request is logged so tests can inspect what each node
//! actually received.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use k256::ecdsa::VerifyingKey;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use shardrag_core::models::{SchemaDefinition, StoredRecord};
use shardrag_core::pipeline::{Pipeline, QueryDefinition};

use super::{paths, NodeTransport};
use crate::auth::verify_token;
use crate::error::{Error, Result};
use crate::registry::{Node, NodeRegistry};

/// Misbehavior to simulate on one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeFault {
    /// Answer every request with HTTP 503.
    Unavailable,
    /// Answer successfully but without a `data` field.
    MissingData,
    /// Never answer.
    Hang,
}

/// A request a simulated node accepted.
#[derive(Debug, Clone)]
pub struct LoggedRequest {
    pub node_id: String,
    pub path: String,
    pub body: Value,
}

#[derive(Default)]
struct MemoryNode {
    node_id: String,
    schemas: HashMap<Uuid, SchemaDefinition>,
    queries: HashMap<Uuid, QueryDefinition>,
    records: HashMap<Uuid, Vec<Value>>,
}

pub struct InMemoryCluster {
    nodes: HashMap<String, Mutex<MemoryNode>>,
    verifying_key: VerifyingKey,
    faults: RwLock<HashMap<String, NodeFault>>,
    log: Mutex<Vec<LoggedRequest>>,
}

impl InMemoryCluster {
    /// One simulated node per registry entry, trusting `verifying_key`.
    pub fn new(registry: &NodeRegistry, verifying_key: VerifyingKey) -> Self {
        let nodes = registry
            .nodes()
            .iter()
            .map(|n| {
                (
                    n.url.clone(),
                    Mutex::new(MemoryNode {
                        node_id: n.node_id.clone(),
                        ..Default::default()
                    }),
                )
            })
            .collect();
        Self {
            nodes,
            verifying_key,
            faults: RwLock::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn inject_fault(&self, node_id: &str, fault: NodeFault) {
        if let Ok(mut faults) = self.faults.write() {
            faults.insert(node_id.to_string(), fault);
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.write() {
            faults.clear();
        }
    }

    /// Requests accepted so far, in arrival order.
    pub fn requests(&self) -> Vec<LoggedRequest> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Records a node holds under `schema`.
    pub fn stored_records(&self, url: &str, schema: Uuid) -> Vec<Value> {
        self.nodes
            .get(url)
            .and_then(|n| n.lock().ok())
            .and_then(|n| n.records.get(&schema).cloned())
            .unwrap_or_default()
    }

    fn fault(&self, node_id: &str) -> Option<NodeFault> {
        self.faults.read().ok()?.get(node_id).copied()
    }
}

#[async_trait]
impl NodeTransport for InMemoryCluster {
    async fn post(&self, node: &Node, path: &str, body: &Value) -> Result<Value> {
        let cell = self.nodes.get(&node.url).ok_or_else(|| Error::Transport {
            node: node.node_id.clone(),
            message: format!("no simulated node at {}", node.url),
        })?;

        let fault = self.fault(&node.node_id);
        match fault {
            Some(NodeFault::Hang) => return std::future::pending().await,
            Some(NodeFault::Unavailable) => {
                return Err(rejected(node, 503, "service unavailable"));
            }
            _ => {}
        }

        let token = node.bearer_token()?;
        let mut state = cell.lock().map_err(|_| Error::Transport {
            node: node.node_id.clone(),
            message: "simulated node state poisoned".to_string(),
        })?;

        let now = chrono::Utc::now().timestamp();
        if verify_token(token, &self.verifying_key, &state.node_id, now).is_err() {
            return Err(Error::AuthExpired {
                node: node.node_id.clone(),
            });
        }

        if let Ok(mut log) = self.log.lock() {
            log.push(LoggedRequest {
                node_id: state.node_id.clone(),
                path: path.to_string(),
                body: body.clone(),
            });
        }

        let response = match path {
            paths::SCHEMAS => create_schema(&mut state, node, body),
            paths::QUERIES => create_query(&mut state, node, body),
            paths::EXECUTE => execute_query(&state, node, body),
            paths::AD_HOC_QUERY => ad_hoc_query(&state, node, body),
            paths::DATA_CREATE => create_records(&mut state, node, body),
            paths::DATA_READ => read_records(&state, node, body),
            other => Err(rejected(node, 404, &format!("unknown path {}", other))),
        }?;

        if fault == Some(NodeFault::MissingData) {
            return Ok(json!({}));
        }
        Ok(response)
    }
}

fn rejected(node: &Node, status: u16, body: &str) -> Error {
    Error::NodeRejected {
        node: node.node_id.clone(),
        status,
        body: body.to_string(),
    }
}

fn parse<T: serde::de::DeserializeOwned>(node: &Node, body: &Value) -> Result<T> {
    serde_json::from_value(body.clone()).map_err(|e| rejected(node, 400, &e.to_string()))
}

fn uuid_field(node: &Node, body: &Value, field: &str) -> Result<Uuid> {
    body.get(field)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| rejected(node, 400, &format!("'{}' must be a uuid", field)))
}

fn variables(body: &Value) -> Map<String, Value> {
    body.get("variables")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn create_schema(state: &mut MemoryNode, node: &Node, body: &Value) -> Result<Value> {
    let schema: SchemaDefinition = parse(node, body)?;
    if state.schemas.contains_key(&schema.id) {
        return Err(rejected(node, 409, "schema already exists"));
    }
    let id = schema.id;
    state.schemas.insert(id, schema);
    state.records.entry(id).or_default();
    Ok(json!({ "data": { "_id": id } }))
}

fn create_query(state: &mut MemoryNode, node: &Node, body: &Value) -> Result<Value> {
    let query: QueryDefinition = parse(node, body)?;
    if !state.schemas.contains_key(&query.schema) {
        return Err(rejected(node, 404, "unknown schema"));
    }
    if state.queries.contains_key(&query.id) {
        return Err(rejected(node, 409, "query already exists"));
    }
    let id = query.id;
    state.queries.insert(id, query);
    Ok(json!({ "data": { "_id": id } }))
}

fn execute_query(state: &MemoryNode, node: &Node, body: &Value) -> Result<Value> {
    let id = uuid_field(node, body, "id")?;
    let query = state
        .queries
        .get(&id)
        .ok_or_else(|| rejected(node, 404, "unknown query"))?;
    let records = state.records.get(&query.schema).cloned().unwrap_or_default();
    let rows = query
        .pipeline
        .evaluate(&records, &variables(body))
        .map_err(|e| rejected(node, 400, &e.to_string()))?;
    Ok(json!({ "data": rows }))
}

fn ad_hoc_query(state: &MemoryNode, node: &Node, body: &Value) -> Result<Value> {
    let schema = uuid_field(node, body, "schema")?;
    let pipeline: Pipeline = parse(node, body.get("pipeline").unwrap_or(&Value::Null))?;
    let records = state
        .records
        .get(&schema)
        .ok_or_else(|| rejected(node, 404, "unknown schema"))?;
    let rows = pipeline
        .evaluate(records, &variables(body))
        .map_err(|e| rejected(node, 400, &e.to_string()))?;
    Ok(json!({ "data": rows }))
}

fn create_records(state: &mut MemoryNode, node: &Node, body: &Value) -> Result<Value> {
    let schema = uuid_field(node, body, "schema")?;
    let incoming: Vec<StoredRecord> = parse(node, body.get("data").unwrap_or(&Value::Null))?;
    let stored = state
        .records
        .get_mut(&schema)
        .ok_or_else(|| rejected(node, 404, "unknown schema"))?;

    let mut created = Vec::with_capacity(incoming.len());
    for record in incoming {
        let id = record.id.to_string();
        if stored.iter().any(|r| r["_id"] == id.as_str()) {
            return Err(rejected(node, 409, &format!("record {} already exists", id)));
        }
        let value = serde_json::to_value(&record).map_err(|e| rejected(node, 400, &e.to_string()))?;
        stored.push(value);
        created.push(id);
    }
    Ok(json!({ "data": { "created": created, "errors": [] } }))
}

fn read_records(state: &MemoryNode, node: &Node, body: &Value) -> Result<Value> {
    let schema = uuid_field(node, body, "schema")?;
    let records = state
        .records
        .get(&schema)
        .ok_or_else(|| rejected(node, 404, "unknown schema"))?;
    let wanted: Option<Vec<&str>> = body
        .pointer("/filter/_id/$in")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_str).collect());

    let rows: Vec<Value> = records
        .iter()
        .filter(|r| match &wanted {
            Some(ids) => r["_id"].as_str().is_some_and(|id| ids.contains(&id)),
            None => true,
        })
        .cloned()
        .collect();
    Ok(json!({ "data": rows }))
}
