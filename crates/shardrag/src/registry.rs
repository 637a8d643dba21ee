//! Ordered list of cluster nodes.
//!
//! Party index `i` in every share set corresponds to `registry.node(i)`;
//! the order is fixed for the lifetime of a client session.

use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};

/// One party in the sharing scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Base url, without a trailing slash.
    pub url: String,
    /// Identity of the node; the audience of its bearer token.
    pub node_id: String,
    /// Organization the client acts as; the issuer of its bearer tokens.
    pub org: String,
    pub bearer_token: Option<String>,
    pub schema_id: Option<Uuid>,
    pub diff_query_id: Option<Uuid>,
}

impl Node {
    pub fn new(url: &str, node_id: &str, org: &str) -> Result<Self> {
        let url = url.trim().trim_end_matches('/');
        if url.is_empty() {
            return Err(Error::Configuration("node url must not be empty".into()));
        }
        if node_id.trim().is_empty() {
            return Err(Error::Configuration(format!("node {} has no node id", url)));
        }
        if org.trim().is_empty() {
            return Err(Error::Configuration(format!("node {} has no org", url)));
        }
        Ok(Self {
            url: url.to_string(),
            node_id: node_id.trim().to_string(),
            org: org.trim().to_string(),
            bearer_token: None,
            schema_id: None,
            diff_query_id: None,
        })
    }

    /// Absolute url of an API path on this node.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url, path.trim_start_matches('/'))
    }

    pub fn bearer_token(&self) -> Result<&str> {
        self.bearer_token.as_deref().ok_or_else(|| {
            Error::Configuration(format!(
                "no credentials issued for node {}",
                self.node_id
            ))
        })
    }
}

#[derive(Debug, Clone)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
}

impl NodeRegistry {
    /// Build a registry; node ids must be unique and the list non-empty.
    pub fn new(nodes: Vec<Node>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::Configuration("cluster has no nodes".into()));
        }
        for (i, node) in nodes.iter().enumerate() {
            if nodes[..i].iter().any(|n| n.node_id == node.node_id) {
                return Err(Error::Configuration(format!(
                    "duplicate node id {}",
                    node.node_id
                )));
            }
        }
        Ok(Self { nodes })
    }

    /// Registry from configuration, carrying over provisioned ids.
    pub fn from_config(config: &Config) -> Result<Self> {
        let nodes = config
            .nodes
            .iter()
            .map(|n| {
                let mut node = Node::new(&n.url, &n.node_id, &n.org)?;
                node.schema_id = config.cluster.schema_id;
                node.diff_query_id = config.cluster.diff_query_id;
                Ok(node)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(nodes)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn node(&self, party: usize) -> Option<&Node> {
        self.nodes.get(party)
    }

    /// The schema id every node shares, `None` if none is provisioned.
    pub fn schema_id(&self) -> Result<Option<Uuid>> {
        self.shared_id("schema", |n| n.schema_id)
    }

    /// The difference query id every node shares.
    pub fn diff_query_id(&self) -> Result<Option<Uuid>> {
        self.shared_id("difference query", |n| n.diff_query_id)
    }

    pub(crate) fn set_schema_id(&mut self, id: Uuid) {
        for node in &mut self.nodes {
            node.schema_id = Some(id);
        }
    }

    pub(crate) fn set_diff_query_id(&mut self, id: Uuid) {
        for node in &mut self.nodes {
            node.diff_query_id = Some(id);
        }
    }

    fn shared_id(&self, what: &str, get: impl Fn(&Node) -> Option<Uuid>) -> Result<Option<Uuid>> {
        let first = get(&self.nodes[0]);
        if self.nodes.iter().all(|n| get(n) == first) {
            Ok(first)
        } else {
            Err(Error::Configuration(format!(
                "nodes disagree on the {} id; the cluster is partially provisioned",
                what
            )))
        }
    }
}
