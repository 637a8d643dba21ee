//! Data shapes shared by the client and the storage nodes.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// A window of source text produced by the chunker.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Record id this chunk is stored under on every node.
    pub id: Uuid,
    /// Position within the source document, contiguous from 0.
    pub index: usize,
    pub text: String,
}

/// One node's share of a stored record.
///
/// `embedding` holds this party's share of every embedding dimension and
/// `chunk` its base64 XOR share of the chunk text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub embedding: Vec<i64>,
    pub chunk: String,
}

/// Schema registration body, identical on every node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub keys: Vec<String>,
    pub schema: Value,
}

impl SchemaDefinition {
    /// The record shape `{_id: uuid, embedding: array<integer>, chunk: string}`.
    pub fn records(id: Uuid) -> Self {
        Self {
            id,
            name: "shardrag records".to_string(),
            keys: vec!["_id".to_string()],
            schema: json!({
                "$schema": "http://json-schema.org/draft-07/schema#",
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "_id": { "type": "string", "format": "uuid", "coerce": true },
                        "embedding": {
                            "type": "array",
                            "items": { "type": "integer" },
                            "description": "per-party share of each embedding dimension"
                        },
                        "chunk": {
                            "type": "string",
                            "description": "per-party share of the chunk text"
                        }
                    },
                    "required": ["_id", "embedding", "chunk"],
                    "additionalProperties": false
                }
            }),
        }
    }
}

/// A record ranked by its distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRecord {
    pub id: String,
    /// Euclidean norm of the reconstructed difference vector.
    pub distance: f64,
}

/// A retrieved chunk with its plaintext restored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    pub distance: f64,
}
