//! Declarative query pipelines stored on the nodes.
//!
//! A pipeline is plain data: an ordered list of [`Stage`]s that every node
//! runs over each of its stored records. The client registers the same
//! definition on all nodes and later executes it by id, supplying
//! variables such as the caller's share of the query embedding.
//!
//! The stock pipeline is [`Pipeline::difference`]:
//!
//! ```text
//! record ──▶ bind query_embedding ──▶ zip(embedding, query_embedding) → subtract
//!        ──▶ project {_id, difference}
//! ```
//!
//! [`Pipeline::evaluate`] is the reference interpreter. Storage nodes that
//! speak this format (and the in-memory test cluster) use it verbatim.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Variable carrying a party's share of the query embedding.
pub const QUERY_EMBEDDING_VAR: &str = "query_embedding";

/// Field holding the element-wise difference in results.
pub const DIFFERENCE_FIELD: &str = "difference";

#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("variable '{0}' was not supplied")]
    MissingVariable(String),
    #[error("field '{0}' is missing or not an integer array")]
    NotIntegerArray(String),
    #[error("cannot subtract arrays of length {left} and {right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("integer overflow while subtracting '{0}'")]
    Overflow(String),
    #[error("record is not a JSON object")]
    NotAnObject,
}

/// One step of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Stage {
    /// Copy the externally supplied `variable` into `field` of each record.
    BindVariable { variable: String, field: String },
    /// `output[i] = left[i] - right[i]` over two integer arrays.
    ZipSubtract {
        left: String,
        right: String,
        output: String,
    },
    /// Keep only the listed fields.
    Project { fields: Vec<String> },
}

/// An ordered list of stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

impl Pipeline {
    /// The difference pipeline: stored `embedding` minus the query share.
    pub fn difference() -> Self {
        Self {
            stages: vec![
                Stage::BindVariable {
                    variable: QUERY_EMBEDDING_VAR.to_string(),
                    field: QUERY_EMBEDDING_VAR.to_string(),
                },
                Stage::ZipSubtract {
                    left: "embedding".to_string(),
                    right: QUERY_EMBEDDING_VAR.to_string(),
                    output: DIFFERENCE_FIELD.to_string(),
                },
                Stage::Project {
                    fields: vec!["_id".to_string(), DIFFERENCE_FIELD.to_string()],
                },
            ],
        }
    }

    /// Names of the variables this pipeline expects, in stage order.
    pub fn variables(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter_map(|s| match s {
                Stage::BindVariable { variable, .. } => Some(variable.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Run the pipeline over `records`, producing one output per record.
    pub fn evaluate(
        &self,
        records: &[Value],
        variables: &Map<String, Value>,
    ) -> Result<Vec<Value>, PipelineError> {
        records
            .iter()
            .map(|record| {
                let mut ctx = record.as_object().cloned().ok_or(PipelineError::NotAnObject)?;
                for stage in &self.stages {
                    apply(stage, &mut ctx, variables)?;
                }
                Ok(Value::Object(ctx))
            })
            .collect()
    }
}

fn apply(
    stage: &Stage,
    ctx: &mut Map<String, Value>,
    variables: &Map<String, Value>,
) -> Result<(), PipelineError> {
    match stage {
        Stage::BindVariable { variable, field } => {
            let value = variables
                .get(variable)
                .ok_or_else(|| PipelineError::MissingVariable(variable.clone()))?;
            ctx.insert(field.clone(), value.clone());
        }
        Stage::ZipSubtract {
            left,
            right,
            output,
        } => {
            let l = integer_array(ctx, left)?;
            let r = integer_array(ctx, right)?;
            if l.len() != r.len() {
                return Err(PipelineError::LengthMismatch {
                    left: l.len(),
                    right: r.len(),
                });
            }
            let diff = l
                .iter()
                .zip(&r)
                .map(|(a, b)| {
                    a.checked_sub(*b)
                        .map(Value::from)
                        .ok_or_else(|| PipelineError::Overflow(output.clone()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            ctx.insert(output.clone(), Value::Array(diff));
        }
        Stage::Project { fields } => {
            ctx.retain(|k, _| fields.iter().any(|f| f == k));
        }
    }
    Ok(())
}

fn integer_array(ctx: &Map<String, Value>, field: &str) -> Result<Vec<i64>, PipelineError> {
    ctx.get(field)
        .and_then(Value::as_array)
        .and_then(|items| items.iter().map(Value::as_i64).collect::<Option<Vec<_>>>())
        .ok_or_else(|| PipelineError::NotIntegerArray(field.to_string()))
}

/// Description of one variable a stored query accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

/// Query registration body, identical on every node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub schema: Uuid,
    pub variables: BTreeMap<String, VariableSpec>,
    pub pipeline: Pipeline,
}

impl QueryDefinition {
    /// The stored difference query over records of `schema`.
    pub fn difference(id: Uuid, schema: Uuid) -> Self {
        let mut variables = BTreeMap::new();
        variables.insert(
            QUERY_EMBEDDING_VAR.to_string(),
            VariableSpec {
                kind: "array".to_string(),
                description: "this party's share of each query embedding dimension".to_string(),
            },
        );
        Self {
            id,
            name: "shardrag difference".to_string(),
            schema,
            variables,
            pipeline: Pipeline::difference(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(q: Value) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert(QUERY_EMBEDDING_VAR.to_string(), q);
        m
    }

    #[test]
    fn test_difference_pipeline_evaluates() {
        let records = vec![
            json!({"_id": "a", "embedding": [5, 7, 9], "chunk": "xx"}),
            json!({"_id": "b", "embedding": [1, 1, 1], "chunk": "yy"}),
        ];
        let out = Pipeline::difference()
            .evaluate(&records, &vars(json!([1, 2, 3])))
            .unwrap();
        assert_eq!(out[0], json!({"_id": "a", "difference": [4, 5, 6]}));
        assert_eq!(out[1], json!({"_id": "b", "difference": [0, -1, -2]}));
    }

    #[test]
    fn test_missing_variable() {
        let records = vec![json!({"_id": "a", "embedding": [1]})];
        let err = Pipeline::difference().evaluate(&records, &Map::new()).unwrap_err();
        assert_eq!(err, PipelineError::MissingVariable("query_embedding".into()));
    }

    #[test]
    fn test_length_mismatch() {
        let records = vec![json!({"_id": "a", "embedding": [1, 2]})];
        let err = Pipeline::difference()
            .evaluate(&records, &vars(json!([1])))
            .unwrap_err();
        assert_eq!(err, PipelineError::LengthMismatch { left: 2, right: 1 });
    }

    #[test]
    fn test_non_integer_query() {
        let records = vec![json!({"_id": "a", "embedding": [1]})];
        let err = Pipeline::difference()
            .evaluate(&records, &vars(json!(["x"])))
            .unwrap_err();
        assert_eq!(err, PipelineError::NotIntegerArray("query_embedding".into()));
    }

    #[test]
    fn test_serialized_form_is_tagged() {
        let value = serde_json::to_value(Pipeline::difference()).unwrap();
        assert_eq!(value[0]["op"], "bind_variable");
        assert_eq!(value[1]["op"], "zip_subtract");
        assert_eq!(value[2]["fields"], json!(["_id", "difference"]));

        let back: Pipeline = serde_json::from_value(value).unwrap();
        assert_eq!(back, Pipeline::difference());
        assert_eq!(back.variables(), vec!["query_embedding"]);
    }

    #[test]
    fn test_query_definition_shape() {
        let q = QueryDefinition::difference(Uuid::nil(), Uuid::nil());
        let value = serde_json::to_value(&q).unwrap();
        assert!(value.get("_id").is_some());
        assert_eq!(value["variables"]["query_embedding"]["type"], "array");
    }
}
