//! Fan-in of per-node results.
//!
//! Each node returns one row per stored record. Before anything can be
//! reconstructed the rows are regrouped by record id so that every record
//! has exactly one share from every party, in party order. A record that
//! is missing a share cannot be reconstructed at all, so the whole result
//! is rejected rather than silently narrowed.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::codec::{decrypt_float_list, CodecError, SecretKey};

/// The N-of-N requirement was violated.
#[derive(Debug, Error, PartialEq)]
pub enum QuorumError {
    #[error("node {party} did not answer: {reason}")]
    NodeFailed { party: usize, reason: String },
    #[error("node {party} timed out")]
    Timeout { party: usize },
    #[error("expected results from {expected} nodes, got {found}")]
    MissingResponses { expected: usize, found: usize },
    #[error("node {party} returned a malformed row: {reason}")]
    MalformedRow { party: usize, reason: String },
    #[error("record {id} has {found} shares, expected {expected}")]
    IncompleteRecord {
        id: String,
        found: usize,
        expected: usize,
    },
    #[error("node {party} returned record {id} more than once")]
    DuplicateRecord { party: usize, id: String },
    #[error("record {id} has share vectors of differing length")]
    RaggedShares { id: String },
}

/// Failure while turning grouped shares into plaintext.
#[derive(Debug, Error, PartialEq)]
pub enum AggregateError {
    #[error(transparent)]
    Quorum(#[from] QuorumError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Regroup `[party] → rows` into `record id → [one payload per party]`.
///
/// `extract` pulls the payload out of a node's row; returning `None`
/// marks the row as malformed. Ids are read from the `_id` field.
pub fn group_shares_by_id<T, F>(
    per_party: &[Vec<Value>],
    extract: F,
) -> Result<BTreeMap<String, Vec<T>>, QuorumError>
where
    F: Fn(&Value) -> Option<T>,
{
    let parties = per_party.len();
    let mut grouped: BTreeMap<String, Vec<Option<T>>> = BTreeMap::new();

    for (party, rows) in per_party.iter().enumerate() {
        for row in rows {
            let id = row
                .get("_id")
                .and_then(Value::as_str)
                .ok_or_else(|| QuorumError::MalformedRow {
                    party,
                    reason: "missing _id".to_string(),
                })?;
            let payload = extract(row).ok_or_else(|| QuorumError::MalformedRow {
                party,
                reason: format!("record {} has no usable payload", id),
            })?;
            let slots = grouped
                .entry(id.to_string())
                .or_insert_with(|| (0..parties).map(|_| None).collect());
            if slots[party].is_some() {
                return Err(QuorumError::DuplicateRecord {
                    party,
                    id: id.to_string(),
                });
            }
            slots[party] = Some(payload);
        }
    }

    grouped
        .into_iter()
        .map(|(id, slots)| {
            let found = slots.iter().filter(|s| s.is_some()).count();
            if found != parties {
                return Err(QuorumError::IncompleteRecord {
                    id,
                    found,
                    expected: parties,
                });
            }
            Ok((id, slots.into_iter().flatten().collect()))
        })
        .collect()
}

/// Swap the two axes of a rectangular matrix.
///
/// Returns `None` when rows have differing lengths.
pub fn transpose<T: Clone>(matrix: &[Vec<T>]) -> Option<Vec<Vec<T>>> {
    let width = matrix.first().map_or(0, Vec::len);
    if matrix.iter().any(|row| row.len() != width) {
        return None;
    }
    Some(
        (0..width)
            .map(|col| matrix.iter().map(|row| row[col].clone()).collect())
            .collect(),
    )
}

/// Reconstruct each record's plaintext difference vector.
///
/// `grouped` maps a record id to `[party][dimension]` difference shares.
pub fn reconstruct_differences(
    key: &SecretKey,
    grouped: BTreeMap<String, Vec<Vec<i64>>>,
) -> Result<Vec<(String, Vec<f64>)>, AggregateError> {
    grouped
        .into_iter()
        .map(|(id, party_shares)| {
            let by_dimension = transpose(&party_shares)
                .ok_or_else(|| QuorumError::RaggedShares { id: id.clone() })?;
            let values = decrypt_float_list(key, &by_dimension)?;
            Ok((id, values))
        })
        .collect()
}

/// Pull an integer array out of `row[field]`.
pub fn integer_field(row: &Value, field: &str) -> Option<Vec<i64>> {
    row.get(field)?
        .as_array()?
        .iter()
        .map(Value::as_i64)
        .collect()
}

/// Pull a string out of `row[field]`.
pub fn string_field(row: &Value, field: &str) -> Option<String> {
    row.get(field)?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encrypt_float_list;
    use serde_json::json;

    fn rows(ids: &[&str], party: i64) -> Vec<Value> {
        ids.iter()
            .map(|id| json!({"_id": id, "difference": [party, party * 10]}))
            .collect()
    }

    #[test]
    fn test_group_n_parties_m_records() {
        let ids = ["r1", "r2", "r3", "r4"];
        let per_party: Vec<Vec<Value>> = (0..3).map(|p| rows(&ids, p)).collect();
        let grouped = group_shares_by_id(&per_party, |r| integer_field(r, "difference")).unwrap();
        assert_eq!(grouped.len(), 4);
        for shares in grouped.values() {
            assert_eq!(shares.len(), 3);
            assert_eq!(shares[2], vec![2, 20]);
        }
    }

    #[test]
    fn test_group_ignores_row_order() {
        let per_party = vec![rows(&["a", "b"], 0), rows(&["b", "a"], 1)];
        let grouped = group_shares_by_id(&per_party, |r| integer_field(r, "difference")).unwrap();
        assert_eq!(grouped["a"], vec![vec![0, 0], vec![1, 10]]);
    }

    #[test]
    fn test_missing_share_is_error() {
        let per_party = vec![rows(&["a", "b"], 0), rows(&["a"], 1)];
        let err = group_shares_by_id(&per_party, |r| integer_field(r, "difference")).unwrap_err();
        assert_eq!(
            err,
            QuorumError::IncompleteRecord {
                id: "b".into(),
                found: 1,
                expected: 2
            }
        );
    }

    #[test]
    fn test_duplicate_share_is_error() {
        let per_party = vec![rows(&["a", "a"], 0), rows(&["a"], 1)];
        let err = group_shares_by_id(&per_party, |r| integer_field(r, "difference")).unwrap_err();
        assert!(matches!(err, QuorumError::DuplicateRecord { party: 0, .. }));
    }

    #[test]
    fn test_malformed_payload() {
        let per_party = vec![vec![json!({"_id": "a", "difference": "nope"})]];
        let err = group_shares_by_id(&per_party, |r| integer_field(r, "difference")).unwrap_err();
        assert!(matches!(err, QuorumError::MalformedRow { party: 0, .. }));
    }

    #[test]
    fn test_transpose() {
        let m = vec![vec![1, 2, 3], vec![4, 5, 6]];
        assert_eq!(transpose(&m).unwrap(), vec![vec![1, 4], vec![2, 5], vec![3, 6]]);
        assert!(transpose(&[vec![1], vec![1, 2]]).is_none());
        assert!(transpose::<i32>(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_reconstruct_differences() {
        let key = SecretKey::generate(3);
        let stored = encrypt_float_list(&key, &[1.0, 2.0, 3.0]).unwrap();
        let query = encrypt_float_list(&key, &[1.0, 2.5, 2.0]).unwrap();
        // node p holds [dimension] shares; subtract locally as a node would
        let per_party: Vec<Vec<i64>> = (0..3)
            .map(|p| stored.iter().zip(&query).map(|(s, q)| s[p] - q[p]).collect())
            .collect();
        let mut grouped = BTreeMap::new();
        grouped.insert("rec".to_string(), per_party);

        let out = reconstruct_differences(&key, grouped).unwrap();
        assert_eq!(out[0].0, "rec");
        let expected = [0.0, -0.5, 1.0];
        for (a, b) in out[0].1.iter().zip(expected) {
            assert!((a - b).abs() < 1e-7);
        }
    }
}
