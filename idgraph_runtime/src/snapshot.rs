//! Snapshot records: a checkpoint's fingerprints in portable form.
//!
//! Pure codec layer. No file I/O, no timestamps.
//!
//! - `encode_snapshot`:      record → compact JSON
//! - `decode_snapshot`:      JSON → record (strict, digests validated)
//! - `snapshot_hash`:        SHA-256 of the encoded record (lowercase hex)
//! - `verify_snapshot_hash`: decode only if the hash matches
//! - `diff_snapshots`:       change set between two records

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use idgraph_engine::compare::equal_text;
use idgraph_engine::Digest;

use crate::changes::{partition_names, ChangeSet};
use crate::error::{Result, RuntimeError};

/// Fingerprints of one variable. Both fields are absent when the
/// variable could not be fingerprinted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableRecord {
    pub digest: Option<String>,
    pub graph_text: Option<String>,
}

impl VariableRecord {
    pub fn is_fingerprinted(&self) -> bool {
        self.digest.is_some() || self.graph_text.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotRecord {
    pub sequence: u64,
    pub variables: BTreeMap<String, VariableRecord>,
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Encode a record to compact JSON. Variables come out sorted by name,
/// so equal records encode to equal bytes.
pub fn encode_snapshot(record: &SnapshotRecord) -> Result<String> {
    serde_json::to_string(record).map_err(|e| RuntimeError::Serialization(e.to_string()))
}

/// Decode a record. Unknown fields and malformed digests are rejected.
///
/// Graph texts are kept as opaque strings and not parsed.
pub fn decode_snapshot(json: &str) -> Result<SnapshotRecord> {
    let record: SnapshotRecord =
        serde_json::from_str(json).map_err(|e| RuntimeError::Deserialization(e.to_string()))?;
    for (name, var) in &record.variables {
        if let Some(hex) = &var.digest {
            Digest::from_hex(hex).map_err(|e| {
                RuntimeError::Deserialization(format!("variable {:?}: {}", name, e))
            })?;
        }
    }
    Ok(record)
}

// ---------------------------------------------------------------------------
// Hash
// ---------------------------------------------------------------------------

/// SHA-256 of the encoded record, lowercase hex.
pub fn snapshot_hash(record: &SnapshotRecord) -> Result<String> {
    let json = encode_snapshot(record)?;
    Ok(hex_sha256(json.as_bytes()))
}

/// Decode `json` after checking that it hashes to `expected`.
pub fn verify_snapshot_hash(json: &str, expected: &str) -> Result<SnapshotRecord> {
    let record = decode_snapshot(json)?;
    let actual = snapshot_hash(&record)?;
    if actual != expected {
        return Err(RuntimeError::HashMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(record)
}

fn hex_sha256(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// Compare two records, typically produced in different processes.
///
/// A variable is unchanged only when both sides were fingerprinted and
/// every fingerprint present on both sides matches: digests by value,
/// graph texts byte for byte. `sequence` is taken from `after`.
pub fn diff_snapshots(before: &SnapshotRecord, after: &SnapshotRecord) -> ChangeSet {
    let (added, removed, common) = partition_names(
        before.variables.keys().map(String::as_str),
        after.variables.keys().map(String::as_str),
    );

    let mut changes = ChangeSet::new(after.sequence);
    changes.added = added;
    changes.removed = removed;

    for name in common {
        let (a, b) = (&before.variables[name], &after.variables[name]);
        if same_record(a, b) {
            changes.unchanged.push(name.to_string());
        } else {
            changes.modified.push(name.to_string());
        }
    }
    changes.unfingerprintable = after
        .variables
        .iter()
        .filter(|(_, var)| !var.is_fingerprinted())
        .map(|(name, _)| name.clone())
        .collect();
    changes
}

fn same_record(a: &VariableRecord, b: &VariableRecord) -> bool {
    if !a.is_fingerprinted() || !b.is_fingerprinted() {
        return false;
    }
    let digests = match (&a.digest, &b.digest) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        (None, None) => true,
        _ => false,
    };
    let graphs = match (&a.graph_text, &b.graph_text) {
        (Some(x), Some(y)) => equal_text(x, y),
        (None, None) => true,
        _ => false,
    };
    digests && graphs
}

#[cfg(test)]
mod tests {
    use super::*;

    const D1: &str = "0000000000000000000000000000000000000000000000000000000000000001";
    const D2: &str = "0000000000000000000000000000000000000000000000000000000000000002";

    fn record(sequence: u64, vars: &[(&str, Option<&str>, Option<&str>)]) -> SnapshotRecord {
        SnapshotRecord {
            sequence,
            variables: vars
                .iter()
                .map(|(name, digest, text)| {
                    (
                        name.to_string(),
                        VariableRecord {
                            digest: digest.map(str::to_string),
                            graph_text: text.map(str::to_string),
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn encode_decode() {
        let r = record(2, &[("a", Some(D1), Some("{}")), ("b", None, None)]);
        let json = encode_snapshot(&r).unwrap();
        assert_eq!(decode_snapshot(&json).unwrap(), r);
        assert_eq!(encode_snapshot(&r).unwrap(), json);
    }

    #[test]
    fn decode_is_strict() {
        assert!(matches!(
            decode_snapshot(r#"{"sequence":1}"#),
            Err(RuntimeError::Deserialization(_))
        ));
        assert!(decode_snapshot(r#"{"sequence":1,"variables":{},"extra":0}"#).is_err());
        assert!(decode_snapshot(r#"{"sequence":1,"variables":{"a":{"digest":"zz"}}}"#).is_err());
        assert!(decode_snapshot(r#"{"sequence":1,"variables":{"a":{"digest":null}}}"#).is_ok());
    }

    #[test]
    fn hash_verification() {
        let r = record(1, &[("a", Some(D1), None)]);
        let json = encode_snapshot(&r).unwrap();
        let hash = snapshot_hash(&r).unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(verify_snapshot_hash(&json, &hash).unwrap(), r);

        let other = snapshot_hash(&record(1, &[("a", Some(D2), None)])).unwrap();
        assert!(matches!(
            verify_snapshot_hash(&json, &other),
            Err(RuntimeError::HashMismatch { .. })
        ));
    }

    #[test]
    fn diff_classifies_variables() {
        let before = record(
            1,
            &[
                ("gone", Some(D1), None),
                ("same", Some(D1), Some("g")),
                ("changed", Some(D1), Some("g")),
                ("retyped", Some(D1), Some("g")),
                ("broken", None, None),
            ],
        );
        let after = record(
            2,
            &[
                ("same", Some(D1), Some("g")),
                ("changed", Some(D2), Some("g")),
                ("retyped", Some(D1), Some("h")),
                ("broken", None, None),
                ("new", Some(D2), None),
            ],
        );
        let changes = diff_snapshots(&before, &after);
        assert_eq!(changes.sequence, 2);
        assert_eq!(changes.added, vec!["new"]);
        assert_eq!(changes.removed, vec!["gone"]);
        assert_eq!(changes.modified, vec!["broken", "changed", "retyped"]);
        assert_eq!(changes.unchanged, vec!["same"]);
        assert_eq!(changes.unfingerprintable, vec!["broken"]);
    }

    #[test]
    fn diff_of_a_record_with_itself_is_empty() {
        let r = record(4, &[("a", Some(D1), Some("g")), ("b", Some(D2), None)]);
        assert!(diff_snapshots(&r, &r).is_empty());
    }
}
