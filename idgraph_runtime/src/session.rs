//! Checkpoint session: change detection between successive checkpoints.
//!
//! Each checkpoint fingerprints every variable in the namespace, compares
//! against the fingerprints kept from the previous checkpoint, then swaps
//! the new fingerprints in and releases the old graph handles.
//!
//! A variable whose fingerprint cannot be computed is never reported as
//! unchanged. It shows up as added or modified and in `unfingerprintable`.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use idgraph_engine::{Digest, EngineConfig, EngineError, GraphHandle, IdGraphEngine, Value};

use crate::changes::{partition_names, ChangeSet};
use crate::error::{Result, RuntimeError};
use crate::namespace::Namespace;
use crate::snapshot::{SnapshotRecord, VariableRecord};

/// How a variable's state is captured and compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    /// Structural digest only. No graph is kept between checkpoints.
    Digest { include_identity: bool },
    /// Explicit graph, compared structurally.
    Graph,
    /// Graph plus identity-including digest; both must agree.
    #[default]
    Both,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub strategy: DetectionStrategy,
    pub engine: EngineConfig,
}

impl SessionConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| RuntimeError::Engine(EngineError::Config(e.to_string())))
    }
}

/// What a checkpoint remembers about one variable.
#[derive(Debug, Clone, Copy)]
struct Fingerprint {
    digest: Option<Digest>,
    graph: Option<GraphHandle>,
}

/// Tracks a namespace across checkpoints.
pub struct CheckpointSession {
    engine: IdGraphEngine,
    strategy: DetectionStrategy,
    sequence: u64,
    // `None` marks a variable that could not be fingerprinted.
    tracked: BTreeMap<String, Option<Fingerprint>>,
}

impl CheckpointSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            engine: IdGraphEngine::new(config.engine),
            strategy: config.strategy,
            sequence: 0,
            tracked: BTreeMap::new(),
        }
    }

    /// Fingerprint `namespace` and report what changed since the last call.
    ///
    /// The first checkpoint reports every variable as added.
    pub fn checkpoint(&mut self, namespace: &Namespace) -> ChangeSet {
        self.sequence += 1;
        let mut changes = ChangeSet::new(self.sequence);
        let mut next = BTreeMap::new();

        let (_, removed, _) = partition_names(
            self.tracked.keys().map(String::as_str),
            namespace.names(),
        );
        changes.removed = removed;

        for (name, value) in namespace.iter() {
            let current = match self.fingerprint(value) {
                Ok(fp) => Some(fp),
                Err(e) => {
                    warn!(variable = name, error = %e, "cannot fingerprint variable");
                    changes.unfingerprintable.push(name.to_string());
                    None
                }
            };

            match self.tracked.get(name) {
                None => changes.added.push(name.to_string()),
                Some(previous) if self.same(previous.as_ref(), current.as_ref()) => {
                    changes.unchanged.push(name.to_string())
                }
                Some(_) => changes.modified.push(name.to_string()),
            }
            next.insert(name.to_string(), current);
        }

        let previous = std::mem::replace(&mut self.tracked, next);
        self.release_all(previous.into_values());

        debug!(
            sequence = self.sequence,
            added = changes.added.len(),
            removed = changes.removed.len(),
            modified = changes.modified.len(),
            unchanged = changes.unchanged.len(),
            live_graphs = self.engine.live_handles(),
            "checkpoint"
        );
        changes
    }

    /// Number of checkpoints taken so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Names recorded by the latest checkpoint.
    pub fn tracked(&self) -> impl Iterator<Item = &str> {
        self.tracked.keys().map(String::as_str)
    }

    pub fn strategy(&self) -> DetectionStrategy {
        self.strategy
    }

    pub fn engine(&self) -> &IdGraphEngine {
        &self.engine
    }

    /// Portable record of the latest checkpoint, for comparison in
    /// another process.
    pub fn snapshot(&self) -> Result<SnapshotRecord> {
        let mut variables = BTreeMap::new();
        for (name, fp) in &self.tracked {
            let record = match fp {
                None => VariableRecord::default(),
                Some(fp) => VariableRecord {
                    digest: fp.digest.map(|d| d.to_hex()),
                    graph_text: fp
                        .graph
                        .map(|h| self.engine.to_text(h))
                        .transpose()?,
                },
            };
            variables.insert(name.clone(), record);
        }
        Ok(SnapshotRecord {
            sequence: self.sequence,
            variables,
        })
    }

    fn fingerprint(&self, value: &Value) -> std::result::Result<Fingerprint, EngineError> {
        match self.strategy {
            DetectionStrategy::Digest { include_identity } => Ok(Fingerprint {
                digest: Some(self.engine.hash(value, include_identity)?),
                graph: None,
            }),
            DetectionStrategy::Graph => Ok(Fingerprint {
                digest: None,
                graph: Some(self.engine.build_graph(value)?),
            }),
            DetectionStrategy::Both => {
                let graph = self.engine.build_graph(value)?;
                match self.engine.hash(value, true) {
                    Ok(digest) => Ok(Fingerprint {
                        digest: Some(digest),
                        graph: Some(graph),
                    }),
                    Err(e) => {
                        self.release(graph);
                        Err(e)
                    }
                }
            }
        }
    }

    fn same(&self, previous: Option<&Fingerprint>, current: Option<&Fingerprint>) -> bool {
        let (Some(previous), Some(current)) = (previous, current) else {
            return false;
        };
        let digests = match (previous.digest, current.digest) {
            (Some(a), Some(b)) => a == b,
            (None, None) => true,
            _ => false,
        };
        let graphs = match (previous.graph, current.graph) {
            (Some(a), Some(b)) => self.engine.equal(a, b).unwrap_or_else(|e| {
                warn!(error = %e, "graph comparison failed");
                false
            }),
            (None, None) => true,
            _ => false,
        };
        digests && graphs
    }

    fn release_all(&self, fingerprints: impl Iterator<Item = Option<Fingerprint>>) {
        for graph in fingerprints.flatten().filter_map(|fp| fp.graph) {
            self.release(graph);
        }
    }

    fn release(&self, graph: GraphHandle) {
        if let Err(e) = self.engine.release(graph) {
            warn!(error = %e, "graph release failed");
        }
    }
}

impl Default for CheckpointSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

/// Thread-safe session handle.
pub struct SharedSession {
    inner: Mutex<CheckpointSession>,
}

impl SharedSession {
    pub fn new(session: CheckpointSession) -> Self {
        Self {
            inner: Mutex::new(session),
        }
    }

    pub fn checkpoint(&self, namespace: &Namespace) -> ChangeSet {
        self.inner.lock().checkpoint(namespace)
    }

    pub fn sequence(&self) -> u64 {
        self.inner.lock().sequence()
    }

    pub fn snapshot(&self) -> Result<SnapshotRecord> {
        self.inner.lock().snapshot()
    }

    pub fn into_inner(self) -> CheckpointSession {
        self.inner.into_inner()
    }
}
