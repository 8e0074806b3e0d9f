//! Document sync engine: ordered operation log plus materialized snapshot.
//!
//! The engine owns the authoritative document state for a room. Incoming
//! operations are appended to the log in arrival order and applied to the
//! materialized content; no transformation or rebasing is performed, so
//! concurrent edits resolve as last-applied-wins-in-arrival-order. That is
//! a documented policy of the relay, not an accident.
//!
//! Invariant: replaying the full log from an empty document reproduces the
//! materialized snapshot. Late joiners are initialized by replaying the log.
//!
//! Reference: Kleppmann, Chapter 5 — Replication

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One atomic edit unit, addressed by character position.
///
/// Operations are produced by the external rich-text widget and treated as
/// opaque deltas by the relay; only the engine materializes them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum DocOp {
    /// Insert `text` before character `pos`.
    Insert { pos: usize, text: String },
    /// Delete `len` characters starting at `pos`.
    Delete { pos: usize, len: usize },
    /// Attach a formatting attribute to `len` characters starting at `pos`.
    Format {
        pos: usize,
        len: usize,
        attribute: String,
    },
}

impl DocOp {
    /// Encode to binary (bincode).
    pub fn encode(&self) -> Result<Vec<u8>, String> {
        bincode::serde::encode_to_vec(self, bincode::config::standard()).map_err(|e| e.to_string())
    }

    /// Decode from binary.
    pub fn decode(bytes: &[u8]) -> Result<Self, String> {
        let (op, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| e.to_string())?;
        Ok(op)
    }
}

/// One recorded formatting span.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormatSpan {
    pub pos: usize,
    pub len: usize,
    pub attribute: String,
}

/// Materialized document state handed to late joiners and the snapshot sink.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Plain-text content after applying the log in arrival order.
    pub content: String,
    /// Formatting spans in the order they were applied.
    pub formats: Vec<FormatSpan>,
    /// Number of operations applied so far.
    pub revision: u64,
}

/// Authoritative per-room document: operation log plus materialized state.
///
/// A room's document has exactly two states, uninitialized (no entry in the
/// room yet) and initialized; the transition is one-way and happens on the
/// first `get-document` or `doc-change` for the room.
#[derive(Debug, Default)]
pub struct Document {
    ops: Vec<DocOp>,
    content: String,
    formats: Vec<FormatSpan>,
}

/// Byte index of character `char_pos`, clamped to the end of `content`.
fn byte_index(content: &str, char_pos: usize) -> usize {
    content
        .char_indices()
        .nth(char_pos)
        .map(|(i, _)| i)
        .unwrap_or(content.len())
}

impl Document {
    /// Create an empty, initialized document (`{ ops: [] }`).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one operation to the log and apply it to the materialized
    /// state. Out-of-range positions are clamped, never rejected, so a
    /// racing editor cannot wedge the room.
    pub fn apply(&mut self, op: DocOp) {
        match &op {
            DocOp::Insert { pos, text } => {
                let at = byte_index(&self.content, *pos);
                self.content.insert_str(at, text);
            }
            DocOp::Delete { pos, len } => {
                let start = byte_index(&self.content, *pos);
                let end = byte_index(&self.content, pos.saturating_add(*len));
                self.content.replace_range(start..end, "");
            }
            DocOp::Format {
                pos,
                len,
                attribute,
            } => {
                let char_count = self.content.chars().count();
                let pos = (*pos).min(char_count);
                let len = (*len).min(char_count - pos);
                self.formats.push(FormatSpan {
                    pos,
                    len,
                    attribute: attribute.clone(),
                });
            }
        }
        self.ops.push(op);
    }

    /// Rebuild a document by replaying an operation log from empty state.
    pub fn replay<I: IntoIterator<Item = DocOp>>(ops: I) -> Self {
        let mut doc = Self::new();
        for op in ops {
            doc.apply(op);
        }
        doc
    }

    /// Current materialized snapshot.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            content: self.content.clone(),
            formats: self.formats.clone(),
            revision: self.ops.len() as u64,
        }
    }

    /// The operation log, each entry wire-encoded, for a doc-init response.
    pub fn encoded_ops(&self) -> Vec<Vec<u8>> {
        self.ops.iter().filter_map(|op| op.encode().ok()).collect()
    }

    /// Materialized plain-text content.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// The ordered operation log.
    pub fn ops(&self) -> &[DocOp] {
        &self.ops
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Boundary contract for periodic document persistence.
///
/// The relay hands snapshots to the sink on a fixed interval, keyed by room
/// identifier. Failures are logged by the caller and never block editing.
#[async_trait::async_trait]
pub trait SnapshotSink: Send + Sync {
    async fn persist(&self, room: &str, snapshot: &Snapshot) -> Result<(), String>;
}

/// Sink that discards snapshots. Default when no persistence is configured.
pub struct NullSink;

#[async_trait::async_trait]
impl SnapshotSink for NullSink {
    async fn persist(&self, _room: &str, _snapshot: &Snapshot) -> Result<(), String> {
        Ok(())
    }
}

/// In-memory sink retaining the latest snapshot per room. Used in tests and
/// as a reference implementation of the persistence contract.
#[derive(Default)]
pub struct MemorySink {
    inner: std::sync::Mutex<HashMap<String, Snapshot>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest snapshot persisted for `room`, if any.
    pub fn latest(&self, room: &str) -> Option<Snapshot> {
        self.inner.lock().ok()?.get(room).cloned()
    }

    pub fn room_count(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl SnapshotSink for MemorySink {
    async fn persist(&self, room: &str, snapshot: &Snapshot) -> Result<(), String> {
        self.inner
            .lock()
            .map_err(|e| e.to_string())?
            .insert(room.to_string(), snapshot.clone());
        Ok(())
    }
}
