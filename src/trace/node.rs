//! The trace-node tree.
//!
//! A [`TraceNode`] is the ordered container for one traced invocation: its
//! entry sequence interleaves checkpoints with child nodes, in the order the
//! owning call path produced them. Constructing a child with a parent pushes
//! the child into the parent's sequence immediately, so attachment order is
//! construction order regardless of when the child's own work settles.
//!
//! Nodes are handed out as `Arc<TraceNode>`. Ownership flows strictly
//! parent to child; the back-reference is a `Weak` so the tree can never
//! cycle. Entries are append-only and a node is never mutated after its
//! owning call completes or is abandoned.

use once_cell::sync::OnceCell;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::warn;
use uuid::Uuid;

use super::checkpoint::{
    Checkpoint, CheckpointKind, ErrorDetails, Thrown, ThrownValue, NOT_AN_ERROR_DESCRIPTION,
};

/// What a node represents, fixed at construction.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Parentless anchor of a whole traced call tree, identifying the
    /// transaction for external consumers.
    Root { transaction_id: Uuid },

    /// One ordinary traced invocation.
    Call,

    /// A concurrent group whose branches were handed to the fail-fast
    /// gather primitive.
    JoinAll,

    /// A concurrent group produced by mapping a traced function over an
    /// input sequence.
    JoinAllMapped,
}

impl NodeKind {
    pub fn is_fan_out(&self) -> bool {
        matches!(self, NodeKind::JoinAll | NodeKind::JoinAllMapped)
    }

    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Root { .. } => "root",
            NodeKind::Call => "call",
            NodeKind::JoinAll => "join_all",
            NodeKind::JoinAllMapped => "join_all_mapped",
        }
    }
}

/// One element of a node's entry sequence.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TraceEntry {
    Checkpoint(Checkpoint),
    Child(Arc<TraceNode>),
}

/// Ordered container of checkpoints and child nodes for one traced
/// invocation.
#[derive(Debug)]
pub struct TraceNode {
    kind: NodeKind,

    /// Non-owning back-reference, set once at construction.
    parent: Weak<TraceNode>,

    /// Insertion order is chronological for the owning call path.
    entries: Mutex<Vec<TraceEntry>>,

    /// Fan-out width, set at most once when the group's width is known.
    expected_children: OnceCell<usize>,
}

impl TraceNode {
    /// Create the parentless root of a new traced call tree.
    pub fn new_root() -> Arc<Self> {
        Arc::new(Self {
            kind: NodeKind::Root {
                transaction_id: Uuid::now_v7(),
            },
            parent: Weak::new(),
            entries: Mutex::new(Vec::new()),
            expected_children: OnceCell::new(),
        })
    }

    /// Root with a preset expected width.
    pub fn new_root_expecting(expected: usize) -> Arc<Self> {
        let root = Self::new_root();
        let _ = root.expected_children.set(expected);
        root
    }

    /// Create a child node and attach it to the parent immediately.
    pub fn new_child(parent: &Arc<Self>, kind: NodeKind) -> Arc<Self> {
        let child = Arc::new(Self {
            kind,
            parent: Arc::downgrade(parent),
            entries: Mutex::new(Vec::new()),
            expected_children: OnceCell::new(),
        });
        parent.push(TraceEntry::Child(Arc::clone(&child)));
        child
    }

    /// Child with a preset expected width, for callers that know the
    /// fan-out width up front.
    pub fn new_child_expecting(parent: &Arc<Self>, kind: NodeKind, expected: usize) -> Arc<Self> {
        let child = Self::new_child(parent, kind);
        let _ = child.expected_children.set(expected);
        child
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Transaction identifier, present on roots only.
    pub fn transaction_id(&self) -> Option<Uuid> {
        match self.kind {
            NodeKind::Root { transaction_id } => Some(transaction_id),
            _ => None,
        }
    }

    pub fn parent(&self) -> Option<Arc<TraceNode>> {
        self.parent.upgrade()
    }

    pub fn expected_children(&self) -> Option<usize> {
        self.expected_children.get().copied()
    }

    /// Record the fan-out width. The width is set at most once; a second
    /// set is ignored so instrumentation can never disturb a traced run.
    pub fn set_expected_children(&self, expected: usize) {
        if let Err(rejected) = self.expected_children.set(expected) {
            if self.expected_children.get() != Some(&rejected) {
                warn!(
                    kind = self.kind.name(),
                    rejected, "expected child count was already set, keeping the first value"
                );
            }
        }
    }

    /// Snapshot of the entry sequence at this moment.
    pub fn entries_snapshot(&self) -> Vec<TraceEntry> {
        self.lock_entries().clone()
    }

    // --- Mutation surface used by traced bodies and the orchestration ---

    /// Append the start checkpoint wrapping the call's arguments.
    pub fn start(&self, args: Vec<Value>) {
        self.push_checkpoint(CheckpointKind::ExecutionStart { args });
    }

    /// Append a structured log record.
    pub fn save_log(&self, description: impl Into<String>, payload: Value) {
        self.push_checkpoint(CheckpointKind::Log {
            description: description.into(),
            payload,
        });
    }

    /// Append a mid-execution error checkpoint for a typed error.
    pub fn save_error<E: std::error::Error>(&self, error: &E) {
        self.push_error(false, ErrorDetails::capture(error));
    }

    /// Append a mid-execution checkpoint for an arbitrary thrown value,
    /// taking the plain error path when the value is recognizable.
    pub fn save_maybe_error<E: Thrown>(&self, thrown: &E) {
        self.push_maybe_error(false, thrown.to_thrown());
    }

    /// Append the return-resolution checkpoint wrapping the result.
    pub fn return_resolution(&self, result: Value) {
        self.push_checkpoint(CheckpointKind::WasResolvedWithReturn { result });
    }

    /// Append the error-resolution checkpoint for a typed error.
    pub fn error_resolution<E: std::error::Error>(&self, error: &E) {
        self.push_error(true, ErrorDetails::capture(error));
    }

    /// Append the error-resolution checkpoint for an arbitrary thrown
    /// value, taking the plain error path when the value is recognizable.
    pub fn maybe_error_resolution<E: Thrown>(&self, thrown: &E) {
        self.push_maybe_error(true, thrown.to_thrown());
    }

    /// Append the finish checkpoint.
    pub fn finish(&self) {
        self.push_checkpoint(CheckpointKind::ExecutionFinish);
    }

    // --- Internals ---

    fn push_maybe_error(&self, is_resolution: bool, thrown: ThrownValue) {
        match thrown {
            ThrownValue::Error(details) => self.push_error(is_resolution, details),
            ThrownValue::Opaque(value) => {
                let description = NOT_AN_ERROR_DESCRIPTION.to_owned();
                self.push_checkpoint(if is_resolution {
                    CheckpointKind::WasResolvedWithErrorWithUnknownStructure {
                        description,
                        error: value,
                    }
                } else {
                    CheckpointKind::ErrorWithUnknownStructure {
                        description,
                        error: value,
                    }
                });
            }
        }
    }

    fn push_error(&self, is_resolution: bool, error: ErrorDetails) {
        self.push_checkpoint(if is_resolution {
            CheckpointKind::WasResolvedWithError { error }
        } else {
            CheckpointKind::Error { error }
        });
    }

    fn push_checkpoint(&self, kind: CheckpointKind) {
        self.push(TraceEntry::Checkpoint(Checkpoint::new(kind)));
    }

    fn push(&self, entry: TraceEntry) {
        self.lock_entries().push(entry);
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, Vec<TraceEntry>> {
        // Nothing panics while holding the lock; recover the guard if a
        // poisoned one ever shows up.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Serialize for TraceNode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("TraceNode", 4)?;
        state.serialize_field("kind", self.kind.name())?;
        if let NodeKind::Root { transaction_id } = &self.kind {
            state.serialize_field("transaction_id", transaction_id)?;
        }
        if let Some(expected) = self.expected_children() {
            state.serialize_field("expected_children", &expected)?;
        }
        state.serialize_field("traces", &self.entries_snapshot())?;
        state.end()
    }
}
