//! The checkpoint and trace-node core.
//!
//! One traced transaction builds a tree:
//!
//! ```text
//! RootTraceNode (transaction id)
//!   ├── executionStart ── wrapped argument list
//!   ├── log / error checkpoints               (traced body mutators)
//!   ├── child TraceNode                       (nested traced call)
//!   │     └── ...same lifecycle, recursively
//!   ├── JoinAll TraceNode                     (concurrent group)
//!   │     ├── child per branch, in dispatch order
//!   │     └── ...
//!   ├── wasResolvedWith{Return,Error,...}     (exactly one resolution)
//!   └── executionFinish                       (unconditional last entry)
//! ```
//!
//! A node is mutated only by the logical call path that was handed it, and
//! never after that path completes or is abandoned. Interruption is not
//! marked; it is detected retrospectively by [`crate::recap`].

pub mod checkpoint;
pub mod executor;
pub mod node;
pub mod stack;

pub use checkpoint::{
    Checkpoint, CheckpointKind, ErrorDetails, Thrown, ThrownValue, NOT_AN_ERROR_DESCRIPTION,
};
pub use executor::{
    join_all_traced, join_all_traced_map, run_traced, trace_call, trace_call_expecting,
};
pub use node::{NodeKind, TraceEntry, TraceNode};
pub use stack::{capture_filtered_stack, StackFrame};
