//! Crumbtrail records the execution of asynchronous call chains as a tree of
//! typed checkpoints and renders that tree as a human-readable recap:
//! arguments, logs, errors, return values and timing, nested the way the
//! calls actually ran, with no external tracing backend.

pub mod error;
pub mod instrument;
pub mod recap;
pub mod render;
pub mod trace;

pub use error::RenderError;
pub use instrument::{trace_root, trace_root_expecting};
pub use recap::{recap, Recap};
pub use render::render_root;
pub use trace::{
    join_all_traced, join_all_traced_map, run_traced, trace_call, trace_call_expecting, Checkpoint,
    CheckpointKind, ErrorDetails, NodeKind, StackFrame, Thrown, ThrownValue, TraceEntry, TraceNode,
};
