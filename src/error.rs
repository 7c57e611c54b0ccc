//! Rendering error taxonomy.
//!
//! Machinery failures never alter a completed traced execution; they surface
//! only here, at rendering time, as explicit values.

use thiserror::Error;

/// Why a trace tree could not be rendered.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The node handed to the root renderer is not a root trace node.
    #[error("cannot render: expected a root trace node, got a `{kind}` node")]
    NotARoot { kind: &'static str },

    /// The root's entry sequence has no start checkpoint, so there is no
    /// lifecycle to recap. Unstarted nested nodes are legitimate (a branch
    /// dropped before its first poll) and render as placeholders instead.
    #[error("cannot render: root trace node was never started ({entries} entries, none a start checkpoint)")]
    NeverStarted { entries: usize },
}
