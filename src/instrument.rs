//! Root-level instrumentation entry points.
//!
//! These are the outer surface around the core: each invocation creates a
//! fresh root node, runs the orchestrated body, and prints the rendered
//! recap on success and on failure before handing the outcome back
//! unchanged. Nested invocations use [`crate::trace::trace_call`] and the
//! fan-out routines directly.

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

use crate::render::render_root;
use crate::trace::{run_traced, Thrown, TraceNode};

/// Trace `body` as a fresh transaction, printing the recap before
/// returning.
pub async fn trace_root<T, E, F, Fut>(args: Vec<Value>, body: F) -> Result<T, E>
where
    T: Serialize,
    E: Thrown,
    F: FnOnce(Arc<TraceNode>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    run_and_report(TraceNode::new_root(), args, body).await
}

/// [`trace_root`] with a preset expected width on the root node.
pub async fn trace_root_expecting<T, E, F, Fut>(
    expected: usize,
    args: Vec<Value>,
    body: F,
) -> Result<T, E>
where
    T: Serialize,
    E: Thrown,
    F: FnOnce(Arc<TraceNode>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    run_and_report(TraceNode::new_root_expecting(expected), args, body).await
}

async fn run_and_report<T, E, F, Fut>(
    root: Arc<TraceNode>,
    args: Vec<Value>,
    body: F,
) -> Result<T, E>
where
    T: Serialize,
    E: Thrown,
    F: FnOnce(Arc<TraceNode>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let outcome = AssertUnwindSafe(run_traced(Arc::clone(&root), args, body))
        .catch_unwind()
        .await;

    let transaction = root.transaction_id();
    match &outcome {
        Ok(Ok(_)) => debug!(?transaction, "root traced call returned"),
        Ok(Err(_)) => debug!(?transaction, "root traced call resolved with error"),
        Err(_) => debug!(?transaction, "root traced call panicked"),
    }

    match render_root(&root) {
        Ok(recap_text) => println!("{recap_text}"),
        Err(render_error) => error!(%render_error, "failed to render trace recap"),
    }

    match outcome {
        Ok(result) => result,
        Err(payload) => std::panic::resume_unwind(payload),
    }
}
