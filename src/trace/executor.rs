//! Orchestration around traced async bodies.
//!
//! [`run_traced`] drives the checkpoint lifecycle for one invocation: start,
//! the body itself, a resolution matching how the body settled, and an
//! unconditional finish on every exit path that actually resumes. Tracing is
//! transparent: the success value and the failure value leave exactly as the
//! body produced them.
//!
//! The fan-out routines build a concurrent group node and gather branches
//! with the fail-fast primitive. A branch dropped mid-flight because a
//! sibling rejected never resumes, so its node keeps neither resolution nor
//! finish. That permanently interrupted shape is the expected terminal state
//! for abandoned siblings, not an error.

use futures::future::try_join_all;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

use super::checkpoint::{Thrown, ThrownValue};
use super::node::{NodeKind, TraceNode};

/// Run a traced body against an already-constructed node.
///
/// Appends the start checkpoint, awaits the body, then appends the
/// resolution and finish checkpoints. Panics are recorded through the
/// unknown-structure branch and resumed unchanged.
pub async fn run_traced<T, E, F, Fut>(
    node: Arc<TraceNode>,
    args: Vec<Value>,
    body: F,
) -> Result<T, E>
where
    T: Serialize,
    E: Thrown,
    F: FnOnce(Arc<TraceNode>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    node.start(args);
    debug!(kind = node.kind().name(), "traced call started");

    let outcome = AssertUnwindSafe(body(Arc::clone(&node)))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(value)) => {
            node.return_resolution(to_value_or_null(&value));
            node.finish();
            debug!(kind = node.kind().name(), "traced call resolved");
            Ok(value)
        }
        Ok(Err(error)) => {
            node.maybe_error_resolution(&error);
            node.finish();
            debug!(kind = node.kind().name(), "traced call resolved with error");
            Err(error)
        }
        Err(payload) => {
            node.maybe_error_resolution(&ThrownValue::from_panic(payload.as_ref()));
            node.finish();
            std::panic::resume_unwind(payload)
        }
    }
}

/// Trace one nested invocation under `parent`.
///
/// The child node is constructed before the returned future is polled, so
/// attachment order in the parent is call order.
pub fn trace_call<T, E, F, Fut>(
    parent: &Arc<TraceNode>,
    args: Vec<Value>,
    body: F,
) -> impl Future<Output = Result<T, E>>
where
    T: Serialize,
    E: Thrown,
    F: FnOnce(Arc<TraceNode>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let node = TraceNode::new_child(parent, NodeKind::Call);
    run_traced(node, args, body)
}

/// [`trace_call`] with a preset fan-out width hint on the child node.
pub fn trace_call_expecting<T, E, F, Fut>(
    parent: &Arc<TraceNode>,
    expected: usize,
    args: Vec<Value>,
    body: F,
) -> impl Future<Output = Result<T, E>>
where
    T: Serialize,
    E: Thrown,
    F: FnOnce(Arc<TraceNode>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let node = TraceNode::new_child_expecting(parent, NodeKind::Call, expected);
    run_traced(node, args, body)
}

/// Trace a concurrent group of branch futures under `parent`.
///
/// `build` receives the group node and returns the branches; the expected
/// width is recorded from the branch count before any branch is polled.
/// Gathering is fail-fast: the first branch error settles the group, and
/// branches still in flight are dropped where they are suspended.
pub async fn join_all_traced<T, E, F, Fut>(parent: &Arc<TraceNode>, build: F) -> Result<Vec<T>, E>
where
    T: Serialize,
    E: Thrown,
    F: FnOnce(&Arc<TraceNode>) -> Vec<Fut>,
    Fut: Future<Output = Result<T, E>>,
{
    let group = TraceNode::new_child(parent, NodeKind::JoinAll);
    run_traced(group, Vec::new(), move |group| async move {
        let branches = build(&group);
        group.set_expected_children(branches.len());
        debug!(branches = branches.len(), "dispatching concurrent group");
        try_join_all(branches).await
    })
    .await
}

/// Map a traced function over `items` concurrently.
///
/// Each element runs under its own child node, attached in index order, and
/// the output preserves input order regardless of completion order. Each
/// child's recorded argument list is `[element, index]`.
pub async fn join_all_traced_map<In, T, E, F, Fut>(
    parent: &Arc<TraceNode>,
    items: Vec<In>,
    per_item: F,
) -> Result<Vec<T>, E>
where
    In: Serialize,
    T: Serialize,
    E: Thrown,
    F: Fn(Arc<TraceNode>, In, usize) -> Fut + Clone,
    Fut: Future<Output = Result<T, E>>,
{
    let group = TraceNode::new_child(parent, NodeKind::JoinAllMapped);
    run_traced(group, Vec::new(), move |group| async move {
        group.set_expected_children(items.len());
        debug!(branches = items.len(), "dispatching mapped concurrent group");
        let branches: Vec<_> = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let args = vec![to_value_or_null(&item), Value::from(index)];
                let per_item = per_item.clone();
                trace_call(&group, args, move |child| per_item(child, item, index))
            })
            .collect();
        try_join_all(branches).await
    })
    .await
}

fn to_value_or_null<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|error| {
        warn!(%error, "payload is not serializable, recording null");
        Value::Null
    })
}
