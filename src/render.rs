//! Deterministic text projection of a trace tree.
//!
//! Every rendered line leads with a fixed-width id column `[<uuid>]`
//! followed by the `|    ` filler. Nesting inserts another filler at the end
//! of the id column, line by line, so the id column stays flush-left while
//! indentation accumulates after it:
//!
//! ```text
//! [0198ad…]|    RootTraceNode
//! [0198ad…]|    ✅ checkout(["a","b"]) { <2 steps>
//! [0198ad…]|    |    save_log('loaded', {"n":2})
//! [0198ad…]|    |    ❌ await join_all([ <1 / 3 parallel steps>
//! [0198ad…]|    |    return: [1,2]
//! [0198ad…]|    } took 12.0 ms
//! ```
//!
//! Rendering is a pure projection over an entry snapshot. It never mutates
//! the tree, and rendering an unchanged tree twice produces byte-identical
//! text.

use std::time::Duration;

use crate::error::RenderError;
use crate::recap::{recap, Recap};
use crate::trace::{Checkpoint, CheckpointKind, TraceEntry, TraceNode};

/// Filler between the id column and the line body.
const FILLER: &str = "|    ";

/// Width of the `[<uuid>]` id column.
const ID_COLUMN: usize = 38;

const MS_PER_SECOND: f64 = 1000.0;
const MS_PER_MINUTE: f64 = 60.0 * MS_PER_SECOND;
const MS_PER_HOUR: f64 = 60.0 * MS_PER_MINUTE;

/// Render a complete tree from its root.
///
/// The header line carries the transaction identifier; the rest is the
/// recursive per-node projection.
pub fn render_root(root: &TraceNode) -> Result<String, RenderError> {
    let Some(transaction_id) = root.transaction_id() else {
        return Err(RenderError::NotARoot {
            kind: root.kind().name(),
        });
    };

    let entries = root.entries_snapshot();
    if matches!(recap(&entries), Recap::NotStarted) {
        return Err(RenderError::NeverStarted {
            entries: entries.len(),
        });
    }

    Ok(format!(
        "[{transaction_id}]{FILLER}RootTraceNode\n{}",
        render_node(root)?
    ))
}

fn render_node(node: &TraceNode) -> Result<String, RenderError> {
    let entries = node.entries_snapshot();
    let recapped = recap(&entries);
    let is_fan_out = node.kind().is_fan_out();

    let (start, execution) = match &recapped {
        // A branch can be dropped before its first poll when a sibling
        // rejects; the node then holds no start checkpoint at all.
        Recap::NotStarted => return Ok(render_never_started()),
        Recap::Interrupted { start, execution } => (*start, *execution),
        Recap::Resolved {
            start, execution, ..
        } => (*start, *execution),
    };

    let marker = match &recapped {
        Recap::Resolved { resolution, .. }
            if matches!(resolution.kind, CheckpointKind::WasResolvedWithReturn { .. }) =>
        {
            "✅"
        }
        _ => "❌",
    };

    // Fan-out groups count settled branches; plain nodes count entries.
    let done_steps = if is_fan_out {
        execution
            .iter()
            .filter(|entry| {
                matches!(entry, TraceEntry::Child(child)
                    if recap(&child.entries_snapshot()).is_resolved())
            })
            .count()
    } else {
        execution.len()
    };

    let mut lines = vec![if is_fan_out {
        render_fan_out_start(start, marker, node.expected_children(), done_steps)
    } else {
        render_start(start, marker, node.expected_children(), done_steps)
    }];

    if !execution.is_empty() {
        let mut block = Vec::with_capacity(execution.len());
        for entry in execution {
            let rendered = match entry {
                TraceEntry::Checkpoint(checkpoint) => render_execution_checkpoint(checkpoint),
                TraceEntry::Child(child) => render_node(child)?,
            };
            block.push(if is_fan_out {
                format!("{rendered},")
            } else {
                rendered
            });
        }
        lines.push(indent(&block.join("\n")));
    }

    match &recapped {
        Recap::Resolved {
            resolution, finish, ..
        } => {
            lines.push(indent(&render_resolution(resolution)));
            lines.push(render_finish(finish, start, is_fan_out));
        }
        _ => lines.push(render_interrupted_finish(is_fan_out)),
    }

    Ok(lines.join("\n"))
}

/// Insert one indentation level after the id column of every line.
fn indent(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.len() >= ID_COLUMN && line.is_char_boundary(ID_COLUMN) {
                let (id_column, rest) = line.split_at(ID_COLUMN);
                format!("{id_column}{FILLER}{rest}")
            } else {
                format!("{line}{FILLER}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_start(
    start: &Checkpoint,
    marker: &str,
    expected: Option<usize>,
    done_steps: usize,
) -> String {
    let args = match &start.kind {
        CheckpointKind::ExecutionStart { args } => render_args(args),
        _ => String::new(),
    };
    let steps = match expected {
        Some(total) => format!("<{done_steps} / {total} steps>"),
        None => format!("<{done_steps} steps>"),
    };

    format!(
        "[{}]{FILLER}{marker} {}({args}) {{ {steps}",
        start.id,
        render_call_site(start)
    )
}

fn render_fan_out_start(
    start: &Checkpoint,
    marker: &str,
    expected: Option<usize>,
    done_steps: usize,
) -> String {
    let steps = match expected {
        Some(total) => format!("<{done_steps} / {total} parallel steps>"),
        None => format!("<{done_steps} parallel steps>"),
    };

    format!("[{}]{FILLER}{marker} await join_all([ {steps}", start.id)
}

/// Call-site name from the start checkpoint's innermost surviving frame.
fn render_call_site(start: &Checkpoint) -> String {
    let frame = start.stack.first();
    let name = frame
        .and_then(|f| f.method_name.as_deref().or(f.function_name.as_deref()))
        .unwrap_or("unknown function");

    match frame.and_then(|f| f.type_name.as_deref()) {
        Some(type_name) => format!("{type_name}.{name}"),
        None => name.to_owned(),
    }
}

fn render_args(args: &[serde_json::Value]) -> String {
    args.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_execution_checkpoint(checkpoint: &Checkpoint) -> String {
    let body = match &checkpoint.kind {
        CheckpointKind::Log {
            description,
            payload,
        } => format!("save_log('{description}', {payload})"),
        CheckpointKind::Error { error } => {
            format!("save_error({}('{}'))", error.name, error.message)
        }
        CheckpointKind::ErrorWithUnknownStructure { error, .. } => {
            format!("save_maybe_error({error})")
        }
        other => other.status_name().to_owned(),
    };

    format!("[{}]{FILLER}{body}", checkpoint.id)
}

fn render_resolution(resolution: &Checkpoint) -> String {
    let body = match &resolution.kind {
        CheckpointKind::WasResolvedWithReturn { result } => format!("return: {result}"),
        CheckpointKind::WasResolvedWithError { error } => {
            format!("Error: {}('{}')", error.name, error.message)
        }
        CheckpointKind::WasResolvedWithErrorWithUnknownStructure { error, .. } => {
            format!("Not an error, but still thrown: {error}")
        }
        other => other.status_name().to_owned(),
    };

    format!("[{}]{FILLER}{body}", resolution.id)
}

fn render_finish(finish: &Checkpoint, start: &Checkpoint, is_fan_out: bool) -> String {
    let closer = if is_fan_out { "])" } else { "}" };
    format!(
        "[{}]{FILLER}{closer} {}",
        finish.id,
        render_time(finish.elapsed_since(start))
    )
}

fn render_never_started() -> String {
    // The extra space keeps the id column at its fixed width.
    format!(
        "[No start trace entry means no uuid. ]{FILLER}❌ <never started> -- an enclosing join_all rejected before dispatch"
    )
}

fn render_interrupted_finish(is_fan_out: bool) -> String {
    let closer = if is_fan_out { "])" } else { "}" };
    format!(
        "[No finish trace entry means no uuid.]{FILLER}{closer} -- Interrupted because an enclosing join_all rejected"
    )
}

/// Elapsed time bucketed by fixed thresholds, one decimal.
fn render_time(elapsed: Duration) -> String {
    let ms = elapsed.as_secs_f64() * MS_PER_SECOND;

    let (value, unit) = if ms < MS_PER_SECOND {
        (ms, "ms")
    } else if ms < MS_PER_MINUTE {
        (ms / MS_PER_SECOND, "sec")
    } else if ms < MS_PER_HOUR {
        (ms / MS_PER_MINUTE, "min")
    } else {
        (ms / MS_PER_HOUR, "hour")
    };

    format!("took {value:.1} {unit}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{NodeKind, TraceNode};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[derive(Debug, thiserror::Error)]
    #[error("no such account")]
    struct LookupError;

    #[test]
    fn test_time_buckets() {
        assert_eq!(render_time(Duration::from_millis(5)), "took 5.0 ms");
        assert_eq!(render_time(Duration::from_millis(1500)), "took 1.5 sec");
        assert_eq!(render_time(Duration::from_secs(90)), "took 1.5 min");
        assert_eq!(render_time(Duration::from_secs(7200)), "took 2.0 hour");
    }

    #[test]
    fn test_indent_inserts_after_id_column() {
        let line = format!("[{}]{FILLER}payload", "0".repeat(36));
        let indented = indent(&line);
        assert_eq!(
            indented,
            format!("[{}]{FILLER}{FILLER}payload", "0".repeat(36))
        );

        // Two levels accumulate after the id column.
        let twice = indent(&indented);
        assert_eq!(
            twice,
            format!("[{}]{FILLER}{FILLER}{FILLER}payload", "0".repeat(36))
        );
    }

    #[test]
    fn test_non_root_nodes_are_rejected() {
        let root = TraceNode::new_root();
        let child = TraceNode::new_child(&root, NodeKind::Call);
        let error = render_root(&child).expect_err("a call node is not a root");
        assert!(matches!(error, RenderError::NotARoot { kind: "call" }));
    }

    #[test]
    fn test_never_started_nodes_are_an_explicit_error() {
        let root = TraceNode::new_root();
        let error = render_root(&root).expect_err("no start checkpoint");
        assert!(matches!(error, RenderError::NeverStarted { entries: 0 }));
    }

    #[test]
    fn test_resolved_tree_renders_all_phases() {
        let root = TraceNode::new_root();
        root.start(vec![json!("first"), json!(2)]);
        root.save_log("checked", json!({ "ok": true }));
        root.save_error(&LookupError);
        root.return_resolution(json!([10, 20]));
        root.finish();

        let text = render_root(&root).expect("render");
        assert!(text.contains("RootTraceNode"));
        assert!(text.contains("✅"));
        assert!(text.contains("(\"first\", 2) { <2 steps>"));
        assert!(text.contains("save_log('checked', {\"ok\":true})"));
        assert!(text.contains("save_error(LookupError('no such account'))"));
        assert!(text.contains("return: [10,20]"));
        assert!(text.contains("took"));
    }

    #[test]
    fn test_interrupted_node_renders_the_interrupted_closer() {
        let root = TraceNode::new_root();
        root.start(vec![]);
        root.save_log("before the unwind", json!({}));

        let text = render_root(&root).expect("render");
        assert!(text.contains("❌"));
        assert!(text.contains("[No finish trace entry means no uuid.]"));
        assert!(text.contains("Interrupted because an enclosing join_all rejected"));
    }

    #[test]
    fn test_branch_dropped_before_first_poll_renders_a_placeholder() {
        let root = TraceNode::new_root();
        root.start(vec![]);
        let group = TraceNode::new_child(&root, NodeKind::JoinAll);
        group.start(vec![]);
        group.set_expected_children(2);

        let failed = TraceNode::new_child(&group, NodeKind::Call);
        failed.start(vec![]);
        failed.error_resolution(&LookupError);
        failed.finish();

        // Constructed during dispatch, dropped before its first poll.
        let _never_polled = TraceNode::new_child(&group, NodeKind::Call);

        group.error_resolution(&LookupError);
        group.finish();
        root.error_resolution(&LookupError);
        root.finish();

        let text = render_root(&root).expect("render");
        assert!(text.contains("<never started>"));
        assert!(text.contains("[No start trace entry means no uuid. ]"));
    }

    #[test]
    fn test_rendering_is_idempotent() {
        let root = TraceNode::new_root();
        root.start(vec![json!(1)]);
        let child = TraceNode::new_child(&root, NodeKind::Call);
        child.start(vec![]);
        child.return_resolution(json!("inner"));
        child.finish();
        root.return_resolution(json!("outer"));
        root.finish();

        let first = render_root(&root).expect("render");
        let second = render_root(&root).expect("render");
        assert_eq!(first, second);
    }

    #[test]
    fn test_fan_out_group_counts_resolved_children() {
        let root = TraceNode::new_root();
        root.start(vec![]);
        let group = TraceNode::new_child(&root, NodeKind::JoinAll);
        group.start(vec![]);
        group.set_expected_children(2);

        let done = TraceNode::new_child(&group, NodeKind::Call);
        done.start(vec![]);
        done.return_resolution(json!(1));
        done.finish();

        let abandoned = TraceNode::new_child(&group, NodeKind::Call);
        abandoned.start(vec![]);

        group.error_resolution(&LookupError);
        group.finish();
        root.error_resolution(&LookupError);
        root.finish();

        let text = render_root(&root).expect("render");
        assert!(text.contains("await join_all([ <1 / 2 parallel steps>"));
        assert!(text.contains("Error: LookupError('no such account')"));
    }
}
