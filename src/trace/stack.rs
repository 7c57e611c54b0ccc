//! Call-stack capture for checkpoints.
//!
//! Checkpoints that describe a live instant (start, log, error) snapshot the
//! native call stack so the recap can show where in the traced program the
//! instant happened. The snapshot is filtered: frames belonging to this
//! crate's own trace machinery and frames from host runtime internals are
//! dropped, and surviving file paths are normalized into logical module
//! paths (source-root prefix and `.rs` extension stripped).
//!
//! Capture is synchronous and bounded by call depth. When the host provides
//! no usable symbols, or capture is disabled via `CRUMBTRAIL_NO_STACKS`, the
//! result is an empty sequence rather than an error.

use backtrace::Backtrace;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// One surviving frame of a filtered stack snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Logical module path with `:line[:column]` appended, e.g.
    /// `./billing/invoice:42:17`.
    pub full_path: Option<String>,

    /// Self type for method calls, when the symbol carries one.
    pub type_name: Option<String>,

    /// Last path segment of the demangled symbol.
    pub function_name: Option<String>,

    /// Same as `function_name` when the call went through a type.
    pub method_name: Option<String>,

    /// Source file exactly as reported by the backtrace.
    pub file_name: Option<String>,

    pub line: Option<u32>,

    pub column: Option<u32>,

    /// Whether the frame comes from async lowering (a generator closure).
    pub is_async: bool,
}

/// Kill switch for stack capture, read once per process.
static CAPTURE_DISABLED: Lazy<bool> =
    Lazy::new(|| std::env::var("CRUMBTRAIL_NO_STACKS").is_ok());

/// Everything up to and including the innermost `src/` directory.
static SOURCE_ROOT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:.*/)?src/").expect("valid source-root regex"));

static EXTENSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.rs$").expect("valid extension regex"));

/// Modules whose frames are this crate's own call sites around a capture.
const MACHINERY_MODULES: &[&str] = &[
    "crumbtrail::trace::checkpoint",
    "crumbtrail::trace::stack",
    "crumbtrail::trace::node",
    "crumbtrail::trace::executor",
];

/// Host runtime internals, the equivalent of a loader's own frames.
const HOST_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "backtrace::",
    "tokio::",
    "futures::",
    "futures_util::",
    "futures_executor::",
    "futures_core::",
    "test::",
    "rust_begin_unwind",
    "__rust",
    "_start",
    "start_thread",
];

/// Capture the current call stack, filtered and normalized.
///
/// Returns frames ordered innermost first. The innermost surviving frame is
/// the traced program's own call site, which the renderer uses to name the
/// traced invocation.
pub fn capture_filtered_stack() -> Vec<StackFrame> {
    if *CAPTURE_DISABLED {
        return Vec::new();
    }

    let trace = Backtrace::new();
    let mut frames = Vec::new();

    for frame in trace.frames() {
        for symbol in frame.symbols() {
            let Some(name) = symbol.name() else { continue };
            // Alternate formatting drops the trailing symbol hash.
            let demangled = format!("{name:#}");
            if is_machinery_frame(&demangled) || is_host_frame(&demangled) {
                continue;
            }

            let parsed = parse_symbol(&demangled);
            let file_name = symbol
                .filename()
                .map(|path| path.to_string_lossy().into_owned());
            let line = symbol.lineno();
            let column = symbol.colno();

            frames.push(StackFrame {
                full_path: file_name
                    .as_deref()
                    .map(|file| logical_path(file, line, column)),
                type_name: parsed.type_name,
                function_name: parsed.function_name,
                method_name: parsed.method_name,
                file_name,
                line,
                column,
                is_async: parsed.is_async,
            });
        }
    }

    frames
}

fn is_machinery_frame(symbol: &str) -> bool {
    MACHINERY_MODULES
        .iter()
        .any(|module| symbol.contains(module))
}

fn is_host_frame(symbol: &str) -> bool {
    let stripped = symbol.trim_start_matches('<');
    stripped == "main" || HOST_PREFIXES.iter().any(|prefix| stripped.starts_with(prefix))
}

/// Strip the source root and extension, then append `:line[:column]`.
fn logical_path(file_name: &str, line: Option<u32>, column: Option<u32>) -> String {
    let trimmed = SOURCE_ROOT_RE.replace(file_name, "");
    let trimmed = EXTENSION_RE.replace(&trimmed, "");
    let mut path = format!("./{}", trimmed.trim_start_matches('/'));

    let Some(line) = line else { return path };
    path.push_str(&format!(":{line}"));

    let Some(column) = column else { return path };
    path.push_str(&format!(":{column}"));

    path
}

struct ParsedSymbol {
    type_name: Option<String>,
    function_name: Option<String>,
    method_name: Option<String>,
    is_async: bool,
}

/// Split a demangled symbol into type, function and method names.
fn parse_symbol(symbol: &str) -> ParsedSymbol {
    let is_async = symbol.contains("{{closure}}");

    // Trait impl form: `<path::Type as path::Trait>::method`.
    if let Some(rest) = symbol.strip_prefix('<') {
        if let Some((self_type, tail)) = rest.split_once(" as ") {
            if let Some((_, method_path)) = tail.split_once(">::") {
                let function_name = last_named_segment(method_path);
                return ParsedSymbol {
                    type_name: Some(last_named_segment_of_type(self_type)),
                    method_name: function_name.clone(),
                    function_name,
                    is_async,
                };
            }
        }
    }

    let segments: Vec<&str> = symbol
        .split("::")
        .filter(|segment| *segment != "{{closure}}")
        .collect();

    let function_name = segments.last().map(|s| (*s).to_owned());
    let type_name = segments
        .len()
        .checked_sub(2)
        .and_then(|i| segments.get(i))
        .filter(|s| s.chars().next().is_some_and(char::is_uppercase))
        .map(|s| (*s).to_owned());
    let method_name = if type_name.is_some() {
        function_name.clone()
    } else {
        None
    };

    ParsedSymbol {
        type_name,
        function_name,
        method_name,
        is_async,
    }
}

fn last_named_segment(path: &str) -> Option<String> {
    path.rsplit("::")
        .find(|segment| *segment != "{{closure}}")
        .map(ToOwned::to_owned)
}

fn last_named_segment_of_type(self_type: &str) -> String {
    let without_generics = self_type.split('<').next().unwrap_or(self_type);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_logical_path_strips_source_root_and_extension() {
        assert_eq!(
            logical_path("/app/src/billing/invoice.rs", Some(42), Some(17)),
            "./billing/invoice:42:17"
        );
        assert_eq!(
            logical_path("src/lib.rs", Some(3), None),
            "./lib:3"
        );
        assert_eq!(logical_path("/opt/tool/main.rs", None, Some(9)), "./opt/tool/main");
    }

    #[test]
    fn test_logical_path_uses_innermost_source_root() {
        assert_eq!(
            logical_path("/home/u/project/src/trace/node.rs", Some(1), None),
            "./trace/node:1"
        );
    }

    #[test]
    fn test_parse_symbol_plain_function() {
        let parsed = parse_symbol("billing::invoice::settle");
        assert_eq!(parsed.function_name.as_deref(), Some("settle"));
        assert_eq!(parsed.type_name, None);
        assert_eq!(parsed.method_name, None);
        assert!(!parsed.is_async);
    }

    #[test]
    fn test_parse_symbol_method_call() {
        let parsed = parse_symbol("billing::invoice::Ledger::settle");
        assert_eq!(parsed.type_name.as_deref(), Some("Ledger"));
        assert_eq!(parsed.function_name.as_deref(), Some("settle"));
        assert_eq!(parsed.method_name.as_deref(), Some("settle"));
    }

    #[test]
    fn test_parse_symbol_async_closure() {
        let parsed = parse_symbol("billing::invoice::settle::{{closure}}");
        assert!(parsed.is_async);
        assert_eq!(parsed.function_name.as_deref(), Some("settle"));
    }

    #[test]
    fn test_parse_symbol_trait_impl() {
        let parsed = parse_symbol("<billing::Ledger as core::fmt::Debug>::fmt");
        assert_eq!(parsed.type_name.as_deref(), Some("Ledger"));
        assert_eq!(parsed.function_name.as_deref(), Some("fmt"));
    }

    #[test]
    fn test_machinery_frames_are_recognized() {
        assert!(is_machinery_frame(
            "crumbtrail::trace::checkpoint::Checkpoint::new"
        ));
        assert!(is_machinery_frame(
            "<crumbtrail::trace::node::TraceNode>::start"
        ));
        assert!(!is_machinery_frame("billing::invoice::settle"));
    }

    #[test]
    fn test_host_frames_are_recognized() {
        assert!(is_host_frame("std::rt::lang_start"));
        assert!(is_host_frame("tokio::runtime::task::core::Core<T,S>::poll"));
        assert!(is_host_frame("<core::future::from_generator::GenFuture<T>"));
        assert!(!is_host_frame("billing::invoice::settle"));
    }
}
