//! Checkpoint types for the traced-call lifecycle.
//!
//! A checkpoint is an immutable record of one instant in a traced node's
//! life. Its kind is a closed sum type: the payload shape, the presence of a
//! description and the presence of a captured stack are all functions of the
//! kind, validated at construction and never left to the caller.
//!
//! ```text
//! executionStart ── args
//!   log ─────────── description + structured payload     (zero or more)
//!   error ───────── ErrorDetails                          (zero or more)
//! wasResolvedWithReturn | wasResolvedWithError | ...      (exactly one)
//! executionFinish                                         (exactly one)
//! ```

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::time::SystemTime;
use uuid::Uuid;

use super::stack::{capture_filtered_stack, StackFrame};

/// Description recorded when a thrown value has no recognizable error shape.
pub const NOT_AN_ERROR_DESCRIPTION: &str =
    "captured a thrown value that is not a recognizable error";

/// Serialize SystemTime as an RFC3339 string.
fn serialize_system_time<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    use chrono::{DateTime, Utc};
    let datetime: DateTime<Utc> = (*time).into();
    serializer.serialize_str(&datetime.to_rfc3339())
}

// ============================================================================
// Checkpoint
// ============================================================================

/// One immutable, timestamped record of a lifecycle event.
#[derive(Debug, Clone, Serialize)]
pub struct Checkpoint {
    /// Unique checkpoint identifier (UUID v7, time-ordered).
    pub id: Uuid,

    /// When the checkpoint was recorded.
    #[serde(serialize_with = "serialize_system_time")]
    pub time: SystemTime,

    /// Kind tag plus kind-specific payload.
    #[serde(flatten)]
    pub kind: CheckpointKind,

    /// Filtered call-stack snapshot; empty for kinds that do not capture,
    /// or when the host provides no symbols.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stack: Vec<StackFrame>,
}

impl Checkpoint {
    /// Record a checkpoint of the given kind, capturing the call stack when
    /// the kind asks for one.
    pub fn new(kind: CheckpointKind) -> Self {
        let stack = if kind.captures_stack() {
            capture_filtered_stack()
        } else {
            Vec::new()
        };

        Self {
            id: Uuid::now_v7(),
            time: SystemTime::now(),
            kind,
            stack,
        }
    }

    /// Wall-clock time elapsed since an earlier checkpoint.
    pub fn elapsed_since(&self, earlier: &Checkpoint) -> std::time::Duration {
        self.time.duration_since(earlier.time).unwrap_or_default()
    }
}

/// The eight checkpoint kinds. Serialized with a camelCase `status` tag,
/// keeping the historical wire names.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CheckpointKind {
    /// The traced call began; wraps its argument list.
    ExecutionStart { args: Vec<Value> },

    /// A structured log record emitted by the traced body.
    Log { description: String, payload: Value },

    /// A recognizable error observed mid-execution.
    Error { error: ErrorDetails },

    /// A thrown value without error structure observed mid-execution.
    ErrorWithUnknownStructure { description: String, error: Value },

    /// The call settled by throwing a recognizable error.
    WasResolvedWithError { error: ErrorDetails },

    /// The call settled by throwing a value without error structure.
    WasResolvedWithErrorWithUnknownStructure { description: String, error: Value },

    /// The call settled by returning; wraps the return value.
    WasResolvedWithReturn { result: Value },

    /// The unconditional last entry of a completed call.
    ExecutionFinish,
}

impl CheckpointKind {
    /// Whether this kind snapshots the call stack at construction.
    pub fn captures_stack(&self) -> bool {
        !matches!(
            self,
            CheckpointKind::WasResolvedWithReturn { .. } | CheckpointKind::ExecutionFinish
        )
    }

    pub fn is_start(&self) -> bool {
        matches!(self, CheckpointKind::ExecutionStart { .. })
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, CheckpointKind::ExecutionFinish)
    }

    /// One of the three kinds that settle a call.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            CheckpointKind::WasResolvedWithReturn { .. }
                | CheckpointKind::WasResolvedWithError { .. }
                | CheckpointKind::WasResolvedWithErrorWithUnknownStructure { .. }
        )
    }

    /// Description text, present only for the kinds that carry one.
    pub fn description(&self) -> Option<&str> {
        match self {
            CheckpointKind::Log { description, .. }
            | CheckpointKind::ErrorWithUnknownStructure { description, .. }
            | CheckpointKind::WasResolvedWithErrorWithUnknownStructure { description, .. } => {
                Some(description)
            }
            _ => None,
        }
    }

    /// Wire name of the kind tag.
    pub fn status_name(&self) -> &'static str {
        match self {
            CheckpointKind::ExecutionStart { .. } => "executionStart",
            CheckpointKind::Log { .. } => "log",
            CheckpointKind::Error { .. } => "error",
            CheckpointKind::ErrorWithUnknownStructure { .. } => "errorWithUnknownStructure",
            CheckpointKind::WasResolvedWithError { .. } => "wasResolvedWithError",
            CheckpointKind::WasResolvedWithErrorWithUnknownStructure { .. } => {
                "wasResolvedWithErrorWithUnknownStructure"
            }
            CheckpointKind::WasResolvedWithReturn { .. } => "wasResolvedWithReturn",
            CheckpointKind::ExecutionFinish => "executionFinish",
        }
    }
}

// ============================================================================
// Error wrappers
// ============================================================================

/// Serializable wrapper for a recognizable error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetails {
    /// Short type name of the error.
    pub name: String,

    /// The error's display message.
    pub message: String,

    /// Formatted source chain, when the error has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<String>,
}

impl ErrorDetails {
    /// Capture name, message and source chain from a typed error.
    pub fn capture<E: std::error::Error>(error: &E) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        Self {
            name: short_type_name(std::any::type_name::<E>()),
            message: error.to_string(),
            chain: if causes.is_empty() {
                None
            } else {
                Some(causes.join("\ncaused by: "))
            },
        }
    }
}

/// `billing::invoice::SettleError<T>` becomes `SettleError`.
fn short_type_name(full: &str) -> String {
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
        .to_owned()
}

// ============================================================================
// Thrown-value classification
// ============================================================================

/// A value that escaped a traced body through its failure path, classified.
#[derive(Debug, Clone)]
pub enum ThrownValue {
    /// The value has recognizable error structure.
    Error(ErrorDetails),

    /// Anything else; the raw value is preserved for inspection.
    Opaque(Value),
}

impl ThrownValue {
    /// Classify a typed error. One-line building block for `Thrown` impls.
    pub fn from_error<E: std::error::Error>(error: &E) -> Self {
        ThrownValue::Error(ErrorDetails::capture(error))
    }

    /// Classify a panic payload. String payloads are preserved verbatim;
    /// other payload types cannot be inspected and are recorded opaquely.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        if let Some(message) = payload.downcast_ref::<&str>() {
            ThrownValue::Opaque(Value::String((*message).to_owned()))
        } else if let Some(message) = payload.downcast_ref::<String>() {
            ThrownValue::Opaque(Value::String(message.clone()))
        } else {
            ThrownValue::Opaque(Value::String("<non-string panic payload>".to_owned()))
        }
    }
}

/// How a traced body's failure value is recorded into a checkpoint.
///
/// Implemented for the common currencies below; a custom error type opts in
/// with one line:
///
/// ```
/// use crumbtrail::trace::{Thrown, ThrownValue};
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("value out of range")]
/// struct RangeError;
///
/// impl Thrown for RangeError {
///     fn to_thrown(&self) -> ThrownValue {
///         ThrownValue::from_error(self)
///     }
/// }
/// ```
pub trait Thrown {
    fn to_thrown(&self) -> ThrownValue;
}

impl Thrown for ThrownValue {
    fn to_thrown(&self) -> ThrownValue {
        self.clone()
    }
}

impl Thrown for anyhow::Error {
    fn to_thrown(&self) -> ThrownValue {
        let causes: Vec<String> = self.chain().skip(1).map(|c| c.to_string()).collect();
        ThrownValue::Error(ErrorDetails {
            name: "Error".to_owned(),
            message: self.to_string(),
            chain: if causes.is_empty() {
                None
            } else {
                Some(causes.join("\ncaused by: "))
            },
        })
    }
}

impl Thrown for String {
    fn to_thrown(&self) -> ThrownValue {
        ThrownValue::Opaque(Value::String(self.clone()))
    }
}

impl Thrown for &str {
    fn to_thrown(&self) -> ThrownValue {
        ThrownValue::Opaque(Value::String((*self).to_owned()))
    }
}

impl Thrown for Value {
    fn to_thrown(&self) -> ThrownValue {
        ThrownValue::Opaque(self.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[derive(Debug, thiserror::Error)]
    #[error("outer failed")]
    struct OuterError {
        #[source]
        source: InnerError,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("inner failed")]
    struct InnerError;

    #[test]
    fn test_stack_presence_follows_kind() {
        assert!(CheckpointKind::ExecutionStart { args: vec![] }.captures_stack());
        assert!(CheckpointKind::Log {
            description: "d".into(),
            payload: json!({})
        }
        .captures_stack());
        assert!(!CheckpointKind::WasResolvedWithReturn { result: json!(1) }.captures_stack());
        assert!(!CheckpointKind::ExecutionFinish.captures_stack());

        let finish = Checkpoint::new(CheckpointKind::ExecutionFinish);
        assert!(finish.stack.is_empty());
    }

    #[test]
    fn test_description_presence_follows_kind() {
        let log = CheckpointKind::Log {
            description: "step".into(),
            payload: json!({}),
        };
        assert_eq!(log.description(), Some("step"));

        let error = CheckpointKind::Error {
            error: ErrorDetails::capture(&InnerError),
        };
        assert_eq!(error.description(), None);

        let unknown = CheckpointKind::ErrorWithUnknownStructure {
            description: NOT_AN_ERROR_DESCRIPTION.to_owned(),
            error: json!(42),
        };
        assert_eq!(unknown.description(), Some(NOT_AN_ERROR_DESCRIPTION));
    }

    #[test]
    fn test_error_details_capture_name_message_chain() {
        let error = OuterError { source: InnerError };
        let details = ErrorDetails::capture(&error);

        assert_eq!(details.name, "OuterError");
        assert_eq!(details.message, "outer failed");
        assert_eq!(details.chain.as_deref(), Some("inner failed"));

        let flat = ErrorDetails::capture(&InnerError);
        assert_eq!(flat.name, "InnerError");
        assert_eq!(flat.chain, None);
    }

    #[test]
    fn test_thrown_classification() {
        let recognizable = ThrownValue::from_error(&InnerError);
        assert!(matches!(recognizable, ThrownValue::Error(_)));

        let anyhow_error = anyhow::anyhow!("broke").context("while settling");
        match anyhow_error.to_thrown() {
            ThrownValue::Error(details) => {
                assert_eq!(details.name, "Error");
                assert_eq!(details.message, "while settling");
                assert_eq!(details.chain.as_deref(), Some("broke"));
            }
            ThrownValue::Opaque(_) => panic!("anyhow errors are recognizable"),
        }

        match json!({ "code": 7 }).to_thrown() {
            ThrownValue::Opaque(value) => assert_eq!(value, json!({ "code": 7 })),
            ThrownValue::Error(_) => panic!("raw values are opaque"),
        }
    }

    #[test]
    fn test_panic_payload_classification() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        match ThrownValue::from_panic(boxed.as_ref()) {
            ThrownValue::Opaque(value) => assert_eq!(value, json!("boom")),
            ThrownValue::Error(_) => panic!("panic payloads are never recognizable"),
        }

        let opaque: Box<dyn std::any::Any + Send> = Box::new(17_u8);
        match ThrownValue::from_panic(opaque.as_ref()) {
            ThrownValue::Opaque(value) => assert_eq!(value, json!("<non-string panic payload>")),
            ThrownValue::Error(_) => panic!("panic payloads are never recognizable"),
        }
    }

    #[test]
    fn test_checkpoint_serializes_with_status_tag() {
        let checkpoint = Checkpoint::new(CheckpointKind::WasResolvedWithReturn {
            result: json!([1, 2]),
        });
        let serialized = serde_json::to_value(&checkpoint).expect("serialize");

        assert_eq!(serialized["status"], json!("wasResolvedWithReturn"));
        assert_eq!(serialized["result"], json!([1, 2]));
        assert!(serialized.get("stack").is_none());

        let finish = Checkpoint::new(CheckpointKind::ExecutionFinish);
        let serialized = serde_json::to_value(&finish).expect("serialize");
        assert_eq!(serialized["status"], json!("executionFinish"));
    }

    #[test]
    fn test_status_names_are_the_wire_names() {
        assert_eq!(
            CheckpointKind::ExecutionStart { args: vec![] }.status_name(),
            "executionStart"
        );
        assert_eq!(
            CheckpointKind::WasResolvedWithErrorWithUnknownStructure {
                description: String::new(),
                error: json!(null),
            }
            .status_name(),
            "wasResolvedWithErrorWithUnknownStructure"
        );
    }
}
