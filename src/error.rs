//! Error types for the scripted controller bridge.

use rhai::{EvalAltResult, ParseError, Position};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, RhaiError>;

type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the engine facade, class cache and controller factory.
#[derive(Debug, Error)]
pub enum RhaiError {
    /// A required script source does not exist.
    #[error("Can't find the file: {path}")]
    FileNotFound { path: String },

    /// Neither a script source nor the fallback factory resolved the name.
    #[error("No controller found for '{name}'")]
    HandlerNotFound {
        name: String,
        #[source]
        source: Option<Box<RhaiError>>,
    },

    /// Any failure raised from inside the script engine.
    #[error(transparent)]
    ScriptExecution(#[from] ScriptExecutionError),

    /// A handler source ran but did not bind the expected class.
    #[error("Script {path} did not define class {class_name}")]
    ClassNotDefined { class_name: String, path: String },

    /// Controller cleanup failed. Logged by the factory, never propagated.
    #[error("Failed to dispose controller {class_name}: {message}")]
    Disposal { class_name: String, message: String },

    /// Request exceeded its deadline.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The blocking task running a request failed.
    #[error("Request task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// IO error.
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Hot reload watcher error.
    #[cfg(feature = "hot-reload")]
    #[error("Watcher error: {0}")]
    Watcher(#[from] notify::Error),
}

impl RhaiError {
    /// Create a handler-not-found error without an underlying cause.
    pub fn handler_not_found(name: impl Into<String>) -> Self {
        RhaiError::HandlerNotFound {
            name: name.into(),
            source: None,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        RhaiError::ConfigError {
            message: message.into(),
        }
    }

    /// Returns the normalized script failure, if this is one.
    pub fn as_script_error(&self) -> Option<&ScriptExecutionError> {
        match self {
            RhaiError::ScriptExecution(err) => Some(err),
            _ => None,
        }
    }
}

/// A script engine failure normalized for the host.
///
/// The native Rhai error is kept as [`std::error::Error::source`] so
/// callers can still inspect it, but nothing engine specific appears in
/// the public surface.
#[derive(Debug)]
pub struct ScriptExecutionError {
    type_name: String,
    message: String,
    trace: String,
    cause: Option<BoxedCause>,
}

impl ScriptExecutionError {
    /// Create an error from its parts, with no native cause.
    pub fn new(
        type_name: impl Into<String>,
        message: impl Into<String>,
        trace: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            trace: trace.into(),
            cause: None,
        }
    }

    /// Translate a Rhai runtime error raised while running `origin`.
    pub fn from_eval(err: Box<EvalAltResult>, origin: &str) -> Self {
        let mut frames = Vec::new();
        let mut current: &EvalAltResult = &err;

        loop {
            match current {
                EvalAltResult::ErrorInFunctionCall(name, _, inner, pos) => {
                    frames.push(format!("in {name} {}", describe(*pos)));
                    current = inner;
                }
                EvalAltResult::ErrorInModule(module, inner, pos) => {
                    frames.push(format!("in module '{module}' {}", describe(*pos)));
                    current = inner;
                }
                _ => break,
            }
        }

        let type_name = type_name_of(current);
        let message = match current {
            EvalAltResult::ErrorRuntime(value, _) => value.to_string(),
            other => other.to_string(),
        };
        let message = if message.trim().is_empty() {
            format!("{type_name} raised without a message")
        } else {
            message
        };

        // Innermost frame first, like a backtrace.
        frames.reverse();
        frames.insert(0, format!("raised {}", describe(current.position())));
        frames.push(format!("from {origin}"));

        let cause: BoxedCause = err;
        Self {
            type_name: type_name.to_string(),
            message,
            trace: frames.join("\n"),
            cause: Some(cause),
        }
    }

    /// Translate a Rhai parse error for the source named `origin`.
    pub fn from_parse(err: ParseError, origin: &str) -> Self {
        let message = err.0.to_string();
        let trace = format!("raised {}\nfrom {origin}", describe(err.1));
        let cause: BoxedCause = Box::new(err);

        Self {
            type_name: "SyntaxError".to_string(),
            message,
            trace,
            cause: Some(cause),
        }
    }

    /// Name of the native error kind, e.g. `RuntimeError`.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Human readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Formatted trace, innermost frame first.
    pub fn trace(&self) -> &str {
        &self.trace
    }
}

impl fmt::Display for ScriptExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} threw an error: {}\n\nTrace:\n{}",
            self.type_name, self.message, self.trace
        )
    }
}

impl std::error::Error for ScriptExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

fn describe(pos: Position) -> String {
    if pos.is_none() {
        "at <unknown position>".to_string()
    } else {
        format!("at {pos}")
    }
}

fn type_name_of(err: &EvalAltResult) -> &'static str {
    match err {
        EvalAltResult::ErrorRuntime(..) => "RuntimeError",
        EvalAltResult::ErrorParsing(..) => "SyntaxError",
        EvalAltResult::ErrorFunctionNotFound(..) => "NoMethodError",
        EvalAltResult::ErrorVariableNotFound(..) => "NameError",
        EvalAltResult::ErrorPropertyNotFound(..) => "NoMethodError",
        EvalAltResult::ErrorModuleNotFound(..) => "LoadError",
        EvalAltResult::ErrorMismatchDataType(..)
        | EvalAltResult::ErrorMismatchOutputType(..) => "TypeError",
        EvalAltResult::ErrorIndexNotFound(..)
        | EvalAltResult::ErrorArrayBounds(..)
        | EvalAltResult::ErrorStringBounds(..) => "IndexError",
        EvalAltResult::ErrorArithmetic(..) => "ArithmeticError",
        EvalAltResult::ErrorTooManyOperations(..) => "OperationLimitError",
        EvalAltResult::ErrorStackOverflow(..) => "StackOverflowError",
        EvalAltResult::ErrorDataTooLarge(..) => "DataTooLargeError",
        EvalAltResult::ErrorTerminated(..) => "TerminatedError",
        _ => "ScriptError",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rhai::Engine;

    #[test]
    fn test_runtime_error_is_normalized() {
        let engine = Engine::new();
        let err = engine
            .run("fn explode() { throw \"kaboom\"; } explode();")
            .unwrap_err();

        let normalized = ScriptExecutionError::from_eval(err, "test.rhai");
        assert_eq!(normalized.type_name(), "RuntimeError");
        assert_eq!(normalized.message(), "kaboom");
        assert!(normalized.trace().contains("from test.rhai"));
        assert!(std::error::Error::source(&normalized).is_some());
    }

    #[test]
    fn test_parse_error_is_normalized() {
        let engine = Engine::new();
        let err = engine.compile("let x = ;").unwrap_err();

        let normalized = ScriptExecutionError::from_parse(err, "broken.rhai");
        assert_eq!(normalized.type_name(), "SyntaxError");
        assert!(!normalized.message().is_empty());
        assert!(normalized.trace().contains("broken.rhai"));
    }

    #[test]
    fn test_display_combines_all_parts() {
        let err = ScriptExecutionError::new("RuntimeError", "boom", "raised at 1:1");
        let text = err.to_string();
        assert!(text.contains("RuntimeError"));
        assert!(text.contains("boom"));
        assert!(text.contains("Trace:\nraised at 1:1"));
    }
}
