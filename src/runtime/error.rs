//! Error handling.
//!
//! Loading fails with either a [`StructuralError`] (the serialized tree is
//! malformed) or an [`ExpansionError`] (the external expander failed). Both are
//! fatal for the module being loaded. Evaluation fails with a [`RuntimeError`],
//! which unwinds the continuation chain to the nearest handler frame.

use std::{fmt, path::PathBuf, process::ExitStatus, rc::Rc};

use thiserror::Error;

use super::value::Value;

/// Maximum number of characters of an offending fragment kept in an error.
const FRAGMENT_LIMIT: usize = 160;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub position: i64,
    pub file: Option<Rc<str>>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}", file, self.position),
            None => write!(f, "<unknown>:{}", self.position),
        }
    }
}

fn fmt_srcloc(srcloc: &Option<SourceLocation>) -> String {
    match srcloc {
        Some(loc) => format!(" (at {})", loc),
        None => String::new(),
    }
}

#[derive(Debug, Clone, Error)]
#[error("malformed expander output: {message}; offending fragment: {fragment}")]
pub struct StructuralError {
    pub message: String,
    pub fragment: String,
}

impl StructuralError {
    pub fn new(message: impl Into<String>, fragment: &serde_json::Value) -> Self {
        let mut fragment = fragment.to_string();
        if fragment.len() > FRAGMENT_LIMIT {
            let mut end = FRAGMENT_LIMIT;
            while !fragment.is_char_boundary(end) {
                end -= 1;
            }
            fragment.truncate(end);
            fragment.push_str("...");
        }

        Self {
            message: message.into(),
            fragment,
        }
    }

    pub fn without_fragment(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fragment: "<none>".to_owned(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExpansionError {
    #[error("expander did not produce output for {path}; is racket installed?")]
    NoOutput { path: PathBuf },
    #[error("expander failed on {path} ({status}): {output}")]
    Failed {
        path: PathBuf,
        status: ExitStatus,
        output: String,
    },
    #[error("no permission to write the expansion of {path}")]
    PermissionDenied { path: PathBuf },
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("expander produced invalid JSON for {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ExpansionError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, ExpansionError::PermissionDenied { .. })
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error(transparent)]
    Expansion(#[from] ExpansionError),
    /// A module whose earlier load attempt failed.
    #[error("module {file} failed to load: {error}")]
    Failed { file: String, error: String },
}

/// Any failure of loading or running a program.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

#[derive(Debug, Clone, Error)]
#[error("{message}{}", fmt_srcloc(.srcloc))]
pub struct RuntimeError {
    pub message: String,
    pub srcloc: Option<SourceLocation>,
    /// The value passed to `raise`, if this error was raised by the program.
    pub payload: Option<Value>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            srcloc: None,
            payload: None,
        }
    }

    pub fn raised(payload: Value) -> Self {
        Self {
            message: format!("uncaught exception: {}", payload),
            srcloc: None,
            payload: Some(payload),
        }
    }

    pub fn with_srcloc(mut self, srcloc: Option<SourceLocation>) -> Self {
        if self.srcloc.is_none() {
            self.srcloc = srcloc;
        }
        self
    }

    /// The value a handler receives for this error.
    pub fn to_value(&self) -> Value {
        match &self.payload {
            Some(payload) => payload.clone(),
            None => Value::string(&self.message),
        }
    }
}

pub type ScmResult<T = Value> = Result<T, RuntimeError>;

pub fn wrong_contract<T>(name: &str, expected: &str, position: usize, args: &[Value]) -> ScmResult<T> {
    let given = args
        .get(position)
        .map(|arg| arg.to_string())
        .unwrap_or_else(|| "nothing".to_owned());
    Err(RuntimeError::new(format!(
        "{}: contract violation\n  expected: {}\n  given: {}\n  argument position: {}",
        name,
        expected,
        given,
        position + 1
    )))
}

pub fn arity_error<T>(name: &str, expected: &str, given: usize) -> ScmResult<T> {
    Err(RuntimeError::new(format!(
        "{}: arity mismatch;\n the expected number of arguments does not match the given number\n  expected: {}\n  given: {}",
        name, expected, given
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_error_truncates_fragment() {
        let big = serde_json::Value::String("x".repeat(1000));
        let err = StructuralError::new("unexpected", &big);
        assert!(err.fragment.len() <= FRAGMENT_LIMIT + 3);
        assert!(err.to_string().contains("unexpected"));
    }

    #[test]
    fn runtime_error_keeps_first_srcloc() {
        let first = SourceLocation {
            position: 3,
            file: Some(Rc::from("a.rkt")),
        };
        let second = SourceLocation {
            position: 9,
            file: None,
        };
        let err = RuntimeError::new("boom")
            .with_srcloc(Some(first.clone()))
            .with_srcloc(Some(second));
        assert_eq!(err.srcloc, Some(first));
        assert_eq!(err.to_string(), "boom (at a.rkt:3)");
    }
}
