//! Public error types for the NWScript API.
//!
//! Lex, compile, encode and decode failures abort the whole call and are
//! surfaced as [`Error`]. Each converts to one or more [`Diagnostic`]s for
//! rendering. VM faults and decompiler ambiguities are not errors at this
//! level: they are reported inside the successful result.

use std::fmt;
use std::path::PathBuf;

use crate::container::{DecodeError, EncodeError};
use crate::parser::{CompileError, Span};

/// Public error type for all fatal toolchain failures.
#[derive(Debug)]
pub enum Error {
    /// The source failed to lex, parse or type check.
    ///
    /// `source` is the text of the root file, for rendering.
    Compilation {
        diagnostics: Vec<Diagnostic>,
        source: String,
    },

    /// A container could not be decoded.
    Decode(DecodeError),

    /// A program could not be encoded into a container.
    Encode(EncodeError),

    /// A file could not be read or written.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    pub fn compilation(err: CompileError, source: &str) -> Self {
        Error::Compilation {
            diagnostics: vec![err.to_diagnostic()],
            source: source.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Diagnostics describing this error.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self {
            Error::Compilation { diagnostics, .. } => diagnostics.clone(),
            Error::Decode(err) => vec![Diagnostic {
                severity: Severity::Error,
                message: err.to_string(),
                span: Span::default(),
                file: String::new(),
                help: None,
                code: Some(err.kind.code().to_string()),
            }],
            other => vec![Diagnostic {
                severity: Severity::Error,
                message: other.to_string(),
                span: Span::default(),
                file: String::new(),
                help: None,
                code: None,
            }],
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Compilation { diagnostics, .. } => {
                let error_count = diagnostics
                    .iter()
                    .filter(|d| d.severity == Severity::Error)
                    .count();
                write!(f, "Compilation failed with {} error(s)", error_count)?;
                if let Some(first) = diagnostics.first() {
                    write!(
                        f,
                        ": {}:{}:{}: {}",
                        first.file, first.span.line, first.span.column, first.message
                    )?;
                }
                Ok(())
            }
            Error::Decode(err) => write!(f, "Invalid container: {}", err),
            Error::Encode(err) => write!(f, "Cannot encode program: {}", err),
            Error::Io { path, source } => write!(f, "{}: {}", path.display(), source),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Compilation { .. } => None,
            Error::Decode(err) => Some(err),
            Error::Encode(err) => Some(err),
            Error::Io { source, .. } => Some(source),
        }
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::Decode(err)
    }
}

impl From<EncodeError> for Error {
    fn from(err: EncodeError) -> Self {
        Error::Encode(err)
    }
}

/// A diagnostic message with its source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,

    /// Primary diagnostic message.
    pub message: String,

    /// Source location of the primary issue. Default for errors that do not
    /// come from source text.
    pub span: Span,

    /// Name of the file `span` points into, `<input>` for the root source.
    pub file: String,

    /// Optional help text suggesting how to fix the issue.
    pub help: Option<String>,

    /// Stable code: `L0xx` lex, `C0xx` compile, `D0xx` decode.
    pub code: Option<String>,
}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}
