//! Error types for wirepg.

use thiserror::Error;

use crate::scram::ScramError;

/// Result type for wirepg operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Category names for error/notice field codes.
///
/// Both `'S'` and `'V'` report as "Severity". Codes outside the table report as "UNKNOWN".
pub fn field_category(code: u8) -> &'static str {
    match code {
        b'S' | b'V' => "Severity",
        b'C' => "Code",
        b'M' => "Message",
        b'D' => "Detail",
        b'H' => "Hint",
        b'P' => "Position",
        b'p' => "Internal Position",
        b'q' => "Internal Query",
        b'W' => "Where",
        b's' => "Schema",
        b't' => "Table name",
        b'c' => "Column name",
        b'd' => "Data type name",
        b'n' => "Constraint name",
        b'F' => "File",
        b'L' => "Line",
        b'R' => "Routine",
        _ => "UNKNOWN",
    }
}

/// PostgreSQL error/notice fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (same as severity but never translated)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Position in internal query
    pub internal_position: Option<u32>,
    /// Failed internal command text
    pub internal_query: Option<String>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source file name
    pub file: Option<String>,
    /// Source line number
    pub line: Option<u32>,
    /// Source routine name
    pub routine: Option<String>,
    /// Fields with a code outside the known table, in wire order
    pub unknown: Vec<(u8, String)>,
}

impl ErrorFields {
    /// Severity, preferring the non-localized form.
    pub fn severity(&self) -> Option<&str> {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
    }

    /// All present fields as `(category, value)` pairs.
    ///
    /// Category names follow [`field_category`]. Numeric fields are rendered
    /// back to text.
    pub fn categories(&self) -> Vec<(&'static str, String)> {
        let text = [
            (b'S', &self.severity),
            (b'V', &self.severity_non_localized),
            (b'C', &self.code),
            (b'M', &self.message),
            (b'D', &self.detail),
            (b'H', &self.hint),
            (b'q', &self.internal_query),
            (b'W', &self.where_),
            (b's', &self.schema),
            (b't', &self.table),
            (b'c', &self.column),
            (b'd', &self.data_type),
            (b'n', &self.constraint),
            (b'F', &self.file),
            (b'R', &self.routine),
        ];
        let numeric = [
            (b'P', self.position),
            (b'p', self.internal_position),
            (b'L', self.line),
        ];

        let mut out = Vec::new();
        for (code, value) in text {
            if let Some(value) = value {
                out.push((field_category(code), value.clone()));
            }
        }
        for (code, value) in numeric {
            if let Some(value) = value {
                out.push((field_category(code), value.to_string()));
            }
        }
        for (code, value) in &self.unknown {
            out.push((field_category(*code), value.clone()));
        }
        out
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Error type for wirepg.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(ErrorFields),

    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error (connection refused, stream closed mid-frame, ...)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// SCRAM-SHA-256 exchange failed
    #[error("SCRAM error: {0}")]
    Scram(#[from] ScramError),

    /// Connection startup (authentication or parameter exchange) failed
    #[error("Connection startup failed: {0}")]
    Startup(Box<Error>),

    /// A read loop hit the configured message limit before completing
    #[error("{operation}: no completion after {limit} messages")]
    LoopExhausted {
        /// Operation whose response never completed
        operation: &'static str,
        /// The limit that was hit
        limit: usize,
    },

    /// Connection is broken and cannot be reused
    #[error("Connection is broken")]
    ConnectionBroken,

    /// Connection was closed by `close()`
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Invalid usage (e.g., bad connection URL)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Returns true if the error indicates the connection is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_)
            | Error::ConnectionBroken
            | Error::Protocol(_)
            | Error::LoopExhausted { .. }
            | Error::Startup(_) => true,
            Error::Server(fields) => {
                // FATAL and PANIC errors indicate connection is broken
                matches!(fields.severity(), Some("FATAL") | Some("PANIC"))
            }
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            Error::Startup(inner) => inner.sqlstate(),
            _ => None,
        }
    }

    /// Wrap an error raised during connection startup.
    pub(crate) fn startup(self) -> Self {
        match self {
            Error::Startup(_) => self,
            other => Error::Startup(Box::new(other)),
        }
    }
}

impl From<core::convert::Infallible> for Error {
    fn from(value: core::convert::Infallible) -> Self {
        match value {}
    }
}
