//! Client request and execution errors.
//!
//! Every [`RequestError`] variant except [`RequestError::Io`] is detected
//! before any peer cache is touched and is reported with status 400.
//! [`ExecuteError::Command`] reports a command no peer could accept.

use thiserror::Error;

use crate::table::TableName;

/// Errors caused by a malformed or unsatisfiable client request.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Request names a table that does not exist.
    #[error("bad request: table {0} does not exist")]
    UnknownTable(String),

    /// Request references a column the table does not declare.
    #[error("bad request: table {table} has no column {column}")]
    UnknownColumn { table: TableName, column: String },

    /// Filter or stats line uses an unsupported operator.
    #[error("bad request: invalid filter operator {0}")]
    InvalidOperator(String),

    /// Regex operator with a pattern that does not compile.
    #[error("bad request: invalid regular expression {pattern}: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    /// Header keyword is not part of the protocol.
    #[error("bad request: unrecognized header {0}")]
    UnknownHeader(String),

    /// Header value cannot be interpreted.
    #[error("bad request: invalid value for {header}: {value}")]
    InvalidValue { header: &'static str, value: String },

    /// `And`/`Or`/`Negate` reference more entries than were parsed.
    #[error("bad request: {header} needs {wanted} entries on the stack, found {available}")]
    StackUnderflow {
        header: &'static str,
        wanted: usize,
        available: usize,
    },

    /// `Backends:` names a peer that is not configured.
    #[error("bad request: backend {0} does not exist")]
    UnknownBackend(String),

    /// Any other grammar violation.
    #[error("bad request: {0}")]
    Malformed(String),

    /// Reading the request from the client failed.
    #[error("failed to read request: {0}")]
    Io(#[from] std::io::Error),
}

impl RequestError {
    /// Status code reported in `fixed16` response headers.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Io(_) => 500,
            _ => 400,
        }
    }
}

/// Errors surfaced while answering a request.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Command could not be delivered to every targeted peer.
    #[error("command failed: {0}")]
    Command(String),
}

impl ExecuteError {
    /// Status code reported in `fixed16` response headers.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Request(e) => e.status_code(),
            Self::Command(_) => 502,
        }
    }
}
