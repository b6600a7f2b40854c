//! Error taxonomy shared by ingestion, aggregation and storage

use thiserror::Error;

/// A single input row that cannot become an interval record.
///
/// Never fatal: the row is logged and left out of every sum.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("malformed record{}: {reason}", line_suffix(.line))]
pub struct MalformedInputError {
    pub line: Option<u64>,
    pub reason: String,
}

fn line_suffix(line: &Option<u64>) -> String {
    line.map(|l| format!(" at line {}", l)).unwrap_or_default()
}

impl MalformedInputError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            line: None,
            reason: reason.into(),
        }
    }

    pub fn at_line(mut self, line: Option<u64>) -> Self {
        self.line = line;
        self
    }
}

/// Failures of the interval repository or the summary store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or out of pooled connections; safe to retry
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// The backend refused the statement. Retrying sends the same statement.
    #[error("storage rejected the operation: {0}")]
    Rejected(String),
    /// A stored row no longer decodes into the domain types
    #[error("corrupt stored row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sea_orm::DbErr> for StoreError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err {
            sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Rejected(other.to_string()),
        }
    }
}

/// Failures of summary queries
#[derive(Debug, Error)]
pub enum QueryError {
    /// The answer would need an unbounded scan of raw intervals
    #[error("{0}")]
    Unbounded(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures talking to the ENTSO-E transparency web API
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("ENTSO-E request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ENTSO-E API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unreadable ENTSO-E document: {0}")]
    Document(#[from] quick_xml::DeError),
    #[error("invalid time interval in ENTSO-E document: '{0}'")]
    Interval(String),
}

impl FetchError {
    /// Transport failures, throttling and server-side errors may go away on retry
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http(e) => !e.is_builder() && !e.is_decode(),
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Document(_) | FetchError::Interval(_) => false,
        }
    }
}

/// File-level ingestion failures. Row-level problems are `MalformedInputError`s.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse CSV {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("unrecognised CSV layout in {path}: missing column '{column}'")]
    UnknownLayout { path: String, column: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}
