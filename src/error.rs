use thiserror::Error;

/// Central error type for ETL operations.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Upstream API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Epoch seconds at which the upstream promises to replenish.
        reset_at: Option<i64>,
    },

    #[error("GraphQL error: {0}")]
    GraphQl(String),

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<EtlError> },

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for ETL results.
pub type EtlResult<T> = Result<T, EtlError>;

/// Coarse failure classification driving the orchestrator's isolation
/// policy: transient errors stay inside the retry harness, mapping errors
/// stay inside the repository, sink and config errors terminate the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Upstream,
    Mapping,
    Sink,
    Config,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Mapping => "mapping",
            ErrorKind::Sink => "sink",
            ErrorKind::Config => "config",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

impl EtlError {
    /// Whether the retry harness should try this request again.
    pub fn is_retryable(&self) -> bool {
        match self {
            EtlError::Network(_) => true,
            EtlError::RateLimited { .. } => true,
            EtlError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EtlError::Network(_) | EtlError::RateLimited { .. } => ErrorKind::Transient,
            EtlError::Api { status, .. } if *status == 429 || *status >= 500 => {
                ErrorKind::Transient
            }
            EtlError::Api { .. } | EtlError::GraphQl(_) => ErrorKind::Upstream,
            EtlError::RetriesExhausted { last, .. } => match last.kind() {
                // A transient error that outlived the retry budget surfaces
                // as an upstream failure for the current repository.
                ErrorKind::Transient => ErrorKind::Upstream,
                kind => kind,
            },
            EtlError::Mapping(_) => ErrorKind::Mapping,
            EtlError::Sink(_) => ErrorKind::Sink,
            EtlError::Config(_) | EtlError::UrlParse(_) => ErrorKind::Config,
            EtlError::Serialization(_) | EtlError::Io(_) => ErrorKind::Sink,
            EtlError::Cancelled => ErrorKind::Cancelled,
            EtlError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this failure must abort the whole run rather than the
    /// current repository.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Sink | ErrorKind::Config | ErrorKind::Cancelled | ErrorKind::Internal
        )
    }
}
