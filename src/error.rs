use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResolveError>;

/// Unified error type for the muninn resolver.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    // Terminal resolution outcomes
    #[error("unknown host: {0}")]
    UnknownHost(String),
    #[error("query budget exhausted after {tries} queries")]
    SearchBudgetExceeded {
        tries: u16,
        #[source]
        cause: Option<Box<ResolveError>>,
    },
    #[error("CNAME chain for {0} exceeded the redirect limit")]
    CnameLoop(String),
    #[error("referral chain for {0} exceeded the redirect limit")]
    RedirectLoop(String),

    // Per-query failures, retried against the next server
    #[error("query timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),
    #[error("no free query ids for {0}")]
    NoMoreIds(SocketAddr),
    #[error("malformed response: {0}")]
    Decode(String),

    // Resolver state errors
    #[error("resolver is closed")]
    ResolverClosed,

    // Configuration errors
    #[error("invalid name server address: {0}")]
    InvalidNameServer(String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid query budget: {0}")]
    InvalidQueryBudget(String),
    #[error("invalid search domain: {0}")]
    InvalidSearchDomain(String),
}

impl ResolveError {
    /// Whether a failure is worth retrying against the next server in the
    /// stream rather than surfacing to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResolveError::Timeout
                | ResolveError::Transport(_)
                | ResolveError::Io(_)
                | ResolveError::NoMoreIds(_)
        )
    }
}

impl From<std::io::Error> for ResolveError {
    fn from(err: std::io::Error) -> Self {
        ResolveError::Io(Arc::new(err))
    }
}

impl From<crate::dns::DecodeError> for ResolveError {
    fn from(err: crate::dns::DecodeError) -> Self {
        ResolveError::Decode(err.to_string())
    }
}
