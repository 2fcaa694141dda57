use thiserror::Error;

/// Typed error hierarchy for socketon.
///
/// Use at module boundaries (query execution, domain operations, config
/// validation). Internal/leaf functions can continue using `anyhow::Result`;
/// the `Internal` variant converts via the `?` operator.
#[derive(Debug, Error)]
pub enum SocketonError {
    /// Missing or invalid startup parameters. Fatal, raised synchronously
    /// at construction time.
    #[error("configuration error: {0}")]
    Config(String),

    /// Network or query failure from the underlying transport, including
    /// query timeouts. Never crashes the session.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response could not be parsed as the expected structured document.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The requested result path is absent from the parsed response.
    /// Callers decide whether absence is fatal.
    #[error("result path not found: {0}")]
    PathNotFound(String),

    /// The server terminated the session credentials. Terminal: requires a
    /// caller-driven credential reset and a new session.
    #[error("session logged out")]
    LoggedOut,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SocketonError {
    /// Whether this error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Internal(_) => true,
            Self::Config(_)
            | Self::MalformedResponse(_)
            | Self::PathNotFound(_)
            | Self::LoggedOut => false,
        }
    }
}

#[cfg(test)]
mod tests;
