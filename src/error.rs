//! Error types for the edgechain engine.

use thiserror::Error;

/// Result type alias for chain operations.
pub type Result<T> = std::result::Result<T, EdgeError>;

/// Errors that can occur while executing a function chain.
#[derive(Error, Debug)]
pub enum EdgeError {
    /// Function-author misuse: cross-origin rewrite, rewrite loop, invalid
    /// cookie and the like. Always surfaced unless an on-error mode
    /// recovers the run.
    #[error("{0}")]
    User(String),

    /// Origin could not be reached after retries were exhausted.
    #[error("error while proxying request to origin: {message}")]
    Passthrough {
        message: String,
        #[source]
        source: Option<Box<EdgeError>>,
    },

    /// A condition making retry unsafe: the wrapped error exits the retry
    /// loop immediately while preserving the original cause.
    #[error("unretriable passthrough error: {source}")]
    Unretriable {
        #[source]
        source: Box<EdgeError>,
    },

    /// The request body stream was already read and cannot be replayed.
    #[error("request body already consumed")]
    BodyConsumed,

    /// The client hung up before the origin call completed.
    #[error("client disconnected before origin response")]
    ClientAborted,

    /// The request tree's cancellation token fired (timeout or explicit).
    #[error("execution cancelled")]
    Cancelled,

    /// An error thrown by a user function, attributed by name.
    #[error("edge function '{name}' failed: {message}")]
    Function { name: String, message: String },

    /// Invalid cookie attributes, raised eagerly at `set` time.
    #[error("invalid cookie: {0}")]
    Cookie(String),

    /// Transport or header-encoding failure.
    #[error("http error: {0}")]
    Http(String),

    /// Invalid route declaration (bad pattern, unknown on-error mode).
    #[error("invalid route configuration: {0}")]
    Config(String),
}

impl EdgeError {
    /// Create a user error.
    pub fn user(message: impl Into<String>) -> Self {
        EdgeError::User(message.into())
    }

    /// Attribute an error to a named function.
    pub fn function(name: impl Into<String>, message: impl Into<String>) -> Self {
        EdgeError::Function {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Wrap an error so the retry loop exits immediately.
    pub fn unretriable(source: EdgeError) -> Self {
        EdgeError::Unretriable {
            source: Box::new(source),
        }
    }

    /// Whether the retrying origin fetch may attempt this call again.
    pub fn is_retriable(&self) -> bool {
        matches!(self, EdgeError::Http(_) | EdgeError::Passthrough { .. })
    }
}

impl From<http::Error> for EdgeError {
    fn from(err: http::Error) -> Self {
        EdgeError::Http(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for EdgeError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        EdgeError::Http(err.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for EdgeError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        EdgeError::Http(err.to_string())
    }
}

impl From<http::uri::InvalidUri> for EdgeError {
    fn from(err: http::uri::InvalidUri) -> Self {
        EdgeError::User(format!("invalid URL: {}", err))
    }
}

impl From<serde_json::Error> for EdgeError {
    fn from(err: serde_json::Error) -> Self {
        EdgeError::Http(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriability_classification() {
        assert!(EdgeError::Http("connection reset".into()).is_retriable());
        assert!(!EdgeError::BodyConsumed.is_retriable());
        assert!(!EdgeError::Cancelled.is_retriable());
        assert!(!EdgeError::unretriable(EdgeError::Http("reset".into())).is_retriable());
    }

    #[test]
    fn unretriable_preserves_cause() {
        let err = EdgeError::unretriable(EdgeError::Http("broken pipe".into()));
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("broken pipe"));
    }
}
