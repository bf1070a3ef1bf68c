use serde::{Deserialize, Serialize};
use shared::error::ResponseError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, timeout or non-success HTTP status. Always recoverable.
    Transport,
    /// Body not decodable into the expected shape.
    Parse,
    /// The backend answered, but not the way the handshake requires.
    Protocol,
    /// Logged out. Fatal to the whole listening session.
    SessionInvalidated,
    /// Nonzero error code that is not the logged-out sentinel.
    Server,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("parse failure: {0}")]
    Parse(String),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("messenger: (probably) logged out")]
    SessionInvalidated,
    #[error("messenger: unknown error {code} from server")]
    Server { code: i64 },
    #[error("not connected: call connect() before {0}")]
    NotConnected(&'static str),
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Transport(_) => ErrorKind::Transport,
            ChatError::Parse(_) => ErrorKind::Parse,
            ChatError::Protocol(_) | ChatError::NotConnected(_) => ErrorKind::Protocol,
            ChatError::SessionInvalidated => ErrorKind::SessionInvalidated,
            ChatError::Server { .. } => ErrorKind::Server,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::SessionInvalidated
    }
}

impl From<ResponseError> for ChatError {
    fn from(value: ResponseError) -> Self {
        match value {
            ResponseError::MissingPayload => ChatError::Parse(value.to_string()),
            ResponseError::Malformed(err) => ChatError::Parse(err.to_string()),
            ResponseError::LoggedOut => ChatError::SessionInvalidated,
            ResponseError::Server { code } => ChatError::Server { code },
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(value: serde_json::Error) -> Self {
        ChatError::Parse(value.to_string())
    }
}

/// Report of a non-terminal failure inside the listener, tagged with the
/// operation that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("listen: {op}: {message}")]
pub struct ListenError {
    pub op: &'static str,
    pub kind: ErrorKind,
    pub message: String,
}

impl ListenError {
    pub fn new(op: &'static str, err: &ChatError) -> Self {
        Self {
            op,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_errors_map_onto_taxonomy() {
        assert_eq!(
            ChatError::from(ResponseError::MissingPayload).kind(),
            ErrorKind::Parse
        );
        assert_eq!(
            ChatError::from(ResponseError::LoggedOut).kind(),
            ErrorKind::SessionInvalidated
        );
        assert_eq!(
            ChatError::from(ResponseError::Server { code: 7 }).kind(),
            ErrorKind::Server
        );
    }

    #[test]
    fn only_session_invalidation_is_fatal() {
        assert!(ChatError::SessionInvalidated.is_fatal());
        assert!(!ChatError::Protocol("non-lb".into()).is_fatal());
        assert!(!ChatError::Server { code: 1 }.is_fatal());
    }

    #[test]
    fn listen_error_names_operation() {
        let err = ListenError::new("parse listen", &ChatError::Parse("eof".into()));
        assert_eq!(err.to_string(), "listen: parse listen: parse failure: eof");
        assert_eq!(err.kind, ErrorKind::Parse);
    }
}
