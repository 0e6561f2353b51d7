//! Request-scoped error taxonomy
//!
//! Every variant maps to the exact `error` string clients key off, so the
//! wire contract lives in one place. These errors never tear down a
//! connection; the router turns them into `error` envelopes.

use patchbay_protocol::ServerMessage;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid auth token")]
    InvalidToken,

    #[error("Thread not found")]
    ThreadNotFound,

    #[error("Action not found")]
    ActionNotFound,

    #[error("thread busy")]
    ThreadBusy,

    #[error("{0}")]
    Protocol(String),
}

impl RequestError {
    /// Wrap this error in the wire envelope, scoped to a thread when the
    /// request named one.
    pub fn into_envelope(self, thread_id: Option<String>) -> ServerMessage {
        ServerMessage::Error {
            thread_id,
            error: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RequestError;

    #[test]
    fn wire_strings_are_stable() {
        assert_eq!(RequestError::NotAuthenticated.to_string(), "Not authenticated");
        assert_eq!(RequestError::InvalidToken.to_string(), "Invalid auth token");
        assert_eq!(RequestError::ThreadNotFound.to_string(), "Thread not found");
        assert_eq!(RequestError::ActionNotFound.to_string(), "Action not found");
        assert_eq!(RequestError::ThreadBusy.to_string(), "thread busy");
    }
}
