use strum::{AsRefStr, Display, EnumString};

use crate::progress::Message;

/// Every code the relay can report on its own account. Upstream codes
/// forwarded from a streamed `error` update are kept as plain strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConfigNotFound,
    InvalidConfig,
    MissingConversation,
    ConnectionError,
    TimeoutError,
    HttpError,
    InvalidResponse,
    IncompleteResponse,
    StreamingError,
    ResponseError,
    MissingFilePath,
    CompletionError,
    UnexpectedError,
    GeneralError,
}

#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RelayError {
    pub code: String,
    pub message: String,
}

impl RelayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn upstream(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    #[cfg(test)]
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.as_ref()
    }
}

impl From<RelayError> for Message {
    fn from(err: RelayError) -> Self {
        Message::Error {
            error: err.message,
            code: err.code,
        }
    }
}
