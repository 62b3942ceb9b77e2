use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

use super::ChannelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    InvalidParams,
    Timeout,
    MissingBinary,
    NoSuitableMethod,
    ProtocolViolation,
    AccessDenied,
    NotFound,
    BootstrapFailed,
    Busy,
    ChannelClosed,
    CommandFailed,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

impl TransportError {
    pub fn new(
        kind: TransportErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
            retryable: matches!(
                kind,
                TransportErrorKind::Timeout | TransportErrorKind::Busy
            ),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::InvalidParams, "INVALID_PARAMS", message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, "TRANSPORT_TIMEOUT", message)
    }

    pub fn missing_binary(binary: &str) -> Self {
        Self::new(
            TransportErrorKind::MissingBinary,
            "MISSING_BINARY",
            format!("required remote binary not found: {}", binary),
        )
    }

    pub fn no_suitable_method(message: impl Into<String>) -> Self {
        Self::new(
            TransportErrorKind::NoSuitableMethod,
            "NO_SUITABLE_METHOD",
            message,
        )
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(
            TransportErrorKind::ProtocolViolation,
            "PROTOCOL_VIOLATION",
            message,
        )
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::AccessDenied, "ACCESS_DENIED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NotFound, "NOT_FOUND", message)
    }

    pub fn bootstrap_failed(message: impl Into<String>) -> Self {
        Self::new(
            TransportErrorKind::BootstrapFailed,
            "BOOTSTRAP_FAILED",
            message,
        )
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Busy, "CHANNEL_BUSY", message)
    }

    pub fn channel_closed(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::ChannelClosed, "CHANNEL_CLOSED", message)
    }

    pub fn command_failed(returncode: i32, command: &str) -> Self {
        Self::new(
            TransportErrorKind::CommandFailed,
            "COMMAND_FAILED",
            format!("command exited with status {}: {}", returncode, command),
        )
        .with_details(serde_json::json!({ "returncode": returncode }))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Internal, "INTERNAL", message)
    }

    pub fn is(&self, kind: TransportErrorKind) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for TransportError {}

impl From<ChannelError> for TransportError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Closed => TransportError::channel_closed("channel closed by peer"),
            ChannelError::Timeout => TransportError::timeout("channel operation timed out"),
            other => TransportError::internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        if let Some(inner) = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<TransportError>())
        {
            return inner.clone();
        }
        match err.kind() {
            std::io::ErrorKind::NotFound => TransportError::not_found(err.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                TransportError::access_denied(err.to_string())
            }
            std::io::ErrorKind::TimedOut => TransportError::timeout(err.to_string()),
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::BrokenPipe => {
                TransportError::channel_closed(err.to_string())
            }
            _ => TransportError::internal(err.to_string()),
        }
    }
}

impl From<TransportError> for std::io::Error {
    fn from(err: TransportError) -> Self {
        let kind = match err.kind {
            TransportErrorKind::NotFound => std::io::ErrorKind::NotFound,
            TransportErrorKind::AccessDenied => std::io::ErrorKind::PermissionDenied,
            TransportErrorKind::Timeout => std::io::ErrorKind::TimedOut,
            TransportErrorKind::ChannelClosed => std::io::ErrorKind::BrokenPipe,
            TransportErrorKind::InvalidParams => std::io::ErrorKind::InvalidInput,
            TransportErrorKind::ProtocolViolation => std::io::ErrorKind::InvalidData,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
