use thiserror::Error;

use crate::stream_id::StreamId;

/// RSocket error codes as carried on the wire (ERROR frame body).
///
/// Numeric values match the RSocket 1.0 reference encoding so that an
/// `ErrorCode` round-trips through [`crate::frame::Frame::encode`] /
/// [`crate::frame::Frame::decode`] with the code a real peer would send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    InvalidSetup = 0x0000_0001,
    UnsupportedSetup = 0x0000_0002,
    RejectedSetup = 0x0000_0003,
    RejectedResume = 0x0000_0004,
    ConnectionError = 0x0000_0101,
    ConnectionClose = 0x0000_0102,
    ApplicationError = 0x0000_0201,
    Rejected = 0x0000_0202,
    Canceled = 0x0000_0203,
    Invalid = 0x0000_0204,
}

impl ErrorCode {
    pub fn from_u32(v: u32) -> Result<Self> {
        match v {
            0x0000_0001 => Ok(ErrorCode::InvalidSetup),
            0x0000_0002 => Ok(ErrorCode::UnsupportedSetup),
            0x0000_0003 => Ok(ErrorCode::RejectedSetup),
            0x0000_0004 => Ok(ErrorCode::RejectedResume),
            0x0000_0101 => Ok(ErrorCode::ConnectionError),
            0x0000_0102 => Ok(ErrorCode::ConnectionClose),
            0x0000_0201 => Ok(ErrorCode::ApplicationError),
            0x0000_0202 => Ok(ErrorCode::Rejected),
            0x0000_0203 => Ok(ErrorCode::Canceled),
            0x0000_0204 => Ok(ErrorCode::Invalid),
            other => Err(RequesterError::UnknownErrorCode(other)),
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::InvalidSetup => "INVALID_SETUP",
            ErrorCode::UnsupportedSetup => "UNSUPPORTED_SETUP",
            ErrorCode::RejectedSetup => "REJECTED_SETUP",
            ErrorCode::RejectedResume => "REJECTED_RESUME",
            ErrorCode::ConnectionError => "CONNECTION_ERROR",
            ErrorCode::ConnectionClose => "CONNECTION_CLOSE",
            ErrorCode::ApplicationError => "APPLICATION_ERROR",
            ErrorCode::Rejected => "REJECTED",
            ErrorCode::Canceled => "CANCELED",
            ErrorCode::Invalid => "INVALID",
        };
        write!(f, "{name}")
    }
}

/// A remote-observed error: an RSocket error code plus message, as carried
/// by an ERROR frame or surfaced in a `Result::Error` to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    pub code: ErrorCode,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// All errors produced by the Requester core.
#[derive(Debug, Error)]
pub enum RequesterError {
    #[error("stream {0} not found")]
    StreamNotFound(StreamId),

    #[error("stream {0} is closed")]
    StreamClosed(StreamId),

    #[error("no stream id available (space exhausted)")]
    NoStreamIdAvailable,

    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("protocol violation on stream {stream_id}: {reason}")]
    ProtocolViolation { stream_id: StreamId, reason: String },

    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("unknown frame type: 0x{0:02x}")]
    UnknownFrameType(u8),

    #[error("unknown error code: 0x{0:08x}")]
    UnknownErrorCode(u32),

    #[error("payload is not JSON-serializable: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("operation canceled")]
    Canceled,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("remote error: {0}")]
    Remote(RemoteError),

    #[error("outbound sender is closed")]
    SenderClosed,

    #[error("internal error: {0}")]
    Internal(String),
}

impl RequesterError {
    /// Map this error onto the RSocket error code it represents on the wire,
    /// where applicable (local-only errors like [`RequesterError::
    /// StreamNotFound`] never cross the wire and have no code).
    pub fn as_error_code(&self) -> Option<ErrorCode> {
        match self {
            RequesterError::Canceled => Some(ErrorCode::Canceled),
            RequesterError::ConnectionClosed => Some(ErrorCode::ConnectionClose),
            RequesterError::ProtocolViolation { .. } => Some(ErrorCode::Invalid),
            RequesterError::Remote(e) => Some(e.code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RequesterError>;
