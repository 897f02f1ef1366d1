//! Error types of the protocol engine.
//!
//! Every [`HttpError`] is fatal for the connection it occurred on: the socket
//! is closed and nothing further is sent.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("malformed request line")]
    MalformedRequestLine,

    #[error("malformed header")]
    MalformedHeader,

    #[error("request headers too large")]
    HeadersTooLarge,

    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("request body of {length} bytes exceeds the limit of {limit}")]
    BodyTooLarge { length: u64, limit: u64 },

    #[error("unsupported content type")]
    UnsupportedContentType,

    #[error("multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("connection stopped")]
    Stopped,
}

/// Failures of the streaming `multipart/form-data` decoder.
#[derive(Debug, Error)]
pub enum MultipartError {
    #[error("malformed part delimiter")]
    MalformedDelimiter,

    #[error("part headers too long")]
    PartHeadersTooLong,

    #[error("part without a name")]
    MissingPartName,

    #[error("upload limit exceeded")]
    UploadLimitExceeded,

    #[error("upload i/o error: {0}")]
    Io(#[from] std::io::Error),
}
