use std::time::Duration;

use thiserror::Error;

/// Errors surfaced while encoding or decoding a single CBOR value.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CborError {
    #[error("unexpected end of CBOR input")]
    UnexpectedEnd,
    #[error("unsupported additional info {0} for major type {1}")]
    UnsupportedAdditionalInfo(u8, u8),
    #[error("{0} trailing byte(s) after decoding top-level CBOR item")]
    TrailingBytes(usize),
    #[error("CBOR byte string is not valid UTF-8")]
    InvalidUtf8,
    #[error("CBOR map key was not a text string")]
    NonStringMapKey,
    #[error("value is not representable in CBOR (non-finite float without a lossless encoding)")]
    Unrepresentable,
    #[error("length-27 integer {0} exceeds the supported ceiling of 2^53-1")]
    IntegerOutOfRange(u64),
}

/// Errors surfaced by a [`crate::codec::Codec`] implementation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("CBOR error: {0}")]
    Cbor(#[from] CborError),
    #[error("JSON error: {0}")]
    Json(String),
    #[error("payload was neither valid CBOR nor valid JSON")]
    Undecodable,
    #[error("binary payload was not valid UTF-8 text")]
    InvalidUtf8,
}

/// Errors surfaced by a [`crate::transport::Transport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open socket to `{url}`: {reason}")]
    OpenFailed { url: String, reason: String },
    #[error("WebSocket is not connected")]
    NotConnected,
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Top-level error type for every fallible client operation.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to build a valid protocol message")]
    MessageBuildFailed,

    #[error("service call `{service}` (id={id}) timed out after {timeout:?}")]
    ServiceTimeout {
        service: String,
        id: String,
        timeout: Duration,
    },
    #[error("service call `{service}` (id={id}) failed: {message}")]
    ServiceFailed {
        service: String,
        id: String,
        message: String,
    },

    #[error("action `{action}` (id={id}) timed out after {timeout:?}")]
    ActionTimeout {
        action: String,
        id: String,
        timeout: Duration,
    },
    #[error("action `{action}` (id={id}) completed with non-success status {status}")]
    ActionNonSuccess {
        action: String,
        id: String,
        status: i64,
    },
    #[error("action `{action}` (id={id}) failed: {message}")]
    ActionFailed {
        action: String,
        id: String,
        message: String,
    },
    #[error("action `{action}` (id={id}) interrupted by disconnect; resend after reconnect")]
    ActionInterrupted { action: String, id: String },

    #[error("cancel of action `{action}` (session={session}) timed out after {timeout:?}")]
    CancelTimeout {
        action: String,
        session: String,
        timeout: Duration,
    },
    #[error("cancel of action `{action}` (session={session}) failed: {message}")]
    CancelFailed {
        action: String,
        session: String,
        message: String,
    },
    #[error("cancel of action `{action}` (session={session}) interrupted by disconnect; resend after reconnect")]
    CancelInterrupted { action: String, session: String },

    #[error("CLI command `{command}` (id={id}) timed out after {timeout:?}")]
    CliTimeout {
        command: String,
        id: String,
        timeout: Duration,
    },
    #[error("CLI command `{command}` (id={id}) failed: {message}")]
    CliFailed {
        command: String,
        id: String,
        message: String,
    },

    #[error("client is closed")]
    Closed,
    #[error("internal actor channel closed unexpectedly")]
    ChannelClosed,
}
