// Copyright (c) 2023 Huawei Device Co., Ltd.
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Errors that may occur on an HTTP/2 connection.
//!
//! Three kinds are distinguished:
//!
//! - [`Http2Error`]: protocol-level faults, either produced locally while
//!   validating peer frames or reported by the server through `RST_STREAM`
//!   and `GOAWAY`.
//! - [`TransportError`]: I/O faults reported by the [`Transport`]
//!   implementation underneath the connection.
//! - Precondition violations (calling `recv` on an active-mode connection,
//!   querying the window of an unknown request, passing an out-of-range
//!   setting value). These are programmer mistakes and panic instead of
//!   returning an error value.
//!
//! [`Transport`]: crate::transport::Transport

use thiserror::Error;

use crate::frame::StreamId;

/// [`Error Codes`] of the HTTP/2 protocol.
///
/// Error codes are 32-bit fields used in `RST_STREAM` and `GOAWAY` frames
/// to convey the reasons for the stream or connection error.
///
/// [`Error Codes`]: https://httpwg.org/specs/rfc9113.html#ErrorCodes
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum ErrorCode {
    /// The associated condition is not a result of an error. For example,
    /// a `GOAWAY` might include this code to indicate graceful shutdown of
    /// a connection.
    NoError = 0x00,

    /// The endpoint detected an unspecific protocol error. This error is
    /// for use when a more specific error code is not available.
    ProtocolError = 0x01,

    /// The endpoint encountered an unexpected internal error.
    InternalError = 0x02,

    /// The endpoint detected that its peer violated the flow-control
    /// protocol.
    FlowControlError = 0x03,

    /// The endpoint sent a `SETTINGS` frame but did not receive a response
    /// in a timely manner.
    SettingsTimeout = 0x04,

    /// The endpoint received a frame after a stream was half-closed.
    StreamClosed = 0x05,

    /// The endpoint received a frame with an invalid size.
    FrameSizeError = 0x06,

    /// The endpoint refused the stream prior to performing any application
    /// processing.
    RefusedStream = 0x07,

    /// The endpoint uses this error code to indicate that the stream is no
    /// longer needed.
    Cancel = 0x08,

    /// The endpoint is unable to maintain the field section compression
    /// context for the connection.
    CompressionError = 0x09,

    /// The connection established in response to a `CONNECT` request was
    /// reset or abnormally closed.
    ConnectError = 0x0a,

    /// The endpoint detected that its peer is exhibiting a behavior that
    /// might be generating excessive load.
    EnhanceYourCalm = 0x0b,

    /// The underlying transport has properties that do not meet minimum
    /// security requirements.
    InadequateSecurity = 0x0c,

    /// The endpoint requires that HTTP/1.1 be used instead of HTTP/2.
    Http1_1Required = 0x0d,
}

impl ErrorCode {
    /// Gets the 32-bit code of the `ErrorCode` enum.
    pub fn into_code(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for ErrorCode {
    type Error = H2Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        let err = match value {
            0x00 => ErrorCode::NoError,
            0x01 => ErrorCode::ProtocolError,
            0x02 => ErrorCode::InternalError,
            0x03 => ErrorCode::FlowControlError,
            0x04 => ErrorCode::SettingsTimeout,
            0x05 => ErrorCode::StreamClosed,
            0x06 => ErrorCode::FrameSizeError,
            0x07 => ErrorCode::RefusedStream,
            0x08 => ErrorCode::Cancel,
            0x09 => ErrorCode::CompressionError,
            0x0a => ErrorCode::ConnectError,
            0x0b => ErrorCode::EnhanceYourCalm,
            0x0c => ErrorCode::InadequateSecurity,
            0x0d => ErrorCode::Http1_1Required,
            _ => {
                return Err(H2Error::conn(
                    ErrorCode::ProtocolError,
                    format!("unknown error code {value}"),
                ))
            }
        };
        Ok(err)
    }
}

/// Wire-level error raised while validating or applying a frame. Carries
/// the RFC error code plus the debug text that ends up in the outgoing
/// `GOAWAY` or in the surfaced [`Http2Error`].
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum H2Error {
    /// [`Connection Error`] handling: the whole connection is tainted.
    ///
    /// [`Connection Error`]: https://www.rfc-editor.org/rfc/rfc9113.html#name-connection-error-handling
    Connection(ErrorCode, String),

    /// [`Stream Error`] handling: only the named stream is affected.
    ///
    /// [`Stream Error`]: https://www.rfc-editor.org/rfc/rfc9113.html#name-stream-error-handling
    Stream(StreamId, ErrorCode, String),
}

impl H2Error {
    pub(crate) fn conn(code: ErrorCode, debug: impl Into<String>) -> Self {
        H2Error::Connection(code, debug.into())
    }

    pub(crate) fn stream(id: StreamId, code: ErrorCode, debug: impl Into<String>) -> Self {
        H2Error::Stream(id, code, debug.into())
    }

    /// Maps the wire-level fault onto the caller-visible error kind.
    pub(crate) fn into_public(self) -> Http2Error {
        let (code, debug) = match self {
            H2Error::Connection(code, debug) => (code, debug),
            H2Error::Stream(_, code, debug) => (code, debug),
        };
        match code {
            ErrorCode::CompressionError => Http2Error::Compression(debug),
            ErrorCode::FrameSizeError => Http2Error::FrameSize(debug),
            ErrorCode::FlowControlError => Http2Error::FlowControl(debug),
            _ => Http2Error::Protocol(debug),
        }
    }
}

/// Which flow-control window limited an operation.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum WindowKind {
    /// The connection-scope window.
    Connection,
    /// The window of the request's own stream.
    Request,
}

/// Protocol-level errors surfaced to the caller, either as the error half
/// of an operation result or inside [`Event::Error`].
///
/// Every variant renders a human-readable message through `Display` that
/// is distinct from its `Debug` form.
///
/// [`Event::Error`]: crate::event::Event::Error
#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum Http2Error {
    /// The connection is closed in both directions.
    #[error("the connection is closed")]
    Closed,

    /// The connection can no longer send requests, typically because a
    /// `GOAWAY` was received or `close` was called, but responses may
    /// still be readable.
    #[error("the connection is closed for writing")]
    ClosedForWriting,

    /// The stream id of this request was above the `last_stream_id` of a
    /// received `GOAWAY`; the server never processed it and it can be
    /// safely retried on another connection.
    #[error("the request was not processed by the server")]
    Unprocessed,

    /// Opening one more stream would exceed the server's
    /// `SETTINGS_MAX_CONCURRENT_STREAMS`.
    #[error("too many concurrent requests on this connection")]
    TooManyConcurrentRequests,

    /// The server reset the stream with the contained error code.
    #[error("server closed the request, error code {0:?}")]
    ServerClosedRequest(ErrorCode),

    /// The server shut the connection down through `GOAWAY` with an error
    /// code other than `NO_ERROR`.
    #[error("server closed the connection, error code {code:?}, debug data: {debug:?}")]
    ServerClosedConnection {
        /// Error code carried by the `GOAWAY` frame.
        code: ErrorCode,
        /// Debug data carried by the `GOAWAY` frame.
        debug: String,
    },

    /// A violation of RFC 9113 framing or state rules.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The HPACK decoding context could not be maintained.
    #[error("compression error: {0}")]
    Compression(String),

    /// A frame had an invalid size for its kind or exceeded
    /// `SETTINGS_MAX_FRAME_SIZE`.
    #[error("frame size error: {0}")]
    FrameSize(String),

    /// A flow-control window was violated or overflowed.
    #[error("flow control error: {0}")]
    FlowControl(String),

    /// The encoded request headers exceed the server's
    /// `SETTINGS_MAX_HEADER_LIST_SIZE`.
    #[error("header list size of {size} bytes exceeds the server limit of {limit} bytes")]
    MaxHeaderListSizeExceeded {
        /// Computed size of the header list, 32-byte overhead included.
        size: u32,
        /// The server-advertised limit.
        limit: u32,
    },

    /// A fixed request body does not fit in the named flow-control window.
    #[error("request body exceeds the {kind:?} window size of {window} bytes")]
    ExceedsWindowSize {
        /// Which window was too small.
        kind: WindowKind,
        /// Available size of that window.
        window: u32,
    },

    /// A final response header block arrived without a `:status`
    /// pseudo-header.
    #[error("response is missing the :status header")]
    MissingStatusHeader,

    /// `stream_request_body` was called for a request opened with a
    /// complete body.
    #[error("request body is not streaming")]
    RequestIsNotStreaming,

    /// The request handle does not belong to a live request on this
    /// connection.
    #[error("request is unknown on this connection")]
    UnknownRequest,

    /// A trailer used a header name that is not allowed to appear in
    /// trailing header blocks.
    #[error("header {name:?} (value {value:?}) not allowed as a trailing header")]
    UnallowedTrailingHeader {
        /// Offending header name.
        name: String,
        /// Offending header value.
        value: String,
    },
}

/// I/O faults reported by the transport underneath the connection.
#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum TransportError {
    /// The peer closed the transport.
    #[error("socket closed")]
    Closed,

    /// A read or write did not complete within the allowed time.
    #[error("timeout")]
    Timeout,

    /// Establishing the transport timed out.
    #[error("connect timeout")]
    ConnectTimeout,

    /// The host could not be resolved.
    #[error("host unreachable or unknown")]
    HostUnreachable,

    /// The peer refused the connection.
    #[error("connection refused")]
    ConnectionRefused,

    /// A TLS-layer failure, with the underlying reason.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Any other I/O failure, with the underlying reason.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Either error kind, for operations that can fail both ways.
#[derive(Debug, Error, Eq, PartialEq, Clone)]
pub enum Error {
    /// A protocol-level fault.
    #[error(transparent)]
    Http2(#[from] Http2Error),

    /// An I/O fault.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
