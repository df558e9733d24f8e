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

//! HTTP/2 frame model.
//!
//! A [`Frame`] is the fundamental unit of communication in HTTP/2: a
//! 9-byte header (length, type, flags, stream id) followed by a payload
//! whose layout depends on the frame type. Header-bearing frames carry
//! their header block as an opaque fragment here; HPACK decoding happens
//! at the connection layer once a block is fully reassembled from
//! `HEADERS`/`PUSH_PROMISE` plus any `CONTINUATION` tail.

use crate::error::ErrorCode;

/// In HTTP/2, streams are identified by an unsigned 31-bit integer.
pub type StreamId = u32;

/// Mask for the END_STREAM flag. When set, the sender will not send
/// further frames on this stream.
pub(crate) const END_STREAM_MASK: u8 = 0x01;

/// Mask for the ACK flag on SETTINGS and PING frames.
pub(crate) const ACK_MASK: u8 = 0x01;

/// Mask for the END_HEADERS flag. When set, the frame contains an entire
/// header block and not a fragment.
pub(crate) const END_HEADERS_MASK: u8 = 0x04;

/// Mask for the PADDED flag. When set, the frame payload carries a pad
/// length octet and trailing padding.
pub(crate) const PADDED_MASK: u8 = 0x08;

/// Mask for the PRIORITY flag on HEADERS frames.
pub(crate) const PRIORITY_MASK: u8 = 0x20;

/// HTTP/2 frame: stream id, flags and a typed payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    id: StreamId,
    flags: FrameFlags,
    payload: Payload,
}

/// Frame type registry per RFC 9113. Types outside this registry decode
/// into [`Payload::Unknown`] and are ignored by the connection.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    RstStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    Goaway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

/// Payload of an HTTP/2 frame. The layout differs per frame type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// DATA frame payload.
    Data(Data),
    /// HEADERS frame payload, carrying a raw header block fragment.
    Headers(Headers),
    /// PRIORITY frame payload (parsed and ignored by the client).
    Priority(Priority),
    /// RST_STREAM frame payload.
    RstStream(RstStream),
    /// SETTINGS frame payload.
    Settings(Settings),
    /// PUSH_PROMISE frame payload.
    PushPromise(PushPromise),
    /// PING frame payload.
    Ping(Ping),
    /// GOAWAY frame payload.
    Goaway(Goaway),
    /// WINDOW_UPDATE frame payload.
    WindowUpdate(WindowUpdate),
    /// CONTINUATION frame payload.
    Continuation(Continuation),
    /// A frame of a type outside the RFC registry. Receivers must ignore
    /// these, so only the type octet is retained.
    Unknown(UnknownFrame),
}

/// HTTP/2 frame flags octet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameFlags(u8);

/// DATA frame payload with padding already removed. `flow_size` keeps the
/// on-wire payload length, which is what flow control accounts for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Data {
    data: Vec<u8>,
    flow_size: u32,
}

/// Header block fragment carried by a HEADERS frame, padding and the
/// optional priority block already removed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Headers {
    fragment: Vec<u8>,
}

/// Sender-advised priority of a stream. Deprecated by RFC 9113; decoded
/// for framing correctness and otherwise discarded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Priority {
    exclusive: bool,
    stream_dependency: StreamId,
    weight: u8,
}

/// Immediate termination of a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RstStream {
    error_code: u32,
}

/// Configuration parameters that affect how endpoints communicate.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Settings {
    settings: Vec<Setting>,
}

/// A single SETTINGS parameter. Identifiers outside this set are ignored
/// on receipt per RFC 9113 section 6.5.2.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Setting {
    /// SETTINGS_HEADER_TABLE_SIZE (0x01).
    HeaderTableSize(u32),
    /// SETTINGS_ENABLE_PUSH (0x02).
    EnablePush(bool),
    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x03).
    MaxConcurrentStreams(u32),
    /// SETTINGS_INITIAL_WINDOW_SIZE (0x04).
    InitialWindowSize(u32),
    /// SETTINGS_MAX_FRAME_SIZE (0x05).
    MaxFrameSize(u32),
    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x06).
    MaxHeaderListSize(u32),
    /// SETTINGS_ENABLE_CONNECT_PROTOCOL (0x08, RFC 8441).
    EnableConnectProtocol(bool),
}

/// Announcement of a stream the server intends to initiate, with the raw
/// fragment of the promised request's header block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushPromise {
    promised_stream_id: StreamId,
    fragment: Vec<u8>,
}

/// Round-trip measurement and liveness check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ping {
    /// The 8 octets of opaque data.
    pub data: [u8; 8],
}

/// Connection shutdown initiation or fatal error report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Goaway {
    error_code: u32,
    last_stream_id: StreamId,
    debug_data: Vec<u8>,
}

/// Flow-control window increment, at connection or stream scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowUpdate {
    window_size_increment: u32,
}

/// Continuation of a header block started by HEADERS or PUSH_PROMISE.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Continuation {
    fragment: Vec<u8>,
}

/// A frame of an unregistered type, retained only for logging.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownFrame {
    type_byte: u8,
    payload_len: u32,
}

impl Frame {
    /// Constructs a new `Frame` from its stream id, flags and payload.
    pub fn new(id: StreamId, flags: FrameFlags, payload: Payload) -> Self {
        Frame { id, flags, payload }
    }

    /// Returns the stream identifier of the frame.
    pub fn stream_id(&self) -> StreamId {
        self.id
    }

    /// Returns the frame's flags.
    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    /// Returns a reference to the frame's payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consumes the frame and returns its payload.
    pub(crate) fn into_payload(self) -> Payload {
        self.payload
    }
}

impl FrameFlags {
    /// Creates a `FrameFlags` from the given flags octet.
    pub fn new(flags: u8) -> Self {
        FrameFlags(flags)
    }

    /// Creates a `FrameFlags` with no flags set.
    pub fn empty() -> Self {
        FrameFlags(0)
    }

    /// Whether the END_STREAM flag is set.
    pub fn is_end_stream(&self) -> bool {
        self.0 & END_STREAM_MASK != 0
    }

    /// Whether the END_HEADERS flag is set.
    pub fn is_end_headers(&self) -> bool {
        self.0 & END_HEADERS_MASK != 0
    }

    /// Whether the PADDED flag is set.
    pub fn is_padded(&self) -> bool {
        self.0 & PADDED_MASK != 0
    }

    /// Whether the PRIORITY flag is set.
    pub fn is_priority(&self) -> bool {
        self.0 & PRIORITY_MASK != 0
    }

    /// Whether the ACK flag is set.
    pub fn is_ack(&self) -> bool {
        self.0 & ACK_MASK != 0
    }

    /// Gets the flags octet.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Sets or clears the END_STREAM flag.
    pub fn set_end_stream(&mut self, end_stream: bool) {
        if end_stream {
            self.0 |= END_STREAM_MASK;
        } else {
            self.0 &= !END_STREAM_MASK;
        }
    }

    /// Sets or clears the END_HEADERS flag.
    pub fn set_end_headers(&mut self, end_headers: bool) {
        if end_headers {
            self.0 |= END_HEADERS_MASK;
        } else {
            self.0 &= !END_HEADERS_MASK;
        }
    }

    /// Sets or clears the ACK flag.
    pub fn set_ack(&mut self, ack: bool) {
        if ack {
            self.0 |= ACK_MASK;
        } else {
            self.0 &= !ACK_MASK;
        }
    }
}

impl Payload {
    /// Returns the registered type of the frame this payload belongs to,
    /// or `None` for passthrough frames of unknown types.
    pub fn frame_type(&self) -> Option<FrameType> {
        match self {
            Payload::Data(_) => Some(FrameType::Data),
            Payload::Headers(_) => Some(FrameType::Headers),
            Payload::Priority(_) => Some(FrameType::Priority),
            Payload::RstStream(_) => Some(FrameType::RstStream),
            Payload::Settings(_) => Some(FrameType::Settings),
            Payload::PushPromise(_) => Some(FrameType::PushPromise),
            Payload::Ping(_) => Some(FrameType::Ping),
            Payload::Goaway(_) => Some(FrameType::Goaway),
            Payload::WindowUpdate(_) => Some(FrameType::WindowUpdate),
            Payload::Continuation(_) => Some(FrameType::Continuation),
            Payload::Unknown(_) => None,
        }
    }
}

impl Data {
    /// Creates a DATA payload whose on-wire size equals the data length.
    pub fn new(data: Vec<u8>) -> Self {
        let flow_size = data.len() as u32;
        Data { data, flow_size }
    }

    /// Creates a DATA payload with an explicit on-wire size, used by the
    /// decoder when padding was stripped.
    pub(crate) fn with_flow_size(data: Vec<u8>, flow_size: u32) -> Self {
        Data { data, flow_size }
    }

    /// Returns the payload data with padding removed.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the payload and returns the data.
    pub(crate) fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// The number of bytes this frame occupies in flow-control windows:
    /// the full on-wire payload, padding included.
    pub fn flow_size(&self) -> u32 {
        self.flow_size
    }
}

impl Headers {
    /// Creates a HEADERS payload from a raw header block fragment.
    pub fn new(fragment: Vec<u8>) -> Self {
        Headers { fragment }
    }

    /// Returns the raw header block fragment.
    pub fn fragment(&self) -> &[u8] {
        &self.fragment
    }
}

impl Priority {
    /// Creates a PRIORITY payload.
    pub fn new(exclusive: bool, stream_dependency: StreamId, weight: u8) -> Self {
        Priority {
            exclusive,
            stream_dependency,
            weight,
        }
    }

    /// Returns the stream this one depends on.
    pub fn stream_dependency(&self) -> StreamId {
        self.stream_dependency
    }

    /// Whether the dependency is exclusive.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Returns the priority weight.
    pub fn weight(&self) -> u8 {
        self.weight
    }
}

impl RstStream {
    /// Creates a RST_STREAM payload from a raw error code.
    pub fn new(error_code: u32) -> Self {
        RstStream { error_code }
    }

    /// Returns the raw error code.
    pub fn error_code(&self) -> u32 {
        self.error_code
    }

    /// Decodes the carried code into an [`ErrorCode`], mapping unknown
    /// codes to `InternalError` as RFC 9113 permits.
    pub fn error(&self) -> ErrorCode {
        ErrorCode::try_from(self.error_code).unwrap_or(ErrorCode::InternalError)
    }
}

impl Settings {
    /// Creates a SETTINGS payload from a parameter list.
    pub fn new(settings: Vec<Setting>) -> Self {
        Settings { settings }
    }

    /// Returns the carried parameters in wire order.
    pub fn get_settings(&self) -> &[Setting] {
        &self.settings
    }

    /// Returns the total length of the settings when encoded. Each
    /// parameter occupies a 2-byte identifier and a 4-byte value.
    pub fn encoded_len(&self) -> usize {
        self.settings.len() * 6
    }

    /// Returns an ACK SETTINGS frame.
    pub fn ack() -> Frame {
        Frame::new(
            0,
            FrameFlags::new(ACK_MASK),
            Payload::Settings(Settings::new(vec![])),
        )
    }
}

impl Setting {
    /// Returns the wire identifier associated with the setting.
    pub fn identifier(&self) -> u16 {
        match self {
            Setting::HeaderTableSize(_) => 0x01,
            Setting::EnablePush(_) => 0x02,
            Setting::MaxConcurrentStreams(_) => 0x03,
            Setting::InitialWindowSize(_) => 0x04,
            Setting::MaxFrameSize(_) => 0x05,
            Setting::MaxHeaderListSize(_) => 0x06,
            Setting::EnableConnectProtocol(_) => 0x08,
        }
    }

    /// Returns the 32-bit wire value of the setting.
    pub fn value(&self) -> u32 {
        match *self {
            Setting::HeaderTableSize(v) => v,
            Setting::EnablePush(v) => v as u32,
            Setting::MaxConcurrentStreams(v) => v,
            Setting::InitialWindowSize(v) => v,
            Setting::MaxFrameSize(v) => v,
            Setting::MaxHeaderListSize(v) => v,
            Setting::EnableConnectProtocol(v) => v as u32,
        }
    }
}

impl PushPromise {
    /// Creates a PUSH_PROMISE payload.
    pub fn new(promised_stream_id: StreamId, fragment: Vec<u8>) -> Self {
        PushPromise {
            promised_stream_id,
            fragment,
        }
    }

    /// Returns the id of the stream the server reserved.
    pub fn promised_stream_id(&self) -> StreamId {
        self.promised_stream_id
    }

    /// Returns the raw fragment of the promised request's header block.
    pub fn fragment(&self) -> &[u8] {
        &self.fragment
    }
}

impl Ping {
    /// Creates a PING payload with the provided opaque data.
    pub fn new(data: [u8; 8]) -> Self {
        Ping { data }
    }

    /// Returns the opaque data.
    pub fn data(&self) -> [u8; 8] {
        self.data
    }

    /// Returns an ACK PING frame echoing the given opaque data.
    pub fn ack(ping: Ping) -> Frame {
        Frame::new(0, FrameFlags::new(ACK_MASK), Payload::Ping(ping))
    }
}

impl Goaway {
    /// Creates a GOAWAY payload.
    pub fn new(error_code: u32, last_stream_id: StreamId, debug_data: Vec<u8>) -> Self {
        Goaway {
            error_code,
            last_stream_id,
            debug_data,
        }
    }

    /// Returns the identifier of the last stream processed by the sender.
    pub fn last_stream_id(&self) -> StreamId {
        self.last_stream_id
    }

    /// Returns the raw error code.
    pub fn error_code(&self) -> u32 {
        self.error_code
    }

    /// Decodes the carried code, mapping unknown codes to `InternalError`.
    pub fn error(&self) -> ErrorCode {
        ErrorCode::try_from(self.error_code).unwrap_or(ErrorCode::InternalError)
    }

    /// Returns the opaque debug data.
    pub fn debug_data(&self) -> &[u8] {
        &self.debug_data
    }
}

impl WindowUpdate {
    /// Creates a WINDOW_UPDATE payload.
    pub fn new(window_size_increment: u32) -> Self {
        WindowUpdate {
            window_size_increment,
        }
    }

    /// Returns the window size increment.
    pub fn increment(&self) -> u32 {
        self.window_size_increment
    }
}

impl Continuation {
    /// Creates a CONTINUATION payload from a raw header block fragment.
    pub fn new(fragment: Vec<u8>) -> Self {
        Continuation { fragment }
    }

    /// Returns the raw header block fragment.
    pub fn fragment(&self) -> &[u8] {
        &self.fragment
    }
}

impl UnknownFrame {
    /// Records a frame of an unregistered type.
    pub(crate) fn new(type_byte: u8, payload_len: u32) -> Self {
        UnknownFrame {
            type_byte,
            payload_len,
        }
    }

    /// Returns the raw type octet.
    pub fn type_byte(&self) -> u8 {
        self.type_byte
    }

    /// Returns the length of the discarded payload.
    pub fn payload_len(&self) -> u32 {
        self.payload_len
    }
}
