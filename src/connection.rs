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

//! The HTTP/2 connection state machine and its public operations.
//!
//! A [`Connection`] is a pure state machine over one HTTP/2 connection in
//! the client role: callers feed it transport bytes and user operations,
//! it produces outbound bytes through the [`Transport`] and an ordered
//! list of [`Event`]s per call. It owns no socket, no thread and no event
//! loop, so the same core runs under any I/O runtime, in active or
//! passive mode, and is tested with hand-crafted frames.
//!
//! Reads flow one way (bytes, frames, state transitions, events) and
//! writes flow one way (operation, state transitions, frames, bytes);
//! no operation blocks outside the transport calls themselves.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::mem::take;
use std::time::Duration;

use tracing::{debug, warn};

use crate::codec::{FrameDecoder, FrameEncoder};
use crate::error::{Error, ErrorCode, H2Error, Http2Error, TransportError, WindowKind};
use crate::event::{Event, PingRef, RequestRef};
use crate::flow::FlowControl;
use crate::frame::{
    Frame, FrameFlags, Goaway, Payload, Ping, RstStream, Setting, Settings, StreamId,
};
use crate::headers::{
    build_request_fields, header_list_size, request_authority, split_response_fields,
    validate_trailers, ResponseFields,
};
use crate::hpack::{HpackDecoder, HpackEncoder};
use crate::settings::{
    PeerSettings, ServerSetting, SettingsUpdate, DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE,
};
use crate::stream::{FrameStep, Streams};
use crate::transport::{SocketId, Transport, TransportMessage};

/// The 24-octet client connection preface, sent before any frame.
const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// How inbound bytes reach the connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    /// The I/O runtime delivers [`TransportMessage`]s to the controlling
    /// owner, which hands them to [`Connection::stream`].
    Active,
    /// The caller pulls bytes synchronously through
    /// [`Connection::recv`].
    Passive,
}

/// The owner [`TransportMessage`]s should be routed to in active mode.
/// The core only stores the token; delivery is the runtime's business.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct OwnerToken(pub u64);

/// A request body, fixed up front or streamed after the fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// No body; the request HEADERS carry END_STREAM.
    Empty,
    /// A complete body, sent with the request and closed after it.
    Full(Vec<u8>),
    /// The body follows through [`Connection::stream_request_body`].
    Streaming,
}

/// One piece of a streamed request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyChunk {
    /// Body bytes; queued beyond what the flow windows currently allow.
    Data(Vec<u8>),
    /// End of the body.
    Eof,
    /// End of the body, followed by a trailing header block.
    EofWithTrailers(Vec<(String, String)>),
}

/// Which flow-control window a query targets.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WindowScope {
    /// The connection-scope send window.
    Connection,
    /// The send window of one request's stream.
    Request(RequestRef),
}

/// Options accepted by [`Connection::connect`].
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    client_settings: SettingsUpdate,
    mode: Option<Mode>,
    enable_async_settings: bool,
}

impl ConnectOptions {
    /// Creates the default option set: active mode, default settings,
    /// synchronous handshake.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial local SETTINGS carried by the handshake.
    pub fn client_settings(mut self, settings: SettingsUpdate) -> Self {
        self.client_settings = settings;
        self
    }

    /// Selects active or passive operation.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Surfaces the handshake SETTINGS exchange as [`Event::Settings`]
    /// and [`Event::SettingsAck`] instead of blocking `connect` on it.
    pub fn enable_async_settings(mut self, enable: bool) -> Self {
        self.enable_async_settings = enable;
        self
    }
}

/// A fatal result of one `stream`/`recv` call: the error plus every
/// event extracted before the fault.
#[derive(Debug, PartialEq, Eq)]
pub struct StreamFailure {
    /// What tainted the call.
    pub error: Error,
    /// Events accumulated before the fault, still valid and ordered.
    pub events: Vec<Event>,
}

impl std::fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for StreamFailure {}

/// Successful outcome of [`Connection::stream`].
#[derive(Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The message belonged to this connection and produced the events.
    Events(Vec<Event>),
    /// The message belongs to some other socket; nothing was consumed.
    Unknown,
}

/// A header block mid-reassembly. While one is pending, only
/// CONTINUATION frames on the same stream are legal on the whole
/// connection.
struct PendingHeaderBlock {
    id: StreamId,
    /// Set when the block was opened by PUSH_PROMISE.
    promised_id: Option<StreamId>,
    end_stream: bool,
    fragments: Vec<u8>,
}

#[derive(Default)]
struct Handshake {
    server_settings_seen: bool,
    settings_acked: bool,
}

impl Handshake {
    fn finished(&self) -> bool {
        self.server_settings_seen && self.settings_acked
    }
}

/// A process-less, non-owning HTTP/2 client connection.
pub struct Connection<T: Transport> {
    transport: T,
    scheme: String,
    host: String,
    port: u16,
    mode: Mode,
    owner: Option<OwnerToken>,
    async_settings: bool,
    handshake: Handshake,
    /// Whether responses may still be read and delivered.
    read_open: bool,
    /// Whether the transport may still be written. Cleared by `close`,
    /// fatal errors and transport closure; a received GOAWAY does not
    /// clear it, it only blocks new requests.
    write_open: bool,
    decoder: FrameDecoder,
    encoder: FrameEncoder,
    hpack_decoder: HpackDecoder,
    hpack_encoder: HpackEncoder,
    local_settings: PeerSettings,
    remote_settings: PeerSettings,
    /// Local SETTINGS sent and awaiting the server's ack, oldest first,
    /// with whether the ack surfaces as an event.
    pending_settings: VecDeque<(SettingsUpdate, bool)>,
    flow: FlowControl,
    streams: Streams,
    pings: VecDeque<(PingRef, [u8; 8])>,
    pending_block: Option<PendingHeaderBlock>,
    /// `last_stream_id` of the GOAWAY we received, if any.
    goaway_received: Option<StreamId>,
    /// Latest non-NO_ERROR GOAWAY error; replaced by later GOAWAYs.
    conn_error: Option<Http2Error>,
    /// Set when the GOAWAY error of the current batch must be returned.
    goaway_error_pending: bool,
    /// Events produced outside a `stream`/`recv` call (e.g. during the
    /// synchronous handshake), delivered with the next batch.
    carried: Vec<Event>,
    private: HashMap<&'static str, Box<dyn Any + Send>>,
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl<T: Transport> Connection<T> {
    /// Opens an HTTP/2 connection over an established transport: emits
    /// the client preface and local SETTINGS, then completes the
    /// SETTINGS exchange synchronously unless async settings were opted
    /// into.
    ///
    /// The transport must already be connected and, for `https`,
    /// ALPN-negotiated to `h2`.
    pub fn connect(
        transport: T,
        scheme: &str,
        host: &str,
        port: u16,
        options: ConnectOptions,
    ) -> Result<Self, Error> {
        let local = PeerSettings::default();
        let remote = PeerSettings::default();
        let mut conn = Connection {
            transport,
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
            mode: options.mode.unwrap_or(Mode::Active),
            owner: None,
            async_settings: options.enable_async_settings,
            handshake: Handshake::default(),
            read_open: true,
            write_open: true,
            decoder: FrameDecoder::new(local.max_frame_size),
            encoder: FrameEncoder::new(remote.max_frame_size),
            hpack_decoder: HpackDecoder::new(local.header_table_size),
            hpack_encoder: HpackEncoder::new(remote.header_table_size),
            local_settings: local,
            remote_settings: remote,
            pending_settings: VecDeque::new(),
            flow: FlowControl::new(DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_INITIAL_WINDOW_SIZE),
            streams: Streams::new(DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_INITIAL_WINDOW_SIZE),
            pings: VecDeque::new(),
            pending_block: None,
            goaway_received: None,
            conn_error: None,
            goaway_error_pending: false,
            carried: Vec::new(),
            private: HashMap::new(),
        };

        let mut out = PREFACE.to_vec();
        let surface = conn.async_settings;
        conn.encoder.encode(
            &Frame::new(
                0,
                FrameFlags::empty(),
                Payload::Settings(Settings::new(options.client_settings.to_wire())),
            ),
            &mut out,
        );
        conn.pending_settings
            .push_back((options.client_settings, surface));
        conn.transport.send(&out).map_err(Error::Transport)?;

        if !conn.async_settings {
            while !conn.handshake.finished() {
                let bytes = conn.transport.recv(0, None).map_err(Error::Transport)?;
                match conn.process_bytes(&bytes) {
                    Ok(events) => conn.carried.extend(events),
                    Err(failure) => {
                        conn.carried.extend(failure.events);
                        return Err(failure.error);
                    }
                }
            }
        }
        Ok(conn)
    }

    /// Opens a request and returns its handle. The body is either
    /// complete (`Body::Full`), absent (`Body::Empty`) or streamed
    /// afterwards (`Body::Streaming`).
    pub fn request(
        &mut self,
        method: &str,
        path: &str,
        headers: &[(String, String)],
        body: Body,
    ) -> Result<RequestRef, Error> {
        self.check_writable()?;

        let authority = request_authority(&self.scheme, &self.host, self.port);
        let mut fields = build_request_fields(method, &self.scheme, &authority, path, headers);
        if let Body::Full(bytes) = &body {
            let supplied = fields
                .iter()
                .any(|(name, _)| name == "content-length");
            if !supplied {
                fields.push((String::from("content-length"), bytes.len().to_string()));
            }
        }

        if let Some(limit) = self.remote_settings.max_header_list_size {
            let size = header_list_size(&fields);
            if size > limit {
                return Err(Http2Error::MaxHeaderListSizeExceeded { size, limit }.into());
            }
        }

        if let Body::Full(bytes) = &body {
            let stream_window = self.remote_settings.initial_window_size;
            if bytes.len() as u64 > stream_window as u64 {
                return Err(Http2Error::ExceedsWindowSize {
                    kind: WindowKind::Request,
                    window: stream_window,
                }
                .into());
            }
            let conn_window = self.flow.send_available();
            if bytes.len() as u64 > conn_window as u64 {
                return Err(Http2Error::ExceedsWindowSize {
                    kind: WindowKind::Connection,
                    window: conn_window,
                }
                .into());
            }
        }

        let request = RequestRef::generate();
        let streaming = matches!(body, Body::Streaming);
        let id = self.streams.insert_client_stream(
            request,
            streaming,
            self.remote_settings.max_concurrent_streams,
        )?;

        let block = self.hpack_encoder.encode(&fields);
        let mut out = Vec::new();
        match body {
            Body::Empty => {
                self.encoder.encode_header_block(id, &block, true, &mut out);
                self.streams.sent_headers(id, true);
            }
            Body::Full(bytes) if bytes.is_empty() => {
                self.encoder.encode_header_block(id, &block, true, &mut out);
                self.streams.sent_headers(id, true);
            }
            Body::Full(bytes) => {
                self.encoder.encode_header_block(id, &block, false, &mut out);
                self.encoder.encode_data(id, &bytes, true, &mut out);
                self.streams.sent_headers(id, false);
                let len = bytes.len() as u32;
                if let Some(stream) = self.streams.get_mut(id) {
                    stream.send_window.consume(len);
                }
                self.flow.consume_send(len);
                self.streams.sent_end_stream(id);
            }
            Body::Streaming => {
                self.encoder.encode_header_block(id, &block, false, &mut out);
                self.streams.sent_headers(id, false);
            }
        }

        if let Err(error) = self.transport.send(&out) {
            self.streams.send_reset(id);
            self.streams.drain(id);
            return Err(Error::Transport(error));
        }
        Ok(request)
    }

    /// Feeds one chunk of a streaming request body. Bytes beyond the
    /// current flow windows are buffered and flushed as WINDOW_UPDATE
    /// and SETTINGS frames arrive.
    pub fn stream_request_body(
        &mut self,
        request: RequestRef,
        chunk: BodyChunk,
    ) -> Result<(), Error> {
        self.check_writable()?;
        let id = self
            .streams
            .id_of(request)
            .ok_or(Http2Error::UnknownRequest)?;
        {
            let stream = self
                .streams
                .get_mut(id)
                .ok_or(Http2Error::UnknownRequest)?;
            if !stream.streaming || stream.body.eof {
                return Err(Http2Error::RequestIsNotStreaming.into());
            }

            match chunk {
                BodyChunk::Data(bytes) => {
                    if stream.body.queued.len() as u64 + bytes.len() as u64 > MAX_WINDOW_SIZE as u64
                    {
                        let window = stream.send_window.available();
                        return Err(Http2Error::ExceedsWindowSize {
                            kind: WindowKind::Request,
                            window,
                        }
                        .into());
                    }
                    stream.body.queued.extend_from_slice(&bytes);
                }
                BodyChunk::Eof => {
                    stream.body.eof = true;
                }
                BodyChunk::EofWithTrailers(trailers) => {
                    let trailers = validate_trailers(&trailers).map_err(Error::Http2)?;
                    if let Some(limit) = self.remote_settings.max_header_list_size {
                        let size = header_list_size(&trailers);
                        if size > limit {
                            return Err(
                                Http2Error::MaxHeaderListSizeExceeded { size, limit }.into()
                            );
                        }
                    }
                    stream.body.eof = true;
                    stream.body.trailers = Some(trailers);
                }
            }
        }

        let mut out = Vec::new();
        self.flush_stream(id, &mut out);
        if !out.is_empty() {
            self.transport.send(&out).map_err(Error::Transport)?;
        }
        Ok(())
    }

    /// Cancels a request: sends RST_STREAM(CANCEL) and discards the
    /// stream. Unknown handles are a no-op, so cancelling twice is safe.
    pub fn cancel_request(&mut self, request: RequestRef) -> Result<(), Error> {
        let Some(id) = self.streams.id_of(request) else {
            return Ok(());
        };
        if self.streams.send_reset(id) && self.write_open {
            let mut out = Vec::new();
            self.encoder.encode(
                &Frame::new(
                    id,
                    FrameFlags::empty(),
                    Payload::RstStream(RstStream::new(ErrorCode::Cancel.into_code())),
                ),
                &mut out,
            );
            self.transport.send(&out).map_err(Error::Transport)?;
        }
        self.streams.drain(id);
        Ok(())
    }

    /// Consumes one transport-shaped message in active mode. Messages
    /// for other sockets yield [`StreamOutcome::Unknown`] untouched.
    pub fn stream(&mut self, message: TransportMessage) -> Result<StreamOutcome, StreamFailure> {
        if message.socket() != self.transport.id() {
            return Ok(StreamOutcome::Unknown);
        }
        match message {
            TransportMessage::Data { bytes, .. } => {
                if !self.read_open {
                    return Err(StreamFailure {
                        error: Error::Http2(Http2Error::Closed),
                        events: take(&mut self.carried),
                    });
                }
                self.process_bytes(&bytes).map(StreamOutcome::Events)
            }
            TransportMessage::Closed { .. } => {
                self.read_open = false;
                self.write_open = false;
                if self.streams.open_count() > 0 {
                    Err(StreamFailure {
                        error: Error::Transport(TransportError::Closed),
                        events: take(&mut self.carried),
                    })
                } else {
                    Ok(StreamOutcome::Events(take(&mut self.carried)))
                }
            }
            TransportMessage::Error { error, .. } => {
                self.read_open = false;
                self.write_open = false;
                Err(StreamFailure {
                    error: Error::Transport(error),
                    events: take(&mut self.carried),
                })
            }
        }
    }

    /// Pulls bytes from the transport in passive mode and processes
    /// them.
    ///
    /// # Panics
    /// Panics when the connection is in active mode; use
    /// [`Connection::stream`] there instead.
    pub fn recv(
        &mut self,
        min_len: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<Event>, StreamFailure> {
        assert!(
            self.mode == Mode::Passive,
            "can't use recv in active mode, use stream instead"
        );
        if !self.read_open {
            return Err(StreamFailure {
                error: Error::Http2(Http2Error::Closed),
                events: take(&mut self.carried),
            });
        }
        match self.transport.recv(min_len, timeout) {
            Ok(bytes) => self.process_bytes(&bytes),
            Err(TransportError::Closed) => {
                self.read_open = false;
                self.write_open = false;
                Err(StreamFailure {
                    error: Error::Transport(TransportError::Closed),
                    events: take(&mut self.carried),
                })
            }
            Err(error) => Err(StreamFailure {
                error: Error::Transport(error),
                events: take(&mut self.carried),
            }),
        }
    }

    /// Switches between active and passive delivery.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Rebinds the owner active-mode messages should be routed to.
    pub fn set_controlling_owner(&mut self, owner: OwnerToken) {
        self.owner = Some(owner);
    }

    /// The owner active-mode messages should be routed to, if any was
    /// bound.
    pub fn controlling_owner(&self) -> Option<OwnerToken> {
        self.owner
    }

    /// Sends GOAWAY(NO_ERROR) and closes the transport. Idempotent:
    /// closing a closed connection does nothing.
    pub fn close(&mut self) {
        if self.write_open {
            let mut out = Vec::new();
            self.encoder.encode(
                &Frame::new(
                    0,
                    FrameFlags::empty(),
                    Payload::Goaway(Goaway::new(
                        ErrorCode::NoError.into_code(),
                        self.streams.max_promised_id(),
                        Vec::new(),
                    )),
                ),
                &mut out,
            );
            let _ = self.transport.send(&out);
        }
        let _ = self.transport.close();
        self.read_open = false;
        self.write_open = false;
    }

    /// Whether the connection is open in at least one direction.
    pub fn is_open(&self) -> bool {
        self.read_open || self.write_open
    }

    /// Whether responses may still be read.
    pub fn is_open_read(&self) -> bool {
        self.read_open
    }

    /// Whether new requests may still be issued. A received GOAWAY
    /// closes this direction while reads continue.
    pub fn is_open_write(&self) -> bool {
        self.write_open && self.goaway_received.is_none()
    }

    /// Number of requests in open or half-closed states.
    pub fn open_request_count(&self) -> usize {
        self.streams.open_count()
    }

    /// The available send window at the given scope.
    ///
    /// # Panics
    /// Panics when the request handle is unknown on this connection.
    pub fn window_size(&self, scope: WindowScope) -> u32 {
        match scope {
            WindowScope::Connection => self.flow.send_available(),
            WindowScope::Request(request) => {
                let id = self
                    .streams
                    .id_of(request)
                    .unwrap_or_else(|| panic!("unknown request {request:?}"));
                self.streams
                    .get(id)
                    .map(|stream| stream.send_window.available())
                    .unwrap_or_else(|| panic!("unknown request {request:?}"))
            }
        }
    }

    /// Reads one server-advertised setting. Values the server never sent
    /// report their RFC defaults; an unlimited `max_header_list_size`
    /// and `max_concurrent_streams` report `u32::MAX`.
    pub fn server_setting(&self, key: ServerSetting) -> Setting {
        let settings = &self.remote_settings;
        match key {
            ServerSetting::HeaderTableSize => Setting::HeaderTableSize(settings.header_table_size),
            ServerSetting::EnablePush => Setting::EnablePush(settings.enable_push),
            ServerSetting::MaxConcurrentStreams => {
                Setting::MaxConcurrentStreams(settings.max_concurrent_streams)
            }
            ServerSetting::InitialWindowSize => {
                Setting::InitialWindowSize(settings.initial_window_size)
            }
            ServerSetting::MaxFrameSize => Setting::MaxFrameSize(settings.max_frame_size),
            ServerSetting::MaxHeaderListSize => {
                Setting::MaxHeaderListSize(settings.max_header_list_size.unwrap_or(u32::MAX))
            }
            ServerSetting::EnableConnectProtocol => {
                Setting::EnableConnectProtocol(settings.enable_connect_protocol)
            }
        }
    }

    /// Sends a SETTINGS frame with the given update. The new values take
    /// effect when the server acks, which surfaces as
    /// [`Event::SettingsAck`].
    pub fn put_settings(&mut self, update: SettingsUpdate) -> Result<(), Error> {
        self.check_writable()?;
        let mut out = Vec::new();
        self.encoder.encode(
            &Frame::new(
                0,
                FrameFlags::empty(),
                Payload::Settings(Settings::new(update.to_wire())),
            ),
            &mut out,
        );
        self.transport.send(&out).map_err(Error::Transport)?;
        self.pending_settings.push_back((update, true));
        Ok(())
    }

    /// Sends a PING with the given (or a generated) opaque payload and
    /// returns the handle its [`Event::Pong`] will carry.
    pub fn ping(&mut self, opaque: Option<[u8; 8]>) -> Result<PingRef, Error> {
        self.check_open()?;
        let handle = PingRef::generate();
        // Without an ambient clock or RNG the handle itself is the most
        // distinctive payload available.
        let data = opaque.unwrap_or_else(|| handle.value().to_be_bytes());
        let mut out = Vec::new();
        self.encoder.encode(
            &Frame::new(0, FrameFlags::empty(), Payload::Ping(Ping::new(data))),
            &mut out,
        );
        self.transport.send(&out).map_err(Error::Transport)?;
        self.pings.push_back((handle, data));
        Ok(handle)
    }

    /// Attaches an opaque caller value to the connection.
    pub fn put_private<V: Any + Send>(&mut self, key: &'static str, value: V) {
        self.private.insert(key, Box::new(value));
    }

    /// Reads back a value attached with [`Connection::put_private`].
    pub fn get_private<V: Any>(&self, key: &'static str) -> Option<&V> {
        self.private.get(key).and_then(|v| v.downcast_ref())
    }

    /// The identity of the underlying transport.
    pub fn socket_id(&self) -> SocketId {
        self.transport.id()
    }

    /// Borrows the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn check_open(&self) -> Result<(), Error> {
        if !self.is_open() {
            return Err(Http2Error::Closed.into());
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), Error> {
        self.check_open()?;
        if !self.is_open_write() {
            return Err(Http2Error::ClosedForWriting.into());
        }
        Ok(())
    }

    /// The read path: buffers the bytes, pops complete frames, drives
    /// the state machines and builds the ordered event list.
    fn process_bytes(&mut self, bytes: &[u8]) -> Result<Vec<Event>, StreamFailure> {
        let mut events = take(&mut self.carried);
        self.decoder.push(bytes);
        loop {
            match self.decoder.next_frame() {
                Ok(Some(frame)) => {
                    if let Err(error) = self.handle_frame(frame, &mut events) {
                        match error {
                            H2Error::Stream(..) => self.stream_fault(error, &mut events),
                            H2Error::Connection(..) => return Err(self.fatal(error, events)),
                        }
                    }
                }
                Ok(None) => break,
                // The decoder reports per-frame faults; stream-scope
                // ones only take their stream down.
                Err(error @ H2Error::Stream(..)) => self.stream_fault(error, &mut events),
                Err(error) => return Err(self.fatal(error, events)),
            }
        }
        if self.goaway_error_pending {
            self.goaway_error_pending = false;
            let error = self
                .conn_error
                .clone()
                .expect("GOAWAY error flagged without a stored error");
            return Err(StreamFailure {
                error: Error::Http2(error),
                events,
            });
        }
        Ok(events)
    }

    /// Sends GOAWAY with the fault's code and closes the connection.
    fn fatal(&mut self, error: H2Error, events: Vec<Event>) -> StreamFailure {
        let (code, debug) = match &error {
            H2Error::Connection(code, debug) => (*code, debug.clone()),
            H2Error::Stream(_, code, debug) => (*code, debug.clone()),
        };
        if self.write_open {
            let mut out = Vec::new();
            self.encoder.encode(
                &Frame::new(
                    0,
                    FrameFlags::empty(),
                    Payload::Goaway(Goaway::new(
                        code.into_code(),
                        self.streams.max_promised_id(),
                        debug.into_bytes(),
                    )),
                ),
                &mut out,
            );
            let _ = self.transport.send(&out);
        }
        let _ = self.transport.close();
        self.read_open = false;
        self.write_open = false;
        StreamFailure {
            error: Error::Http2(error.into_public()),
            events,
        }
    }

    /// Reports a stream-scope fault: RST_STREAM out, an `Error` event in
    /// and the stream discarded.
    fn stream_fault(&mut self, error: H2Error, events: &mut Vec<Event>) {
        let H2Error::Stream(id, code, _) = &error else {
            unreachable!("stream_fault called with a connection error");
        };
        let (id, code) = (*id, *code);
        if self.streams.send_reset(id) && self.write_open {
            let mut out = Vec::new();
            self.encoder.encode(
                &Frame::new(
                    id,
                    FrameFlags::empty(),
                    Payload::RstStream(RstStream::new(code.into_code())),
                ),
                &mut out,
            );
            let _ = self.transport.send(&out);
        }
        if let Some(stream) = self.streams.get(id) {
            events.push(Event::Error {
                request: stream.request,
                error: error.into_public(),
            });
        }
        self.streams.drain(id);
    }

    fn handle_frame(&mut self, frame: Frame, events: &mut Vec<Event>) -> Result<(), H2Error> {
        // The server preface is a SETTINGS frame; anything else first is
        // a protocol fault.
        if !self.handshake.server_settings_seen
            && !matches!(frame.payload(), Payload::Settings(_))
        {
            return Err(H2Error::conn(
                ErrorCode::ProtocolError,
                "received a frame before the server preface SETTINGS",
            ));
        }

        // While a header block is streaming, only CONTINUATION on the
        // same stream is legal connection-wide.
        if let Some(pending) = &self.pending_block {
            let pending_id = pending.id;
            return match frame.payload() {
                Payload::Continuation(_) if frame.stream_id() == pending_id => {
                    self.handle_continuation(frame, events)
                }
                Payload::Continuation(_) => Err(H2Error::conn(
                    ErrorCode::ProtocolError,
                    "CONTINUATION received outside of headers streaming",
                )),
                payload => {
                    let name = payload
                        .frame_type()
                        .map(|t| format!("{t:?}"))
                        .unwrap_or_else(|| String::from("unknown"));
                    Err(H2Error::conn(
                        ErrorCode::ProtocolError,
                        format!("headers are streaming but got a {name} frame"),
                    ))
                }
            };
        }

        let id = frame.stream_id();
        let flags = frame.flags();
        match frame.into_payload() {
            Payload::Data(data) => self.handle_data(id, data, flags.is_end_stream(), events),
            Payload::Headers(headers) => {
                self.verify_stream_known(id)?;
                self.pending_block = Some(PendingHeaderBlock {
                    id,
                    promised_id: None,
                    end_stream: flags.is_end_stream(),
                    fragments: headers.fragment().to_vec(),
                });
                if flags.is_end_headers() {
                    self.finish_header_block(events)?;
                }
                Ok(())
            }
            Payload::PushPromise(promise) => {
                self.verify_stream_known(id)?;
                if !self.local_settings.enable_push {
                    return Err(H2Error::conn(
                        ErrorCode::ProtocolError,
                        "PUSH_PROMISE received but SETTINGS_ENABLE_PUSH is disabled",
                    ));
                }
                self.pending_block = Some(PendingHeaderBlock {
                    id,
                    promised_id: Some(promise.promised_stream_id()),
                    end_stream: false,
                    fragments: promise.fragment().to_vec(),
                });
                if flags.is_end_headers() {
                    self.finish_header_block(events)?;
                }
                Ok(())
            }
            Payload::Continuation(_) => Err(H2Error::conn(
                ErrorCode::ProtocolError,
                "CONTINUATION received outside of headers streaming",
            )),
            Payload::RstStream(rst) => self.handle_rst_stream(id, rst.error(), events),
            Payload::Settings(settings) => {
                if flags.is_ack() {
                    self.handle_settings_ack(events)
                } else {
                    self.handle_settings(settings, events)
                }
            }
            Payload::Ping(ping) => self.handle_ping(ping, flags.is_ack(), events),
            Payload::Goaway(goaway) => self.handle_goaway(goaway, events),
            Payload::WindowUpdate(update) => {
                self.handle_window_update(id, update.increment(), events)
            }
            Payload::Priority(_) => Ok(()),
            Payload::Unknown(unknown) => {
                debug!(
                    type_byte = unknown.type_byte(),
                    payload_len = unknown.payload_len(),
                    "ignoring frame of unknown type"
                );
                Ok(())
            }
        }
    }

    /// A frame is only acceptable on ids the connection has seen: odd
    /// ids we allocated, even ids the server reserved.
    fn verify_stream_known(&self, id: StreamId) -> Result<(), H2Error> {
        let known = if id % 2 == 1 {
            id <= self.streams.max_client_id()
        } else {
            id != 0 && id <= self.streams.max_promised_id()
        };
        if known {
            Ok(())
        } else {
            Err(H2Error::conn(
                ErrorCode::ProtocolError,
                format!("frame with stream ID {id} has not been opened yet"),
            ))
        }
    }

    fn handle_data(
        &mut self,
        id: StreamId,
        data: crate::frame::Data,
        end_stream: bool,
        events: &mut Vec<Event>,
    ) -> Result<(), H2Error> {
        let flow = data.flow_size();

        // The whole on-wire payload counts at connection scope, even for
        // streams that are already gone.
        if flow > self.flow.recv_available() {
            return Err(H2Error::conn(
                ErrorCode::FlowControlError,
                format!("received DATA overflows the connection window by {flow} bytes"),
            ));
        }
        self.flow.consume_recv(flow);
        if flow > 0 && self.write_open {
            if let Some(update) = self.flow.check_window_update() {
                let mut out = Vec::new();
                self.encoder.encode(&update, &mut out);
                let _ = self.transport.send(&out);
            }
        }

        self.verify_stream_known(id)?;
        match self.streams.recv_data(id, end_stream) {
            FrameStep::Ignore => Ok(()),
            FrameStep::Err(error @ H2Error::Connection(..)) => Err(error),
            FrameStep::Err(error) => {
                self.stream_fault(error, events);
                Ok(())
            }
            FrameStep::Ok => {
                let request;
                let mut fault = None;
                let mut window_update = None;
                {
                    let stream = self
                        .streams
                        .get_mut(id)
                        .expect("stream vanished mid-transition");
                    request = stream.request;

                    if flow > stream.recv_window.available() {
                        fault = Some(H2Error::stream(
                            id,
                            ErrorCode::FlowControlError,
                            format!("received DATA overflows the window of stream {id}"),
                        ));
                    } else {
                        stream.recv_window.consume(flow);
                        stream.received_body_len += data.data().len() as u64;

                        if let Some(declared) = stream.content_length {
                            let received = stream.received_body_len;
                            if received > declared || (end_stream && received != declared) {
                                fault = Some(H2Error::stream(
                                    id,
                                    ErrorCode::ProtocolError,
                                    format!(
                                        "response body of {received} bytes does not match the \
                                         declared content-length of {declared}"
                                    ),
                                ));
                            }
                        }
                        if fault.is_none() && flow > 0 && !end_stream && self.write_open {
                            window_update = stream.recv_window.check_window_update(id);
                        }
                    }
                }

                if let Some(error) = fault {
                    self.stream_fault(error, events);
                    return Ok(());
                }
                if let Some(update) = window_update {
                    let mut out = Vec::new();
                    self.encoder.encode(&update, &mut out);
                    let _ = self.transport.send(&out);
                }

                events.push(Event::Data {
                    request,
                    chunk: data.into_data(),
                });
                if end_stream {
                    events.push(Event::Done { request });
                    self.streams.drain(id);
                }
                Ok(())
            }
        }
    }

    fn handle_continuation(
        &mut self,
        frame: Frame,
        events: &mut Vec<Event>,
    ) -> Result<(), H2Error> {
        let end_headers = frame.flags().is_end_headers();
        let Payload::Continuation(continuation) = frame.into_payload() else {
            unreachable!("handle_continuation fed a non-CONTINUATION frame");
        };
        let pending = self
            .pending_block
            .as_mut()
            .expect("CONTINUATION routed without a pending block");
        pending.fragments.extend_from_slice(continuation.fragment());
        if end_headers {
            self.finish_header_block(events)?;
        }
        Ok(())
    }

    /// Decodes a completed header block and dispatches it as a response,
    /// trailers or push promise.
    fn finish_header_block(&mut self, events: &mut Vec<Event>) -> Result<(), H2Error> {
        let block = self
            .pending_block
            .take()
            .expect("finish_header_block without a pending block");
        // The HPACK context must stay in sync, so the block is decoded
        // even when its stream is already gone.
        let fields = self.hpack_decoder.decode(&block.fragments)?;

        match block.promised_id {
            Some(promised_id) => self.finish_push_promise(block.id, promised_id, fields, events),
            None => self.finish_response_headers(block.id, block.end_stream, fields, events),
        }
    }

    fn finish_push_promise(
        &mut self,
        parent_id: StreamId,
        promised_id: StreamId,
        fields: Vec<(String, String)>,
        events: &mut Vec<Event>,
    ) -> Result<(), H2Error> {
        let parent = self
            .streams
            .get(parent_id)
            .map(|parent| (parent.request, parent.recv_live()));
        let parent_request = match parent {
            Some((request, true)) => request,
            // The parent finished in the meantime; refuse the push.
            _ => {
                self.send_reset_frame(promised_id, ErrorCode::Cancel);
                return Ok(());
            }
        };

        let promised_request = RequestRef::generate();
        self.streams
            .reserve_server_stream(promised_id, promised_request)?;

        // The promised fields describe a request, so the pseudo-headers
        // stay in place.
        events.push(Event::PushPromise {
            request: parent_request,
            promised: promised_request,
            headers: fields,
        });

        // The promise itself is surfaced either way; past the local
        // concurrency cap the promised stream is refused on the wire.
        let cap = self.local_settings.max_concurrent_streams;
        if self.streams.promised_live_count() as u64 > cap as u64 {
            self.send_reset_frame(promised_id, ErrorCode::RefusedStream);
            self.streams.send_reset(promised_id);
            self.streams.drain(promised_id);
        }
        Ok(())
    }

    fn finish_response_headers(
        &mut self,
        id: StreamId,
        end_stream: bool,
        fields: Vec<(String, String)>,
        events: &mut Vec<Event>,
    ) -> Result<(), H2Error> {
        let Some(stream) = self.streams.get(id) else {
            // Closed and drained while the block was in flight.
            return Ok(());
        };
        if stream.is_closed() {
            return Ok(());
        }
        let request = stream.request;
        let trailer_block = stream.received_final_status;
        let ResponseFields { status, headers } = split_response_fields(fields);

        if trailer_block {
            if let Some(code) = status {
                let error = if (100..200).contains(&code) {
                    H2Error::stream(
                        id,
                        ErrorCode::ProtocolError,
                        "informational responses must appear before the final response",
                    )
                } else {
                    H2Error::stream(
                        id,
                        ErrorCode::ProtocolError,
                        "trailing headers carried a :status pseudo-header",
                    )
                };
                self.stream_fault(error, events);
                return Ok(());
            }
            if !end_stream {
                let error = H2Error::stream(
                    id,
                    ErrorCode::ProtocolError,
                    "trailing headers didn't set END_STREAM",
                );
                self.stream_fault(error, events);
                return Ok(());
            }
            match self.streams.recv_headers(id, true) {
                FrameStep::Ok => {
                    events.push(Event::Headers { request, headers });
                    events.push(Event::Done { request });
                    self.streams.drain(id);
                }
                FrameStep::Ignore => {}
                FrameStep::Err(error @ H2Error::Connection(..)) => return Err(error),
                FrameStep::Err(error) => self.stream_fault(error, events),
            }
            return Ok(());
        }

        let Some(code) = status else {
            // A stream fault on the wire, but the public reason is
            // sharper than the generic protocol error.
            if self.streams.send_reset(id) {
                self.send_reset_frame(id, ErrorCode::ProtocolError);
                events.push(Event::Error {
                    request,
                    error: Http2Error::MissingStatusHeader,
                });
            }
            self.streams.drain(id);
            return Ok(());
        };

        if (100..200).contains(&code) {
            if end_stream {
                let error = H2Error::stream(
                    id,
                    ErrorCode::ProtocolError,
                    "informational response (1xx) must not set END_STREAM",
                );
                self.stream_fault(error, events);
                return Ok(());
            }
            events.push(Event::Status { request, code });
            events.push(Event::Headers { request, headers });
            return Ok(());
        }

        match self.streams.recv_headers(id, end_stream) {
            FrameStep::Ignore => Ok(()),
            FrameStep::Err(error @ H2Error::Connection(..)) => Err(error),
            FrameStep::Err(error) => {
                self.stream_fault(error, events);
                Ok(())
            }
            FrameStep::Ok => {
                if let Some(stream) = self.streams.get_mut(id) {
                    stream.received_final_status = true;
                    stream.content_length = headers
                        .iter()
                        .find(|(name, _)| name == "content-length")
                        .and_then(|(_, value)| value.parse::<u64>().ok());
                }
                events.push(Event::Status { request, code });
                events.push(Event::Headers { request, headers });
                if end_stream {
                    events.push(Event::Done { request });
                    self.streams.drain(id);
                }
                Ok(())
            }
        }
    }

    fn handle_rst_stream(
        &mut self,
        id: StreamId,
        code: ErrorCode,
        events: &mut Vec<Event>,
    ) -> Result<(), H2Error> {
        self.verify_stream_known(id)?;
        match self.streams.recv_reset(id) {
            FrameStep::Ignore => Ok(()),
            FrameStep::Err(error @ H2Error::Connection(..)) => Err(error),
            FrameStep::Err(error) => {
                self.stream_fault(error, events);
                Ok(())
            }
            FrameStep::Ok => {
                if let Some(stream) = self.streams.get(id) {
                    events.push(Event::Error {
                        request: stream.request,
                        error: Http2Error::ServerClosedRequest(code),
                    });
                }
                self.streams.drain(id);
                Ok(())
            }
        }
    }

    fn handle_settings(
        &mut self,
        settings: Settings,
        events: &mut Vec<Event>,
    ) -> Result<(), H2Error> {
        for setting in settings.get_settings() {
            match *setting {
                Setting::InitialWindowSize(size) => {
                    self.streams.apply_send_initial_window(size)?;
                }
                Setting::MaxFrameSize(size) => {
                    self.encoder.set_max_frame_size(size);
                }
                Setting::HeaderTableSize(size) => {
                    self.hpack_encoder.update_capacity(size);
                }
                _ => {}
            }
            self.remote_settings.apply(setting);
        }
        self.handshake.server_settings_seen = true;

        if self.write_open {
            let mut out = Vec::new();
            self.encoder.encode(&Settings::ack(), &mut out);
            let _ = self.transport.send(&out);
        }
        if self.async_settings {
            events.push(Event::Settings);
        }

        // A bigger initial window may unblock queued request bodies.
        self.flush_all_streams();
        Ok(())
    }

    fn handle_settings_ack(&mut self, events: &mut Vec<Event>) -> Result<(), H2Error> {
        let Some((update, surface)) = self.pending_settings.pop_front() else {
            warn!("received a SETTINGS ack with no settings in flight");
            return Ok(());
        };
        if let Some(size) = update.header_table_size {
            self.hpack_decoder.update_capacity(size);
        }
        if let Some(size) = update.max_frame_size {
            self.decoder.set_max_frame_size(size);
        }
        if let Some(size) = update.initial_window_size {
            self.streams.apply_recv_initial_window(size);
        }
        update.apply_to(&mut self.local_settings);
        self.handshake.settings_acked = true;
        if surface {
            events.push(Event::SettingsAck);
        }
        Ok(())
    }

    fn handle_ping(
        &mut self,
        ping: Ping,
        ack: bool,
        events: &mut Vec<Event>,
    ) -> Result<(), H2Error> {
        if !ack {
            // Echo with ACK set; the reply is not caller-visible.
            if self.write_open {
                let mut out = Vec::new();
                self.encoder.encode(&Ping::ack(ping), &mut out);
                let _ = self.transport.send(&out);
            }
            return Ok(());
        }
        let matched = match self.pings.front() {
            None => {
                warn!("received a PING ack but no PING is in flight");
                return Ok(());
            }
            Some((handle, data)) if *data == ping.data() => Some(*handle),
            Some(_) => None,
        };
        match matched {
            Some(handle) => {
                self.pings.pop_front();
                events.push(Event::Pong(handle));
            }
            None => {
                warn!("received a PING ack whose opaque data does not match the oldest PING");
            }
        }
        Ok(())
    }

    fn handle_goaway(&mut self, goaway: Goaway, events: &mut Vec<Event>) -> Result<(), H2Error> {
        let last_id = goaway.last_stream_id();
        self.goaway_received = Some(last_id);

        for (id, request) in self.streams.discard_unprocessed(last_id) {
            events.push(Event::Error {
                request,
                error: Http2Error::Unprocessed,
            });
            self.streams.drain(id);
        }

        let code = goaway.error();
        if code != ErrorCode::NoError {
            let debug = String::from_utf8_lossy(goaway.debug_data()).into_owned();
            // A later GOAWAY replaces the stored error wholesale.
            self.conn_error = Some(Http2Error::ServerClosedConnection { code, debug });
            self.goaway_error_pending = true;
        }
        Ok(())
    }

    fn handle_window_update(
        &mut self,
        id: StreamId,
        increment: u32,
        events: &mut Vec<Event>,
    ) -> Result<(), H2Error> {
        if id == 0 {
            self.flow.grow_send(increment)?;
            self.flush_all_streams();
            return Ok(());
        }
        self.verify_stream_known(id)?;
        let grown = {
            let Some(stream) = self.streams.get_mut(id) else {
                return Ok(());
            };
            if stream.is_closed() {
                return Ok(());
            }
            stream.send_window.grow(increment).is_ok()
        };
        if !grown {
            // Stream-scope overflow only takes the stream down.
            let error = H2Error::stream(
                id,
                ErrorCode::FlowControlError,
                format!("window of stream {id} incremented above 2^31 - 1"),
            );
            self.stream_fault(error, events);
            return Ok(());
        }
        let mut out = Vec::new();
        self.flush_stream(id, &mut out);
        if !out.is_empty() {
            let _ = self.transport.send(&out);
        }
        Ok(())
    }

    /// Flushes queued body bytes of every stream after a window grow.
    fn flush_all_streams(&mut self) {
        let ids: Vec<StreamId> = self
            .streams
            .iter_mut()
            .filter(|stream| !stream.body.is_empty() && !stream.is_closed())
            .map(|stream| stream.id)
            .collect();
        let mut out = Vec::new();
        for id in ids {
            self.flush_stream(id, &mut out);
        }
        if !out.is_empty() {
            let _ = self.transport.send(&out);
        }
    }

    /// Emits as many queued body bytes of one stream as the windows
    /// allow, followed by the end-of-stream marker or trailers once the
    /// queue drains.
    fn flush_stream(&mut self, id: StreamId, out: &mut Vec<u8>) {
        let conn_available = self.flow.send_available();
        let Some(stream) = self.streams.get_mut(id) else {
            return;
        };
        if stream.is_closed() {
            return;
        }

        let eligible = stream
            .send_window
            .available()
            .min(conn_available)
            .min(stream.body.queued.len() as u32) as usize;

        let mut sent_end = false;
        if eligible > 0 {
            let bytes: Vec<u8> = stream.body.queued.drain(..eligible).collect();
            let finishes = stream.body.queued.is_empty()
                && stream.body.eof
                && stream.body.trailers.is_none();
            stream.send_window.consume(eligible as u32);
            self.flow.consume_send(eligible as u32);
            self.encoder.encode_data(id, &bytes, finishes, out);
            sent_end = finishes;
        }
        if !sent_end && stream.body.queued.is_empty() && stream.body.eof {
            match stream.body.trailers.take() {
                Some(trailers) => {
                    let block = self.hpack_encoder.encode(&trailers);
                    self.encoder.encode_trailer_block(id, &block, out);
                }
                None if eligible == 0 => {
                    // The END_STREAM marker still needs a carrier.
                    self.encoder.encode_data(id, &[], true, out);
                }
                None => unreachable!("drained queue without trailers finishes on its DATA"),
            }
            sent_end = true;
        }

        if sent_end {
            self.streams.sent_end_stream(id);
        }
    }

    fn send_reset_frame(&mut self, id: StreamId, code: ErrorCode) {
        if !self.write_open {
            return;
        }
        let mut out = Vec::new();
        self.encoder.encode(
            &Frame::new(
                id,
                FrameFlags::empty(),
                Payload::RstStream(RstStream::new(code.into_code())),
            ),
            &mut out,
        );
        let _ = self.transport.send(&out);
    }
}
