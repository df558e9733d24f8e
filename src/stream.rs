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

//! Per-stream state and the stream table.
//!
//! Stream states and transitions follow RFC 9113 section 5.1, reduced to
//! the client role:
//!
//! ```text
//!                 +--------+
//!         recv PP |        |
//!        ,--------|  idle  |
//!       /         |        |
//!      v          +--------+
//! +----------+        | send H
//! | reserved |        v
//! | (remote) |    +--------+
//! +----------+    |        |
//!      |          |  open  |
//!      | recv H   |        |
//!      |          +--------+
//!      |        send ES |  | recv ES
//!      |          v     |  v
//!      |   +----------+ | +----------+
//!      `-->|   half   | | |   half   |
//!          |  closed  | | |  closed  |
//!          | (local)  | | | (remote) |
//!          +----------+ | +----------+
//!               |       v       |
//!   recv ES /   |   +--------+  | send ES /
//!   recv R  /   `-->|        |<-' send R /
//!   send R  `------>| closed |<---- recv R
//!                   +--------+
//! ```
//!
//! The table maps stream ids to streams and request handles to stream
//! ids, allocates client ids (odd, strictly increasing), validates
//! server-reserved ids (even, strictly increasing), and maintains the
//! open-request count that concurrency caps are enforced against.

use std::collections::HashMap;

use crate::error::{ErrorCode, H2Error, Http2Error};
use crate::event::RequestRef;
use crate::flow::{RecvWindow, SendWindow};
use crate::frame::StreamId;

/// Client ids are odd 31-bit integers; allocation past the ceiling
/// exhausts the connection.
const MAX_STREAM_ID: StreamId = u32::MAX >> 1;

/// Outcome of driving a stream's state machine with one frame.
#[cfg_attr(test, derive(Debug, PartialEq))]
pub(crate) enum FrameStep {
    /// The transition happened.
    Ok,
    /// The frame targets a closed or discarded stream and is dropped.
    Ignore,
    /// The frame is illegal in the stream's current state.
    Err(H2Error),
}

/// Why a stream reached `closed`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum CloseReason {
    /// Both directions finished with END_STREAM.
    EndStream,
    /// We reset the stream, e.g. through `cancel_request`.
    LocalRst,
    /// The server reset the stream.
    RemoteRst,
    /// A received GOAWAY discarded the stream before processing.
    RemoteGoAway,
}

/// The RFC 9113 section 5.1 states, client role.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum StreamState {
    /// Allocated, HEADERS not yet sent.
    Idle,
    /// Reserved by a server PUSH_PROMISE; the response HEADERS will open
    /// it half-closed in our direction.
    ReservedRemote,
    /// Both directions live.
    Open,
    /// We sent END_STREAM; only the response direction is live.
    HalfClosedLocal,
    /// The server sent END_STREAM; only the request direction is live.
    HalfClosedRemote,
    /// Both directions finished, reset, or discarded.
    Closed(CloseReason),
}

/// Outbound body bytes accepted but not yet eligible under the flow
/// windows, plus the queued end-of-stream marker and trailers.
#[derive(Default)]
pub(crate) struct SendBuffer {
    pub(crate) queued: Vec<u8>,
    pub(crate) eof: bool,
    pub(crate) trailers: Option<Vec<(String, String)>>,
}

impl SendBuffer {
    pub(crate) fn is_empty(&self) -> bool {
        self.queued.is_empty() && !self.eof
    }
}

/// One HTTP/2 stream.
pub(crate) struct Stream {
    pub(crate) id: StreamId,
    pub(crate) request: RequestRef,
    pub(crate) state: StreamState,
    pub(crate) recv_window: RecvWindow,
    pub(crate) send_window: SendWindow,
    pub(crate) body: SendBuffer,
    /// Whether the request body arrives through `stream_request_body`.
    pub(crate) streaming: bool,
    /// Whether a final (non-1xx) status was already received.
    pub(crate) received_final_status: bool,
    /// `content-length` declared by the final response headers.
    pub(crate) content_length: Option<u64>,
    /// Response body bytes received so far.
    pub(crate) received_body_len: u64,
}

impl Stream {
    fn new(
        id: StreamId,
        request: RequestRef,
        state: StreamState,
        recv_window: RecvWindow,
        send_window: SendWindow,
        streaming: bool,
    ) -> Self {
        Self {
            id,
            request,
            state,
            recv_window,
            send_window,
            body: SendBuffer::default(),
            streaming,
            received_final_status: false,
            content_length: None,
            received_body_len: 0,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        matches!(self.state, StreamState::Closed(_))
    }

    /// Whether the response direction is still expected to produce
    /// frames.
    pub(crate) fn recv_live(&self) -> bool {
        matches!(
            self.state,
            StreamState::Open | StreamState::HalfClosedLocal | StreamState::ReservedRemote
        )
    }
}

/// The stream table of one connection.
pub(crate) struct Streams {
    map: HashMap<StreamId, Stream>,
    refs: HashMap<RequestRef, StreamId>,
    next_stream_id: StreamId,
    last_promised_id: StreamId,
    /// Streams in open or half-closed states.
    open_count: usize,
    initial_recv_window: u32,
    initial_send_window: u32,
}

impl Streams {
    pub(crate) fn new(initial_recv_window: u32, initial_send_window: u32) -> Self {
        Self {
            map: HashMap::new(),
            refs: HashMap::new(),
            next_stream_id: 1,
            last_promised_id: 0,
            open_count: 0,
            initial_recv_window,
            initial_send_window,
        }
    }

    /// Number of requests in open or half-closed states: the quantity
    /// `SETTINGS_MAX_CONCURRENT_STREAMS` caps.
    pub(crate) fn open_count(&self) -> usize {
        self.open_count
    }

    /// The highest client stream id ever allocated, 0 when none.
    pub(crate) fn max_client_id(&self) -> StreamId {
        self.next_stream_id.saturating_sub(2)
    }

    pub(crate) fn max_promised_id(&self) -> StreamId {
        self.last_promised_id
    }

    pub(crate) fn get(&self, id: StreamId) -> Option<&Stream> {
        self.map.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        self.map.get_mut(&id)
    }

    pub(crate) fn id_of(&self, request: RequestRef) -> Option<StreamId> {
        self.refs.get(&request).copied()
    }

    /// Iterates over all streams mutably, in unspecified order.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Stream> {
        self.map.values_mut()
    }

    /// Allocates the next client stream against the server's concurrency
    /// cap. The stream starts idle; sending its HEADERS opens it.
    pub(crate) fn insert_client_stream(
        &mut self,
        request: RequestRef,
        streaming: bool,
        max_concurrent: u32,
    ) -> Result<StreamId, Http2Error> {
        if self.open_count as u64 >= max_concurrent as u64 {
            return Err(Http2Error::TooManyConcurrentRequests);
        }
        if self.next_stream_id > MAX_STREAM_ID {
            return Err(Http2Error::Protocol(String::from(
                "client stream ids exhausted",
            )));
        }
        let id = self.next_stream_id;
        self.next_stream_id += 2;
        self.map.insert(
            id,
            Stream::new(
                id,
                request,
                StreamState::Idle,
                RecvWindow::new(self.initial_recv_window as i32),
                SendWindow::new(self.initial_send_window as i32),
                streaming,
            ),
        );
        self.refs.insert(request, id);
        Ok(id)
    }

    /// Number of live server-initiated streams, which the local
    /// concurrency cap is enforced against when a PUSH_PROMISE arrives.
    pub(crate) fn promised_live_count(&self) -> usize {
        self.map
            .values()
            .filter(|stream| stream.id % 2 == 0 && !stream.is_closed())
            .count()
    }

    /// Records a server-reserved stream. The id must be even, strictly
    /// above every previously promised id, and unused.
    pub(crate) fn reserve_server_stream(
        &mut self,
        promised_id: StreamId,
        request: RequestRef,
    ) -> Result<(), H2Error> {
        if promised_id % 2 != 0 || promised_id == 0 {
            return Err(H2Error::conn(
                ErrorCode::ProtocolError,
                format!("PUSH_PROMISE with an odd promised stream id {promised_id}"),
            ));
        }
        if promised_id <= self.last_promised_id || self.map.contains_key(&promised_id) {
            return Err(H2Error::conn(
                ErrorCode::ProtocolError,
                format!("PUSH_PROMISE reused promised stream id {promised_id}"),
            ));
        }
        self.last_promised_id = promised_id;
        self.map.insert(
            promised_id,
            Stream::new(
                promised_id,
                request,
                StreamState::ReservedRemote,
                RecvWindow::new(self.initial_recv_window as i32),
                SendWindow::new(self.initial_send_window as i32),
                false,
            ),
        );
        self.refs.insert(request, promised_id);
        Ok(())
    }

    /// Applies our outgoing HEADERS to the stream's state.
    pub(crate) fn sent_headers(&mut self, id: StreamId, end_stream: bool) {
        if let Some(stream) = self.map.get_mut(&id) {
            if matches!(stream.state, StreamState::Idle) {
                stream.state = if end_stream {
                    StreamState::HalfClosedLocal
                } else {
                    StreamState::Open
                };
                self.open_count += 1;
            }
        }
    }

    /// Applies our outgoing END_STREAM (on DATA or trailers).
    pub(crate) fn sent_end_stream(&mut self, id: StreamId) {
        if let Some(stream) = self.map.get_mut(&id) {
            match stream.state {
                StreamState::Open => stream.state = StreamState::HalfClosedLocal,
                StreamState::HalfClosedRemote => {
                    stream.state = StreamState::Closed(CloseReason::EndStream);
                    self.open_count -= 1;
                }
                _ => {}
            }
        }
    }

    /// Applies a received HEADERS block to the stream's state.
    pub(crate) fn recv_headers(&mut self, id: StreamId, end_stream: bool) -> FrameStep {
        match self.map.get_mut(&id) {
            None => FrameStep::Ignore,
            Some(stream) => match stream.state {
                StreamState::ReservedRemote => {
                    stream.state = if end_stream {
                        StreamState::Closed(CloseReason::EndStream)
                    } else {
                        StreamState::HalfClosedLocal
                    };
                    if !end_stream {
                        self.open_count += 1;
                    }
                    FrameStep::Ok
                }
                StreamState::Open => {
                    if end_stream {
                        stream.state = StreamState::HalfClosedRemote;
                    }
                    FrameStep::Ok
                }
                StreamState::HalfClosedLocal => {
                    if end_stream {
                        stream.state = StreamState::Closed(CloseReason::EndStream);
                        self.open_count -= 1;
                    }
                    FrameStep::Ok
                }
                StreamState::Closed(_) => FrameStep::Ignore,
                StreamState::HalfClosedRemote => FrameStep::Err(H2Error::stream(
                    id,
                    ErrorCode::StreamClosed,
                    format!("HEADERS received on stream {id} after its END_STREAM"),
                )),
                StreamState::Idle => FrameStep::Err(H2Error::conn(
                    ErrorCode::ProtocolError,
                    format!("HEADERS received on idle stream {id}"),
                )),
            },
        }
    }

    /// Applies a received DATA frame to the stream's state.
    pub(crate) fn recv_data(&mut self, id: StreamId, end_stream: bool) -> FrameStep {
        match self.map.get_mut(&id) {
            None => FrameStep::Ignore,
            Some(stream) => match stream.state {
                StreamState::Open => {
                    if end_stream {
                        stream.state = StreamState::HalfClosedRemote;
                    }
                    FrameStep::Ok
                }
                StreamState::HalfClosedLocal => {
                    if end_stream {
                        stream.state = StreamState::Closed(CloseReason::EndStream);
                        self.open_count -= 1;
                    }
                    FrameStep::Ok
                }
                StreamState::Closed(_) => FrameStep::Ignore,
                StreamState::HalfClosedRemote => FrameStep::Err(H2Error::stream(
                    id,
                    ErrorCode::StreamClosed,
                    format!("DATA received on stream {id} after its END_STREAM"),
                )),
                StreamState::Idle | StreamState::ReservedRemote => FrameStep::Err(H2Error::conn(
                    ErrorCode::ProtocolError,
                    format!("DATA received on stream {id} before its response headers"),
                )),
            },
        }
    }

    /// Applies a received RST_STREAM to the stream's state.
    pub(crate) fn recv_reset(&mut self, id: StreamId) -> FrameStep {
        match self.map.get_mut(&id) {
            None => FrameStep::Ignore,
            Some(stream) => match stream.state {
                StreamState::Closed(_) => FrameStep::Ignore,
                StreamState::Idle => FrameStep::Err(H2Error::conn(
                    ErrorCode::ProtocolError,
                    format!("RST_STREAM received on idle stream {id}"),
                )),
                state => {
                    if !matches!(state, StreamState::ReservedRemote) {
                        self.open_count -= 1;
                    }
                    stream.state = StreamState::Closed(CloseReason::RemoteRst);
                    stream.body = SendBuffer::default();
                    FrameStep::Ok
                }
            },
        }
    }

    /// Applies our own RST_STREAM (cancellation) to the stream's state.
    /// Returns whether a RST_STREAM frame should actually be sent.
    pub(crate) fn send_reset(&mut self, id: StreamId) -> bool {
        match self.map.get_mut(&id) {
            None => false,
            Some(stream) => match stream.state {
                StreamState::Closed(_) => false,
                state => {
                    if !matches!(state, StreamState::Idle | StreamState::ReservedRemote) {
                        self.open_count -= 1;
                    }
                    stream.state = StreamState::Closed(CloseReason::LocalRst);
                    stream.body = SendBuffer::default();
                    true
                }
            },
        }
    }

    /// Discards every client stream above the server's GOAWAY
    /// `last_stream_id`. Returns the affected streams in id order.
    pub(crate) fn discard_unprocessed(
        &mut self,
        last_stream_id: StreamId,
    ) -> Vec<(StreamId, RequestRef)> {
        let mut discarded = Vec::new();
        for stream in self.map.values_mut() {
            if stream.id % 2 == 1 && stream.id > last_stream_id && !stream.is_closed() {
                if !matches!(stream.state, StreamState::Idle) {
                    self.open_count -= 1;
                }
                stream.state = StreamState::Closed(CloseReason::RemoteGoAway);
                stream.body = SendBuffer::default();
                discarded.push((stream.id, stream.request));
            }
        }
        discarded.sort_by_key(|(id, _)| *id);
        discarded
    }

    /// Removes a closed stream once its terminal event has been
    /// delivered; later frames for the id are silently ignored.
    pub(crate) fn drain(&mut self, id: StreamId) {
        if let Some(stream) = self.map.get(&id) {
            if stream.is_closed() {
                let request = stream.request;
                self.map.remove(&id);
                self.refs.remove(&request);
            }
        }
    }

    /// Adjusts every live stream's send window after the server moved
    /// `SETTINGS_INITIAL_WINDOW_SIZE`.
    pub(crate) fn apply_send_initial_window(&mut self, new_size: u32) -> Result<(), H2Error> {
        let current = self.initial_send_window;
        self.initial_send_window = new_size;
        if new_size > current {
            let delta = new_size - current;
            for stream in self.map.values_mut() {
                if !stream.is_closed() {
                    stream.send_window.grow(delta)?;
                }
            }
        } else if new_size < current {
            let delta = current - new_size;
            for stream in self.map.values_mut() {
                if !stream.is_closed() {
                    stream.send_window.shrink(delta);
                }
            }
        }
        Ok(())
    }

    /// Adjusts every live stream's receive window after the caller's new
    /// `SETTINGS_INITIAL_WINDOW_SIZE` was acked.
    pub(crate) fn apply_recv_initial_window(&mut self, new_size: u32) {
        self.initial_recv_window = new_size;
        for stream in self.map.values_mut() {
            if !stream.is_closed() {
                stream.recv_window.retarget(new_size);
            }
        }
    }
}

#[cfg(test)]
mod ut_streams {
    use super::*;

    fn streams() -> Streams {
        Streams::new(100, 100)
    }

    fn opened(streams: &mut Streams, max: u32) -> (RequestRef, StreamId) {
        let request = RequestRef::generate();
        let id = streams.insert_client_stream(request, false, max).unwrap();
        streams.sent_headers(id, false);
        (request, id)
    }

    /// UT test case for `Streams::insert_client_stream` id allocation.
    ///
    /// # Brief
    /// 1. Inserts three client streams.
    /// 2. Checks ids are the odd sequence 1, 3, 5 and the reverse lookup
    ///    resolves.
    #[test]
    fn ut_streams_insert_client_stream() {
        let mut streams = streams();
        let (ref_a, id_a) = opened(&mut streams, 10);
        let (_, id_b) = opened(&mut streams, 10);
        let (_, id_c) = opened(&mut streams, 10);
        assert_eq!((id_a, id_b, id_c), (1, 3, 5));
        assert_eq!(streams.max_client_id(), 5);
        assert_eq!(streams.id_of(ref_a), Some(1));
        assert_eq!(streams.open_count(), 3);
    }

    /// UT test case for the concurrency cap.
    ///
    /// # Brief
    /// 1. Opens one stream under a cap of 1.
    /// 2. Checks the second insertion fails and the count is unchanged.
    #[test]
    fn ut_streams_concurrency_cap() {
        let mut streams = streams();
        let _ = opened(&mut streams, 1);
        let res = streams.insert_client_stream(RequestRef::generate(), false, 1);
        assert_eq!(res.unwrap_err(), Http2Error::TooManyConcurrentRequests);
        assert_eq!(streams.open_count(), 1);
    }

    /// UT test case for `Streams::recv_headers` and `Streams::recv_data`
    /// transitions.
    ///
    /// # Brief
    /// 1. Walks a stream through open, half-closed remote via END_STREAM
    ///    on DATA.
    /// 2. Checks DATA after END_STREAM is a stream-closed fault.
    #[test]
    fn ut_streams_recv_transitions() {
        let mut streams = streams();
        let (_, id) = opened(&mut streams, 10);

        assert_eq!(streams.recv_headers(id, false), FrameStep::Ok);
        assert_eq!(streams.recv_data(id, false), FrameStep::Ok);
        assert_eq!(streams.recv_data(id, true), FrameStep::Ok);
        assert_eq!(streams.get(id).unwrap().state, StreamState::HalfClosedRemote);

        match streams.recv_data(id, false) {
            FrameStep::Err(H2Error::Stream(_, ErrorCode::StreamClosed, _)) => {}
            other => panic!("expected STREAM_CLOSED, got {other:?}"),
        }
    }

    /// UT test case for the end-to-end close through both END_STREAMs.
    ///
    /// # Brief
    /// 1. Sends END_STREAM on HEADERS, then receives END_STREAM.
    /// 2. Checks the stream closes and the open count drops.
    #[test]
    fn ut_streams_close_by_end_stream() {
        let mut streams = streams();
        let request = RequestRef::generate();
        let id = streams.insert_client_stream(request, false, 10).unwrap();
        streams.sent_headers(id, true);
        assert_eq!(streams.get(id).unwrap().state, StreamState::HalfClosedLocal);
        assert_eq!(streams.open_count(), 1);

        assert_eq!(streams.recv_headers(id, true), FrameStep::Ok);
        assert_eq!(
            streams.get(id).unwrap().state,
            StreamState::Closed(CloseReason::EndStream)
        );
        assert_eq!(streams.open_count(), 0);

        streams.drain(id);
        assert!(streams.get(id).is_none());
        assert_eq!(streams.id_of(request), None);
        assert_eq!(streams.recv_data(id, false), FrameStep::Ignore);
    }

    /// UT test case for `Streams::recv_reset` and `Streams::send_reset`.
    ///
    /// # Brief
    /// 1. Resets an open stream remotely, then locally a second time.
    /// 2. Checks the second reset is ignored and idle streams reject a
    ///    remote reset.
    #[test]
    fn ut_streams_resets() {
        let mut streams = streams();
        let (_, id) = opened(&mut streams, 10);

        assert_eq!(streams.recv_reset(id), FrameStep::Ok);
        assert_eq!(
            streams.get(id).unwrap().state,
            StreamState::Closed(CloseReason::RemoteRst)
        );
        assert_eq!(streams.open_count(), 0);
        assert_eq!(streams.recv_reset(id), FrameStep::Ignore);
        assert!(!streams.send_reset(id));

        let request = RequestRef::generate();
        let idle = streams.insert_client_stream(request, false, 10).unwrap();
        match streams.recv_reset(idle) {
            FrameStep::Err(H2Error::Connection(ErrorCode::ProtocolError, _)) => {}
            other => panic!("expected a protocol error, got {other:?}"),
        }
    }

    /// UT test case for `Streams::reserve_server_stream`.
    ///
    /// # Brief
    /// 1. Reserves an even id, then tries an odd id and a reused id.
    /// 2. Checks the promised-id monotonicity rules.
    #[test]
    fn ut_streams_reserve_server_stream() {
        let mut streams = streams();
        assert!(streams
            .reserve_server_stream(2, RequestRef::generate())
            .is_ok());
        assert_eq!(streams.max_promised_id(), 2);
        assert_eq!(streams.promised_live_count(), 1);

        assert!(streams
            .reserve_server_stream(3, RequestRef::generate())
            .is_err());
        assert!(streams
            .reserve_server_stream(2, RequestRef::generate())
            .is_err());
        assert!(streams
            .reserve_server_stream(4, RequestRef::generate())
            .is_ok());
    }

    /// UT test case for `Streams::discard_unprocessed`.
    ///
    /// # Brief
    /// 1. Opens streams 1, 3 and 5 and discards above a GOAWAY last id
    ///    of 1.
    /// 2. Checks the discarded handles, states and remaining open count.
    #[test]
    fn ut_streams_discard_unprocessed() {
        let mut streams = streams();
        let (_, id_a) = opened(&mut streams, 10);
        let (ref_b, _) = opened(&mut streams, 10);
        let (ref_c, _) = opened(&mut streams, 10);

        let discarded = streams.discard_unprocessed(1);
        assert_eq!(discarded, vec![(3, ref_b), (5, ref_c)]);
        assert_eq!(streams.open_count(), 1);
        assert_eq!(streams.get(id_a).unwrap().state, StreamState::Open);
        assert_eq!(
            streams.get(3).unwrap().state,
            StreamState::Closed(CloseReason::RemoteGoAway)
        );
    }

    /// UT test case for `Streams::apply_send_initial_window`.
    ///
    /// # Brief
    /// 1. Grows and shrinks the initial send window.
    /// 2. Checks every live stream's window moves by the delta and that a
    ///    shrink below zero is legal.
    #[test]
    fn ut_streams_apply_send_initial_window() {
        let mut streams = streams();
        let (_, id) = opened(&mut streams, 10);

        assert!(streams.apply_send_initial_window(200).is_ok());
        assert_eq!(streams.get(id).unwrap().send_window.available(), 200);

        assert!(streams.apply_send_initial_window(50).is_ok());
        assert_eq!(streams.get(id).unwrap().send_window.available(), 50);

        streams.get_mut(id).unwrap().send_window.consume(50);
        assert!(streams.apply_send_initial_window(20).is_ok());
        assert_eq!(streams.get(id).unwrap().send_window.available(), 0);
    }
}
