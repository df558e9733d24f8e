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

//! A hand-rolled HTTP/2 "server side" for driving the connection core:
//! frame builders, a minimal HPACK literal encoder and an outbound frame
//! parser, all independent of the crate's own codecs so the tests stay
//! honest.

#![allow(dead_code)]

use h2core::transport::mock::{pair, MockHandle, MockTransport};
use h2core::{
    ConnectOptions, Connection, Event, StreamFailure, StreamOutcome, TransportMessage,
};

pub const DATA: u8 = 0x0;
pub const HEADERS: u8 = 0x1;
pub const RST_STREAM: u8 = 0x3;
pub const SETTINGS: u8 = 0x4;
pub const PUSH_PROMISE: u8 = 0x5;
pub const PING: u8 = 0x6;
pub const GOAWAY: u8 = 0x7;
pub const WINDOW_UPDATE: u8 = 0x8;
pub const CONTINUATION: u8 = 0x9;

pub const END_STREAM: u8 = 0x1;
pub const ACK: u8 = 0x1;
pub const END_HEADERS: u8 = 0x4;

/// Serializes one frame: 9-byte header plus payload.
pub fn frame(ty: u8, flags: u8, id: u32, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut out = vec![(len >> 16) as u8, (len >> 8) as u8, len as u8, ty, flags];
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Encodes a header list as HPACK literals without indexing, no Huffman
/// coding. Good for any test field shorter than 127 octets.
pub fn hbf(fields: &[(&str, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in fields {
        assert!(name.len() < 127 && value.len() < 127);
        out.push(0x00);
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
        out.push(value.len() as u8);
        out.extend_from_slice(value.as_bytes());
    }
    out
}

pub fn settings_frame(pairs: &[(u16, u32)]) -> Vec<u8> {
    let mut payload = Vec::new();
    for (id, value) in pairs {
        payload.extend_from_slice(&id.to_be_bytes());
        payload.extend_from_slice(&value.to_be_bytes());
    }
    frame(SETTINGS, 0, 0, &payload)
}

pub fn settings_ack() -> Vec<u8> {
    frame(SETTINGS, ACK, 0, &[])
}

pub fn headers_frame(id: u32, flags: u8, block: &[u8]) -> Vec<u8> {
    frame(HEADERS, flags, id, block)
}

pub fn continuation_frame(id: u32, flags: u8, block: &[u8]) -> Vec<u8> {
    frame(CONTINUATION, flags, id, block)
}

pub fn data_frame(id: u32, flags: u8, body: &[u8]) -> Vec<u8> {
    frame(DATA, flags, id, body)
}

pub fn rst_stream_frame(id: u32, code: u32) -> Vec<u8> {
    frame(RST_STREAM, 0, id, &code.to_be_bytes())
}

pub fn ping_frame(flags: u8, opaque: [u8; 8]) -> Vec<u8> {
    frame(PING, flags, 0, &opaque)
}

pub fn goaway_frame(last_id: u32, code: u32, debug: &[u8]) -> Vec<u8> {
    let mut payload = last_id.to_be_bytes().to_vec();
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(debug);
    frame(GOAWAY, 0, 0, &payload)
}

pub fn window_update_frame(id: u32, increment: u32) -> Vec<u8> {
    frame(WINDOW_UPDATE, 0, id, &increment.to_be_bytes())
}

pub fn push_promise_frame(id: u32, promised: u32, flags: u8, block: &[u8]) -> Vec<u8> {
    let mut payload = promised.to_be_bytes().to_vec();
    payload.extend_from_slice(block);
    frame(PUSH_PROMISE, flags, id, &payload)
}

/// One outbound frame as the test sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub ty: u8,
    pub flags: u8,
    pub id: u32,
    pub payload: Vec<u8>,
}

/// Parses a run of serialized frames, panicking on trailing garbage.
pub fn parse_frames(bytes: &[u8]) -> Vec<RawFrame> {
    let mut frames = Vec::new();
    let mut at = 0;
    while at < bytes.len() {
        assert!(bytes.len() - at >= 9, "truncated frame header");
        let len = u32::from_be_bytes([0, bytes[at], bytes[at + 1], bytes[at + 2]]) as usize;
        let ty = bytes[at + 3];
        let flags = bytes[at + 4];
        let id = u32::from_be_bytes([
            bytes[at + 5],
            bytes[at + 6],
            bytes[at + 7],
            bytes[at + 8],
        ]) & 0x7fff_ffff;
        at += 9;
        assert!(bytes.len() - at >= len, "truncated frame payload");
        frames.push(RawFrame {
            ty,
            flags,
            id,
            payload: bytes[at..at + len].to_vec(),
        });
        at += len;
    }
    frames
}

/// Connects over a mock transport with the given server handshake
/// SETTINGS, draining the handshake bytes from the outbound log.
pub fn connected_with(
    server_settings: &[(u16, u32)],
    options: ConnectOptions,
) -> (Connection<MockTransport>, MockHandle) {
    let (transport, handle) = pair();
    let mut script = settings_frame(server_settings);
    script.extend_from_slice(&settings_ack());
    handle.feed(script);
    let conn = Connection::connect(transport, "https", "example.com", 443, options)
        .expect("handshake failed");
    handle.take_written();
    (conn, handle)
}

pub fn connected() -> (Connection<MockTransport>, MockHandle) {
    connected_with(&[], ConnectOptions::new())
}

/// Feeds server bytes through the active-mode path.
pub fn feed(
    conn: &mut Connection<MockTransport>,
    handle: &MockHandle,
    bytes: Vec<u8>,
) -> Result<Vec<Event>, StreamFailure> {
    match conn.stream(TransportMessage::Data {
        socket: handle.socket(),
        bytes,
    }) {
        Ok(StreamOutcome::Events(events)) => Ok(events),
        Ok(StreamOutcome::Unknown) => panic!("message for our own socket came back unknown"),
        Err(failure) => Err(failure),
    }
}
