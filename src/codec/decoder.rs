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

//! Incremental HTTP/2 frame decoder.
//!
//! Bytes are pushed in exactly as the transport delivered them; the
//! decoder buffers across pushes and yields one complete, validated
//! [`Frame`] at a time. Validation here covers framing only: payload
//! sizes against each frame kind's fixed-size rule and the local
//! `SETTINGS_MAX_FRAME_SIZE`, the stream-id-zero rules, padding bounds,
//! and SETTINGS value ranges. Stream-state legality is the connection's
//! business.

use crate::codec::FRAME_HEADER_LENGTH;
use crate::error::{ErrorCode, H2Error};
use crate::frame::{
    Continuation, Data, Frame, FrameFlags, Goaway, Headers, Payload, Ping, Priority, PushPromise,
    RstStream, Setting, Settings, UnknownFrame, WindowUpdate,
};
use crate::settings::{DEFAULT_MAX_FRAME_SIZE, MAX_ALLOWED_FRAME_SIZE, MAX_WINDOW_SIZE};

/// Frame type octets of the RFC 9113 registry.
const DATA_TYPE: u8 = 0x0;
const HEADERS_TYPE: u8 = 0x1;
const PRIORITY_TYPE: u8 = 0x2;
const RST_STREAM_TYPE: u8 = 0x3;
const SETTINGS_TYPE: u8 = 0x4;
const PUSH_PROMISE_TYPE: u8 = 0x5;
const PING_TYPE: u8 = 0x6;
const GOAWAY_TYPE: u8 = 0x7;
const WINDOW_UPDATE_TYPE: u8 = 0x8;
const CONTINUATION_TYPE: u8 = 0x9;

/// Incremental frame decoder with an internal reassembly buffer.
pub(crate) struct FrameDecoder {
    buf: Vec<u8>,
    offset: usize,
    max_frame_size: u32,
}

impl FrameDecoder {
    /// Creates a decoder enforcing the given local
    /// `SETTINGS_MAX_FRAME_SIZE`.
    pub(crate) fn new(max_frame_size: u32) -> Self {
        Self {
            buf: Vec::new(),
            offset: 0,
            max_frame_size,
        }
    }

    /// Raises or lowers the enforced maximum payload size, once a new
    /// local SETTINGS value is acked.
    pub(crate) fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    /// Appends transport bytes to the reassembly buffer.
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        if self.offset > 0 {
            self.buf.drain(..self.offset);
            self.offset = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Pops the next complete frame, or `None` when more bytes are
    /// needed. Framing faults taint the connection and are final.
    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>, H2Error> {
        let available = &self.buf[self.offset..];
        if available.len() < FRAME_HEADER_LENGTH {
            return Ok(None);
        }

        let len =
            u32::from_be_bytes([0, available[0], available[1], available[2]]) as usize;
        let type_byte = available[3];
        let flags = FrameFlags::new(available[4]);
        // The high bit of the stream-id word is reserved and ignored.
        let id = u32::from_be_bytes([available[5], available[6], available[7], available[8]])
            & 0x7fff_ffff;

        if len > self.max_frame_size as usize {
            return Err(H2Error::conn(
                ErrorCode::FrameSizeError,
                format!(
                    "frame payload of {len} bytes exceeds SETTINGS_MAX_FRAME_SIZE of {}",
                    self.max_frame_size
                ),
            ));
        }
        if available.len() < FRAME_HEADER_LENGTH + len {
            return Ok(None);
        }

        let payload = &available[FRAME_HEADER_LENGTH..FRAME_HEADER_LENGTH + len];
        let decoded = decode_payload(type_byte, flags, id, payload);
        // The frame is consumed either way: stream-scope faults must not
        // leave it in the buffer to be decoded again.
        self.offset += FRAME_HEADER_LENGTH + len;
        let frame = decoded?;
        Ok(frame.map(|payload| Frame::new(id, flags, payload)))
    }
}

fn decode_payload(
    type_byte: u8,
    flags: FrameFlags,
    id: u32,
    payload: &[u8],
) -> Result<Option<Payload>, H2Error> {
    match type_byte {
        DATA_TYPE => decode_data(flags, id, payload).map(Some),
        HEADERS_TYPE => decode_headers(flags, id, payload).map(Some),
        PRIORITY_TYPE => decode_priority(id, payload).map(Some),
        RST_STREAM_TYPE => decode_rst_stream(id, payload).map(Some),
        SETTINGS_TYPE => decode_settings(flags, id, payload).map(Some),
        PUSH_PROMISE_TYPE => decode_push_promise(flags, id, payload).map(Some),
        PING_TYPE => decode_ping(id, payload).map(Some),
        GOAWAY_TYPE => decode_goaway(id, payload).map(Some),
        WINDOW_UPDATE_TYPE => decode_window_update(id, payload).map(Some),
        CONTINUATION_TYPE => decode_continuation(id, payload).map(Some),
        // Implementations MUST ignore and discard frames of unknown
        // types.
        other => Ok(Some(Payload::Unknown(UnknownFrame::new(
            other,
            payload.len() as u32,
        )))),
    }
}

fn require_stream_frame(name: &str, id: u32) -> Result<(), H2Error> {
    if id == 0 {
        return Err(H2Error::conn(
            ErrorCode::ProtocolError,
            format!("frame {name} not allowed at the connection level"),
        ));
    }
    Ok(())
}

fn require_connection_frame(name: &str, id: u32) -> Result<(), H2Error> {
    if id != 0 {
        return Err(H2Error::conn(
            ErrorCode::ProtocolError,
            format!("frame {name} only allowed at the connection level"),
        ));
    }
    Ok(())
}

/// Strips the pad-length octet and trailing padding when PADDED is set.
fn strip_padding<'a>(
    name: &str,
    flags: FrameFlags,
    payload: &'a [u8],
) -> Result<&'a [u8], H2Error> {
    if !flags.is_padded() {
        return Ok(payload);
    }
    let pad_len = *payload.first().ok_or_else(|| {
        H2Error::conn(
            ErrorCode::FrameSizeError,
            format!("padded frame {name} with an empty payload"),
        )
    })? as usize;
    if pad_len + 1 > payload.len() {
        return Err(H2Error::conn(
            ErrorCode::ProtocolError,
            format!("frame {name} padding longer than the payload"),
        ));
    }
    Ok(&payload[1..payload.len() - pad_len])
}

fn decode_data(flags: FrameFlags, id: u32, payload: &[u8]) -> Result<Payload, H2Error> {
    require_stream_frame("DATA", id)?;
    let flow_size = payload.len() as u32;
    let data = strip_padding("DATA", flags, payload)?;
    Ok(Payload::Data(Data::with_flow_size(data.to_vec(), flow_size)))
}

fn decode_headers(flags: FrameFlags, id: u32, payload: &[u8]) -> Result<Payload, H2Error> {
    require_stream_frame("HEADERS", id)?;
    let mut fragment = strip_padding("HEADERS", flags, payload)?;
    if flags.is_priority() {
        // The exclusive bit, dependency and weight are parsed out and
        // discarded; stream prioritization is deprecated.
        if fragment.len() < 5 {
            return Err(H2Error::conn(
                ErrorCode::FrameSizeError,
                "HEADERS frame too short for its priority block",
            ));
        }
        fragment = &fragment[5..];
    }
    Ok(Payload::Headers(Headers::new(fragment.to_vec())))
}

fn decode_priority(id: u32, payload: &[u8]) -> Result<Payload, H2Error> {
    require_stream_frame("PRIORITY", id)?;
    if payload.len() != 5 {
        // A PRIORITY frame of any other length is a fault of the stream
        // alone.
        return Err(H2Error::stream(
            id,
            ErrorCode::FrameSizeError,
            format!("PRIORITY frame with invalid payload size {}", payload.len()),
        ));
    }
    let word = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Ok(Payload::Priority(Priority::new(
        word & 0x8000_0000 != 0,
        word & 0x7fff_ffff,
        payload[4],
    )))
}

fn decode_rst_stream(id: u32, payload: &[u8]) -> Result<Payload, H2Error> {
    require_stream_frame("RST_STREAM", id)?;
    if payload.len() != 4 {
        return Err(H2Error::conn(
            ErrorCode::FrameSizeError,
            format!(
                "RST_STREAM frame with invalid payload size {}",
                payload.len()
            ),
        ));
    }
    let code = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Ok(Payload::RstStream(RstStream::new(code)))
}

fn decode_settings(flags: FrameFlags, id: u32, payload: &[u8]) -> Result<Payload, H2Error> {
    require_connection_frame("SETTINGS", id)?;
    if flags.is_ack() {
        if !payload.is_empty() {
            return Err(H2Error::conn(
                ErrorCode::FrameSizeError,
                "SETTINGS ACK frame with a non-empty payload",
            ));
        }
        return Ok(Payload::Settings(Settings::new(vec![])));
    }
    if payload.len() % 6 != 0 {
        return Err(H2Error::conn(
            ErrorCode::FrameSizeError,
            format!(
                "SETTINGS frame size {} is not a multiple of 6",
                payload.len()
            ),
        ));
    }

    let mut settings = Vec::with_capacity(payload.len() / 6);
    for chunk in payload.chunks_exact(6) {
        let identifier = u16::from_be_bytes([chunk[0], chunk[1]]);
        let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);
        if let Some(setting) = decode_setting(identifier, value)? {
            settings.push(setting);
        }
    }
    Ok(Payload::Settings(Settings::new(settings)))
}

/// Decodes one SETTINGS parameter, validating the value ranges of RFC
/// 9113 section 6.5.2. Unknown identifiers are ignored.
fn decode_setting(identifier: u16, value: u32) -> Result<Option<Setting>, H2Error> {
    let setting = match identifier {
        0x01 => Setting::HeaderTableSize(value),
        0x02 => {
            if value > 1 {
                return Err(H2Error::conn(
                    ErrorCode::ProtocolError,
                    format!("invalid SETTINGS_ENABLE_PUSH value {value}"),
                ));
            }
            Setting::EnablePush(value == 1)
        }
        0x03 => Setting::MaxConcurrentStreams(value),
        0x04 => {
            if value > MAX_WINDOW_SIZE {
                return Err(H2Error::conn(
                    ErrorCode::FlowControlError,
                    format!("SETTINGS_INITIAL_WINDOW_SIZE value {value} above 2^31 - 1"),
                ));
            }
            Setting::InitialWindowSize(value)
        }
        0x05 => {
            if !(DEFAULT_MAX_FRAME_SIZE..=MAX_ALLOWED_FRAME_SIZE).contains(&value) {
                return Err(H2Error::conn(
                    ErrorCode::ProtocolError,
                    format!("invalid SETTINGS_MAX_FRAME_SIZE value {value}"),
                ));
            }
            Setting::MaxFrameSize(value)
        }
        0x06 => Setting::MaxHeaderListSize(value),
        0x08 => {
            if value > 1 {
                return Err(H2Error::conn(
                    ErrorCode::ProtocolError,
                    format!("invalid SETTINGS_ENABLE_CONNECT_PROTOCOL value {value}"),
                ));
            }
            Setting::EnableConnectProtocol(value == 1)
        }
        _ => return Ok(None),
    };
    Ok(Some(setting))
}

fn decode_push_promise(flags: FrameFlags, id: u32, payload: &[u8]) -> Result<Payload, H2Error> {
    require_stream_frame("PUSH_PROMISE", id)?;
    let stripped = strip_padding("PUSH_PROMISE", flags, payload)?;
    if stripped.len() < 4 {
        return Err(H2Error::conn(
            ErrorCode::FrameSizeError,
            "PUSH_PROMISE frame too short for a promised stream id",
        ));
    }
    let promised =
        u32::from_be_bytes([stripped[0], stripped[1], stripped[2], stripped[3]]) & 0x7fff_ffff;
    Ok(Payload::PushPromise(PushPromise::new(
        promised,
        stripped[4..].to_vec(),
    )))
}

fn decode_ping(id: u32, payload: &[u8]) -> Result<Payload, H2Error> {
    require_connection_frame("PING", id)?;
    let data: [u8; 8] = payload.try_into().map_err(|_| {
        H2Error::conn(
            ErrorCode::FrameSizeError,
            format!("PING frame with invalid payload size {}", payload.len()),
        )
    })?;
    Ok(Payload::Ping(Ping::new(data)))
}

fn decode_goaway(id: u32, payload: &[u8]) -> Result<Payload, H2Error> {
    require_connection_frame("GOAWAY", id)?;
    if payload.len() < 8 {
        return Err(H2Error::conn(
            ErrorCode::FrameSizeError,
            format!("GOAWAY frame with invalid payload size {}", payload.len()),
        ));
    }
    let last_id =
        u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7fff_ffff;
    let code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    Ok(Payload::Goaway(Goaway::new(
        code,
        last_id,
        payload[8..].to_vec(),
    )))
}

fn decode_window_update(id: u32, payload: &[u8]) -> Result<Payload, H2Error> {
    if payload.len() != 4 {
        return Err(H2Error::conn(
            ErrorCode::FrameSizeError,
            format!(
                "WINDOW_UPDATE frame with invalid payload size {}",
                payload.len()
            ),
        ));
    }
    let increment =
        u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7fff_ffff;
    if increment == 0 {
        let debug = "WINDOW_UPDATE frame with an increment of 0";
        return Err(if id == 0 {
            H2Error::conn(ErrorCode::ProtocolError, debug)
        } else {
            H2Error::stream(id, ErrorCode::ProtocolError, debug)
        });
    }
    Ok(Payload::WindowUpdate(WindowUpdate::new(increment)))
}

fn decode_continuation(id: u32, payload: &[u8]) -> Result<Payload, H2Error> {
    require_stream_frame("CONTINUATION", id)?;
    Ok(Payload::Continuation(Continuation::new(payload.to_vec())))
}
