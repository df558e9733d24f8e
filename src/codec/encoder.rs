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

//! HTTP/2 frame serialization.
//!
//! The encoder honors the server's `SETTINGS_MAX_FRAME_SIZE`: header
//! blocks too large for one frame are split into a leading `HEADERS`
//! carrying END_STREAM (when requested) plus `CONTINUATION` frames, with
//! END_HEADERS on the tail only; bodies are split into maximum-size
//! `DATA` chunks with END_STREAM on the final fragment only.

use crate::frame::{Frame, FrameType, Payload, StreamId, END_HEADERS_MASK, END_STREAM_MASK};

/// Frame serializer bounded by the peer's `SETTINGS_MAX_FRAME_SIZE`.
pub(crate) struct FrameEncoder {
    max_frame_size: u32,
}

impl FrameEncoder {
    /// Creates an encoder honoring the given peer limit.
    pub(crate) fn new(max_frame_size: u32) -> Self {
        Self { max_frame_size }
    }

    /// Applies a new server `SETTINGS_MAX_FRAME_SIZE`.
    pub(crate) fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    /// Serializes a single non-splitting frame. DATA payloads must
    /// already fit the peer limit; use [`encode_data`] for whole bodies.
    ///
    /// [`encode_data`]: FrameEncoder::encode_data
    pub(crate) fn encode(&self, frame: &Frame, dst: &mut Vec<u8>) {
        let id = frame.stream_id();
        let flags = frame.flags().bits();
        match frame.payload() {
            Payload::Data(data) => {
                self.frame_header(dst, data.data().len(), FrameType::Data, flags, id);
                dst.extend_from_slice(data.data());
            }
            Payload::Headers(headers) => {
                self.frame_header(dst, headers.fragment().len(), FrameType::Headers, flags, id);
                dst.extend_from_slice(headers.fragment());
            }
            Payload::Priority(priority) => {
                self.frame_header(dst, 5, FrameType::Priority, flags, id);
                let mut word = priority.stream_dependency();
                if priority.is_exclusive() {
                    word |= 0x8000_0000;
                }
                dst.extend_from_slice(&word.to_be_bytes());
                dst.push(priority.weight());
            }
            Payload::RstStream(rst) => {
                self.frame_header(dst, 4, FrameType::RstStream, flags, id);
                dst.extend_from_slice(&rst.error_code().to_be_bytes());
            }
            Payload::Settings(settings) => {
                self.frame_header(dst, settings.encoded_len(), FrameType::Settings, flags, id);
                for setting in settings.get_settings() {
                    dst.extend_from_slice(&setting.identifier().to_be_bytes());
                    dst.extend_from_slice(&setting.value().to_be_bytes());
                }
            }
            Payload::PushPromise(promise) => {
                self.frame_header(
                    dst,
                    promise.fragment().len() + 4,
                    FrameType::PushPromise,
                    flags,
                    id,
                );
                dst.extend_from_slice(&promise.promised_stream_id().to_be_bytes());
                dst.extend_from_slice(promise.fragment());
            }
            Payload::Ping(ping) => {
                self.frame_header(dst, 8, FrameType::Ping, flags, id);
                dst.extend_from_slice(&ping.data());
            }
            Payload::Goaway(goaway) => {
                self.frame_header(
                    dst,
                    8 + goaway.debug_data().len(),
                    FrameType::Goaway,
                    flags,
                    id,
                );
                dst.extend_from_slice(&goaway.last_stream_id().to_be_bytes());
                dst.extend_from_slice(&goaway.error_code().to_be_bytes());
                dst.extend_from_slice(goaway.debug_data());
            }
            Payload::WindowUpdate(update) => {
                self.frame_header(dst, 4, FrameType::WindowUpdate, flags, id);
                dst.extend_from_slice(&update.increment().to_be_bytes());
            }
            Payload::Continuation(continuation) => {
                self.frame_header(
                    dst,
                    continuation.fragment().len(),
                    FrameType::Continuation,
                    flags,
                    id,
                );
                dst.extend_from_slice(continuation.fragment());
            }
            Payload::Unknown(_) => unreachable!("unknown frames are never re-encoded"),
        }
    }

    /// Serializes a complete header block as HEADERS plus as many
    /// CONTINUATION frames as the peer limit requires. END_STREAM (when
    /// requested) rides the leading HEADERS, END_HEADERS the final frame.
    pub(crate) fn encode_header_block(
        &self,
        id: StreamId,
        block: &[u8],
        end_stream: bool,
        dst: &mut Vec<u8>,
    ) {
        let limit = self.max_frame_size as usize;
        let mut chunks = block.chunks(limit);
        let head = chunks.next().unwrap_or(&[]);
        let rest: Vec<&[u8]> = chunks.collect();

        let mut flags = 0u8;
        if end_stream {
            flags |= END_STREAM_MASK;
        }
        if rest.is_empty() {
            flags |= END_HEADERS_MASK;
        }
        self.frame_header(dst, head.len(), FrameType::Headers, flags, id);
        dst.extend_from_slice(head);

        for (n, chunk) in rest.iter().enumerate() {
            let flags = if n + 1 == rest.len() {
                END_HEADERS_MASK
            } else {
                0
            };
            self.frame_header(dst, chunk.len(), FrameType::Continuation, flags, id);
            dst.extend_from_slice(chunk);
        }
    }

    /// Serializes a trailing header block: END_STREAM always set on the
    /// leading frame, END_HEADERS on the tail.
    pub(crate) fn encode_trailer_block(&self, id: StreamId, block: &[u8], dst: &mut Vec<u8>) {
        self.encode_header_block(id, block, true, dst);
    }

    /// Serializes a body slice as maximum-size DATA chunks. When
    /// `end_stream` is set it rides the final chunk only; an empty body
    /// still produces one empty frame so the flag has a carrier.
    pub(crate) fn encode_data(
        &self,
        id: StreamId,
        body: &[u8],
        end_stream: bool,
        dst: &mut Vec<u8>,
    ) {
        let limit = self.max_frame_size as usize;
        if body.is_empty() {
            let flags = if end_stream { END_STREAM_MASK } else { 0 };
            self.frame_header(dst, 0, FrameType::Data, flags, id);
            return;
        }
        let mut chunks = body.chunks(limit).peekable();
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            let flags = if last && end_stream { END_STREAM_MASK } else { 0 };
            self.frame_header(dst, chunk.len(), FrameType::Data, flags, id);
            dst.extend_from_slice(chunk);
        }
    }

    fn frame_header(
        &self,
        dst: &mut Vec<u8>,
        len: usize,
        frame_type: FrameType,
        flags: u8,
        id: StreamId,
    ) {
        let len = len as u32;
        dst.push((len >> 16) as u8);
        dst.push((len >> 8) as u8);
        dst.push(len as u8);
        dst.push(frame_type as u8);
        dst.push(flags);
        dst.extend_from_slice(&(id & 0x7fff_ffff).to_be_bytes());
    }
}

#[cfg(test)]
mod ut_frame_encoder {
    use super::*;
    use crate::codec::FrameDecoder;
    use crate::frame::{Data, FrameFlags, Goaway, Ping, RstStream, Setting, Settings, WindowUpdate};

    fn round_trip(encoder: &FrameEncoder, frame: &Frame) -> Frame {
        let mut wire = Vec::new();
        encoder.encode(frame, &mut wire);
        let mut decoder = FrameDecoder::new(16_384);
        decoder.push(&wire);
        let decoded = decoder.next_frame().unwrap().unwrap();
        assert!(decoder.next_frame().unwrap().is_none());
        decoded
    }

    /// UT test cases for single-frame round trips.
    ///
    /// # Brief
    /// 1. Encodes one frame of several kinds and decodes it back.
    /// 2. Checks the decoded frame equals the original.
    #[test]
    fn ut_encode_round_trip() {
        let encoder = FrameEncoder::new(16_384);

        let frames = [
            Frame::new(
                1,
                FrameFlags::new(END_STREAM_MASK),
                Payload::Data(Data::new(b"body".to_vec())),
            ),
            Frame::new(3, FrameFlags::empty(), Payload::RstStream(RstStream::new(8))),
            Frame::new(
                0,
                FrameFlags::empty(),
                Payload::Settings(Settings::new(vec![
                    Setting::MaxConcurrentStreams(10),
                    Setting::InitialWindowSize(100),
                ])),
            ),
            Frame::new(
                0,
                FrameFlags::empty(),
                Payload::Ping(Ping::new([1, 2, 3, 4, 5, 6, 7, 8])),
            ),
            Frame::new(
                0,
                FrameFlags::empty(),
                Payload::Goaway(Goaway::new(2, 7, b"stop".to_vec())),
            ),
            Frame::new(
                5,
                FrameFlags::empty(),
                Payload::WindowUpdate(WindowUpdate::new(1024)),
            ),
        ];
        for frame in frames {
            assert_eq!(round_trip(&encoder, &frame), frame);
        }
    }

    /// UT test cases for `FrameEncoder::encode_header_block` splitting.
    ///
    /// # Brief
    /// 1. Encodes a header block three times the frame size limit.
    /// 2. Checks a HEADERS frame leads with END_STREAM but not
    ///    END_HEADERS, CONTINUATION frames follow, and only the last one
    ///    carries END_HEADERS.
    /// 3. Checks the reassembled fragments equal the original block.
    #[test]
    fn ut_encode_header_block_split() {
        let encoder = FrameEncoder::new(10);
        let block: Vec<u8> = (0..25).collect();
        let mut wire = Vec::new();
        encoder.encode_header_block(9, &block, true, &mut wire);

        let mut decoder = FrameDecoder::new(16_384);
        decoder.push(&wire);

        let head = decoder.next_frame().unwrap().unwrap();
        assert!(head.flags().is_end_stream());
        assert!(!head.flags().is_end_headers());
        let mut reassembled = match head.payload() {
            Payload::Headers(headers) => headers.fragment().to_vec(),
            other => panic!("expected HEADERS, got {other:?}"),
        };

        let mut tail_seen = false;
        while let Some(frame) = decoder.next_frame().unwrap() {
            assert!(!tail_seen);
            assert_eq!(frame.stream_id(), 9);
            match frame.payload() {
                Payload::Continuation(continuation) => {
                    reassembled.extend_from_slice(continuation.fragment());
                    tail_seen = frame.flags().is_end_headers();
                }
                other => panic!("expected CONTINUATION, got {other:?}"),
            }
        }
        assert!(tail_seen);
        assert_eq!(reassembled, block);
    }

    /// UT test cases for `FrameEncoder::encode_data` splitting.
    ///
    /// # Brief
    /// 1. Encodes a body larger than the frame size limit.
    /// 2. Checks the chunk count, that only the final chunk carries
    ///    END_STREAM, and that the chunks concatenate to the body.
    /// 3. Checks an empty body still produces one END_STREAM frame.
    #[test]
    fn ut_encode_data_split() {
        let encoder = FrameEncoder::new(4);
        let body = b"0123456789";
        let mut wire = Vec::new();
        encoder.encode_data(1, body, true, &mut wire);

        let mut decoder = FrameDecoder::new(16_384);
        decoder.push(&wire);
        let mut collected = Vec::new();
        let mut frames = 0;
        let mut end_stream_frames = 0;
        let mut last_had_end_stream = false;
        while let Some(frame) = decoder.next_frame().unwrap() {
            frames += 1;
            last_had_end_stream = frame.flags().is_end_stream();
            if last_had_end_stream {
                end_stream_frames += 1;
            }
            match frame.payload() {
                Payload::Data(data) => collected.extend_from_slice(data.data()),
                other => panic!("expected DATA, got {other:?}"),
            }
        }
        assert_eq!(frames, 3);
        assert_eq!(end_stream_frames, 1);
        assert!(last_had_end_stream);
        assert_eq!(collected, body);

        let mut wire = Vec::new();
        encoder.encode_data(1, &[], true, &mut wire);
        let mut decoder = FrameDecoder::new(16_384);
        decoder.push(&wire);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert!(frame.flags().is_end_stream());
        match frame.payload() {
            Payload::Data(data) => assert!(data.data().is_empty()),
            other => panic!("expected DATA, got {other:?}"),
        }
    }
}
