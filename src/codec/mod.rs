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

//! The HTTP/2 frame codec: a length-prefixed [`FrameDecoder`] that
//! tolerates arbitrary fragmentation of the inbound byte stream, and a
//! [`FrameEncoder`] that serializes frames and splits oversized header
//! blocks and bodies at the peer's `SETTINGS_MAX_FRAME_SIZE`.

mod decoder;
mod encoder;

pub(crate) use decoder::FrameDecoder;
pub(crate) use encoder::FrameEncoder;

/// Length of the fixed frame header: 24-bit length, type, flags and the
/// reserved-bit-plus-stream-id word.
pub(crate) const FRAME_HEADER_LENGTH: usize = 9;
