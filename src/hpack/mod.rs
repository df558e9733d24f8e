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

//! [HPACK] implementation of the [HTTP/2 protocol].
//!
//! [HPACK]: https://httpwg.org/specs/rfc7541.html
//! [HTTP/2 protocol]: https://httpwg.org/specs/rfc9113.html
//!
//! HPACK is a compressor that eliminates redundant header fields, limits
//! vulnerability to known security attacks, and has a bounded memory
//! requirement for use in constrained environments.
//!
//! Each direction of a connection carries its own dynamic table: the
//! [`HpackEncoder`] compresses outgoing request header blocks against the
//! table sized by the server's `SETTINGS_HEADER_TABLE_SIZE`, and the
//! [`HpackDecoder`] decompresses incoming response blocks against the
//! table sized by our own. Any decoding failure is unrecoverable for the
//! connection and maps to a `COMPRESSION_ERROR` at connection scope.

mod decoder;
mod encoder;
mod huffman;
mod integer;
mod table;

pub(crate) use decoder::HpackDecoder;
pub(crate) use encoder::HpackEncoder;

/// Reasons a header block can fail to decode. The connection reports
/// these in the `GOAWAY` debug data, so each renders a short cause.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum HpackDecodeError {
    /// The block ended in the middle of a representation.
    Truncated,
    /// An integer representation exceeded the machine range.
    IntegerOverflow,
    /// A string literal carried an invalid Huffman code or padding.
    InvalidHuffmanCode,
    /// An index pointed outside the static and dynamic tables.
    InvalidIndex(usize),
    /// A dynamic table size update exceeded the negotiated capacity.
    SizeUpdateTooLarge { size: usize, limit: usize },
    /// A decoded name or value was not valid UTF-8.
    InvalidString,
}

impl HpackDecodeError {
    /// Renders the human-readable cause used in GOAWAY debug data.
    pub(crate) fn cause(&self) -> String {
        match self {
            HpackDecodeError::Truncated => String::from("bad binary encoding"),
            HpackDecodeError::IntegerOverflow => String::from("integer overflow"),
            HpackDecodeError::InvalidHuffmanCode => String::from("bad huffman encoding"),
            HpackDecodeError::InvalidIndex(index) => format!("invalid table index {index}"),
            HpackDecodeError::SizeUpdateTooLarge { size, limit } => {
                format!("dynamic table size update of {size} above the limit of {limit}")
            }
            HpackDecodeError::InvalidString => String::from("header content is not valid UTF-8"),
        }
    }
}
