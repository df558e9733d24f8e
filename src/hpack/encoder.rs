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

//! HPACK header block encoder.
//!
//! Compresses request header lists against the send-direction dynamic
//! table, whose capacity follows the server's
//! `SETTINGS_HEADER_TABLE_SIZE`. Indexed representations are preferred,
//! literals fall back to incremental indexing, and a fixed set of
//! sensitive header names is always emitted never-indexed so that
//! intermediaries cannot probe their values through the table.

use super::huffman::{huffman_encode, huffman_encoded_len};
use super::integer::encode_integer;
use super::table::{DynamicTable, TableIndex, TableSearcher};

/// Header names that must not enter any compression context.
const NEVER_INDEXED_NAMES: [&str; 4] = [
    "authorization",
    "cookie",
    "proxy-authorization",
    "set-cookie",
];

enum Encoding {
    Indexed(usize),
    IndexedName(usize),
    LiteralName,
    NeverIndexed(Option<usize>),
}

/// The send half of the HPACK context.
pub(crate) struct HpackEncoder {
    table: DynamicTable,
    pending_capacity: Option<u32>,
}

impl HpackEncoder {
    /// Creates an encoder whose dynamic table is bounded by `capacity`.
    pub(crate) fn new(capacity: u32) -> Self {
        Self {
            table: DynamicTable::with_max_size(capacity as usize),
            pending_capacity: None,
        }
    }

    /// Applies a new server `SETTINGS_HEADER_TABLE_SIZE`. The matching
    /// dynamic table size update is emitted at the start of the next
    /// encoded block, as `RFC7541 section-4.2` requires.
    pub(crate) fn update_capacity(&mut self, capacity: u32) {
        self.table.update_size(capacity as usize);
        self.pending_capacity = Some(capacity);
    }

    /// Encodes a header list into one contiguous header block.
    pub(crate) fn encode(&mut self, fields: &[(String, String)]) -> Vec<u8> {
        let mut dst = Vec::new();
        if let Some(capacity) = self.pending_capacity.take() {
            encode_integer(capacity as usize, 0x1f, 0x20, &mut dst);
        }

        for (name, value) in fields {
            let encoding = self.select_encoding(name, value);
            match encoding {
                Encoding::Indexed(index) => {
                    encode_integer(index, 0x7f, 0x80, &mut dst);
                }
                Encoding::IndexedName(index) => {
                    encode_integer(index, 0x3f, 0x40, &mut dst);
                    write_string(value.as_bytes(), &mut dst);
                    self.table.update(name.clone(), value.clone());
                }
                Encoding::LiteralName => {
                    dst.push(0x40);
                    write_string(name.as_bytes(), &mut dst);
                    write_string(value.as_bytes(), &mut dst);
                    self.table.update(name.clone(), value.clone());
                }
                Encoding::NeverIndexed(index) => {
                    match index {
                        Some(index) => encode_integer(index, 0x0f, 0x10, &mut dst),
                        None => {
                            dst.push(0x10);
                            write_string(name.as_bytes(), &mut dst);
                        }
                    }
                    write_string(value.as_bytes(), &mut dst);
                }
            }
        }
        dst
    }

    fn select_encoding(&self, name: &str, value: &str) -> Encoding {
        let searcher = TableSearcher::new(&self.table);
        if NEVER_INDEXED_NAMES.contains(&name) {
            return match searcher.index(name, value) {
                Some(TableIndex::Field(i)) | Some(TableIndex::Name(i)) => {
                    Encoding::NeverIndexed(Some(i))
                }
                None => Encoding::NeverIndexed(None),
            };
        }
        match searcher.index(name, value) {
            Some(TableIndex::Field(i)) => Encoding::Indexed(i),
            Some(TableIndex::Name(i)) => Encoding::IndexedName(i),
            None => Encoding::LiteralName,
        }
    }
}

/// Writes a string literal, Huffman-coded when that is shorter.
fn write_string(src: &[u8], dst: &mut Vec<u8>) {
    let huffman_len = huffman_encoded_len(src);
    if huffman_len < src.len() {
        encode_integer(huffman_len, 0x7f, 0x80, dst);
        huffman_encode(src, dst);
    } else {
        encode_integer(src.len(), 0x7f, 0x00, dst);
        dst.extend_from_slice(src);
    }
}
