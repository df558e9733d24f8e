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

//! HPACK header block decoder.
//!
//! Decodes one complete, reassembled header block at a time against the
//! receive-direction dynamic table. The connection layer is responsible
//! for concatenating `HEADERS`/`PUSH_PROMISE` fragments with their
//! `CONTINUATION` tail before calling in here.

use super::huffman::huffman_decode;
use super::integer::decode_integer;
use super::table::{DynamicTable, TableSearcher};
use super::HpackDecodeError;
use crate::error::{ErrorCode, H2Error};

/// Prefix patterns of the five representations in `RFC7541 section-6`.
const INDEXED: u8 = 0x80;
const LITERAL_WITH_INDEXING: u8 = 0x40;
const SIZE_UPDATE: u8 = 0x20;
const LITERAL_NEVER_INDEXED: u8 = 0x10;

/// The receive half of the HPACK context.
pub(crate) struct HpackDecoder {
    table: DynamicTable,
    /// Capacity ceiling from our `SETTINGS_HEADER_TABLE_SIZE`; the peer
    /// may move the table size below it but never above.
    capacity: u32,
}

impl HpackDecoder {
    /// Creates a decoder whose dynamic table is bounded by `capacity`.
    pub(crate) fn new(capacity: u32) -> Self {
        Self {
            table: DynamicTable::with_max_size(capacity as usize),
            capacity,
        }
    }

    /// Applies a new local `SETTINGS_HEADER_TABLE_SIZE` once acked.
    pub(crate) fn update_capacity(&mut self, capacity: u32) {
        self.capacity = capacity;
        if self.table.max_size() > capacity as usize {
            self.table.update_size(capacity as usize);
        }
    }

    /// Decodes a complete header block into a field list, in block order.
    /// Any failure taints the whole connection as `COMPRESSION_ERROR`.
    pub(crate) fn decode(&mut self, block: &[u8]) -> Result<Vec<(String, String)>, H2Error> {
        self.decode_inner(block).map_err(|e| {
            H2Error::conn(
                ErrorCode::CompressionError,
                format!("unable to decode headers: {}", e.cause()),
            )
        })
    }

    fn decode_inner(&mut self, block: &[u8]) -> Result<Vec<(String, String)>, HpackDecodeError> {
        let mut fields = Vec::new();
        let mut pos = 0;

        while pos < block.len() {
            let first = block[pos];
            if first & INDEXED != 0 {
                let index = decode_integer(block, &mut pos, 0x7f)?;
                fields.push(self.field_at(index)?);
            } else if first & LITERAL_WITH_INDEXING != 0 {
                let (name, value) = self.literal(block, &mut pos, 0x3f)?;
                self.table.update(name.clone(), value.clone());
                fields.push((name, value));
            } else if first & SIZE_UPDATE != 0 {
                let size = decode_integer(block, &mut pos, 0x1f)?;
                if size > self.capacity as usize {
                    return Err(HpackDecodeError::SizeUpdateTooLarge {
                        size,
                        limit: self.capacity as usize,
                    });
                }
                self.table.update_size(size);
            } else {
                // Never-indexed and without-indexing literals decode the
                // same way; the distinction only binds intermediaries.
                let _never_indexed = first & LITERAL_NEVER_INDEXED != 0;
                let (name, value) = self.literal(block, &mut pos, 0x0f)?;
                fields.push((name, value));
            }
        }
        Ok(fields)
    }

    /// Reads a literal representation: an indexed or literal name
    /// followed by a literal value.
    fn literal(
        &self,
        block: &[u8],
        pos: &mut usize,
        mask: u8,
    ) -> Result<(String, String), HpackDecodeError> {
        let name_index = decode_integer(block, pos, mask)?;
        let name = if name_index == 0 {
            read_string(block, pos)?
        } else {
            self.field_at(name_index)?.0
        };
        let value = read_string(block, pos)?;
        Ok((name, value))
    }

    fn field_at(&self, index: usize) -> Result<(String, String), HpackDecodeError> {
        TableSearcher::new(&self.table)
            .field(index)
            .ok_or(HpackDecodeError::InvalidIndex(index))
    }
}

/// Reads a string literal: a Huffman flag and length prefix followed by
/// that many octets.
fn read_string(block: &[u8], pos: &mut usize) -> Result<String, HpackDecodeError> {
    let huffman = block.get(*pos).ok_or(HpackDecodeError::Truncated)? & 0x80 != 0;
    let len = decode_integer(block, pos, 0x7f)?;
    let end = pos.checked_add(len).ok_or(HpackDecodeError::IntegerOverflow)?;
    let raw = block.get(*pos..end).ok_or(HpackDecodeError::Truncated)?;
    *pos = end;

    let octets = if huffman {
        let mut decoded = Vec::with_capacity(len * 2);
        huffman_decode(raw, &mut decoded)?;
        decoded
    } else {
        raw.to_vec()
    };
    String::from_utf8(octets).map_err(|_| HpackDecodeError::InvalidString)
}
