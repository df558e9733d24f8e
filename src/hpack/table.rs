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

//! The [`Static Table`] and [`Dynamic Table`] of [HPACK].
//!
//! [`Static Table`]: https://httpwg.org/specs/rfc7541.html#static.table
//! [`Dynamic Table`]: https://httpwg.org/specs/rfc7541.html#dynamic.table
//! [HPACK]: https://httpwg.org/specs/rfc7541.html
//!
//! The static table is a predefined list of 61 common header fields. The
//! dynamic table is a size-bounded FIFO of header fields maintained per
//! direction; the first and newest entry is at the lowest index. Indexes
//! 1..=61 address the static table, 62.. the dynamic table.

use std::collections::VecDeque;

/// The predefined static list of header fields from `RFC7541 Appendix A`.
/// Entry `i` of the table has HPACK index `i + 1`.
pub(crate) static STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Match kind found by a table lookup.
pub(crate) enum TableIndex {
    /// Both name and value matched at this index.
    Field(usize),
    /// Only the name matched at this index.
    Name(usize),
}

/// The [`Dynamic Table`] implementation of HPACK.
///
/// The table can contain duplicate entries, and entries are evicted from
/// the oldest end whenever the accounted size exceeds the maximum. Per
/// `RFC7541 section-4.1`, every entry costs an additional 32 octets on
/// top of its name and value lengths.
///
/// [`Dynamic Table`]: https://httpwg.org/specs/rfc7541.html#dynamic.table
pub(crate) struct DynamicTable {
    queue: VecDeque<(String, String)>,
    curr_size: usize,
    max_size: usize,
}

impl DynamicTable {
    /// Creates a `DynamicTable` with the given size limit.
    pub(crate) fn with_max_size(max_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            curr_size: 0,
            max_size,
        }
    }

    pub(crate) fn max_size(&self) -> usize {
        self.max_size
    }

    /// Gets an entry by its zero-based dynamic index.
    pub(crate) fn field(&self, index: usize) -> Option<(String, String)> {
        self.queue.get(index).cloned()
    }

    /// Prepends a field, evicting from the back until the size fits.
    pub(crate) fn update(&mut self, name: String, value: String) {
        self.curr_size += name.len() + value.len() + 32;
        self.queue.push_front((name, value));
        self.fit_size();
    }

    /// Updates the table's maximum size, evicting as needed.
    pub(crate) fn update_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.fit_size();
    }

    fn fit_size(&mut self) {
        while self.curr_size > self.max_size {
            if let Some((name, value)) = self.queue.pop_back() {
                self.curr_size -= name.len() + value.len() + 32;
            } else {
                break;
            }
        }
    }

    /// Tries to find the index of a field, preferring a full match.
    fn index(&self, name: &str, value: &str) -> Option<TableIndex> {
        let mut name_only = None;
        for (n, (h, v)) in self.queue.iter().enumerate() {
            if h == name {
                if v == value {
                    return Some(TableIndex::Field(n));
                }
                if name_only.is_none() {
                    name_only = Some(TableIndex::Name(n));
                }
            }
        }
        name_only
    }
}

/// Finds fields and indexes across the static and dynamic tables, using
/// the unified address space of `RFC7541 section-2.3.3`.
pub(crate) struct TableSearcher<'a> {
    dynamic: &'a DynamicTable,
}

impl<'a> TableSearcher<'a> {
    pub(crate) fn new(dynamic: &'a DynamicTable) -> Self {
        Self { dynamic }
    }

    /// Looks a field up by its unified index.
    pub(crate) fn field(&self, index: usize) -> Option<(String, String)> {
        if (1..=STATIC_TABLE.len()).contains(&index) {
            let (name, value) = STATIC_TABLE[index - 1];
            Some((name.to_string(), value.to_string()))
        } else {
            self.dynamic.field(index.checked_sub(62)?)
        }
    }

    /// Searches both tables for a field, preferring full matches and
    /// static entries.
    pub(crate) fn index(&self, name: &str, value: &str) -> Option<TableIndex> {
        let mut name_only = None;
        for (n, (h, v)) in STATIC_TABLE.iter().enumerate() {
            if *h == name {
                if *v == value {
                    return Some(TableIndex::Field(n + 1));
                }
                if name_only.is_none() {
                    name_only = Some(TableIndex::Name(n + 1));
                }
            }
        }
        match self.dynamic.index(name, value) {
            Some(TableIndex::Field(i)) => Some(TableIndex::Field(i + 62)),
            Some(TableIndex::Name(i)) if name_only.is_none() => Some(TableIndex::Name(i + 62)),
            _ => name_only,
        }
    }
}
