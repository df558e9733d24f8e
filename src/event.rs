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

//! Caller-visible response events.
//!
//! Every `stream`/`recv` call returns an ordered list of [`Event`]s
//! derived from the inbound frames, in strict frame order. Per stream the
//! sequence is: one `Status` (or a chain of informational statuses
//! followed by the final one), then `Headers`, then interleaved `Data`
//! and trailing `Headers`, then exactly one terminal event, either `Done`
//! or `Error`. Connection-scope events (`Settings`, `SettingsAck`,
//! `Pong`) interleave wherever their frames arrived.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::Http2Error;

/// Allocator shared by every handle kind so that handles stay unique
/// across connections in one process.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

fn next_handle() -> u64 {
    NEXT_HANDLE.fetch_add(1, Ordering::Relaxed)
}

/// Opaque handle identifying one request on its connection. Handles are
/// value types: cheap to copy, comparable and hashable, and they never
/// alias a live request of another connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestRef(u64);

impl RequestRef {
    pub(crate) fn generate() -> Self {
        RequestRef(next_handle())
    }
}

/// Opaque handle identifying one in-flight PING.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PingRef(u64);

impl PingRef {
    pub(crate) fn generate() -> Self {
        PingRef(next_handle())
    }

    pub(crate) fn value(&self) -> u64 {
        self.0
    }
}

/// One element of the ordered response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The response status line of a request. Informational (1xx)
    /// statuses may repeat; the final status arrives exactly once.
    Status {
        /// The request this status belongs to.
        request: RequestRef,
        /// The HTTP status code.
        code: u16,
    },

    /// A decoded header block: informational, final or trailing.
    /// Pseudo-headers are stripped; `cookie` values are concatenated in
    /// order of appearance.
    Headers {
        /// The request these headers belong to.
        request: RequestRef,
        /// Header fields in the order the server sent them.
        headers: Vec<(String, String)>,
    },

    /// A chunk of the response body. An empty chunk is still delivered
    /// when the server sent an empty DATA frame carrying END_STREAM.
    Data {
        /// The request this chunk belongs to.
        request: RequestRef,
        /// The received bytes, padding stripped.
        chunk: Vec<u8>,
    },

    /// Terminal event: the response completed normally.
    Done {
        /// The request that finished.
        request: RequestRef,
    },

    /// Terminal event: the request failed. The connection itself may
    /// well still be usable.
    Error {
        /// The request that failed.
        request: RequestRef,
        /// What went wrong.
        error: Http2Error,
    },

    /// The server announced a pushed response on a new reserved stream.
    PushPromise {
        /// The request the push is associated with.
        request: RequestRef,
        /// Handle for the pushed response's stream.
        promised: RequestRef,
        /// The promised request's header fields.
        headers: Vec<(String, String)>,
    },

    /// The server's SETTINGS frame was applied. Only surfaced when the
    /// connection opted into async settings; the applied values are
    /// readable through `server_setting`.
    Settings,

    /// The server acknowledged a locally issued SETTINGS frame; the new
    /// local values are in force.
    SettingsAck,

    /// The server answered the PING identified by the handle.
    Pong(PingRef),
}
