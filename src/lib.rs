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

//! `h2core` is a sans-I/O [HTTP/2] client connection core.
//!
//! The crate provides one [`Connection`]: a pure state machine over a
//! single HTTP/2 connection in the client role. It owns no socket, no
//! thread and no event loop. Callers pass transport bytes in, receive
//! outbound bytes through an abstract [`Transport`], and consume an
//! ordered stream of structured response [`Event`]s. The decoupling lets
//! the same core run under any I/O runtime, in active or passive mode,
//! and be unit-tested with hand-crafted frames.
//!
//! The core covers:
//!
//! - the connection state: stream table, flow-control windows, [HPACK]
//!   contexts, local and remote SETTINGS, preface bookkeeping, GOAWAY
//!   state and the PING ledger;
//! - the per-stream state machine of RFC 9113 section 5.1, including
//!   trailers, interim (1xx) responses and server push;
//! - the frame codec: length-prefixed framing, flag decoding and
//!   CONTINUATION reassembly;
//! - flow control at both scopes, including send-buffer partitioning
//!   and WINDOW_UPDATE emission;
//! - request admission and fragmentation against the server's
//!   SETTINGS limits;
//! - error classification: connection errors (GOAWAY), stream errors
//!   (RST_STREAM) and local faults surfaced to the caller.
//!
//! TLS, TCP, ALPN, DNS, connection pooling and retries live outside the
//! core, behind the [`Transport`] boundary.
//!
//! [HTTP/2]: https://httpwg.org/specs/rfc9113.html
//! [HPACK]: https://httpwg.org/specs/rfc7541.html

mod codec;
mod connection;
mod error;
mod event;
mod flow;
mod frame;
mod headers;
mod hpack;
mod settings;
mod stream;
mod util;

pub mod transport;

pub use connection::{
    Body, BodyChunk, ConnectOptions, Connection, Mode, OwnerToken, StreamFailure, StreamOutcome,
    WindowScope,
};
pub use error::{Error, ErrorCode, Http2Error, TransportError, WindowKind};
pub use event::{Event, PingRef, RequestRef};
pub use frame::{Setting, StreamId};
pub use settings::{PeerSettings, ServerSetting, SettingsUpdate};
pub use transport::{SocketId, Transport, TransportMessage};
