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

//! The transport boundary of the connection core.
//!
//! The core never owns a socket: it writes through an abstract
//! [`Transport`] and consumes inbound bytes either by calling
//! [`Transport::recv`] itself (passive mode) or by being handed
//! [`TransportMessage`] values the I/O runtime collected (active mode).
//! TCP/TLS establishment and ALPN negotiation happen before the
//! transport reaches the core.

use std::time::Duration;

use crate::error::TransportError;

/// Identity of one transport, used to match asynchronously delivered
/// messages to the connection they belong to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SocketId(pub u64);

/// Byte-stream transport underneath one HTTP/2 connection.
pub trait Transport {
    /// Writes the whole buffer or fails.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Reads at least `min_len` bytes (0 meaning "whatever is there"),
    /// waiting at most `timeout` when given.
    fn recv(&mut self, min_len: usize, timeout: Option<Duration>)
        -> Result<Vec<u8>, TransportError>;

    /// Closes the transport. Closing an already closed transport must
    /// succeed.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Stable identity of this transport.
    fn id(&self) -> SocketId;
}

/// A transport-shaped message delivered to the connection's controlling
/// owner in active mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    /// Bytes arrived on the socket.
    Data {
        /// Which socket produced them.
        socket: SocketId,
        /// The received bytes, fragmented however the transport liked.
        bytes: Vec<u8>,
    },
    /// The socket was closed by the peer.
    Closed {
        /// Which socket closed.
        socket: SocketId,
    },
    /// The socket failed.
    Error {
        /// Which socket failed.
        socket: SocketId,
        /// The reported failure.
        error: TransportError,
    },
}

impl TransportMessage {
    /// The socket the message is about.
    pub fn socket(&self) -> SocketId {
        match self {
            TransportMessage::Data { socket, .. } => *socket,
            TransportMessage::Closed { socket } => *socket,
            TransportMessage::Error { socket, .. } => *socket,
        }
    }
}

/// In-memory scripted transport for driving the core in tests.
#[doc(hidden)]
pub mod mock {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use super::{SocketId, Transport};
    use crate::error::TransportError;

    static NEXT_SOCKET: AtomicU64 = AtomicU64::new(1);

    struct Shared {
        written: Vec<u8>,
        inbound: VecDeque<Vec<u8>>,
        send_error: Option<TransportError>,
        closed: bool,
    }

    /// A scripted in-memory transport. The connection owns the
    /// [`MockTransport`]; the test keeps the [`MockHandle`] to feed
    /// inbound bytes and observe outbound ones.
    pub struct MockTransport {
        id: SocketId,
        shared: Rc<RefCell<Shared>>,
    }

    /// Test-side handle of a [`MockTransport`].
    pub struct MockHandle {
        id: SocketId,
        shared: Rc<RefCell<Shared>>,
    }

    /// Creates a connected transport/handle pair.
    pub fn pair() -> (MockTransport, MockHandle) {
        let id = SocketId(NEXT_SOCKET.fetch_add(1, Ordering::Relaxed));
        let shared = Rc::new(RefCell::new(Shared {
            written: Vec::new(),
            inbound: VecDeque::new(),
            send_error: None,
            closed: false,
        }));
        (
            MockTransport {
                id,
                shared: Rc::clone(&shared),
            },
            MockHandle { id, shared },
        )
    }

    impl Transport for MockTransport {
        fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
            let mut shared = self.shared.borrow_mut();
            if let Some(error) = shared.send_error.take() {
                return Err(error);
            }
            if shared.closed {
                return Err(TransportError::Closed);
            }
            shared.written.extend_from_slice(bytes);
            Ok(())
        }

        fn recv(
            &mut self,
            _min_len: usize,
            _timeout: Option<Duration>,
        ) -> Result<Vec<u8>, TransportError> {
            let mut shared = self.shared.borrow_mut();
            match shared.inbound.pop_front() {
                Some(bytes) => Ok(bytes),
                None if shared.closed => Err(TransportError::Closed),
                None => Err(TransportError::Timeout),
            }
        }

        fn close(&mut self) -> Result<(), TransportError> {
            self.shared.borrow_mut().closed = true;
            Ok(())
        }

        fn id(&self) -> SocketId {
            self.id
        }
    }

    impl MockHandle {
        /// The socket identity of the paired transport.
        pub fn socket(&self) -> SocketId {
            self.id
        }

        /// Queues one batch of inbound bytes for the next `recv`.
        pub fn feed(&self, bytes: impl Into<Vec<u8>>) {
            self.shared.borrow_mut().inbound.push_back(bytes.into());
        }

        /// Drains and returns everything the connection wrote so far.
        pub fn take_written(&self) -> Vec<u8> {
            std::mem::take(&mut self.shared.borrow_mut().written)
        }

        /// Makes the next `send` fail with the given error.
        pub fn fail_next_send(&self, error: TransportError) {
            self.shared.borrow_mut().send_error = Some(error);
        }

        /// Whether the connection closed the transport.
        pub fn is_closed(&self) -> bool {
            self.shared.borrow().closed
        }
    }
}
