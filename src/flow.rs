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

//! Flow-control windows at connection and stream scope.
//!
//! Windows are signed 31-bit quantities: a SETTINGS_INITIAL_WINDOW_SIZE
//! shrink can push a stream's send window below zero, and both windows
//! saturate their arithmetic against the protocol ceiling of 2^31 - 1,
//! past which any movement is a `FLOW_CONTROL_ERROR`.

use crate::error::{ErrorCode, H2Error};
use crate::frame::{Frame, FrameFlags, Payload, StreamId, WindowUpdate};
use crate::settings::MAX_WINDOW_SIZE;

/// The sending window: only the peer-visible size is retained, moved by
/// outbound DATA and by received WINDOW_UPDATE and SETTINGS frames.
pub(crate) struct SendWindow {
    size: i32,
}

impl SendWindow {
    pub(crate) fn new(size: i32) -> Self {
        Self { size }
    }

    /// Bytes that may be sent right now; a negative window yields zero.
    pub(crate) fn available(&self) -> u32 {
        if self.size < 0 {
            0
        } else {
            self.size as u32
        }
    }

    /// Applies a SETTINGS-driven shrink. The result may go negative.
    pub(crate) fn shrink(&mut self, size: u32) {
        self.size -= size as i32;
    }

    /// Applies a WINDOW_UPDATE or SETTINGS-driven grow; growing past
    /// 2^31 - 1 is a flow-control violation by the peer.
    pub(crate) fn grow(&mut self, size: u32) -> Result<(), H2Error> {
        let (next, overflow) = self.size.overflowing_add(size as i32);
        if overflow || next > MAX_WINDOW_SIZE as i32 {
            return Err(H2Error::conn(
                ErrorCode::FlowControlError,
                "send window incremented above 2^31 - 1",
            ));
        }
        self.size = next;
        Ok(())
    }

    /// Deducts sent body bytes.
    pub(crate) fn consume(&mut self, size: u32) {
        self.size -= size as i32;
    }
}

/// The receiving window keeps two sizes: `advertised` is what the peer
/// may still send (moved by inbound DATA and by our WINDOW_UPDATE), and
/// `target` is what we want the peer to see, which only changes when the
/// caller reconfigures SETTINGS_INITIAL_WINDOW_SIZE.
pub(crate) struct RecvWindow {
    advertised: i32,
    target: i32,
}

impl RecvWindow {
    pub(crate) fn new(size: i32) -> Self {
        Self {
            advertised: size,
            target: size,
        }
    }

    /// Bytes the peer may still send; a negative window yields zero.
    pub(crate) fn available(&self) -> u32 {
        if self.advertised < 0 {
            0
        } else {
            self.advertised as u32
        }
    }

    pub(crate) fn target(&self) -> i32 {
        self.target
    }

    /// Moves both the target and the advertised window by the delta of a
    /// SETTINGS_INITIAL_WINDOW_SIZE change, mirroring the adjustment the
    /// peer makes when it processes our SETTINGS (RFC 9113 section
    /// 6.9.2).
    pub(crate) fn retarget(&mut self, new_target: u32) {
        let delta = new_target as i32 - self.target;
        self.target += delta;
        self.advertised += delta;
    }

    /// Accounts received body bytes against the advertised window.
    pub(crate) fn consume(&mut self, size: u32) {
        self.advertised -= size as i32;
    }

    /// The refill a WINDOW_UPDATE should carry, once more than half the
    /// target window has been consumed; `None` below that threshold.
    fn pending_refill(&self) -> Option<u32> {
        let consumed = self.target - self.advertised;
        if consumed > 0 && consumed * 2 > self.target {
            Some(consumed as u32)
        } else {
            None
        }
    }

    /// Emits the WINDOW_UPDATE restoring the window to its target, if
    /// the refill threshold has been crossed.
    pub(crate) fn check_window_update(&mut self, id: StreamId) -> Option<Frame> {
        let refill = self.pending_refill()?;
        self.advertised += refill as i32;
        Some(Frame::new(
            id,
            FrameFlags::empty(),
            Payload::WindowUpdate(WindowUpdate::new(refill)),
        ))
    }
}

/// The connection-scope window pair.
pub(crate) struct FlowControl {
    recv: RecvWindow,
    send: SendWindow,
}

impl FlowControl {
    pub(crate) fn new(recv_size: u32, send_size: u32) -> Self {
        Self {
            recv: RecvWindow::new(recv_size as i32),
            send: SendWindow::new(send_size as i32),
        }
    }

    pub(crate) fn send_available(&self) -> u32 {
        self.send.available()
    }

    pub(crate) fn recv_available(&self) -> u32 {
        self.recv.available()
    }

    pub(crate) fn consume_send(&mut self, size: u32) {
        self.send.consume(size);
    }

    pub(crate) fn grow_send(&mut self, size: u32) -> Result<(), H2Error> {
        self.send.grow(size)
    }

    pub(crate) fn consume_recv(&mut self, size: u32) {
        self.recv.consume(size);
    }

    /// Emits the connection-scope WINDOW_UPDATE when due.
    pub(crate) fn check_window_update(&mut self) -> Option<Frame> {
        self.recv.check_window_update(0)
    }
}

#[cfg(test)]
mod ut_send_window {
    use super::*;

    /// UT test case for `SendWindow::available`.
    ///
    /// # Brief
    /// 1. Creates send windows with positive and negative sizes.
    /// 2. Checks the available size clamps at zero.
    #[test]
    fn ut_sw_available() {
        assert_eq!(SendWindow::new(100).available(), 100);
        assert_eq!(SendWindow::new(-1).available(), 0);
    }

    /// UT test case for `SendWindow::grow`.
    ///
    /// # Brief
    /// 1. Grows a window within bounds and checks the new size.
    /// 2. Grows past 2^31 - 1 and checks the flow-control error.
    /// 3. Grows a negative window back over zero.
    #[test]
    fn ut_sw_grow() {
        let mut sw = SendWindow::new(100);
        assert!(sw.grow(50).is_ok());
        assert_eq!(sw.available(), 150);

        let mut sw = SendWindow::new(i32::MAX);
        let res = sw.grow(1);
        assert!(matches!(
            res,
            Err(H2Error::Connection(ErrorCode::FlowControlError, _))
        ));

        let mut sw = SendWindow::new(-10);
        assert!(sw.grow(30).is_ok());
        assert_eq!(sw.available(), 20);
    }

    /// UT test case for `SendWindow::consume` and `SendWindow::shrink`.
    ///
    /// # Brief
    /// 1. Consumes and shrinks a window.
    /// 2. Checks the window may legally go negative.
    #[test]
    fn ut_sw_consume_shrink() {
        let mut sw = SendWindow::new(100);
        sw.consume(60);
        assert_eq!(sw.available(), 40);
        sw.shrink(50);
        assert_eq!(sw.available(), 0);
        assert!(sw.grow(10).is_ok());
        assert_eq!(sw.available(), 0);
    }
}

#[cfg(test)]
mod ut_recv_window {
    use super::*;

    /// UT test case for `RecvWindow::pending_refill` thresholds.
    ///
    /// # Brief
    /// 1. Consumes less than half the target and checks no update is due.
    /// 2. Consumes past half and checks the refill restores the target.
    #[test]
    fn ut_rw_refill_threshold() {
        let mut rw = RecvWindow::new(100);
        rw.consume(20);
        assert!(rw.check_window_update(1).is_none());

        rw.consume(31);
        let frame = rw.check_window_update(1).expect("update due");
        match frame.payload() {
            Payload::WindowUpdate(update) => assert_eq!(update.increment(), 51),
            other => panic!("expected WINDOW_UPDATE, got {other:?}"),
        }
        assert_eq!(rw.available(), 100);
    }

    /// UT test case for `RecvWindow::retarget`.
    ///
    /// # Brief
    /// 1. Consumes bytes, then raises and lowers the target window.
    /// 2. Checks the consumed distance is preserved across retargets and
    ///    the refill threshold follows the new target.
    #[test]
    fn ut_rw_retarget() {
        let mut rw = RecvWindow::new(100);
        rw.consume(40);
        rw.retarget(200);
        assert_eq!(rw.target(), 200);
        // Still 40 consumed out of a 200 target: under the threshold.
        assert!(rw.check_window_update(1).is_none());

        rw.retarget(60);
        assert_eq!(rw.target(), 60);
        // Now 40 consumed of a 60 target: refill is due.
        let frame = rw.check_window_update(1).expect("update due");
        match frame.payload() {
            Payload::WindowUpdate(update) => assert_eq!(update.increment(), 40),
            other => panic!("expected WINDOW_UPDATE, got {other:?}"),
        }
        assert_eq!(rw.available(), 60);
    }
}

#[cfg(test)]
mod ut_flow_control {
    use super::*;

    /// UT test case for `FlowControl` window accounting.
    ///
    /// # Brief
    /// 1. Creates the connection pair and moves both directions.
    /// 2. Checks availability after sends, receives and grows.
    #[test]
    fn ut_fc_accounting() {
        let mut fc = FlowControl::new(100, 200);
        assert_eq!(fc.recv_available(), 100);
        assert_eq!(fc.send_available(), 200);

        fc.consume_send(50);
        fc.consume_recv(50);
        assert_eq!(fc.send_available(), 150);
        assert_eq!(fc.recv_available(), 50);

        assert!(fc.grow_send(25).is_ok());
        assert_eq!(fc.send_available(), 175);
    }

    /// UT test case for `FlowControl::check_window_update`.
    ///
    /// # Brief
    /// 1. Consumes past half of the connection receive window.
    /// 2. Checks the emitted WINDOW_UPDATE targets stream zero.
    #[test]
    fn ut_fc_window_update() {
        let mut fc = FlowControl::new(100, 100);
        assert!(fc.check_window_update().is_none());
        fc.consume_recv(51);
        let frame = fc.check_window_update().expect("update due");
        assert_eq!(frame.stream_id(), 0);
    }

}
