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

//! Typed view of the [`SETTINGS`] parameters of one endpoint.
//!
//! Each side of a connection keeps a [`PeerSettings`] record: the local
//! one describes what we advertised to the server, the remote one what the
//! server advertised to us. Both start at the RFC 9113 defaults; a value
//! becomes authoritative once the SETTINGS frame carrying it has been
//! processed.
//!
//! [`SETTINGS`]: https://httpwg.org/specs/rfc9113.html#SETTINGS

use crate::frame::Setting;

/// Default size of the HPACK dynamic table.
pub(crate) const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Default flow-control window size at both scopes.
pub(crate) const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// Default and minimum allowed SETTINGS_MAX_FRAME_SIZE.
pub(crate) const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Largest allowed SETTINGS_MAX_FRAME_SIZE (2^24 - 1).
pub(crate) const MAX_ALLOWED_FRAME_SIZE: u32 = 16_777_215;

/// Largest allowed window size (2^31 - 1).
pub(crate) const MAX_WINDOW_SIZE: u32 = 0x7fff_ffff;

/// The SETTINGS parameters of one endpoint, RFC defaults filled in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerSettings {
    /// Maximum size of the header compression table the peer decodes with.
    pub header_table_size: u32,
    /// Whether server push is permitted.
    pub enable_push: bool,
    /// Maximum number of concurrent streams the sender allows its peer to
    /// initiate. The RFC leaves this unlimited by default.
    pub max_concurrent_streams: u32,
    /// Initial stream-scope flow-control window size.
    pub initial_window_size: u32,
    /// Largest frame payload the sender is willing to receive.
    pub max_frame_size: u32,
    /// Advisory maximum size of a header list, in uncompressed octets plus
    /// 32 per field. `None` means unlimited.
    pub max_header_list_size: Option<u32>,
    /// Whether extended CONNECT (RFC 8441) is permitted.
    pub enable_connect_protocol: bool,
}

impl Default for PeerSettings {
    fn default() -> Self {
        PeerSettings {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            enable_push: true,
            max_concurrent_streams: u32::MAX,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
            enable_connect_protocol: false,
        }
    }
}

impl PeerSettings {
    /// Applies one received parameter to the record. Value-range
    /// validation happens during frame decoding, so this cannot fail.
    pub(crate) fn apply(&mut self, setting: &Setting) {
        match *setting {
            Setting::HeaderTableSize(v) => self.header_table_size = v,
            Setting::EnablePush(v) => self.enable_push = v,
            Setting::MaxConcurrentStreams(v) => self.max_concurrent_streams = v,
            Setting::InitialWindowSize(v) => self.initial_window_size = v,
            Setting::MaxFrameSize(v) => self.max_frame_size = v,
            Setting::MaxHeaderListSize(v) => self.max_header_list_size = Some(v),
            Setting::EnableConnectProtocol(v) => self.enable_connect_protocol = v,
        }
    }
}

/// Keys for reading a single server-advertised setting through
/// [`Connection::server_setting`].
///
/// [`Connection::server_setting`]: crate::connection::Connection::server_setting
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ServerSetting {
    HeaderTableSize,
    EnablePush,
    MaxConcurrentStreams,
    InitialWindowSize,
    MaxFrameSize,
    MaxHeaderListSize,
    EnableConnectProtocol,
}

/// A partial update of the local SETTINGS, built with the builder idiom
/// and sent through [`Connection::put_settings`] or as the
/// `client_settings` connect option.
///
/// # Panics
/// Setter methods validate value ranges immediately and panic on values
/// the protocol cannot express, since that is a programmer mistake rather
/// than a runtime condition:
///
/// - `initial_window_size` greater than 2^31 - 1;
/// - `max_frame_size` outside the range 2^14 ..= 2^24 - 1.
///
/// [`Connection::put_settings`]: crate::connection::Connection::put_settings
///
/// # Examples
///
/// ```
/// use h2core::SettingsUpdate;
///
/// let update = SettingsUpdate::new()
///     .header_table_size(4096)
///     .enable_push(false)
///     .max_frame_size(2 << 13);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub(crate) header_table_size: Option<u32>,
    pub(crate) enable_push: Option<bool>,
    pub(crate) max_concurrent_streams: Option<u32>,
    pub(crate) initial_window_size: Option<u32>,
    pub(crate) max_frame_size: Option<u32>,
    pub(crate) max_header_list_size: Option<u32>,
    pub(crate) enable_connect_protocol: Option<bool>,
}

impl SettingsUpdate {
    /// Creates an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// SETTINGS_HEADER_TABLE_SIZE (0x01).
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.header_table_size = Some(size);
        self
    }

    /// SETTINGS_ENABLE_PUSH (0x02).
    pub fn enable_push(mut self, enable: bool) -> Self {
        self.enable_push = Some(enable);
        self
    }

    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x03).
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.max_concurrent_streams = Some(max);
        self
    }

    /// SETTINGS_INITIAL_WINDOW_SIZE (0x04).
    pub fn initial_window_size(mut self, size: u32) -> Self {
        assert!(
            size <= MAX_WINDOW_SIZE,
            "initial_window_size must be at most 2^31 - 1, got {size}"
        );
        self.initial_window_size = Some(size);
        self
    }

    /// SETTINGS_MAX_FRAME_SIZE (0x05).
    pub fn max_frame_size(mut self, size: u32) -> Self {
        assert!(
            (DEFAULT_MAX_FRAME_SIZE..=MAX_ALLOWED_FRAME_SIZE).contains(&size),
            "max_frame_size must be in 16384..=16777215, got {size}"
        );
        self.max_frame_size = Some(size);
        self
    }

    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x06).
    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.max_header_list_size = Some(size);
        self
    }

    /// SETTINGS_ENABLE_CONNECT_PROTOCOL (0x08).
    pub fn enable_connect_protocol(mut self, enable: bool) -> Self {
        self.enable_connect_protocol = Some(enable);
        self
    }

    /// Whether the update carries no parameters at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Converts the update into wire-order SETTINGS parameters.
    pub(crate) fn to_wire(&self) -> Vec<Setting> {
        let mut settings = Vec::new();
        if let Some(v) = self.header_table_size {
            settings.push(Setting::HeaderTableSize(v));
        }
        if let Some(v) = self.enable_push {
            settings.push(Setting::EnablePush(v));
        }
        if let Some(v) = self.max_concurrent_streams {
            settings.push(Setting::MaxConcurrentStreams(v));
        }
        if let Some(v) = self.initial_window_size {
            settings.push(Setting::InitialWindowSize(v));
        }
        if let Some(v) = self.max_frame_size {
            settings.push(Setting::MaxFrameSize(v));
        }
        if let Some(v) = self.max_header_list_size {
            settings.push(Setting::MaxHeaderListSize(v));
        }
        if let Some(v) = self.enable_connect_protocol {
            settings.push(Setting::EnableConnectProtocol(v));
        }
        settings
    }

    /// Applies the update to a settings record, once acked.
    pub(crate) fn apply_to(&self, settings: &mut PeerSettings) {
        for setting in self.to_wire() {
            settings.apply(&setting);
        }
    }
}

#[cfg(test)]
mod ut_settings {
    use super::*;

    /// UT test cases for `PeerSettings::default`.
    ///
    /// # Brief
    /// 1. Builds the default record.
    /// 2. Checks every field against the RFC 9113 initial values.
    #[test]
    fn ut_peer_settings_default() {
        let settings = PeerSettings::default();
        assert_eq!(settings.header_table_size, 4096);
        assert!(settings.enable_push);
        assert_eq!(settings.max_concurrent_streams, u32::MAX);
        assert_eq!(settings.initial_window_size, 65_535);
        assert_eq!(settings.max_frame_size, 16_384);
        assert_eq!(settings.max_header_list_size, None);
        assert!(!settings.enable_connect_protocol);
    }

    /// UT test cases for `PeerSettings::apply`.
    ///
    /// # Brief
    /// 1. Applies a few parameters to a default record.
    /// 2. Checks that only the named fields change.
    #[test]
    fn ut_peer_settings_apply() {
        let mut settings = PeerSettings::default();
        settings.apply(&Setting::MaxConcurrentStreams(100));
        settings.apply(&Setting::MaxHeaderListSize(8192));
        assert_eq!(settings.max_concurrent_streams, 100);
        assert_eq!(settings.max_header_list_size, Some(8192));
        assert_eq!(settings.max_frame_size, 16_384);
    }

    /// UT test cases for `SettingsUpdate::to_wire`.
    ///
    /// # Brief
    /// 1. Builds an update through the builder methods.
    /// 2. Checks the wire parameter list and its order.
    #[test]
    fn ut_settings_update_to_wire() {
        let update = SettingsUpdate::new()
            .header_table_size(4096)
            .enable_push(true)
            .max_frame_size(16384)
            .max_header_list_size(8192);
        let wire = update.to_wire();
        let mut iter = wire.iter();
        assert_eq!(iter.next(), Some(&Setting::HeaderTableSize(4096)));
        assert_eq!(iter.next(), Some(&Setting::EnablePush(true)));
        assert_eq!(iter.next(), Some(&Setting::MaxFrameSize(16384)));
        assert_eq!(iter.next(), Some(&Setting::MaxHeaderListSize(8192)));
        assert_eq!(iter.next(), None);

        assert!(SettingsUpdate::new().is_empty());
        assert!(!update.is_empty());
    }

    /// UT test cases for `SettingsUpdate` range validation.
    ///
    /// # Brief
    /// 1. Passes an out-of-range max_frame_size to the builder.
    /// 2. Checks that the builder panics.
    #[test]
    #[should_panic(expected = "max_frame_size must be in 16384..=16777215")]
    fn ut_settings_update_rejects_bad_frame_size() {
        let _ = SettingsUpdate::new().max_frame_size(1);
    }

    /// UT test cases for `SettingsUpdate` window validation.
    ///
    /// # Brief
    /// 1. Passes an initial window size above 2^31 - 1 to the builder.
    /// 2. Checks that the builder panics.
    #[test]
    #[should_panic(expected = "initial_window_size must be at most 2^31 - 1")]
    fn ut_settings_update_rejects_bad_window() {
        let _ = SettingsUpdate::new().initial_window_size(0x8000_0000);
    }
}
