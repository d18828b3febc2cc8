// Copyright 2025 the vnc-gateway authors
//
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

//! The upstream seam: the RFB client library driving the VNC connection.
//!
//! This crate does not implement the RFB protocol. It assumes a client
//! library that negotiates the handshake, decodes encodings into an
//! internal framebuffer, and exposes the connection through the traits
//! here. Decoded server activity is surfaced as [`RfbUpdate`] values from
//! [`RfbClient::handle_server_message`] rather than C-style callbacks, so
//! the session's dispatch is an explicit `match` instead of shared mutable
//! callback state.
//!
//! A connection is handed over split in two, in the same spirit as a
//! stream's read and write halves: the [`RfbClient`] half is owned by the
//! session task and drives message handling, while the [`RfbInput`] half is
//! shared behind a mutex so viewer tasks can inject pointer, key, and
//! clipboard events without ever contending with the session's readiness
//! wait.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::time::Duration;

use crate::pixels::RfbPixelFormat;
use crate::settings::Settings;

/// Connection parameters handed to an [`RfbConnector`].
///
/// Everything here is resolved from the owner's [`Settings`]; the connector
/// applies them during the handshake and must not reinterpret them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RfbConfig {
    /// Hostname of the VNC server or repeater. Empty for a listening
    /// (reverse) connection.
    pub hostname: String,
    /// Port of the VNC server or repeater.
    pub port: u16,
    /// Password to present if the server demands authentication.
    pub password: Option<String>,
    /// The pixel format to request. The server may answer with a different
    /// one; [`RfbClient::pixel_format`] always reports the format in
    /// effect.
    pub requested_format: RfbPixelFormat,
    /// Comma-separated encodings preference list to apply, if any.
    pub encodings: Option<String>,
    /// Repeater destination host, if connecting through a VNC repeater.
    pub dest_host: Option<String>,
    /// Repeater destination port.
    pub dest_port: u16,
    /// Whether to listen for a server-initiated connection instead of
    /// dialing out.
    pub reverse_connect: bool,
    /// Port to listen on when `reverse_connect` is set.
    pub listen_port: u16,
    /// How long to listen before the connection attempt fails.
    pub listen_timeout: Duration,
    /// Whether the library should negotiate client-side cursor rendering
    /// and deliver [`RfbUpdate::CursorShape`] events. When false the cursor
    /// stays composited into the framebuffer on the server side.
    pub local_cursor: bool,
}

impl RfbConfig {
    /// Builds the connection parameters for the given owner settings.
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            hostname: settings.hostname.clone(),
            port: settings.port,
            password: settings.password.clone(),
            requested_format: RfbPixelFormat::for_depth(settings.color_depth),
            encodings: settings.encodings.clone(),
            dest_host: settings.dest_host.clone(),
            dest_port: settings.dest_port,
            reverse_connect: settings.reverse_connect,
            listen_port: settings.listen_port,
            listen_timeout: settings.listen_timeout,
            local_cursor: !settings.read_only && !settings.remote_cursor,
        }
    }
}

/// One decoded piece of server activity.
///
/// Updates carry coordinates only where the pixel data lives in the
/// library's framebuffer ([`RfbUpdate::Rect`]); cursor and clipboard
/// payloads are owned by the event, so nothing refers back into library
/// memory after `handle_server_message` returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RfbUpdate {
    /// A framebuffer region was updated in place; the new pixels are in
    /// [`RfbClient::framebuffer`] at these coordinates.
    Rect {
        /// Left edge of the updated region.
        x: u16,
        /// Top edge of the updated region.
        y: u16,
        /// Region width in pixels.
        width: u16,
        /// Region height in pixels.
        height: u16,
    },

    /// A CopyRect: the region at `(src_x, src_y)` moved to
    /// `(dest_x, dest_y)`. Libraries commonly follow this with a
    /// [`RfbUpdate::Rect`] covering the destination; the session suppresses
    /// that redundant draw.
    CopyRect {
        /// Source left edge.
        src_x: u16,
        /// Source top edge.
        src_y: u16,
        /// Copied width in pixels.
        width: u16,
        /// Copied height in pixels.
        height: u16,
        /// Destination left edge.
        dest_x: u16,
        /// Destination top edge.
        dest_y: u16,
    },

    /// A new cursor shape. `source` holds `width * height` pixels in the
    /// connection's pixel format; `mask` is one bit per pixel, MSB first,
    /// with rows padded to `(width + 7) / 8` bytes. Set bits are opaque.
    CursorShape {
        /// Hotspot X offset within the image.
        hotspot_x: u16,
        /// Hotspot Y offset within the image.
        hotspot_y: u16,
        /// Image width in pixels.
        width: u16,
        /// Image height in pixels.
        height: u16,
        /// Pixel data in the connection's format.
        source: Bytes,
        /// 1-bit transparency mask.
        mask: Bytes,
    },

    /// Cut text from the server, still in the connection's clipboard
    /// encoding.
    CutText(Bytes),

    /// The server changed the framebuffer dimensions. Libraries must emit
    /// this *before* replacing their internal framebuffer, so the shared
    /// display can resize ahead of the first draw at the new size.
    Resized {
        /// New framebuffer width.
        width: u16,
        /// New framebuffer height.
        height: u16,
    },
}

/// The session-owned half of an RFB connection.
#[async_trait]
pub trait RfbClient: Send + Sync {
    /// Current framebuffer width in pixels.
    fn width(&self) -> u16;

    /// Current framebuffer height in pixels.
    fn height(&self) -> u16;

    /// The pixel format actually in effect, as reported by the server.
    fn pixel_format(&self) -> RfbPixelFormat;

    /// The library's decoded framebuffer: tightly packed rows of
    /// `width * bytes_per_pixel` bytes in native byte order.
    fn framebuffer(&self) -> &[u8];

    /// Whether the library has already-buffered data, in which case a
    /// readiness wait would be pointless.
    fn buffered(&self) -> bool;

    /// Waits until a call to [`RfbClient::handle_server_message`] would not
    /// block, for at most `timeout`. Buffered data counts as immediately
    /// readable. Returns `Ok(true)` when data is available, `Ok(false)` on
    /// timeout, and an error when the connection is no longer usable.
    async fn wait_for_message(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Reads and decodes pending server messages, returning the resulting
    /// updates in arrival order.
    async fn handle_server_message(&mut self) -> io::Result<Vec<RfbUpdate>>;
}

/// The shared half of an RFB connection, carrying viewer input upstream.
///
/// Calls must be externally serialised; the session keeps the handle behind
/// one mutex, which is all the locking the library is promised.
#[async_trait]
pub trait RfbInput: Send {
    /// Sends a pointer position and button state.
    async fn send_pointer_event(&mut self, x: u16, y: u16, button_mask: u8) -> io::Result<()>;

    /// Sends a key press or release.
    async fn send_key_event(&mut self, keysym: u32, pressed: bool) -> io::Result<()>;

    /// Sends clipboard cut text, already transcoded to the connection's
    /// clipboard encoding.
    async fn send_cut_text(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Establishes RFB connections.
///
/// One connector serves a whole deployment; each successful call yields a
/// fresh connection split into its two halves. The connector is responsible
/// for the complete handshake: requesting the configured pixel format,
/// applying the encodings list, performing repeater registration against
/// `dest_host`/`dest_port`, and, for reverse connections, listening on
/// `listen_port` for up to `listen_timeout` before failing.
#[async_trait]
pub trait RfbConnector: Send + Sync {
    /// Connects (or accepts, for reverse connections) and completes the RFB
    /// handshake.
    async fn connect(&self, config: &RfbConfig)
        -> io::Result<(Box<dyn RfbClient>, Box<dyn RfbInput>)>;
}
