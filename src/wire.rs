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

//! The downstream seam: the gateway runtime's per-viewer protocol encoder.
//!
//! This crate does not speak the gateway wire protocol itself. It decides
//! *what* to send and *when*: ordered drawing commands, batched per frame.
//! The actual encoding and transmission belong to a [`ViewerSocket`]
//! implementation supplied by the gateway runtime, one per attached viewer.
//!
//! Every method takes `&self`: the runtime serialises writes per socket, so
//! implementations are expected to carry their own internal synchronisation
//! (typically a mutex around the underlying stream, as the write halves in
//! this crate's surrounding server do).

use async_trait::async_trait;
use std::io;

/// A viewer's downstream connection, as seen by the session engine.
///
/// Pixel payloads are packed `0x00RRGGBB` words (cursor images
/// `0xAARRGGBB`), row-major and tightly packed: the row stride always equals
/// the rectangle width. Commands must reach the viewer in call order;
/// [`ViewerSocket::end_frame`] delimits one batch of updates, and
/// [`ViewerSocket::flush`] pushes buffered output onto the network.
#[async_trait]
pub trait ViewerSocket: Send + Sync {
    /// Announces the display dimensions, initially and on every change.
    async fn surface_resize(&self, width: u16, height: u16) -> io::Result<()>;

    /// Composites a rectangle of pixels at `(x, y)`.
    async fn surface_draw(
        &self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        pixels: &[u32],
    ) -> io::Result<()>;

    /// Copies a rectangle of existing display content to `(dest_x, dest_y)`.
    async fn surface_copy(
        &self,
        src_x: u16,
        src_y: u16,
        width: u16,
        height: u16,
        dest_x: u16,
        dest_y: u16,
    ) -> io::Result<()>;

    /// Replaces the cursor image. The hotspot is relative to the image's
    /// top-left corner.
    async fn set_cursor(
        &self,
        hotspot_x: u16,
        hotspot_y: u16,
        width: u16,
        height: u16,
        pixels: &[u32],
    ) -> io::Result<()>;

    /// Marks the end of one frame's worth of updates.
    async fn end_frame(&self) -> io::Result<()>;

    /// Flushes any buffered output to the viewer.
    async fn flush(&self) -> io::Result<()>;
}
