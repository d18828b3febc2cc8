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

//! The shared display: one surface and one cursor, many viewers.
//!
//! A session maintains a single copy of the upstream framebuffer, translated
//! to the gateway pixel format, plus the shared cursor. Every attached
//! viewer receives the same ordered stream of drawing commands; a viewer
//! that attaches mid-session is first brought up to date by replaying the
//! current surface and cursor, so from its perspective it joined at a frame
//! boundary.
//!
//! Draws are batched: they composite into the local surface and only extend
//! a dirty rectangle, which [`SharedDisplay::flush`] turns into one
//! `surface_draw` per viewer at the end of each frame. Copies and resizes
//! cannot be reordered past draws, so they first flush the pending dirty
//! region and are then broadcast immediately.
//!
//! Only the session task mutates the surface. Viewer tasks read it during
//! replay and mutate cursor position state, which synchronises internally.

use log::warn;
use std::io;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

use crate::cursor::{CursorImage, SharedCursor};
use crate::wire::ViewerSocket;

/// An axis-aligned rectangle on the display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    /// Left edge in pixels.
    pub x: u16,
    /// Top edge in pixels.
    pub y: u16,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
}

impl Rect {
    /// The smallest rectangle containing both `self` and `other`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // display coordinates fit in u16
    pub fn union(self, other: Rect) -> Rect {
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = (u32::from(self.x) + u32::from(self.width))
            .max(u32::from(other.x) + u32::from(other.width));
        let y2 = (u32::from(self.y) + u32::from(self.height))
            .max(u32::from(other.y) + u32::from(other.height));
        Rect {
            x: x1,
            y: y1,
            width: (x2 - u32::from(x1)) as u16,
            height: (y2 - u32::from(y1)) as u16,
        }
    }

    /// The intersection of `self` with a `width x height` surface, or `None`
    /// when they do not overlap.
    fn clip_to(self, width: u16, height: u16) -> Option<Rect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            None
        } else {
            Some(Rect { x: self.x, y: self.y, width: w, height: h })
        }
    }
}

/// The in-memory copy of the display, valid once allocated.
struct Surface {
    width: u16,
    height: u16,
    /// Row-major `0x00RRGGBB` words, stride = `width`.
    pixels: Vec<u32>,
    /// Region modified since the last flush.
    dirty: Option<Rect>,
}

impl Surface {
    fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; usize::from(width) * usize::from(height)],
            dirty: None,
        }
    }

    fn index(&self, x: u16, y: u16) -> usize {
        usize::from(y) * usize::from(self.width) + usize::from(x)
    }

    /// Copies the pixels of `rect` into a tightly packed buffer.
    fn extract(&self, rect: Rect) -> Vec<u32> {
        let mut out = Vec::with_capacity(usize::from(rect.width) * usize::from(rect.height));
        for dy in 0..rect.height {
            let start = self.index(rect.x, rect.y + dy);
            out.extend_from_slice(&self.pixels[start..start + usize::from(rect.width)]);
        }
        out
    }
}

/// A viewer's registered downstream socket.
struct Sink {
    id: usize,
    socket: Arc<dyn ViewerSocket>,
}

/// Shared display handle. Clones refer to the same display.
#[derive(Clone)]
pub struct SharedDisplay {
    surface: Arc<RwLock<Option<Surface>>>,
    sinks: Arc<RwLock<Vec<Sink>>>,
    cursor: SharedCursor,
    ready: Arc<watch::Sender<bool>>,
}

impl Default for SharedDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedDisplay {
    /// Creates an unallocated display. [`SharedDisplay::allocate`] must run
    /// (after the upstream handshake reports dimensions) before any drawing
    /// operation has an effect.
    #[must_use]
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            surface: Arc::new(RwLock::new(None)),
            sinks: Arc::new(RwLock::new(Vec::new())),
            cursor: SharedCursor::new(),
            ready: Arc::new(ready),
        }
    }

    /// A watch that flips to `true` once the display has been allocated.
    /// Guests joining before the upstream handshake completes wait on this
    /// before replaying display state.
    #[must_use]
    pub fn ready_watch(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Whether [`SharedDisplay::allocate`] has run.
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        *self.ready.borrow()
    }

    /// Current surface dimensions, if allocated.
    pub async fn dimensions(&self) -> Option<(u16, u16)> {
        self.surface.read().await.as_ref().map(|s| (s.width, s.height))
    }

    /// Performs the initial surface allocation after the upstream handshake
    /// and announces the dimensions to any already-attached viewer.
    pub async fn allocate(&self, width: u16, height: u16) {
        let mut surface = self.surface.write().await;
        *surface = Some(Surface::new(width, height));
        drop(surface);

        self.ready.send_replace(true);

        let mut sinks = self.sinks.write().await;
        broadcast(&mut sinks, |socket| async move { socket.surface_resize(width, height).await }).await;
    }

    /// Resizes the surface, preserving existing content over the
    /// intersection of the old and new bounds. A resize to the current
    /// dimensions is a no-op; viewers are told about every actual change
    /// immediately so the new dimensions precede any subsequent draw.
    pub async fn resize(&self, width: u16, height: u16) {
        let mut guard = self.surface.write().await;
        let Some(surface) = guard.as_mut() else {
            return;
        };
        if surface.width == width && surface.height == height {
            return;
        }

        let mut resized = Surface::new(width, height);
        let keep_w = usize::from(surface.width.min(width));
        for y in 0..usize::from(surface.height.min(height)) {
            let src = y * usize::from(surface.width);
            let dst = y * usize::from(width);
            resized.pixels[dst..dst + keep_w].copy_from_slice(&surface.pixels[src..src + keep_w]);
        }
        resized.dirty = surface.dirty.and_then(|rect| rect.clip_to(width, height));
        *surface = resized;

        let mut sinks = self.sinks.write().await;
        broadcast(&mut sinks, |socket| async move { socket.surface_resize(width, height).await }).await;
    }

    /// Composites a rectangle of `0x00RRGGBB` pixels into the surface at
    /// `(x, y)` and extends the pending dirty region. `stride` is the row
    /// stride of `pixels` in words. Nothing is sent downstream until
    /// [`SharedDisplay::flush`].
    pub async fn draw(&self, x: u16, y: u16, width: u16, height: u16, pixels: &[u32], stride: usize) {
        let mut guard = self.surface.write().await;
        let Some(surface) = guard.as_mut() else {
            return;
        };
        let Some(rect) = (Rect { x, y, width, height }).clip_to(surface.width, surface.height)
        else {
            return;
        };

        for dy in 0..rect.height {
            let src = usize::from(dy) * stride;
            let dst = surface.index(rect.x, rect.y + dy);
            let row = &pixels[src..src + usize::from(rect.width)];
            surface.pixels[dst..dst + usize::from(rect.width)].copy_from_slice(row);
        }

        surface.dirty = Some(match surface.dirty {
            Some(dirty) => dirty.union(rect),
            None => rect,
        });
    }

    /// Copies a rectangle of the surface onto itself, handling overlapping
    /// source and destination. The pending dirty region is flushed first so
    /// viewers apply the copy to up-to-date content, then the copy command
    /// is broadcast in order.
    pub async fn copy_rect(
        &self,
        src_x: u16,
        src_y: u16,
        width: u16,
        height: u16,
        dest_x: u16,
        dest_y: u16,
    ) {
        let mut guard = self.surface.write().await;
        let Some(surface) = guard.as_mut() else {
            return;
        };

        // Clip both rectangles to the surface; the copied span is the
        // intersection of what can be read and what can be written.
        let Some(src) =
            (Rect { x: src_x, y: src_y, width, height }).clip_to(surface.width, surface.height)
        else {
            return;
        };
        let Some(dest) =
            (Rect { x: dest_x, y: dest_y, width, height }).clip_to(surface.width, surface.height)
        else {
            return;
        };
        let copy_w = src.width.min(dest.width);
        let copy_h = src.height.min(dest.height);

        let mut sinks = self.sinks.write().await;
        flush_surface(surface, &mut sinks).await;

        // Stage through a scratch buffer so overlap cannot corrupt rows.
        let staged = surface.extract(Rect { x: src.x, y: src.y, width: copy_w, height: copy_h });
        for dy in 0..copy_h {
            let from = usize::from(dy) * usize::from(copy_w);
            let to = surface.index(dest.x, dest.y + dy);
            surface.pixels[to..to + usize::from(copy_w)]
                .copy_from_slice(&staged[from..from + usize::from(copy_w)]);
        }

        broadcast(&mut sinks, |socket| async move {
            socket.surface_copy(src.x, src.y, copy_w, copy_h, dest.x, dest.y).await
        })
        .await;
    }

    /// Emits the accumulated dirty region as one `surface_draw` per attached
    /// viewer and clears it.
    pub async fn flush(&self) {
        let mut guard = self.surface.write().await;
        let Some(surface) = guard.as_mut() else {
            return;
        };
        let mut sinks = self.sinks.write().await;
        flush_surface(surface, &mut sinks).await;
    }

    /// Delimits the current frame on every attached viewer and flushes their
    /// sockets. Viewers whose sockets fail are detached.
    pub async fn end_frame(&self) {
        let mut sinks = self.sinks.write().await;
        broadcast(&mut sinks, |socket| async move {
            socket.end_frame().await?;
            socket.flush().await
        })
        .await;
    }

    /// Replaces the shared cursor image and broadcasts it.
    pub async fn cursor_set_argb(&self, image: CursorImage) {
        self.cursor.set_image(image.clone()).await;
        let image = Arc::new(image);
        let mut sinks = self.sinks.write().await;
        broadcast(&mut sinks, |socket| {
            let image = Arc::clone(&image);
            async move {
                socket
                    .set_cursor(image.hotspot_x, image.hotspot_y, image.width, image.height, &image.pixels)
                    .await
            }
        })
        .await;
    }

    /// Switches to the built-in pointer cursor.
    pub async fn cursor_set_pointer(&self) {
        self.cursor_set_argb(CursorImage::pointer()).await;
    }

    /// Switches to the built-in dot cursor.
    pub async fn cursor_set_dot(&self) {
        self.cursor_set_argb(CursorImage::dot()).await;
    }

    /// Records the latest pointer state from a viewer.
    pub async fn cursor_update(&self, viewer: usize, x: u16, y: u16, button_mask: u8) {
        self.cursor.update(viewer, x, y, button_mask).await;
    }

    /// Clears a departing viewer's cursor ownership.
    pub async fn cursor_remove_viewer(&self, viewer: usize) {
        self.cursor.remove_viewer(viewer).await;
    }

    /// A consistent copy of the current shared cursor state.
    pub async fn cursor_snapshot(&self) -> crate::cursor::CursorState {
        self.cursor.snapshot().await
    }

    /// Attaches a viewer socket to the broadcast set. If the display is
    /// already allocated, current display state is replayed onto the socket
    /// first, so the viewer never observes a partial surface.
    pub async fn attach(&self, id: usize, socket: Arc<dyn ViewerSocket>) {
        let guard = self.surface.read().await;
        let mut sinks = self.sinks.write().await;
        if let Some(surface) = guard.as_ref() {
            if let Err(e) = self.replay(surface, socket.as_ref()).await {
                warn!("Replay to joining viewer {id} failed: {e}");
            }
        }
        sinks.push(Sink { id, socket });
    }

    /// Removes a viewer socket from the broadcast set.
    pub async fn detach(&self, id: usize) {
        self.sinks.write().await.retain(|sink| sink.id != id);
    }

    /// Serialises current display and cursor state onto one socket, as used
    /// for guest synchronisation on join.
    pub async fn dup_to(&self, socket: &dyn ViewerSocket) -> io::Result<()> {
        let guard = self.surface.read().await;
        match guard.as_ref() {
            Some(surface) => self.replay(surface, socket).await,
            None => Ok(()),
        }
    }

    async fn replay(&self, surface: &Surface, socket: &dyn ViewerSocket) -> io::Result<()> {
        socket.surface_resize(surface.width, surface.height).await?;
        socket.surface_draw(0, 0, surface.width, surface.height, &surface.pixels).await?;

        let cursor = self.cursor.snapshot().await;
        if let Some(image) = cursor.image {
            socket
                .set_cursor(image.hotspot_x, image.hotspot_y, image.width, image.height, &image.pixels)
                .await?;
        }
        socket.flush().await
    }
}

/// Sends the pending dirty region to every sink and clears it.
async fn flush_surface(surface: &mut Surface, sinks: &mut Vec<Sink>) {
    let Some(dirty) = surface.dirty.take() else {
        return;
    };
    let pixels = Arc::new(surface.extract(dirty));
    broadcast(sinks, |socket| {
        let pixels = Arc::clone(&pixels);
        async move { socket.surface_draw(dirty.x, dirty.y, dirty.width, dirty.height, &pixels).await }
    })
    .await;
}

/// Runs one command against every sink, detaching sinks whose sockets fail.
async fn broadcast<F, Fut>(sinks: &mut Vec<Sink>, command: F)
where
    F: Fn(Arc<dyn ViewerSocket>) -> Fut,
    Fut: std::future::Future<Output = io::Result<()>>,
{
    let mut failed = Vec::new();
    for sink in sinks.iter() {
        if let Err(e) = command(Arc::clone(&sink.socket)).await {
            warn!("Dropping viewer {}: socket write failed: {e}", sink.id);
            failed.push(sink.id);
        }
    }
    if !failed.is_empty() {
        sinks.retain(|sink| !failed.contains(&sink.id));
    }
}
