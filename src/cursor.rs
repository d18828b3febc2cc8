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

//! Shared cursor state for a session.
//!
//! All viewers of a session see one cursor: its image comes from the VNC
//! server (or one of the built-in presets) and its position from whichever
//! viewer moved the mouse last. The image is replaced from the session task
//! while positions arrive from viewer tasks, so the state lives behind a
//! single mutex; contention is bounded by human input rates.

use std::sync::Arc;
use tokio::sync::Mutex;

/// A cursor image with its hotspot, pixels packed as `0xAARRGGBB` words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorImage {
    /// X coordinate of the click point within the image.
    pub hotspot_x: u16,
    /// Y coordinate of the click point within the image.
    pub hotspot_y: u16,
    /// Image width in pixels.
    pub width: u16,
    /// Image height in pixels.
    pub height: u16,
    /// Row-major ARGB pixel data, `width * height` words.
    pub pixels: Vec<u32>,
}

impl CursorImage {
    /// The classic white-outlined black pointer, hotspot at the tip.
    #[must_use]
    pub fn pointer() -> Self {
        Self::from_rows(
            0,
            0,
            &[
                "O..........",
                "OO.........",
                "OXO........",
                "OXXO.......",
                "OXXXO......",
                "OXXXXO.....",
                "OXXXXXO....",
                "OXXXXXXO...",
                "OXXXXXXXO..",
                "OXXXXXXXXO.",
                "OXXXXXOOOOO",
                "OXXOXXO....",
                "OXO.OXXO...",
                "OO..OXXO...",
                "O....OXXO..",
                ".....OOOO..",
            ],
        )
    }

    /// A small centered dot, used when the real cursor is rendered remotely
    /// so viewers still have a local aiming point.
    #[must_use]
    pub fn dot() -> Self {
        Self::from_rows(2, 2, &[".OOO.", "OXXXO", "OXXXO", "OXXXO", ".OOO."])
    }

    /// Builds an image from ASCII art rows: `X` opaque black, `O` opaque
    /// white, anything else transparent.
    #[allow(clippy::cast_possible_truncation)] // embedded images are tiny
    fn from_rows(hotspot_x: u16, hotspot_y: u16, rows: &[&str]) -> Self {
        let width = rows[0].len();
        let pixels = rows
            .iter()
            .flat_map(|row| {
                row.bytes().map(|cell| match cell {
                    b'X' => 0xFF00_0000u32,
                    b'O' => 0xFFFF_FFFFu32,
                    _ => 0,
                })
            })
            .collect();

        Self {
            hotspot_x,
            hotspot_y,
            width: width as u16,
            height: rows.len() as u16,
            pixels,
        }
    }
}

/// Mutable cursor state shared by the session and all viewers.
#[derive(Debug, Clone, Default)]
pub struct CursorState {
    /// The current cursor image, if any has been set.
    pub image: Option<CursorImage>,
    /// Last reported pointer X position.
    pub x: u16,
    /// Last reported pointer Y position.
    pub y: u16,
    /// Last reported button mask.
    pub button_mask: u8,
    /// The viewer that most recently moved the pointer.
    pub owner: Option<usize>,
}

/// Handle to the session's shared cursor.
#[derive(Debug, Clone, Default)]
pub struct SharedCursor {
    state: Arc<Mutex<CursorState>>,
}

impl SharedCursor {
    /// Creates an empty cursor with no image and the pointer at the origin.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cursor image.
    pub async fn set_image(&self, image: CursorImage) {
        self.state.lock().await.image = Some(image);
    }

    /// Records the latest pointer state from a viewer.
    pub async fn update(&self, viewer: usize, x: u16, y: u16, button_mask: u8) {
        let mut state = self.state.lock().await;
        state.x = x;
        state.y = y;
        state.button_mask = button_mask;
        state.owner = Some(viewer);
    }

    /// Drops a departing viewer's claim on the cursor. Position and image
    /// are kept; only the ownership record is cleared.
    pub async fn remove_viewer(&self, viewer: usize) {
        let mut state = self.state.lock().await;
        if state.owner == Some(viewer) {
            state.owner = None;
        }
    }

    /// Returns a consistent copy of the current cursor state, for replaying
    /// to a newly attached viewer.
    pub async fn snapshot(&self) -> CursorState {
        self.state.lock().await.clone()
    }
}
