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

//! Bridges an upstream RFB (VNC) connection into a multi-viewer
//! remote-desktop gateway session.
//!
//! One upstream connection to a VNC server is multiplexed to any number of
//! downstream viewers. Viewers see the server's framebuffer as incremental
//! drawing commands, share a synthetic cursor, and, unless read-only,
//! forward mouse, keyboard, and clipboard input back to the server.
//!
//! # Architecture
//!
//! - A [`VncSession`](session::VncSession) owns the upstream connection and
//!   runs the frame-paced loop that batches decoded RFB updates into
//!   viewer-visible frames, adapting its pacing to downstream processing
//!   lag.
//! - The [`SharedDisplay`](display::SharedDisplay) holds the translated
//!   framebuffer and the shared cursor, broadcasts ordered drawing commands
//!   to every attached viewer, and replays current state to viewers that
//!   join mid-session.
//! - [`Viewer`](viewer::Viewer)s attach per end user: the first join owns
//!   the connection lifecycle, later joins share it, each with its own
//!   settings.
//!
//! # Seams
//!
//! The RFB protocol itself and the gateway wire protocol are both external:
//! the upstream library implements the [`rfb`] traits, and the gateway's
//! per-viewer protocol encoder implements [`wire::ViewerSocket`]. This
//! crate supplies everything between the two: pixel translation, clipboard
//! transcoding, display sharing, frame pacing, and viewer coordination.

pub mod clipboard;
pub mod cursor;
pub mod display;
pub mod events;
pub mod pixels;
pub mod rfb;
pub mod session;
pub mod settings;
pub mod viewer;
pub mod wire;

pub use clipboard::{ClipboardEncoding, CLIPBOARD_MAX_LENGTH};
pub use cursor::{CursorImage, CursorState, SharedCursor};
pub use display::{Rect, SharedDisplay};
pub use events::{AbortStatus, SessionEvent};
pub use pixels::{translate_cursor, translate_rect, RfbPixelFormat};
pub use rfb::{RfbClient, RfbConfig, RfbConnector, RfbInput, RfbUpdate};
pub use session::{
    VncSession, CONNECT_INTERVAL, FRAME_DURATION, FRAME_START_TIMEOUT, FRAME_TIMEOUT,
};
pub use settings::{Settings, SettingsError};
pub use viewer::{Viewer, ViewerRole};
pub use wire::ViewerSocket;
