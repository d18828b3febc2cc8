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

//! Session events delivered to the gateway runtime.

use thiserror::Error;

/// The reason a session was aborted, mirrored onto the gateway's protocol
/// status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AbortStatus {
    /// The VNC server could not be reached within the configured number of
    /// connection attempts.
    #[error("upstream not found")]
    UpstreamNotFound,

    /// The upstream connection failed mid-session: the socket closed, the
    /// readiness wait errored, or the RFB library failed to handle a server
    /// message.
    #[error("upstream error")]
    UpstreamError,
}

/// Events emitted by a session over the channel returned at construction.
///
/// The gateway runtime is expected to drain this receiver for the lifetime
/// of the session; clipboard events in particular must be forwarded to every
/// attached viewer by the runtime, since viewer clipboard streams are not
/// part of the drawing command set.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The upstream connection completed its handshake and the shared
    /// display has been allocated at the given dimensions.
    Connected {
        /// Upstream framebuffer width in pixels.
        width: u16,
        /// Upstream framebuffer height in pixels.
        height: u16,
    },

    /// Cut text arrived from the VNC server, already transcoded to UTF-8
    /// and bounded by the clipboard cap.
    Clipboard {
        /// The clipboard text.
        text: String,
    },

    /// The session terminated abnormally. No further events follow except
    /// [`SessionEvent::Disconnected`].
    Aborted {
        /// The protocol status to surface to viewers.
        status: AbortStatus,
        /// Human-readable failure description.
        message: String,
    },

    /// The session loop has exited and the upstream connection is gone.
    Disconnected,
}
