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

//! Viewer lifecycle: joining, leaving, and input routing.
//!
//! The first viewer to join a session is its *owner*: its settings become
//! the session settings and its join spawns the upstream session task.
//! Every later viewer is a *guest* sharing the same display; a guest joining
//! mid-session is synchronised by replaying current display state onto its
//! socket. Guests joining before the upstream handshake has allocated the
//! display wait on the display's ready watch, so the replay can never race a
//! half-initialised surface.
//!
//! Input handlers are only installed for viewers that are not read-only,
//! and they forward to the upstream connection only once it exists;
//! anything earlier is dropped without side effects.

use log::warn;
use std::io;
use std::sync::Arc;

use crate::session::VncSession;
use crate::settings::{Settings, SettingsError};
use crate::wire::ViewerSocket;

/// Whether a viewer controls the upstream connection's lifecycle or merely
/// shares the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerRole {
    /// The first-joined viewer; its settings configured the upstream
    /// connection and its join started the session task.
    Owner,
    /// A later-joined viewer sharing the owner's session.
    Guest,
}

/// One attached end user of a session.
pub struct Viewer {
    id: usize,
    role: ViewerRole,
    settings: Arc<Settings>,
    session: Arc<VncSession>,
}

impl Viewer {
    /// Joins a viewer to the session.
    ///
    /// Arguments are parsed into a per-viewer [`Settings`] copy, so flags
    /// like `read-only` apply to this viewer alone. The first join claims
    /// ownership and spawns the session task; guests are replayed current
    /// display state before they see live updates.
    ///
    /// # Errors
    ///
    /// Returns the [`SettingsError`] when the arguments fail to parse; the
    /// viewer is rejected and nothing is attached.
    pub async fn join(
        session: &Arc<VncSession>,
        id: usize,
        args: &[(String, String)],
        socket: Arc<dyn ViewerSocket>,
    ) -> Result<Self, SettingsError> {
        let settings = match Settings::from_args(args) {
            Ok(settings) => Arc::new(settings),
            Err(e) => {
                warn!("Viewer {id} rejected: badly formatted arguments: {e}");
                return Err(e);
            }
        };

        let role = if session.claim_owner(Arc::clone(&settings)).await {
            session.spawn(Arc::clone(&settings)).await;
            ViewerRole::Owner
        } else {
            // Synchronize with the current display, once there is one. If
            // the session dies before allocation, the replay is skipped and
            // the viewer simply sees the abort.
            Self::await_display(session).await;
            ViewerRole::Guest
        };

        session.display().attach(id, socket).await;

        Ok(Self { id, role, settings, session: Arc::clone(session) })
    }

    /// Blocks until the shared display is allocated or the session stops.
    async fn await_display(session: &Arc<VncSession>) {
        let mut ready = session.display().ready_watch();
        let mut running = session.running_watch();
        loop {
            if *ready.borrow_and_update() || !*running.borrow_and_update() {
                return;
            }
            tokio::select! {
                changed = ready.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                changed = running.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    /// Detaches the viewer from the session: its socket leaves the
    /// broadcast set and its claim on the shared cursor is dropped. The
    /// viewer's settings go with it; the owner's copy lives on in the
    /// session until teardown.
    pub async fn leave(self) {
        self.session.display().cursor_remove_viewer(self.id).await;
        self.session.display().detach(self.id).await;
    }

    /// Handles a mouse event from this viewer.
    ///
    /// Read-only viewers have no input handler: the event is dropped before
    /// touching any shared state. Otherwise the shared cursor follows the
    /// pointer immediately, and the event reaches the VNC server once the
    /// upstream connection exists.
    pub async fn mouse(&self, x: u16, y: u16, button_mask: u8) -> io::Result<()> {
        if self.settings.read_only {
            return Ok(());
        }

        self.session.display().cursor_update(self.id, x, y, button_mask).await;

        let input = self.session.input_handle();
        let mut guard = input.lock().await;
        if let Some(upstream) = guard.as_mut() {
            upstream.send_pointer_event(x, y, button_mask).await?;
        }
        Ok(())
    }

    /// Handles a key event from this viewer, forwarding it upstream once
    /// the connection exists.
    pub async fn key(&self, keysym: u32, pressed: bool) -> io::Result<()> {
        if self.settings.read_only {
            return Ok(());
        }

        let input = self.session.input_handle();
        let mut guard = input.lock().await;
        if let Some(upstream) = guard.as_mut() {
            upstream.send_key_event(keysym, pressed).await?;
        }
        Ok(())
    }

    /// Handles clipboard text from this viewer, transcoding it from UTF-8
    /// into the session's clipboard encoding before sending it upstream.
    pub async fn clipboard(&self, text: &str) -> io::Result<()> {
        if self.settings.read_only {
            return Ok(());
        }

        let data = self.session.clipboard_encoding().await.encode(text);

        let input = self.session.input_handle();
        let mut guard = input.lock().await;
        if let Some(upstream) = guard.as_mut() {
            upstream.send_cut_text(&data).await?;
        }
        Ok(())
    }

    /// This viewer's identity, as assigned by the gateway runtime.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Whether this viewer owns the session or joined as a guest.
    #[must_use]
    pub fn role(&self) -> ViewerRole {
        self.role
    }

    /// This viewer's parsed settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}
