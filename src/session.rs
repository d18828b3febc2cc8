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

//! The session engine: one upstream VNC connection, frame-paced, shared by
//! every attached viewer.
//!
//! A single session task owns the upstream connection. It drains RFB
//! messages in bursts, groups each burst into a viewer-visible frame, and
//! ends every frame by flushing the shared display's dirty region to all
//! viewers. Two timing rules shape the loop:
//!
//! - A frame lasts at most [`FRAME_DURATION`]; once exceeded, the frame is
//!   cut even if the server is still sending.
//! - When downstream viewers report processing lag, the frame is instead
//!   *stretched* by the outstanding lag. That both gives the server time to
//!   deliver more data (bigger, fewer frames) and gives viewers time to
//!   catch up before the next frame lands on them.
//!
//! The loop tracks frame times against the *start* of the previous frame,
//! not its end: server-side rendering and transmission time is assumed
//! stable between adjacent frames, and including it in the next frame's
//! budget would compound every slow frame into the following one.

use log::{error, info};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::clipboard::ClipboardEncoding;
use crate::cursor::CursorImage;
use crate::display::SharedDisplay;
use crate::events::{AbortStatus, SessionEvent};
use crate::pixels::{translate_cursor, translate_rect};
use crate::rfb::{RfbClient, RfbConfig, RfbConnector, RfbInput, RfbUpdate};
use crate::settings::Settings;

/// The maximum duration of a frame, in wall-clock time.
pub const FRAME_DURATION: Duration = Duration::from_millis(40);

/// The time allowed per message read within a frame. If the server stays
/// silent for this long mid-frame, the frame is considered finished.
pub const FRAME_TIMEOUT: Duration = Duration::ZERO;

/// How long to wait for the first message of a new frame. Kept small enough
/// that a silent VNC server cannot delay a stop request for long, but large
/// enough that an idle session does not spin.
pub const FRAME_START_TIMEOUT: Duration = Duration::from_millis(1000);

/// Delay between upstream connection attempts.
pub const CONNECT_INTERVAL: Duration = Duration::from_millis(1000);

/// One VNC session: the upstream connection, the shared display, and the
/// state coordinating the viewers attached to it.
///
/// Created by the gateway when a connection is requested; the upstream
/// session task starts when the first (owner) viewer joins and runs until
/// the session is stopped or the upstream connection fails.
pub struct VncSession {
    connector: Arc<dyn RfbConnector>,
    display: SharedDisplay,
    /// Input half of the upstream connection. `None` until the connection
    /// is established; viewer input arriving earlier is silently dropped.
    input: Arc<Mutex<Option<Box<dyn RfbInput>>>>,
    /// The owner's settings, claimed by the first viewer to join.
    settings: RwLock<Option<Arc<Settings>>>,
    /// Clipboard encoding in effect, resolved when the session starts.
    clipboard_encoding: RwLock<ClipboardEncoding>,
    /// Most recent clipboard text received from the server, as UTF-8.
    clipboard: RwLock<String>,
    /// Set when a CopyRect has already drawn a region, so the library's
    /// follow-up framebuffer update for the same region is dropped.
    copy_rect_used: AtomicBool,
    /// Downstream processing lag in milliseconds, updated by the gateway
    /// runtime and sampled at each frame start.
    processing_lag_ms: AtomicU64,
    running: watch::Sender<bool>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl VncSession {
    /// Creates a session that will connect through the given connector once
    /// the owner joins.
    ///
    /// # Returns
    ///
    /// The session handle and the receiver for its [`SessionEvent`]s. The
    /// gateway runtime must drain the receiver for the session's lifetime.
    #[must_use]
    pub fn new(
        connector: Arc<dyn RfbConnector>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (running, _) = watch::channel(true);

        let session = Arc::new(Self {
            connector,
            display: SharedDisplay::new(),
            input: Arc::new(Mutex::new(None)),
            settings: RwLock::new(None),
            clipboard_encoding: RwLock::new(ClipboardEncoding::default()),
            clipboard: RwLock::new(String::new()),
            copy_rect_used: AtomicBool::new(false),
            processing_lag_ms: AtomicU64::new(0),
            running,
            event_tx,
            task: Mutex::new(None),
        });

        (session, event_rx)
    }

    /// The display shared by this session's viewers.
    #[must_use]
    pub fn display(&self) -> &SharedDisplay {
        &self.display
    }

    /// Whether the session is still running. Cleared by [`VncSession::stop`]
    /// or any abort.
    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// A watch that flips to `false` when the session stops.
    #[must_use]
    pub fn running_watch(&self) -> watch::Receiver<bool> {
        self.running.subscribe()
    }

    /// Requests session shutdown. The session task notices at its next
    /// iteration boundary; an unfinished frame drops its dirty region.
    pub fn stop(&self) {
        self.running.send_replace(false);
    }

    /// Stops the session and waits for the session task to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Updates the downstream processing lag, the gateway runtime's measure
    /// of how far viewers are behind the current server time.
    pub fn set_processing_lag(&self, lag: Duration) {
        let millis = u64::try_from(lag.as_millis()).unwrap_or(u64::MAX);
        self.processing_lag_ms.store(millis, Ordering::Relaxed);
    }

    /// The most recently reported downstream processing lag.
    #[must_use]
    pub fn processing_lag(&self) -> Duration {
        Duration::from_millis(self.processing_lag_ms.load(Ordering::Relaxed))
    }

    /// The clipboard encoding in effect for this session.
    pub async fn clipboard_encoding(&self) -> ClipboardEncoding {
        *self.clipboard_encoding.read().await
    }

    /// The most recent clipboard text received from the server.
    pub async fn clipboard(&self) -> String {
        self.clipboard.read().await.clone()
    }

    /// The owner's settings, once an owner has joined.
    pub async fn owner_settings(&self) -> Option<Arc<Settings>> {
        self.settings.read().await.clone()
    }

    /// The shared upstream input handle, for viewer input routing.
    pub(crate) fn input_handle(&self) -> Arc<Mutex<Option<Box<dyn RfbInput>>>> {
        Arc::clone(&self.input)
    }

    /// Claims ownership for the first joining viewer. Returns false when an
    /// owner already exists.
    pub(crate) async fn claim_owner(&self, settings: Arc<Settings>) -> bool {
        let mut guard = self.settings.write().await;
        if guard.is_some() {
            return false;
        }
        *guard = Some(settings);
        true
    }

    /// Spawns the session task for the owner's settings.
    pub(crate) async fn spawn(self: &Arc<Self>, settings: Arc<Settings>) {
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move { session.run(settings).await });
        *self.task.lock().await = Some(handle);
    }

    /// The session task: connect, then bridge until stopped.
    async fn run(self: Arc<Self>, settings: Arc<Settings>) {
        self.bridge(&settings).await;
        self.running.send_replace(false);

        // Late viewer input must not reach a dead connection.
        self.input.lock().await.take();

        let _ = self.event_tx.send(SessionEvent::Disconnected);
        info!("VNC upstream session ended");
    }

    /// Establishes the upstream connection and runs the frame-paced loop.
    async fn bridge(&self, settings: &Settings) {
        let encoding = ClipboardEncoding::from_name(settings.clipboard_encoding.as_deref());
        if !encoding.is_standard() {
            info!("Using non-standard VNC clipboard encoding: '{}'.", encoding.name());
        }
        *self.clipboard_encoding.write().await = encoding;

        let Some((mut rfb, input)) = self.connect_upstream(settings).await else {
            if self.is_running() {
                self.abort(AbortStatus::UpstreamNotFound, "Unable to connect to VNC server.");
            }
            return;
        };

        if !rfb.pixel_format().is_valid() {
            self.abort(AbortStatus::UpstreamError, "VNC server reported an invalid pixel format.");
            return;
        }

        *self.input.lock().await = Some(input);

        let (width, height) = (rfb.width(), rfb.height());
        self.display.allocate(width, height).await;
        let _ = self.event_tx.send(SessionEvent::Connected { width, height });
        info!("Connected to VNC server; framebuffer is {width}x{height}");

        // A read-only session renders no local cursor at all; otherwise the
        // preset depends on whether the real cursor stays remote.
        if !settings.read_only {
            if settings.remote_cursor {
                self.display.cursor_set_dot().await;
            } else {
                self.display.cursor_set_pointer().await;
            }
        }
        self.display.end_frame().await;

        let mut last_frame_end = Instant::now();

        while self.is_running() {
            // Wait for the start of a new frame.
            let mut wait = rfb.wait_for_message(FRAME_START_TIMEOUT).await;
            if matches!(wait, Ok(true)) {
                let processing_lag = self.processing_lag();
                let frame_start = Instant::now();

                // Read server messages until the frame is built.
                loop {
                    match rfb.handle_server_message().await {
                        Ok(updates) => {
                            for update in updates {
                                self.apply_update(rfb.as_ref(), settings, update).await;
                            }
                        }
                        Err(e) => {
                            error!("Error handling message from VNC server: {e}");
                            self.abort(
                                AbortStatus::UpstreamError,
                                "Error handling message from VNC server.",
                            );
                            break;
                        }
                    }

                    let frame_end = Instant::now();
                    let frame_remaining =
                        (frame_start + FRAME_DURATION).saturating_duration_since(frame_end);
                    let time_elapsed = frame_end.saturating_duration_since(last_frame_end);
                    let required_wait = processing_lag.saturating_sub(time_elapsed);

                    if required_wait > FRAME_TIMEOUT {
                        // Viewers are lagging: stretch this frame while they
                        // catch up.
                        wait = rfb.wait_for_message(required_wait).await;
                    } else if !frame_remaining.is_zero() {
                        wait = rfb.wait_for_message(FRAME_TIMEOUT).await;
                    } else {
                        break;
                    }
                    if !matches!(wait, Ok(true)) {
                        break;
                    }
                }

                // Frame times are measured start-to-start; see the module
                // docs for why rendering time is excluded.
                last_frame_end = frame_start;
            }

            if wait.is_err() {
                self.abort(AbortStatus::UpstreamError, "Connection closed.");
            }

            self.display.flush().await;
            self.display.end_frame().await;
        }
    }

    /// Attempts the upstream connection, retrying on failure up to the
    /// configured count with a fixed interval between attempts.
    async fn connect_upstream(
        &self,
        settings: &Settings,
    ) -> Option<(Box<dyn RfbClient>, Box<dyn RfbInput>)> {
        let config = RfbConfig::from_settings(settings);
        if config.reverse_connect {
            info!("Listening for VNC server connections on port {}", config.listen_port);
        }

        let mut retries_remaining = settings.retries;
        loop {
            match self.connector.connect(&config).await {
                Ok(connection) => return Some(connection),
                Err(e) => {
                    if retries_remaining == 0 {
                        error!("Unable to connect to VNC server: {e}");
                        return None;
                    }
                    info!(
                        "Connect failed: {e}. Waiting {}ms before retrying...",
                        CONNECT_INTERVAL.as_millis()
                    );
                    tokio::time::sleep(CONNECT_INTERVAL).await;
                    retries_remaining -= 1;
                    if !self.is_running() {
                        return None;
                    }
                }
            }
        }
    }

    /// Applies one decoded server update to the shared display.
    async fn apply_update(&self, rfb: &dyn RfbClient, settings: &Settings, update: RfbUpdate) {
        match update {
            RfbUpdate::Rect { x, y, width, height } => {
                // A CopyRect already drew this region; drop the library's
                // redundant follow-up update.
                if self.copy_rect_used.swap(false, Ordering::SeqCst) {
                    return;
                }
                let format = rfb.pixel_format();
                // The clamped dimensions are the geometry of the returned
                // buffer; drawing with the requested ones would misread its
                // row stride.
                let (pixels, width, height) = translate_rect(
                    rfb.framebuffer(),
                    rfb.width(),
                    &format,
                    x,
                    y,
                    width,
                    height,
                    settings.swap_red_blue,
                );
                if pixels.is_empty() {
                    return;
                }
                self.display.draw(x, y, width, height, &pixels, usize::from(width)).await;
            }

            RfbUpdate::CopyRect { src_x, src_y, width, height, dest_x, dest_y } => {
                self.display.copy_rect(src_x, src_y, width, height, dest_x, dest_y).await;
                self.copy_rect_used.store(true, Ordering::SeqCst);
            }

            RfbUpdate::CursorShape { hotspot_x, hotspot_y, width, height, source, mask } => {
                if settings.read_only || settings.remote_cursor {
                    return;
                }
                let format = rfb.pixel_format();
                let pixels = translate_cursor(
                    &source,
                    &mask,
                    width,
                    height,
                    &format,
                    settings.swap_red_blue,
                );
                self.display
                    .cursor_set_argb(CursorImage { hotspot_x, hotspot_y, width, height, pixels })
                    .await;
            }

            RfbUpdate::CutText(data) => {
                if settings.read_only {
                    return;
                }
                let text = self.clipboard_encoding().await.decode(&data);
                *self.clipboard.write().await = text.clone();
                let _ = self.event_tx.send(SessionEvent::Clipboard { text });
            }

            RfbUpdate::Resized { width, height } => {
                self.display.resize(width, height).await;
            }
        }
    }

    /// Terminates the session with the given status. Only the first abort
    /// wins; later calls on an already-stopped session do nothing.
    fn abort(&self, status: AbortStatus, message: &str) {
        let was_running = self.running.send_replace(false);
        if !was_running {
            return;
        }
        error!("VNC session aborted ({status}): {message}");
        let _ = self.event_tx.send(SessionEvent::Aborted {
            status,
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io;

    struct NeverConnects;

    #[async_trait]
    impl RfbConnector for NeverConnects {
        async fn connect(
            &self,
            _config: &RfbConfig,
        ) -> io::Result<(Box<dyn RfbClient>, Box<dyn RfbInput>)> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        }
    }

    #[test]
    fn frame_constants_are_consistent() {
        assert!(FRAME_TIMEOUT < FRAME_DURATION);
        assert!(FRAME_DURATION < FRAME_START_TIMEOUT);
    }

    #[tokio::test]
    async fn processing_lag_round_trips() {
        let (session, _events) = VncSession::new(Arc::new(NeverConnects));
        assert_eq!(session.processing_lag(), Duration::ZERO);
        session.set_processing_lag(Duration::from_millis(500));
        assert_eq!(session.processing_lag(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_observable() {
        let (session, _events) = VncSession::new(Arc::new(NeverConnects));
        let mut watch = session.running_watch();
        assert!(session.is_running());

        session.stop();
        session.stop();
        assert!(!session.is_running());
        assert!(!*watch.borrow_and_update());
    }

    #[tokio::test]
    async fn owner_is_claimed_exactly_once() {
        let (session, _events) = VncSession::new(Arc::new(NeverConnects));
        let settings = Arc::new(
            Settings::from_args(&[("hostname".to_string(), "h".to_string())]).unwrap(),
        );
        assert!(session.claim_owner(Arc::clone(&settings)).await);
        assert!(!session.claim_owner(settings).await);
    }
}
