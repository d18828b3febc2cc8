//! Shared test doubles: a scriptable fake RFB library, a recording input
//! half, and a recording viewer socket with a replayable surface model.

#![allow(dead_code)] // not every integration test uses every helper

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use vnc_gateway::{RfbClient, RfbConfig, RfbConnector, RfbInput, RfbPixelFormat, RfbUpdate, ViewerSocket};

/// Granularity of the fake readiness wait. Tests run under a paused tokio
/// clock, so fine-grained polling costs nothing and lets data "arrive"
/// mid-wait at the virtual time the test chooses.
const POLL_STEP: Duration = Duration::from_millis(1);

/// One scripted `handle_server_message` result.
struct Batch {
    updates: Vec<RfbUpdate>,
    /// Framebuffer replacement applied when the batch is handled, modelling
    /// a library that has already swapped its buffer by the time the resize
    /// update is delivered.
    swap_framebuffer: Option<(u16, u16, Vec<u8>)>,
    fail: bool,
}

struct ScriptState {
    pending: VecDeque<Batch>,
    waits: Vec<Duration>,
    fail_wait: bool,
}

/// Handle for driving and inspecting a [`ScriptedRfb`] from the test body.
#[derive(Clone)]
pub struct RfbScript {
    state: Arc<Mutex<ScriptState>>,
}

impl RfbScript {
    /// Queues a batch of updates for the next `handle_server_message`.
    pub fn push_batch(&self, updates: Vec<RfbUpdate>) {
        self.state.lock().unwrap().pending.push_back(Batch {
            updates,
            swap_framebuffer: None,
            fail: false,
        });
    }

    /// Queues a batch that also replaces the framebuffer, for resize
    /// scripts.
    pub fn push_batch_with_framebuffer(
        &self,
        width: u16,
        height: u16,
        framebuffer: Vec<u8>,
        updates: Vec<RfbUpdate>,
    ) {
        self.state.lock().unwrap().pending.push_back(Batch {
            updates,
            swap_framebuffer: Some((width, height, framebuffer)),
            fail: false,
        });
    }

    /// Queues a batch whose handling fails.
    pub fn push_failing_batch(&self) {
        self.state.lock().unwrap().pending.push_back(Batch {
            updates: Vec::new(),
            swap_framebuffer: None,
            fail: true,
        });
    }

    /// Makes every subsequent readiness wait fail, as a dead socket would.
    pub fn fail_waits(&self) {
        self.state.lock().unwrap().fail_wait = true;
    }

    /// Every timeout passed to `wait_for_message` so far, in order.
    pub fn waits(&self) -> Vec<Duration> {
        self.state.lock().unwrap().waits.clone()
    }
}

/// A fake RFB client library driven by a script of update batches.
///
/// Dimensions, format, and framebuffer contents live on the struct itself
/// (framebuffer swaps apply while handling a batch, mirroring a library
/// that reallocates before delivering the resize); the script of pending
/// batches is shared with the test through [`RfbScript`].
pub struct ScriptedRfb {
    state: Arc<Mutex<ScriptState>>,
    width: u16,
    height: u16,
    format: RfbPixelFormat,
    framebuffer: Vec<u8>,
}

/// Builds a scripted connection: the library half plus its driving handle.
pub fn scripted_rfb(
    width: u16,
    height: u16,
    format: RfbPixelFormat,
    framebuffer: Vec<u8>,
) -> (RfbScript, ScriptedRfb) {
    let state = Arc::new(Mutex::new(ScriptState {
        pending: VecDeque::new(),
        waits: Vec::new(),
        fail_wait: false,
    }));
    (
        RfbScript { state: Arc::clone(&state) },
        ScriptedRfb { state, width, height, format, framebuffer },
    )
}

#[async_trait]
impl RfbClient for ScriptedRfb {
    fn width(&self) -> u16 {
        self.width
    }

    fn height(&self) -> u16 {
        self.height
    }

    fn pixel_format(&self) -> RfbPixelFormat {
        self.format
    }

    fn framebuffer(&self) -> &[u8] {
        &self.framebuffer
    }

    fn buffered(&self) -> bool {
        !self.state.lock().unwrap().pending.is_empty()
    }

    async fn wait_for_message(&mut self, timeout: Duration) -> io::Result<bool> {
        {
            let mut state = self.state.lock().unwrap();
            state.waits.push(timeout);
            if state.fail_wait {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"));
            }
            if !state.pending.is_empty() {
                return Ok(true);
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_STEP.min(deadline - Instant::now())).await;

            let state = self.state.lock().unwrap();
            if state.fail_wait {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"));
            }
            if !state.pending.is_empty() {
                return Ok(true);
            }
        }
    }

    async fn handle_server_message(&mut self) -> io::Result<Vec<RfbUpdate>> {
        let batch = self.state.lock().unwrap().pending.pop_front();
        let Some(batch) = batch else {
            return Ok(Vec::new());
        };
        if batch.fail {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "protocol error"));
        }
        if let Some((width, height, framebuffer)) = batch.swap_framebuffer {
            self.width = width;
            self.height = height;
            self.framebuffer = framebuffer;
        }
        Ok(batch.updates)
    }
}

/// An input event recorded by [`RecordingInput`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Pointer(u16, u16, u8),
    Key(u32, bool),
    CutText(Vec<u8>),
}

/// Shared log of input events sent upstream.
#[derive(Clone, Default)]
pub struct InputLog {
    events: Arc<Mutex<Vec<InputEvent>>>,
}

impl InputLog {
    pub fn events(&self) -> Vec<InputEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }
}

/// The input half of a scripted connection; records everything.
pub struct RecordingInput {
    log: InputLog,
}

pub fn recording_input() -> (InputLog, RecordingInput) {
    let log = InputLog::default();
    (log.clone(), RecordingInput { log })
}

#[async_trait]
impl RfbInput for RecordingInput {
    async fn send_pointer_event(&mut self, x: u16, y: u16, button_mask: u8) -> io::Result<()> {
        self.log.events.lock().unwrap().push(InputEvent::Pointer(x, y, button_mask));
        Ok(())
    }

    async fn send_key_event(&mut self, keysym: u32, pressed: bool) -> io::Result<()> {
        self.log.events.lock().unwrap().push(InputEvent::Key(keysym, pressed));
        Ok(())
    }

    async fn send_cut_text(&mut self, data: &[u8]) -> io::Result<()> {
        self.log.events.lock().unwrap().push(InputEvent::CutText(data.to_vec()));
        Ok(())
    }
}

/// A connector that fails a configured number of times, then hands out one
/// prepared connection.
pub struct ScriptedConnector {
    inner: Mutex<ConnectorInner>,
}

struct ConnectorInner {
    failures: u32,
    attempts: u32,
    connection: Option<(Box<dyn RfbClient>, Box<dyn RfbInput>)>,
    configs: Vec<RfbConfig>,
}

impl ScriptedConnector {
    pub fn new(client: ScriptedRfb, input: RecordingInput) -> Arc<Self> {
        Self::with_failures(0, client, input)
    }

    pub fn with_failures(failures: u32, client: ScriptedRfb, input: RecordingInput) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ConnectorInner {
                failures,
                attempts: 0,
                connection: Some((Box::new(client), Box::new(input))),
                configs: Vec::new(),
            }),
        })
    }

    /// A connector where every attempt fails.
    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ConnectorInner {
                failures: u32::MAX,
                attempts: 0,
                connection: None,
                configs: Vec::new(),
            }),
        })
    }

    pub fn attempts(&self) -> u32 {
        self.inner.lock().unwrap().attempts
    }

    pub fn last_config(&self) -> Option<RfbConfig> {
        self.inner.lock().unwrap().configs.last().cloned()
    }
}

#[async_trait]
impl RfbConnector for ScriptedConnector {
    async fn connect(
        &self,
        config: &RfbConfig,
    ) -> io::Result<(Box<dyn RfbClient>, Box<dyn RfbInput>)> {
        let mut inner = self.inner.lock().unwrap();
        inner.attempts += 1;
        inner.configs.push(config.clone());
        if inner.failures > 0 {
            inner.failures -= 1;
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
        }
        inner
            .connection
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "no connection left"))
    }
}

/// A drawing command observed by a [`RecordingSocket`], with the virtual
/// time it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Resize(u16, u16),
    Draw(u16, u16, u16, u16, Vec<u32>),
    Copy(u16, u16, u16, u16, u16, u16),
    Cursor(u16, u16, u16, u16, Vec<u32>),
    EndFrame,
    Flush,
}

/// Records every command a viewer socket receives and can replay them into
/// a modelled surface for image comparisons.
#[derive(Default)]
pub struct RecordingSocket {
    commands: Mutex<Vec<(Instant, Command)>>,
}

impl RecordingSocket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, command: Command) -> io::Result<()> {
        self.commands.lock().unwrap().push((Instant::now(), command));
        Ok(())
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn timestamps_of_end_frames(&self) -> Vec<Instant> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| matches!(c, Command::EndFrame))
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&Command) -> bool) -> usize {
        self.commands.lock().unwrap().iter().filter(|(_, c)| predicate(c)).count()
    }

    /// Replays all received commands into a modelled surface. The result is
    /// what this viewer currently displays: dimensions plus row-major
    /// `0x00RRGGBB` pixels.
    pub fn model(&self) -> (u16, u16, Vec<u32>) {
        let mut width = 0u16;
        let mut height = 0u16;
        let mut pixels: Vec<u32> = Vec::new();

        for command in self.commands() {
            match command {
                Command::Resize(new_w, new_h) => {
                    let mut resized = vec![0u32; usize::from(new_w) * usize::from(new_h)];
                    let keep_w = usize::from(width.min(new_w));
                    for y in 0..usize::from(height.min(new_h)) {
                        let src = y * usize::from(width);
                        let dst = y * usize::from(new_w);
                        resized[dst..dst + keep_w].copy_from_slice(&pixels[src..src + keep_w]);
                    }
                    width = new_w;
                    height = new_h;
                    pixels = resized;
                }
                Command::Draw(x, y, w, h, data) => {
                    for dy in 0..usize::from(h) {
                        for dx in 0..usize::from(w) {
                            let px = usize::from(x) + dx;
                            let py = usize::from(y) + dy;
                            if px < usize::from(width) && py < usize::from(height) {
                                pixels[py * usize::from(width) + px] =
                                    data[dy * usize::from(w) + dx];
                            }
                        }
                    }
                }
                Command::Copy(sx, sy, w, h, dx, dy) => {
                    let mut staged = Vec::with_capacity(usize::from(w) * usize::from(h));
                    for row in 0..usize::from(h) {
                        for col in 0..usize::from(w) {
                            staged.push(
                                pixels[(usize::from(sy) + row) * usize::from(width)
                                    + usize::from(sx)
                                    + col],
                            );
                        }
                    }
                    for row in 0..usize::from(h) {
                        for col in 0..usize::from(w) {
                            pixels[(usize::from(dy) + row) * usize::from(width)
                                + usize::from(dx)
                                + col] = staged[row * usize::from(w) + col];
                        }
                    }
                }
                Command::Cursor(..) | Command::EndFrame | Command::Flush => {}
            }
        }

        (width, height, pixels)
    }
}

#[async_trait]
impl ViewerSocket for RecordingSocket {
    async fn surface_resize(&self, width: u16, height: u16) -> io::Result<()> {
        self.push(Command::Resize(width, height))
    }

    async fn surface_draw(
        &self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        pixels: &[u32],
    ) -> io::Result<()> {
        self.push(Command::Draw(x, y, width, height, pixels.to_vec()))
    }

    async fn surface_copy(
        &self,
        src_x: u16,
        src_y: u16,
        width: u16,
        height: u16,
        dest_x: u16,
        dest_y: u16,
    ) -> io::Result<()> {
        self.push(Command::Copy(src_x, src_y, width, height, dest_x, dest_y))
    }

    async fn set_cursor(
        &self,
        hotspot_x: u16,
        hotspot_y: u16,
        width: u16,
        height: u16,
        pixels: &[u32],
    ) -> io::Result<()> {
        self.push(Command::Cursor(hotspot_x, hotspot_y, width, height, pixels.to_vec()))
    }

    async fn end_frame(&self) -> io::Result<()> {
        self.push(Command::EndFrame)
    }

    async fn flush(&self) -> io::Result<()> {
        self.push(Command::Flush)
    }
}

/// Polls (under the paused clock) until `condition` holds or virtual time
/// runs out.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..20_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached within virtual time budget");
}

/// Standard owner arguments for a forward connection.
pub fn host_args() -> Vec<(String, String)> {
    vec![("hostname".to_string(), "vnc.example.net".to_string())]
}

/// Owner arguments with extra pairs appended.
pub fn args_with(extra: &[(&str, &str)]) -> Vec<(String, String)> {
    let mut args = host_args();
    args.extend(extra.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    args
}
