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

//! Demonstration of the session engine without a real VNC server: a tiny
//! in-process "RFB library" feeds scripted updates through the bridge, and
//! a logging viewer socket prints every drawing command a real viewer would
//! receive.
//!
//! Usage:
//!   cargo run --example scripted_session

use async_trait::async_trait;
use std::collections::VecDeque;
use std::error::Error;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vnc_gateway::{
    RfbClient, RfbConfig, RfbConnector, RfbInput, RfbPixelFormat, RfbUpdate, SessionEvent, Viewer,
    ViewerSocket, VncSession,
};

const WIDTH: u16 = 8;
const HEIGHT: u16 = 4;

/// A canned VNC connection that serves a gradient, then scrolls it.
struct DemoRfb {
    framebuffer: Vec<u8>,
    pending: Arc<Mutex<VecDeque<Vec<RfbUpdate>>>>,
}

impl DemoRfb {
    fn new(pending: Arc<Mutex<VecDeque<Vec<RfbUpdate>>>>) -> Self {
        // An 8x4 horizontal red-to-blue gradient at 32 bpp.
        let mut framebuffer = Vec::new();
        for _y in 0..HEIGHT {
            for x in 0..u32::from(WIDTH) {
                let red = x * 255 / (u32::from(WIDTH) - 1);
                let word = (red << 16) | (255 - red);
                framebuffer.extend_from_slice(&word.to_ne_bytes());
            }
        }
        Self { framebuffer, pending }
    }
}

#[async_trait]
impl RfbClient for DemoRfb {
    fn width(&self) -> u16 {
        WIDTH
    }
    fn height(&self) -> u16 {
        HEIGHT
    }
    fn pixel_format(&self) -> RfbPixelFormat {
        RfbPixelFormat::for_depth(32)
    }
    fn framebuffer(&self) -> &[u8] {
        &self.framebuffer
    }
    fn buffered(&self) -> bool {
        !self.pending.lock().unwrap().is_empty()
    }

    async fn wait_for_message(&mut self, timeout: Duration) -> io::Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.buffered() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn handle_server_message(&mut self) -> io::Result<Vec<RfbUpdate>> {
        Ok(self.pending.lock().unwrap().pop_front().unwrap_or_default())
    }
}

/// Input half that just logs what a real library would send upstream.
struct DemoInput;

#[async_trait]
impl RfbInput for DemoInput {
    async fn send_pointer_event(&mut self, x: u16, y: u16, button_mask: u8) -> io::Result<()> {
        println!("[upstream] pointer ({x}, {y}) buttons {button_mask:03b}");
        Ok(())
    }
    async fn send_key_event(&mut self, keysym: u32, pressed: bool) -> io::Result<()> {
        println!("[upstream] key {keysym:#06x} {}", if pressed { "down" } else { "up" });
        Ok(())
    }
    async fn send_cut_text(&mut self, data: &[u8]) -> io::Result<()> {
        println!("[upstream] cut text ({} bytes)", data.len());
        Ok(())
    }
}

struct DemoConnector {
    pending: Arc<Mutex<VecDeque<Vec<RfbUpdate>>>>,
}

#[async_trait]
impl RfbConnector for DemoConnector {
    async fn connect(
        &self,
        config: &RfbConfig,
    ) -> io::Result<(Box<dyn RfbClient>, Box<dyn RfbInput>)> {
        println!("[upstream] connected to {}:{}", config.hostname, config.port);
        Ok((Box::new(DemoRfb::new(Arc::clone(&self.pending))), Box::new(DemoInput)))
    }
}

/// Viewer socket that narrates the command stream.
struct PrintingSocket {
    name: &'static str,
}

#[async_trait]
impl ViewerSocket for PrintingSocket {
    async fn surface_resize(&self, width: u16, height: u16) -> io::Result<()> {
        println!("[{}] resize {width}x{height}", self.name);
        Ok(())
    }
    async fn surface_draw(
        &self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        pixels: &[u32],
    ) -> io::Result<()> {
        println!(
            "[{}] draw {width}x{height} at ({x}, {y}), first word {:#08x}",
            self.name, pixels[0]
        );
        Ok(())
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
        println!(
            "[{}] copy {width}x{height} ({src_x}, {src_y}) -> ({dest_x}, {dest_y})",
            self.name
        );
        Ok(())
    }
    async fn set_cursor(
        &self,
        _hotspot_x: u16,
        _hotspot_y: u16,
        width: u16,
        height: u16,
        _pixels: &[u32],
    ) -> io::Result<()> {
        println!("[{}] cursor {width}x{height}", self.name);
        Ok(())
    }
    async fn end_frame(&self) -> io::Result<()> {
        println!("[{}] --- end of frame ---", self.name);
        Ok(())
    }
    async fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let pending: Arc<Mutex<VecDeque<Vec<RfbUpdate>>>> = Arc::default();
    let connector = Arc::new(DemoConnector { pending: Arc::clone(&pending) });
    let (session, mut events) = VncSession::new(connector);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Connected { width, height } => {
                    println!("[event] connected, display {width}x{height}");
                }
                SessionEvent::Clipboard { text } => println!("[event] clipboard: {text}"),
                SessionEvent::Aborted { status, message } => {
                    println!("[event] aborted ({status}): {message}");
                }
                SessionEvent::Disconnected => println!("[event] disconnected"),
            }
        }
    });

    let args = vec![("hostname".to_string(), "demo.invalid".to_string())];
    let owner = Viewer::join(&session, 1, &args, Arc::new(PrintingSocket { name: "owner" })).await?;

    // Full first frame, then a scroll expressed as a CopyRect.
    pending.lock().unwrap().push_back(vec![RfbUpdate::Rect {
        x: 0,
        y: 0,
        width: WIDTH,
        height: HEIGHT,
    }]);
    tokio::time::sleep(Duration::from_millis(100)).await;

    pending.lock().unwrap().push_back(vec![
        RfbUpdate::CopyRect { src_x: 1, src_y: 0, width: WIDTH - 1, height: HEIGHT, dest_x: 0, dest_y: 0 },
        RfbUpdate::Rect { x: 0, y: 0, width: WIDTH, height: HEIGHT },
    ]);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A guest joins mid-session and is replayed the current image.
    let guest =
        Viewer::join(&session, 2, &args, Arc::new(PrintingSocket { name: "guest" })).await?;
    guest.mouse(3, 2, 1).await?;
    owner.key(0xFF0D, true).await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    session.shutdown().await;
    Ok(())
}
