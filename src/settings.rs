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

//! Per-viewer connection settings.
//!
//! Every viewer joins with its own set of key/value arguments delivered by
//! the gateway runtime. The owner's parsed settings configure the upstream
//! connection; guests keep their own copy so flags like `read-only` apply
//! per viewer. Parsing is strict about types but forgiving about booleans:
//! as with the gateway's other protocol bridges, exactly the string `"true"`
//! enables a flag and anything else disables it.

use std::time::Duration;
use thiserror::Error;

/// Default VNC server port, also used for repeater destinations.
const DEFAULT_PORT: u16 = 5900;

/// Default time to wait for a reverse connection from the server.
const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_millis(5000);

/// A settings argument failed to parse. The joining viewer is rejected;
/// nothing is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    /// A required argument was absent or empty.
    #[error("missing required argument \"{0}\"")]
    Missing(&'static str),

    /// An argument had a value of the wrong form.
    #[error("invalid value \"{value}\" for argument \"{name}\"")]
    Invalid {
        /// The argument name.
        name: &'static str,
        /// The offending value.
        value: String,
    },
}

/// Parsed per-viewer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Hostname of the VNC server (or repeater) to connect to.
    pub hostname: String,
    /// Port of the VNC server (or repeater) to connect to.
    pub port: u16,
    /// Password, if the server requires one.
    pub password: Option<String>,
    /// Whether this viewer's input should be dropped.
    pub read_only: bool,
    /// Whether the red and blue output channels should be swapped, for
    /// servers that mislabel their color order.
    pub swap_red_blue: bool,
    /// Color depth to request, in bits per pixel: 8, 16, 24, or 32.
    pub color_depth: u8,
    /// Whether the cursor is rendered on the server (remote) rather than
    /// composited locally from cursor shape updates.
    pub remote_cursor: bool,
    /// Comma-separated RFB encodings preference list, if any.
    pub encodings: Option<String>,
    /// Name of the clipboard encoding, resolved when the session starts.
    pub clipboard_encoding: Option<String>,
    /// Whether to listen for a server-initiated (reverse) connection
    /// instead of connecting out.
    pub reverse_connect: bool,
    /// Port to listen on for reverse connections; defaults to `port`.
    pub listen_port: u16,
    /// How long to wait for a reverse connection before failing.
    pub listen_timeout: Duration,
    /// VNC repeater destination host, if connecting through a repeater.
    pub dest_host: Option<String>,
    /// VNC repeater destination port.
    pub dest_port: u16,
    /// Number of times to retry the initial connection before giving up.
    pub retries: u32,
}

impl Settings {
    /// Parses viewer arguments into settings.
    ///
    /// Unknown keys are ignored (forward compatibility with newer gateway
    /// frontends); empty values count as absent.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when `hostname` is missing for a forward
    /// connection, or when a numeric argument fails to parse, or when
    /// `color-depth` is not one of 8, 16, 24, or 32.
    pub fn from_args(args: &[(String, String)]) -> Result<Self, SettingsError> {
        let get = |name: &str| {
            args.iter()
                .rev()
                .find(|(key, value)| key == name && !value.is_empty())
                .map(|(_, value)| value.as_str())
        };
        let flag = |name: &str| get(name) == Some("true");

        let reverse_connect = flag("reverse-connect");

        let hostname = match get("hostname") {
            Some(hostname) => hostname.to_string(),
            // A listening session has no host to dial.
            None if reverse_connect => String::new(),
            None => return Err(SettingsError::Missing("hostname")),
        };

        let port = parse_number(get("port"), "port")?.unwrap_or(DEFAULT_PORT);

        let color_depth = match parse_number::<u8>(get("color-depth"), "color-depth")? {
            None => 32,
            Some(depth @ (8 | 16 | 24 | 32)) => depth,
            Some(other) => {
                return Err(SettingsError::Invalid {
                    name: "color-depth",
                    value: other.to_string(),
                })
            }
        };

        let listen_timeout = parse_number::<u64>(get("listen-timeout"), "listen-timeout")?
            .map_or(DEFAULT_LISTEN_TIMEOUT, Duration::from_millis);

        Ok(Self {
            hostname,
            port,
            password: get("password").map(str::to_string),
            read_only: flag("read-only"),
            swap_red_blue: flag("swap-red-blue"),
            color_depth,
            remote_cursor: flag("remote-cursor"),
            encodings: get("encodings").map(str::to_string),
            clipboard_encoding: get("clipboard-encoding").map(str::to_string),
            reverse_connect,
            listen_port: parse_number(get("listen-port"), "listen-port")?.unwrap_or(port),
            listen_timeout,
            dest_host: get("dest-host").map(str::to_string),
            dest_port: parse_number(get("dest-port"), "dest-port")?.unwrap_or(DEFAULT_PORT),
            retries: parse_number(get("retries"), "retries")?.unwrap_or(0),
        })
    }
}

/// Parses an optional numeric argument, reporting the argument name on
/// failure.
fn parse_number<T: std::str::FromStr>(
    value: Option<&str>,
    name: &'static str,
) -> Result<Option<T>, SettingsError> {
    match value {
        None => Ok(None),
        Some(text) => text.parse().map(Some).map_err(|_| SettingsError::Invalid {
            name,
            value: text.to_string(),
        }),
    }
}
