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

//! Clipboard transcoding between the VNC cut-text encoding and UTF-8.
//!
//! The RFB standard requires cut text to be ISO 8859-1, but a number of VNC
//! servers speak UTF-8, UTF-16, or Windows-1252 instead. The session can be
//! configured with any of these; everything that crosses the gateway
//! boundary is UTF-8, so inbound cut text is decoded to UTF-8 and outbound
//! viewer clipboard data is encoded back into the selected encoding.
//!
//! Transfers in either direction are capped at [`CLIPBOARD_MAX_LENGTH`]
//! bytes; the tail beyond the cap is dropped without splitting a character.

use bytes::{BufMut, BytesMut};
use log::warn;

/// The maximum number of bytes allowed within the clipboard, in either
/// direction.
pub const CLIPBOARD_MAX_LENGTH: usize = 262_144;

/// Windows-1252 mappings for the 0x80..=0x9F range, where it deviates from
/// ISO 8859-1. Undefined code points map through unchanged.
const CP1252_HIGH: [u16; 32] = [
    0x20AC, 0x0081, 0x201A, 0x0192, 0x201E, 0x2026, 0x2020, 0x2021, 0x02C6, 0x2030, 0x0160,
    0x2039, 0x0152, 0x008D, 0x017D, 0x008F, 0x0090, 0x2018, 0x2019, 0x201C, 0x201D, 0x2022,
    0x2013, 0x2014, 0x02DC, 0x2122, 0x0161, 0x203A, 0x0153, 0x009D, 0x017E, 0x0178,
];

/// The character encodings recognised for VNC cut text.
///
/// Only [`ClipboardEncoding::Iso8859_1`] is standards-compliant; the others
/// are accepted because real servers use them, and the session logs a notice
/// when one is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipboardEncoding {
    /// ISO 8859-1 (Latin-1), the encoding required by the RFB standard.
    #[default]
    Iso8859_1,
    /// UTF-8.
    Utf8,
    /// UTF-16, little-endian unless the data leads with a byte order mark.
    Utf16,
    /// Windows-1252.
    Cp1252,
}

impl ClipboardEncoding {
    /// Resolves an encoding by name.
    ///
    /// `None` selects the standard ISO 8859-1 encoding. An unrecognised name
    /// logs a warning and falls back to ISO 8859-1 rather than failing the
    /// session.
    #[must_use]
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            None | Some("ISO8859-1") => Self::Iso8859_1,
            Some("UTF-8") => Self::Utf8,
            Some("UTF-16") => Self::Utf16,
            Some("CP1252") => Self::Cp1252,
            Some(other) => {
                warn!("Clipboard encoding '{other}' is invalid. Defaulting to ISO8859-1.");
                Self::Iso8859_1
            }
        }
    }

    /// Whether this encoding is the one the RFB standard requires.
    #[must_use]
    pub fn is_standard(self) -> bool {
        self == Self::Iso8859_1
    }

    /// The canonical name of this encoding.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Iso8859_1 => "ISO8859-1",
            Self::Utf8 => "UTF-8",
            Self::Utf16 => "UTF-16",
            Self::Cp1252 => "CP1252",
        }
    }

    /// Decodes cut text received from the VNC server into UTF-8.
    ///
    /// Output is capped at [`CLIPBOARD_MAX_LENGTH`] bytes of UTF-8; any
    /// remainder is silently dropped. Malformed input is replaced with
    /// U+FFFD rather than rejected.
    #[must_use]
    pub fn decode(self, data: &[u8]) -> String {
        let mut out = String::new();
        match self {
            Self::Iso8859_1 => {
                for &byte in data {
                    if !push_capped(&mut out, char::from(byte)) {
                        break;
                    }
                }
            }
            Self::Utf8 => {
                for ch in String::from_utf8_lossy(data).chars() {
                    if !push_capped(&mut out, ch) {
                        break;
                    }
                }
            }
            Self::Utf16 => {
                for ch in decode_utf16(data) {
                    if !push_capped(&mut out, ch) {
                        break;
                    }
                }
            }
            Self::Cp1252 => {
                for &byte in data {
                    let code = match byte {
                        0x80..=0x9F => u32::from(CP1252_HIGH[usize::from(byte - 0x80)]),
                        _ => u32::from(byte),
                    };
                    let ch = char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER);
                    if !push_capped(&mut out, ch) {
                        break;
                    }
                }
            }
        }
        out
    }

    /// Encodes UTF-8 text from a viewer into this encoding for transmission
    /// to the VNC server.
    ///
    /// Output is capped at [`CLIPBOARD_MAX_LENGTH`] bytes. Characters with no
    /// representation in a single-byte encoding become `?`.
    #[must_use]
    pub fn encode(self, text: &str) -> Vec<u8> {
        let mut out = BytesMut::new();
        match self {
            Self::Iso8859_1 => {
                for ch in text.chars() {
                    if out.len() >= CLIPBOARD_MAX_LENGTH {
                        break;
                    }
                    out.put_u8(u8::try_from(u32::from(ch)).unwrap_or(b'?'));
                }
            }
            Self::Utf8 => {
                for ch in text.chars() {
                    if out.len() + ch.len_utf8() > CLIPBOARD_MAX_LENGTH {
                        break;
                    }
                    let mut buf = [0u8; 4];
                    out.put_slice(ch.encode_utf8(&mut buf).as_bytes());
                }
            }
            Self::Utf16 => {
                let mut units = [0u16; 2];
                for ch in text.chars() {
                    let units = ch.encode_utf16(&mut units);
                    if out.len() + units.len() * 2 > CLIPBOARD_MAX_LENGTH {
                        break;
                    }
                    for unit in units {
                        out.put_u16_le(*unit);
                    }
                }
            }
            Self::Cp1252 => {
                for ch in text.chars() {
                    if out.len() >= CLIPBOARD_MAX_LENGTH {
                        break;
                    }
                    out.put_u8(encode_cp1252(ch));
                }
            }
        }
        out.to_vec()
    }
}

/// Appends a character unless doing so would exceed the clipboard cap.
/// Returns false once the cap is reached.
fn push_capped(out: &mut String, ch: char) -> bool {
    if out.len() + ch.len_utf8() > CLIPBOARD_MAX_LENGTH {
        return false;
    }
    out.push(ch);
    true
}

/// Decodes UTF-16 bytes, honoring a leading byte order mark. Without a BOM
/// the data is assumed little-endian. A trailing odd byte is ignored.
fn decode_utf16(data: &[u8]) -> Vec<char> {
    let mut big_endian = false;
    let mut units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    match units.first() {
        Some(&0xFEFF) => {
            units.remove(0);
        }
        Some(&0xFFFE) => {
            big_endian = true;
            units.remove(0);
        }
        _ => {}
    }
    if big_endian {
        for unit in &mut units {
            *unit = unit.swap_bytes();
        }
    }

    char::decode_utf16(units)
        .map(|result| result.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Encodes one character as Windows-1252, falling back to `?`.
#[allow(clippy::cast_possible_truncation)] // code points <= 0xFF fit by construction
fn encode_cp1252(ch: char) -> u8 {
    let code = u32::from(ch);
    if let Some(index) = CP1252_HIGH.iter().position(|&high| u32::from(high) == code) {
        return 0x80 + index as u8;
    }
    match code {
        // 0x80..=0x9F is the remapped range handled above.
        0x00..=0x7F | 0xA0..=0xFF => code as u8,
        _ => b'?',
    }
}
