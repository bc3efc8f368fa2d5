//! Wire format encoding and header escaping.
//!
//! A STOMP frame on the wire:
//! ```text
//! COMMAND\n
//! key:value\n
//! key:value\n
//! \n
//! body bytes...\0
//! ```
//!
//! Since 1.1, header names and values are escaped (`\\`, `\n`, `\c`,
//! and `\r` for 1.2) on every frame except CONNECT and CONNECTED.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use super::Frame;
use crate::error::{Result, StompError};

/// Byte that terminates every frame body.
pub const NUL: u8 = 0;

/// Default maximum encoded frame size (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Header names used by the client.
pub mod headers {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const ACK: &str = "ack";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const DESTINATION: &str = "destination";
    pub const HEART_BEAT: &str = "heart-beat";
    pub const HOST: &str = "host";
    pub const ID: &str = "id";
    pub const LOGIN: &str = "login";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const PASSCODE: &str = "passcode";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const SERVER: &str = "server";
    pub const SESSION: &str = "session";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const VERSION: &str = "version";
}

/// Frame command token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // client frames
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    // server frames
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// The command token as written on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// Parse a command token.
    pub fn parse(token: &str) -> Option<Self> {
        let command = match token {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        };
        Some(command)
    }

    /// CONNECT, STOMP and CONNECTED are never escaped.
    #[inline]
    pub fn is_handshake(&self) -> bool {
        matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Negotiated protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Version {
    #[default]
    V1_0,
    V1_1,
    V1_2,
}

impl Version {
    /// Version string used in `accept-version` and `version` headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V1_0 => "1.0",
            Version::V1_1 => "1.1",
            Version::V1_2 => "1.2",
        }
    }

    /// Parse a version string.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "1.0" => Some(Version::V1_0),
            "1.1" => Some(Version::V1_1),
            "1.2" => Some(Version::V1_2),
            _ => None,
        }
    }

    /// Whether headers of regular frames are escaped.
    #[inline]
    pub fn escapes_headers(&self) -> bool {
        *self >= Version::V1_1
    }

    /// All versions, oldest first.
    pub const ALL: [Version; 3] = [Version::V1_0, Version::V1_1, Version::V1_2];
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Escape a header name or value.
pub fn escape(value: &str, version: Version) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            '\r' if version >= Version::V1_2 => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Undo [`escape`]. Undefined escape sequences are a protocol error.
pub fn unescape(value: &str, version: Version) -> Result<String> {
    if !value.contains('\\') {
        return Ok(value.to_string());
    }

    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some('r') if version >= Version::V1_2 => out.push('\r'),
            Some(other) => {
                return Err(StompError::Protocol(format!(
                    "undefined header escape \\{}",
                    other
                )))
            }
            None => {
                return Err(StompError::Protocol(
                    "header ends with a lone backslash".to_string(),
                ))
            }
        }
    }
    Ok(out)
}

/// Encode a frame into its wire form.
///
/// A `content-length` header is added when the body is non-empty and the
/// frame does not carry one already.
pub fn encode_frame(frame: &Frame, version: Version) -> Bytes {
    let escaping = version.escapes_headers() && !frame.command.is_handshake();
    let mut buf = BytesMut::with_capacity(64 + frame.body.len());

    buf.put_slice(frame.command.as_str().as_bytes());
    buf.put_u8(b'\n');

    for (key, value) in &frame.headers {
        if escaping {
            buf.put_slice(escape(key, version).as_bytes());
            buf.put_u8(b':');
            buf.put_slice(escape(value, version).as_bytes());
        } else {
            buf.put_slice(key.as_bytes());
            buf.put_u8(b':');
            buf.put_slice(value.as_bytes());
        }
        buf.put_u8(b'\n');
    }

    if !frame.body.is_empty() && !frame.contains(headers::CONTENT_LENGTH) {
        buf.put_slice(format!("{}:{}\n", headers::CONTENT_LENGTH, frame.body.len()).as_bytes());
    }

    buf.put_u8(b'\n');
    buf.put_slice(&frame.body);
    buf.put_u8(NUL);
    buf.freeze()
}
