//! Frame struct with header accessors.
//!
//! Headers are kept as an ordered list: STOMP allows repeated header
//! names and the first occurrence wins. The body uses `bytes::Bytes` so
//! it can be handed to a [`Message`](crate::subscription::Message)
//! without copying.
//!
//! # Example
//!
//! ```
//! use stompwire_client::protocol::{Command, Frame};
//!
//! let frame = Frame::new(Command::Message)
//!     .header("destination", "/topic/x")
//!     .header("destination", "/topic/ignored");
//!
//! assert_eq!(frame.get("destination"), Some("/topic/x"));
//! assert_eq!(frame.headers.len(), 2);
//! ```

use bytes::Bytes;

use super::wire_format::{headers, Command};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command token.
    pub command: Command,
    /// Headers in wire order (duplicates allowed).
    pub headers: Vec<(String, String)>,
    /// Body bytes (zero-copy via `bytes::Bytes`).
    pub body: Bytes,
}

impl Frame {
    /// Create a frame with no headers and an empty body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Append a header (builder style).
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Replace the body (builder style).
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the frame carries `key` at least once.
    #[inline]
    pub fn contains(&self, key: &str) -> bool {
        self.headers.iter().any(|(k, _)| k == key)
    }

    /// The `subscription` header.
    #[inline]
    pub fn subscription(&self) -> Option<&str> {
        self.get(headers::SUBSCRIPTION)
    }

    /// The `content-type` header, or empty.
    #[inline]
    pub fn content_type(&self) -> &str {
        self.get(headers::CONTENT_TYPE).unwrap_or_default()
    }

    /// The `destination` header, or empty.
    #[inline]
    pub fn destination(&self) -> &str {
        self.get(headers::DESTINATION).unwrap_or_default()
    }
}
