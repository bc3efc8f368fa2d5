//! Messages handed to consumers, and the error they may carry.

use std::fmt;

use bytes::Bytes;

use super::AckMode;
use crate::protocol::{headers, Frame, Version};

/// An ERROR frame from the broker, or a synthetic equivalent when the
/// connection carrying a subscription goes away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// `message` header of the ERROR frame, or a synthetic description.
    pub message: String,
    /// The offending frame, when there was one.
    pub frame: Option<Frame>,
}

impl ServerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            frame: None,
        }
    }

    /// Build from an ERROR frame. Falls back to the body when the frame
    /// has no `message` header.
    pub fn from_frame(frame: Frame) -> Self {
        let message = match frame.get(headers::MESSAGE) {
            Some(message) => message.to_string(),
            None => String::from_utf8_lossy(&frame.body).trim().to_string(),
        };
        Self {
            message,
            frame: Some(frame),
        }
    }

    /// The connection went away under the subscription.
    pub fn connection_lost(reason: impl fmt::Display) -> Self {
        Self::new(format!("connection lost: {}", reason))
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// One delivery from a subscription.
///
/// Regular messages come from MESSAGE frames. A terminal message has an
/// embedded [`ServerError`] and is always the last one a subscription
/// yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub destination: String,
    pub content_type: String,
    /// Headers in wire order, duplicates kept.
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Id of the subscription that received it.
    pub subscription: String,
    pub ack_mode: AckMode,
    error: Option<ServerError>,
}

impl Message {
    /// Take apart a MESSAGE frame.
    pub fn from_frame(frame: Frame, ack_mode: AckMode) -> Self {
        let destination = frame.destination().to_string();
        let content_type = frame.content_type().to_string();
        let subscription = frame.subscription().unwrap_or_default().to_string();
        Self {
            destination,
            content_type,
            subscription,
            headers: frame.headers,
            body: frame.body,
            ack_mode,
            error: None,
        }
    }

    /// The message that ends a subscription.
    pub fn terminal(
        subscription: impl Into<String>,
        destination: impl Into<String>,
        ack_mode: AckMode,
        error: ServerError,
    ) -> Self {
        let (headers, body) = match &error.frame {
            Some(frame) => (frame.headers.clone(), frame.body.clone()),
            None => (Vec::new(), Bytes::new()),
        };
        let content_type = error
            .frame
            .as_ref()
            .map(|f| f.content_type().to_string())
            .unwrap_or_default();
        Self {
            destination: destination.into(),
            content_type,
            headers,
            body,
            subscription: subscription.into(),
            ack_mode,
            error: Some(error),
        }
    }

    /// First value for `key`.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The embedded error of a terminal message.
    #[inline]
    pub fn error(&self) -> Option<&ServerError> {
        self.error.as_ref()
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.error.is_some()
    }

    /// Whether the consumer is expected to ACK this message.
    #[inline]
    pub fn should_ack(&self) -> bool {
        !self.is_terminal() && self.ack_mode != AckMode::Auto
    }

    /// The value that identifies this message in ACK/NACK.
    ///
    /// STOMP 1.2 uses the `ack` header; earlier versions use `message-id`.
    pub fn ack_id(&self, version: Version) -> Option<&str> {
        match version {
            Version::V1_2 => self
                .header(headers::ACK)
                .or_else(|| self.header(headers::MESSAGE_ID)),
            Version::V1_0 | Version::V1_1 => self.header(headers::MESSAGE_ID),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;

    fn message_frame() -> Frame {
        Frame::new(Command::Message)
            .header("destination", "/topic/fedora")
            .header("message-id", "m-1")
            .header("subscription", "sub-0")
            .header("ack", "7")
            .header("x-dup", "first")
            .header("x-dup", "second")
            .header("content-type", "application/json")
            .with_body(Bytes::from_static(b"{}"))
    }

    #[test]
    fn test_from_frame() {
        let msg = Message::from_frame(message_frame(), AckMode::Client);

        assert_eq!(msg.destination, "/topic/fedora");
        assert_eq!(msg.content_type, "application/json");
        assert_eq!(msg.subscription, "sub-0");
        assert_eq!(&msg.body[..], b"{}");
        assert_eq!(msg.header("x-dup"), Some("first"));
        assert_eq!(msg.headers.len(), 7);
        assert!(!msg.is_terminal());
        assert!(msg.should_ack());
    }

    #[test]
    fn test_ack_id_by_version() {
        let msg = Message::from_frame(message_frame(), AckMode::Client);
        assert_eq!(msg.ack_id(Version::V1_2), Some("7"));
        assert_eq!(msg.ack_id(Version::V1_1), Some("m-1"));
        assert_eq!(msg.ack_id(Version::V1_0), Some("m-1"));
    }

    #[test]
    fn test_auto_mode_never_acks() {
        let msg = Message::from_frame(message_frame(), AckMode::Auto);
        assert!(!msg.should_ack());
    }

    #[test]
    fn test_terminal_message() {
        let frame = Frame::new(Command::Error)
            .header("message", "bad destination")
            .header("subscription", "sub-3")
            .with_body(Bytes::from_static(b"details"));
        let msg = Message::terminal(
            "sub-3",
            "/queue/x",
            AckMode::Client,
            ServerError::from_frame(frame),
        );

        assert!(msg.is_terminal());
        assert!(!msg.should_ack());
        assert_eq!(msg.error().map(|e| e.message.as_str()), Some("bad destination"));
        assert_eq!(&msg.body[..], b"details");
        assert_eq!(msg.destination, "/queue/x");
    }

    #[test]
    fn test_server_error_falls_back_to_body() {
        let frame = Frame::new(Command::Error).with_body(Bytes::from_static(b"oops\n"));
        assert_eq!(ServerError::from_frame(frame).message, "oops");
    }

    #[test]
    fn test_connection_lost_display() {
        let err = ServerError::connection_lost("eof");
        assert_eq!(err.to_string(), "connection lost: eof");
        assert!(err.frame.is_none());
    }
}
