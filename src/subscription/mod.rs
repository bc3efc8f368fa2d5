//! Subscriptions: ack modes, messages, and the consumer-facing handle.
//!
//! Each subscription owns a bounded queue. The dispatcher pushes into it
//! through a shared [`SubscriptionSink`]; the consumer pulls from it
//! through [`Subscription::read`]. A subscription ends exactly once, by
//! unsubscribe, by an ERROR frame, or by losing its connection. The last
//! two leave a terminal [`Message`] carrying a [`ServerError`] as the final
//! item in the queue.

mod message;
mod registry;
mod sink;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::mpsc;

pub use message::{Message, ServerError};
pub use registry::SubscriptionRegistry;
pub use sink::SubscriptionSink;

use crate::client::Connection;
use crate::error::{Result, StompError};
use crate::protocol::{headers, Command, Frame};

/// How messages on a subscription are acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AckMode {
    /// The broker considers a message delivered once sent.
    Auto,
    /// Cumulative: an ACK covers every earlier message on the subscription.
    #[default]
    Client,
    /// Each message is acknowledged on its own.
    ClientIndividual,
}

impl AckMode {
    /// Value of the `ack` header in SUBSCRIBE.
    pub fn as_header(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }
}

impl FromStr for AckMode {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(AckMode::Auto),
            "client" => Ok(AckMode::Client),
            "client-individual" => Ok(AckMode::ClientIndividual),
            other => Err(StompError::Config(format!("unknown ack mode {:?}", other))),
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_header())
    }
}

/// Consumer side of a subscription.
///
/// Dropping the handle completes the subscription locally without
/// sending UNSUBSCRIBE.
pub struct Subscription {
    sink: Arc<SubscriptionSink>,
    rx: mpsc::Receiver<Message>,
    connection: Connection,
}

impl Subscription {
    pub(crate) fn new(
        sink: Arc<SubscriptionSink>,
        rx: mpsc::Receiver<Message>,
        connection: Connection,
    ) -> Self {
        Self {
            sink,
            rx,
            connection,
        }
    }

    #[inline]
    pub fn id(&self) -> &str {
        self.sink.id()
    }

    #[inline]
    pub fn destination(&self) -> &str {
        self.sink.destination()
    }

    #[inline]
    pub fn ack_mode(&self) -> AckMode {
        self.sink.ack_mode()
    }

    /// Whether the subscription can still receive new messages.
    ///
    /// Already-queued messages stay readable after completion.
    pub fn is_active(&self) -> bool {
        !self.sink.is_completed()
    }

    /// Next message, in wire order.
    ///
    /// A terminal message is returned as data. Once the queue is drained
    /// after completion, returns [`StompError::AlreadyCompleted`].
    pub async fn read(&mut self) -> Result<Message> {
        self.rx.recv().await.ok_or(StompError::AlreadyCompleted)
    }

    /// Acknowledge `message`.
    pub async fn ack(&self, message: &Message) -> Result<()> {
        self.connection.ack(message).await
    }

    /// Reject `message`. Not available on STOMP 1.0.
    pub async fn nack(&self, message: &Message) -> Result<()> {
        self.connection.nack(message).await
    }

    /// Stop the subscription.
    ///
    /// Sends UNSUBSCRIBE, then closes the queue without a terminal message.
    /// Returns [`StompError::AlreadyCompleted`] if the subscription had
    /// already ended, including by a race with an ERROR frame or
    /// connection loss.
    pub async fn unsubscribe(&self) -> Result<()> {
        if self.sink.is_completed() {
            return Err(StompError::AlreadyCompleted);
        }

        let frame = Frame::new(Command::Unsubscribe).header(headers::ID, self.id());
        let sent = self.connection.send_frame(&frame).await;

        self.connection.subscriptions().remove(self.id());
        if !self.sink.close() {
            return Err(StompError::AlreadyCompleted);
        }

        tracing::debug!(
            subscription = %self.id(),
            destination = %self.destination(),
            "unsubscribed"
        );
        sent
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.sink.close() {
            self.connection.subscriptions().remove(self.sink.id());
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id())
            .field("destination", &self.destination())
            .field("ack_mode", &self.ack_mode())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_mode_header_values() {
        assert_eq!(AckMode::Auto.as_header(), "auto");
        assert_eq!(AckMode::Client.as_header(), "client");
        assert_eq!(AckMode::ClientIndividual.as_header(), "client-individual");
        assert_eq!(AckMode::default(), AckMode::Client);
    }

    #[test]
    fn test_ack_mode_from_str() {
        for mode in [AckMode::Auto, AckMode::Client, AckMode::ClientIndividual] {
            assert_eq!(mode.as_header().parse::<AckMode>().unwrap(), mode);
        }
        assert!(matches!(
            "sometimes".parse::<AckMode>(),
            Err(StompError::Config(_))
        ));
    }
}
