//! Connection lifecycle.
//!
//! A [`Connection`] is one broker session:
//! 1. Dial (or take a caller-provided stream)
//! 2. CONNECT / CONNECTED handshake; dial and handshake share one
//!    `connect_timeout` deadline
//! 3. Split the stream: writer task owns the write half, dispatcher owns
//!    the read half
//! 4. Subscribe, ack, nack, unsubscribe through the single writer
//! 5. DISCONNECT with a receipt, then tear both tasks down
//!
//! # Example
//!
//! ```ignore
//! use stompwire_client::{AckMode, ClientConfig, Connection};
//!
//! #[tokio::main]
//! async fn main() -> stompwire_client::Result<()> {
//!     let connection = Connection::connect(&ClientConfig::default()).await?;
//!     let mut subscription = connection.subscribe("/topic/fedora", AckMode::Client).await?;
//!
//!     let message = subscription.read().await?;
//!     subscription.ack(&message).await?;
//!
//!     connection.disconnect().await
//! }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::control::{self, Handshake, SessionInfo};
use crate::dispatch::{Dispatcher, Receipts};
use crate::error::{Result, StompError};
use crate::protocol::{headers, Command, Frame, Version};
use crate::subscription::{
    AckMode, Message, ServerError, Subscription, SubscriptionRegistry, SubscriptionSink,
};
use crate::transport::dial;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle, WriterTask};

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Background tasks of a live connection.
struct Tasks {
    reader: JoinHandle<StompError>,
    writer: WriterTask,
}

struct Inner {
    addr: String,
    session: SessionInfo,
    queue_capacity: usize,
    disconnect_timeout: Duration,
    writer: WriterHandle,
    registry: Arc<SubscriptionRegistry>,
    receipts: Receipts,
    state: Arc<Mutex<ConnectionState>>,
    tasks: Mutex<Option<Tasks>>,
    next_receipt: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tasks) = tasks {
            tasks.reader.abort();
            tasks.writer.abort();
        }
    }
}

/// A live broker session. Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Dial `config.addr()` and perform the handshake, both within
    /// `config.connect_timeout`.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        config.validate()?;
        let deadline = Instant::now() + config.connect_timeout;
        let addr = config.addr();
        let stream = dial(&addr, config.connect_timeout).await?;
        Self::establish(stream, addr, config, deadline).await
    }

    /// Perform the handshake over an already-open stream.
    pub async fn handshake<S>(stream: S, config: &ClientConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        config.validate()?;
        let deadline = Instant::now() + config.connect_timeout;
        Self::establish(stream, config.addr(), config, deadline).await
    }

    async fn establish<S>(
        mut stream: S,
        addr: String,
        config: &ClientConfig,
        deadline: Instant,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Handshake {
            session,
            buffer,
            pending,
        } = tokio::time::timeout_at(deadline, control::handshake(&mut stream, config))
            .await
            .map_err(|_| StompError::ConnectTimeout(config.connect_timeout))??;

        let (read_half, write_half) = tokio::io::split(stream);

        let (writer, writer_task) =
            spawn_writer_task(write_half, &config.writer, session.heartbeat_out);

        let registry = Arc::new(SubscriptionRegistry::new());
        let receipts = Receipts::default();
        let state = Arc::new(Mutex::new(ConnectionState::Connected));

        let liveness = (!session.heartbeat_in.is_zero())
            .then(|| session.heartbeat_in + config.heartbeat.error_margin);

        let dispatcher = Dispatcher::new(registry.clone(), receipts.clone(), addr.clone());
        let reader = tokio::spawn({
            let state = state.clone();
            async move {
                let reason = dispatcher.serve(read_half, buffer, pending, liveness).await;
                {
                    let mut state = lock(&state);
                    if *state == ConnectionState::Connected {
                        *state = ConnectionState::Disconnected;
                    }
                }
                dispatcher.finish(reason).await
            }
        });

        tracing::info!(
            addr = %addr,
            version = %session.version,
            server = session.server.as_deref().unwrap_or("unknown"),
            "connected"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                addr,
                session,
                queue_capacity: config.queue_capacity,
                disconnect_timeout: config.disconnect_timeout,
                writer,
                registry,
                receipts,
                state,
                tasks: Mutex::new(Some(Tasks {
                    reader,
                    writer: writer_task,
                })),
                next_receipt: AtomicU64::new(0),
            }),
        })
    }

    /// Remote address.
    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// What the broker agreed to during the handshake.
    pub fn session(&self) -> &SessionInfo {
        &self.inner.session
    }

    /// Negotiated protocol version.
    pub fn version(&self) -> Version {
        self.inner.session.version
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    pub(crate) fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    /// Subscribe to `destination`.
    ///
    /// The subscription is routable before SUBSCRIBE is written, so no
    /// MESSAGE can arrive ahead of it. Fails with
    /// [`StompError::ConnectionClosed`] once the connection is ending.
    pub async fn subscribe(&self, destination: &str, ack_mode: AckMode) -> Result<Subscription> {
        if self.state() != ConnectionState::Connected {
            return Err(StompError::ConnectionClosed);
        }

        let registry = &self.inner.registry;
        let id = registry.next_id();
        let (sink, rx) =
            SubscriptionSink::new(id.as_str(), destination, ack_mode, self.inner.queue_capacity);
        registry.insert(sink.clone())?;

        let frame = Frame::new(Command::Subscribe)
            .header(headers::ID, id.as_str())
            .header(headers::DESTINATION, destination)
            .header(headers::ACK, ack_mode.as_header());

        if let Err(e) = self.send_frame(&frame).await {
            registry.remove(&id);
            sink.close();
            return Err(e);
        }

        tracing::debug!(
            subscription = %id,
            destination = %destination,
            ack = %ack_mode,
            "subscribe sent"
        );
        Ok(Subscription::new(sink, rx, self.clone()))
    }

    /// Acknowledge `message`.
    pub async fn ack(&self, message: &Message) -> Result<()> {
        self.acknowledge(Command::Ack, message).await
    }

    /// Reject `message`. Not available on STOMP 1.0.
    pub async fn nack(&self, message: &Message) -> Result<()> {
        self.acknowledge(Command::Nack, message).await
    }

    async fn acknowledge(&self, command: Command, message: &Message) -> Result<()> {
        let frame = build_ack_frame(command, message, self.version())?;
        self.send_frame(&frame)
            .await
            .map_err(|e| StompError::Ack(e.to_string()))
    }

    /// Queue `frame` on the writer, encoded for the negotiated version.
    pub async fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.inner
            .writer
            .send(OutboundFrame::new(frame, self.version()))
            .await
    }

    /// End the session.
    ///
    /// Remaining subscriptions get a terminal "connection closed" message.
    /// If the broker is still there, DISCONNECT is sent and its RECEIPT
    /// awaited up to `disconnect_timeout`. Both tasks are stopped either
    /// way. A second call returns [`StompError::ConnectionClosed`].
    pub async fn disconnect(&self) -> Result<()> {
        let tasks = lock(&self.inner.tasks).take();
        let Some(tasks) = tasks else {
            return Err(StompError::ConnectionClosed);
        };

        let live = {
            let mut state = lock(&self.inner.state);
            let live = *state == ConnectionState::Connected && !tasks.reader.is_finished();
            *state = ConnectionState::Closing;
            live
        };

        for sink in self.inner.registry.drain() {
            let closed = ServerError::new("connection closed");
            if tokio::time::timeout(self.inner.disconnect_timeout, sink.fail(closed))
                .await
                .is_err()
            {
                tracing::debug!(
                    subscription = %sink.id(),
                    "terminal message not queued, consumer not reading"
                );
            }
        }

        let result = if live {
            self.send_disconnect().await
        } else {
            Err(StompError::ConnectionClosed)
        };

        tasks.reader.abort();
        if let Err(e) = tasks.writer.close().await {
            tracing::debug!(addr = %self.inner.addr, error = %e, "writer stopped with error");
        }
        self.inner.receipts.close();

        *lock(&self.inner.state) = ConnectionState::Disconnected;
        tracing::info!(addr = %self.inner.addr, "disconnected");
        result
    }

    async fn send_disconnect(&self) -> Result<()> {
        let receipt = format!(
            "disconnect-{}",
            self.inner.next_receipt.fetch_add(1, Ordering::Relaxed)
        );
        let waiter = self.inner.receipts.wait_for(receipt.as_str());

        let frame = Frame::new(Command::Disconnect).header(headers::RECEIPT, receipt.as_str());
        self.send_frame(&frame).await?;

        match tokio::time::timeout(self.inner.disconnect_timeout, waiter).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(StompError::ConnectionClosed),
            Err(_) => {
                tracing::debug!(receipt = %receipt, "no receipt for DISCONNECT");
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.inner.addr)
            .field("version", &self.inner.session.version)
            .field("state", &self.state())
            .finish()
    }
}

/// Build ACK or NACK for `message`.
///
/// | Version | Headers |
/// |---------|---------|
/// | 1.2 | `id` (the message's `ack` header) |
/// | 1.1 | `message-id`, `subscription` |
/// | 1.0 | `message-id` (ACK only) |
pub fn build_ack_frame(command: Command, message: &Message, version: Version) -> Result<Frame> {
    if message.is_terminal() {
        return Err(StompError::Ack(
            "terminal message cannot be acknowledged".to_string(),
        ));
    }
    if message.ack_mode == AckMode::Auto {
        return Err(StompError::Ack(format!(
            "subscription {} uses auto acknowledgment",
            message.subscription
        )));
    }
    if command == Command::Nack && version == Version::V1_0 {
        return Err(StompError::Ack("NACK requires STOMP 1.1 or later".to_string()));
    }

    let id = message
        .ack_id(version)
        .ok_or_else(|| StompError::Ack("message has no ack id".to_string()))?;

    let frame = Frame::new(command);
    Ok(match version {
        Version::V1_2 => frame.header(headers::ID, id),
        Version::V1_1 => frame
            .header(headers::MESSAGE_ID, id)
            .header(headers::SUBSCRIPTION, message.subscription.as_str()),
        Version::V1_0 => frame.header(headers::MESSAGE_ID, id),
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn message(ack_mode: AckMode) -> Message {
        let frame = Frame::new(Command::Message)
            .header("subscription", "sub-0")
            .header("message-id", "m-42")
            .header("ack", "7")
            .with_body(Bytes::from_static(b"payload"));
        Message::from_frame(frame, ack_mode)
    }

    #[test]
    fn test_ack_frame_1_2() {
        let frame =
            build_ack_frame(Command::Ack, &message(AckMode::Client), Version::V1_2).unwrap();
        assert_eq!(frame.command, Command::Ack);
        assert_eq!(frame.headers, vec![("id".to_string(), "7".to_string())]);
    }

    #[test]
    fn test_ack_frame_1_1() {
        let frame =
            build_ack_frame(Command::Nack, &message(AckMode::ClientIndividual), Version::V1_1)
                .unwrap();
        assert_eq!(frame.command, Command::Nack);
        assert_eq!(frame.get("message-id"), Some("m-42"));
        assert_eq!(frame.get("subscription"), Some("sub-0"));
    }

    #[test]
    fn test_ack_frame_1_0() {
        let frame =
            build_ack_frame(Command::Ack, &message(AckMode::Client), Version::V1_0).unwrap();
        assert_eq!(frame.headers, vec![("message-id".to_string(), "m-42".to_string())]);
    }

    #[test]
    fn test_nack_rejected_on_1_0() {
        let result = build_ack_frame(Command::Nack, &message(AckMode::Client), Version::V1_0);
        assert!(matches!(result, Err(StompError::Ack(_))));
    }

    #[test]
    fn test_auto_mode_cannot_ack() {
        let result = build_ack_frame(Command::Ack, &message(AckMode::Auto), Version::V1_2);
        assert!(matches!(result, Err(StompError::Ack(_))));
    }

    #[test]
    fn test_terminal_cannot_ack() {
        let terminal =
            Message::terminal("sub-0", "/topic/a", AckMode::Client, ServerError::new("x"));
        let result = build_ack_frame(Command::Ack, &terminal, Version::V1_2);
        assert!(matches!(result, Err(StompError::Ack(_))));
    }

    #[test]
    fn test_missing_ack_id() {
        let frame = Frame::new(Command::Message).header("subscription", "sub-0");
        let message = Message::from_frame(frame, AckMode::Client);
        let result = build_ack_frame(Command::Ack, &message, Version::V1_1);
        assert!(matches!(result, Err(StompError::Ack(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_uses_remaining_deadline() {
        let (client, _silent_broker) = tokio::io::duplex(1024);
        let config = ClientConfig::default();
        assert!(config.connect_timeout > Duration::from_secs(1));

        // Dialing already used all but one second of the budget.
        let started = Instant::now();
        let result =
            Connection::establish(client, config.addr(), &config, started + Duration::from_secs(1))
                .await;

        assert!(matches!(result, Err(StompError::ConnectTimeout(_))));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Closing.to_string(), "closing");
    }
}
